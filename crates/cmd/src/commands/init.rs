use anyhow::{Context, Result};
use diagnostics::*;
use std::path::Path;

const EXAMPLE_CONFIG: &str = "\
# Smart crowd counter configuration
account_url: https://xy12345.snowflakecomputing.com
# Leave empty to read CROWDCOUNT_TOKEN from the environment
token: \"\"
token_type: PROGRAMMATIC_ACCESS_TOKEN
warehouse: COMPUTE_WH
role: SYSADMIN

database: KAMESH_DEMOS
schema: CONFERENCES
stage: snaps
table: kamesh_demos.conferences.smart_crowd_counter

timeout_secs: 60
presign_ttl_secs: 604800

# Bucket behind the stages. Each stage is created as an external stage over
# s3://<bucket>/<prefix>/<DATABASE>/<SCHEMA>/<STAGE>/ and uploads are written there.
storage:
  type: s3
  bucket: conference-snaps
  region: us-west-2
  prefix: crowd
  # Preferred: let the stage read the bucket through a storage integration
  storage_integration: CONFERENCE_SNAPS_INT
  # Used for uploads, and for the stage itself when no integration is set
  key: AKIA...
  secret: ...
# A local directory works only when it is a mount of the bucket:
# storage:
#   type: local
#   path: /mnt/conference-snaps/crowd
#   url: s3://conference-snaps/crowd

# Wait for the directory table after a refresh
settle:
  mode: poll
  min_delay_ms: 250
  max_delay_ms: 4000
  max_attempts: 8
";

/// Write an example configuration file unless one exists
pub async fn init_command(path: &Path) -> Result<()> {
    let shown = path.display().to_string();
    if path.exists() {
        info!("Configuration file already exists: {shown}", shown: shown);
        println!("Configuration file already exists: {shown}");
        return Ok(());
    }

    tokio::fs::write(path, EXAMPLE_CONFIG)
        .await
        .with_context(|| format!("Failed to create configuration file: {shown}"))?;

    println!("Created example configuration file: {shown}");
    println!("Edit account_url and token (or set CROWDCOUNT_TOKEN), then run: crowd setup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcount::CrowdConfig;

    #[test]
    fn test_example_config_parses() {
        let config = CrowdConfig::from_yaml_str(&EXAMPLE_CONFIG.replace("token: \"\"", "token: t"))
            .expect("example is valid");
        assert_eq!(config.stage, "snaps");
        assert_eq!(config.presign_ttl_secs, 604_800);
        assert!(matches!(config.storage, crowdcount::config::StorageConfig::S3 { .. }));
    }

    #[tokio::test]
    async fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crowdcount.yaml");

        init_command(&path).await.expect("create");
        std::fs::write(&path, "account_url: keep\n").expect("write");
        init_command(&path).await.expect("second run");

        assert_eq!(std::fs::read_to_string(&path).expect("read"), "account_url: keep\n");
    }
}
