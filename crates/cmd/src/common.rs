use anyhow::{Context, Result};
use crowdcount::{
    Controller, CrowdConfig, RefreshReport, SchemaChoice, Snapshot, StepStatus, UploadFile,
    UploadReport, config_path, load_config,
};
use crowdcount::ident::Identifier;
use diagnostics::*;
use std::path::{Path, PathBuf};

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub config: Option<PathBuf>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub new_schema: Option<String>,
}

impl Target {
    pub fn load_config(&self) -> Result<CrowdConfig> {
        let path = config_path(self.config.as_deref());
        let shown = path.display().to_string();
        debug!("Loading configuration from: {shown}", shown: shown);
        load_config(&path).with_context(|| format!("Failed to load configuration from {shown}"))
    }

    /// `--database`, falling back to the configured database
    pub fn database(&self, config: &CrowdConfig) -> Result<Identifier> {
        let name = self.database.as_deref().unwrap_or(&config.database);
        Ok(Identifier::parse(name)?)
    }

    /// `--schema` / `--new-schema`, falling back to the configured schema
    pub fn schema_choice(&self, config: &CrowdConfig) -> Result<SchemaChoice> {
        let choice = match (&self.schema, &self.new_schema) {
            (None, None) => SchemaChoice::resolve(Some(config.schema.as_str()), None),
            (schema, new_schema) => SchemaChoice::resolve(schema.as_deref(), new_schema.as_deref()),
        };
        Ok(choice?)
    }

    pub fn controller(&self) -> Result<Controller> {
        let config = self.load_config()?;
        let database = self.database(&config)?;
        let schema = self.schema_choice(&config)?;
        Controller::from_config(&config, &database, &schema)
            .context("Failed to set up the session")
    }
}

/// Read local files into upload entries; unreadable paths are reported and skipped
pub async fn read_files(paths: &[PathBuf]) -> Vec<UploadFile> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match UploadFile::from_path(Path::new(path)).await {
            Ok(file) => files.push(file),
            Err(e) => println!("Error reading {}: {}", path.display(), e),
        }
    }
    files
}

pub fn print_snapshot(snapshot: Option<&Snapshot>) -> Result<()> {
    match snapshot {
        Some(snapshot) if !snapshot.is_empty() => {
            println!("{}", snapshot.pretty()?);
            println!(
                "{} row(s), fetched {}",
                snapshot.len(),
                snapshot.fetched_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        _ => println!("No data available. Upload some files to get started!"),
    }
    Ok(())
}

pub fn print_upload_report(report: &UploadReport) {
    for name in &report.already_uploaded {
        println!("Skipped {name}: already uploaded in this session");
    }
    for outcome in report.successes() {
        println!("Uploaded: {}", outcome.name);
    }
    for outcome in report.failures() {
        if let crowdcount::stage::UploadStatus::Failed(message) = &outcome.status {
            println!("{message}");
        }
    }
    print_refresh_report(&report.refresh);
}

pub fn print_refresh_report(report: &RefreshReport) {
    match &report.refresh {
        StepStatus::Done => println!("Stage refreshed successfully!"),
        StepStatus::Skipped => println!("Stage refresh skipped: nothing was uploaded"),
        StepStatus::Failed(message) => println!("{message}"),
    }
    if let Some(settle) = &report.settle {
        if settle.is_ready() {
            println!("Directory table: {settle}");
        } else {
            println!("Directory table may still be refreshing: {settle}");
        }
    }
    match &report.reload {
        StepStatus::Done => println!("Data refreshed successfully!"),
        StepStatus::Skipped => {}
        StepStatus::Failed(message) => println!("{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CrowdConfig {
        CrowdConfig::from_yaml_str(
            "account_url: https://xy12345.snowflakecomputing.com\ntoken: t\nschema: CONFERENCES\n\
             storage:\n  type: s3\n  bucket: conference-snaps\n",
        )
        .expect("valid config")
    }

    #[test]
    fn test_schema_defaults_to_config() {
        let choice = Target::default().schema_choice(&config()).expect("choice");
        assert_eq!(choice, SchemaChoice::Existing(crowdcount::ident::Identifier::parse("CONFERENCES").expect("valid")));
    }

    #[test]
    fn test_database_flag_overrides_config() {
        assert_eq!(
            Target::default().database(&config()).expect("database").as_str(),
            "KAMESH_DEMOS"
        );

        let target = Target {
            database: Some("SUMMIT_DB".to_string()),
            ..Target::default()
        };
        assert_eq!(target.database(&config()).expect("database").as_str(), "SUMMIT_DB");

        let target = Target {
            database: Some("not valid".to_string()),
            ..Target::default()
        };
        assert!(target.database(&config()).is_err());
    }

    #[test]
    fn test_new_schema_flag() {
        let target = Target {
            new_schema: Some("SUMMIT_2025".to_string()),
            ..Target::default()
        };
        let choice = target.schema_choice(&config()).expect("choice");
        assert!(choice.is_new());
    }

    #[test]
    fn test_empty_schema_is_rejected() {
        let target = Target {
            schema: Some(String::new()),
            ..Target::default()
        };
        let err = target.schema_choice(&config()).expect_err("schema required");
        assert!(err.to_string().contains("Schema name is required"));
    }

    #[tokio::test]
    async fn test_read_files_skips_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("hall.jpg");
        std::fs::write(&present, b"jpeg").expect("write");

        let files = read_files(&[present, dir.path().join("missing.jpg")]).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "hall.jpg");
    }
}
