use crate::error::CrowdError;
use crate::ident::{Identifier, QualifiedName};
use crate::presign::{DEFAULT_PRESIGN_TTL_SECS, MAX_PRESIGN_TTL_SECS};
use crate::stage::StageBacking;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CROWDCOUNT_CONFIG";

/// Environment variable consulted when the file carries no token
pub const TOKEN_ENV: &str = "CROWDCOUNT_TOKEN";

pub const DEFAULT_CONFIG_FILE: &str = "crowdcount.yaml";

/// Credential string that never shows up in logs or debug output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_declassified(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// How the bearer token is to be interpreted by the SQL API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    #[default]
    ProgrammaticAccessToken,
    Oauth,
    KeypairJwt,
}

impl TokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header
    pub fn header_value(self) -> &'static str {
        match self {
            TokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
            TokenType::Oauth => "OAUTH",
            TokenType::KeypairJwt => "KEYPAIR_JWT",
        }
    }
}

/// Location behind the upload stages, written directly by uploads
///
/// Stages are created as external stages over this location, so whatever is
/// written here is what the directory table lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory that is a mount of the bucket at `url`
    Local { path: String, url: String },
    /// S3 bucket written through the S3 API
    S3 {
        bucket: String,
        #[serde(default)]
        region: String,
        #[serde(default)]
        key: Secret,
        #[serde(default)]
        secret: Secret,
        #[serde(default)]
        endpoint: String,
        #[serde(default)]
        prefix: String,
        /// Integration the stage reads through; without one the key pair is used
        #[serde(default)]
        storage_integration: Option<String>,
    },
}

/// Wait strategy between a stage refresh and the re-query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SettleConfig {
    Fixed {
        delay_ms: u64,
    },
    Poll {
        min_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: usize,
    },
}

impl Default for SettleConfig {
    fn default() -> Self {
        SettleConfig::Poll {
            min_delay_ms: 250,
            max_delay_ms: 4_000,
            max_attempts: 8,
        }
    }
}

/// Connection, stage and table settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdConfig {
    /// Account URL, e.g. `https://xy12345.snowflakecomputing.com`
    pub account_url: String,
    #[serde(default)]
    pub token: Secret,
    #[serde(default)]
    pub token_type: TokenType,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    pub storage: StorageConfig,
    #[serde(default)]
    pub settle: SettleConfig,
}

fn default_database() -> String {
    "KAMESH_DEMOS".to_string()
}

fn default_schema() -> String {
    "CONFERENCES".to_string()
}

fn default_stage() -> String {
    "snaps".to_string()
}

fn default_table() -> String {
    "kamesh_demos.conferences.smart_crowd_counter".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_presign_ttl_secs() -> u64 {
    DEFAULT_PRESIGN_TTL_SECS
}

impl CrowdConfig {
    /// Parse YAML, fill the token from the environment if needed, validate
    pub fn from_yaml_str(content: &str) -> Result<Self, CrowdError> {
        let mut config: CrowdConfig = serde_yaml_ng::from_str(content)?;
        if config.token.is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV) {
                config.token = Secret::new(token);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CrowdError> {
        let url = url::Url::parse(&self.account_url)
            .map_err(|e| CrowdError::config(format!("account_url {:?}: {}", self.account_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrowdError::config(format!(
                "account_url must be http(s), got {}",
                url.scheme()
            )));
        }

        if self.token.is_empty() {
            return Err(CrowdError::config(format!(
                "token is required (set it in the file or via {TOKEN_ENV})"
            )));
        }

        Identifier::parse(&self.database)?;
        Identifier::parse(&self.schema)?;
        Identifier::parse(&self.stage)?;
        QualifiedName::parse(&self.table)?;
        for optional in [&self.warehouse, &self.role].into_iter().flatten() {
            Identifier::parse(optional)?;
        }

        if self.timeout_secs == 0 {
            return Err(CrowdError::config("timeout_secs must be greater than 0"));
        }
        if self.presign_ttl_secs == 0 || self.presign_ttl_secs > MAX_PRESIGN_TTL_SECS {
            return Err(CrowdError::config(format!(
                "presign_ttl_secs must be between 1 and {MAX_PRESIGN_TTL_SECS}"
            )));
        }

        match &self.storage {
            StorageConfig::Local { path, .. } if path.trim().is_empty() => {
                return Err(CrowdError::config("storage.path cannot be empty"));
            }
            StorageConfig::S3 { bucket, .. } if bucket.trim().is_empty() => {
                return Err(CrowdError::config("storage.bucket cannot be empty"));
            }
            _ => {}
        }
        StageBacking::from_config(&self.storage)?;

        if let SettleConfig::Poll {
            min_delay_ms,
            max_delay_ms,
            max_attempts,
        } = self.settle
        {
            if max_attempts == 0 {
                return Err(CrowdError::config("settle.max_attempts must be greater than 0"));
            }
            if min_delay_ms > max_delay_ms {
                return Err(CrowdError::config(
                    "settle.min_delay_ms cannot exceed settle.max_delay_ms",
                ));
            }
        }

        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CrowdConfig, CrowdError> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        CrowdError::config(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    CrowdConfig::from_yaml_str(&content)
}

/// Configuration path: explicit argument, then `CROWDCOUNT_CONFIG`, then the default
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
    }
}
