//! Upload stage management.
//!
//! Every stage is an external stage over one [`StageBacking`] location:
//! `database.schema.stage` owns the `DATABASE/SCHEMA/STAGE/` area below it.
//! DDL and directory refreshes go through the [`QueryGateway`]; the bytes go
//! straight to the object store holding that area, under the same key the
//! stage lists them by.

use crate::config::{Secret, StorageConfig};
use crate::error::CrowdError;
use crate::gateway::{QueryGateway, Statement};
use crate::ident::Identifier;
use bytes::Bytes;
use diagnostics::*;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// File extensions accepted by the uploader
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// `database.schema.stage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLocation {
    database: Identifier,
    schema: Identifier,
    name: Identifier,
}

impl StageLocation {
    pub fn new(database: &str, schema: &str, name: &str) -> Result<Self, CrowdError> {
        Ok(Self {
            database: Identifier::parse(database)?,
            schema: Identifier::parse(schema)?,
            name: Identifier::parse(name)?,
        })
    }

    pub fn database(&self) -> &Identifier {
        &self.database
    }

    pub fn schema(&self) -> &Identifier {
        &self.schema
    }

    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    /// Stage reference form, `@database.schema.stage`
    pub fn at_fqn(&self) -> String {
        format!("@{}", self.fqn())
    }

    /// Area of the backing location owned by this stage, `DATABASE/SCHEMA/STAGE`
    ///
    /// Unquoted identifiers resolve case-insensitively, so the key is upper-cased.
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.database.as_str().to_ascii_uppercase(),
            self.schema.as_str().to_ascii_uppercase(),
            self.name.as_str().to_ascii_uppercase()
        )
    }
}

/// How the platform authenticates against the backing location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAccess {
    /// Publicly readable bucket
    Anonymous,
    /// A storage integration granted to the stage owner
    Integration(Identifier),
    /// Access key pair, the same one used for uploads
    Credentials { key: Secret, secret: Secret },
}

/// External location behind every stage, plus the key prefix uploads use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBacking {
    url: String,
    key_prefix: String,
    access: StageAccess,
}

impl StageBacking {
    /// Bucket written through the S3 API; the stage URL is `s3://bucket/prefix`
    pub fn s3(bucket: &str, prefix: &str) -> Result<Self, CrowdError> {
        let prefix = prefix.trim_matches('/');
        let url = if prefix.is_empty() {
            format!("s3://{}", bucket.trim())
        } else {
            format!("s3://{}/{}", bucket.trim(), prefix)
        };
        Self::validate_url(&url)?;
        Ok(Self {
            url,
            key_prefix: prefix.to_string(),
            access: StageAccess::Anonymous,
        })
    }

    /// Local directory that is a mount of `url`, so its root is the URL root
    pub fn mounted(url: &str) -> Result<Self, CrowdError> {
        let url = url.trim().trim_end_matches('/').to_string();
        Self::validate_url(&url)?;
        Ok(Self {
            url,
            key_prefix: String::new(),
            access: StageAccess::Anonymous,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, CrowdError> {
        match config {
            StorageConfig::Local { url, .. } => Self::mounted(url),
            StorageConfig::S3 {
                bucket,
                key,
                secret,
                prefix,
                storage_integration,
                ..
            } => {
                let access = match storage_integration {
                    Some(name) => StageAccess::Integration(Identifier::parse(name)?),
                    None if !key.is_empty() => StageAccess::Credentials {
                        key: key.clone(),
                        secret: secret.clone(),
                    },
                    None => StageAccess::Anonymous,
                };
                Ok(Self::s3(bucket, prefix)?.with_access(access))
            }
        }
    }

    pub fn with_access(mut self, access: StageAccess) -> Self {
        self.access = access;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn access(&self) -> &StageAccess {
        &self.access
    }

    /// URL the stage for `location` is created over, with a trailing slash
    pub fn stage_url(&self, location: &StageLocation) -> String {
        format!("{}/{}/", self.url, location.storage_key())
    }

    /// Object store key of `file_name` inside the stage for `location`
    pub fn object_path(&self, location: &StageLocation, file_name: &str) -> ObjectPath {
        if self.key_prefix.is_empty() {
            ObjectPath::from(format!("{}/{}", location.storage_key(), file_name))
        } else {
            ObjectPath::from(format!(
                "{}/{}/{}",
                self.key_prefix,
                location.storage_key(),
                file_name
            ))
        }
    }

    fn validate_url(raw: &str) -> Result<(), CrowdError> {
        let url = url::Url::parse(raw)
            .map_err(|e| CrowdError::config(format!("stage url {raw:?}: {e}")))?;
        if url.scheme() != "s3" || url.host_str().is_none_or(str::is_empty) {
            return Err(CrowdError::config(format!(
                "stage url must look like s3://bucket[/prefix], got {raw:?}"
            )));
        }
        if raw.contains(['\'', '\\']) {
            return Err(CrowdError::config(format!(
                "stage url cannot contain quotes or backslashes: {raw:?}"
            )));
        }
        Ok(())
    }

    /// `URL = ...` and access clauses of `CREATE STAGE`
    fn stage_clauses(&self, location: &StageLocation) -> String {
        let mut clauses = format!("URL = '{}'", self.stage_url(location));
        match &self.access {
            StageAccess::Anonymous => {}
            StageAccess::Integration(name) => {
                clauses.push_str(&format!(" STORAGE_INTEGRATION = {name}"));
            }
            StageAccess::Credentials { key, secret } => {
                clauses.push_str(&format!(
                    " CREDENTIALS = (AWS_KEY_ID = {} AWS_SECRET_KEY = {})",
                    string_literal(key.as_declassified()),
                    string_literal(secret.as_declassified())
                ));
            }
        }
        clauses
    }
}

/// Single-quoted SQL string literal
fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// One file picked in the uploader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file; the stage name is the file's base name
    pub async fn from_path(path: &Path) -> Result<Self, CrowdError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CrowdError::UnsupportedUpload {
                name: path.display().to_string(),
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, bytes))
    }

    /// Reject names that are not plain image file names
    pub fn check(&self) -> Result<(), CrowdError> {
        let unsupported = || CrowdError::UnsupportedUpload {
            name: self.name.clone(),
        };
        if self.name.is_empty()
            || self.name.contains(['/', '\\'])
            || self.name.starts_with('.')
        {
            return Err(unsupported());
        }
        let extension = Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(unsupported)?;
        if ACCEPTED_EXTENSIONS
            .iter()
            .any(|accepted| extension.eq_ignore_ascii_case(accepted))
        {
            Ok(())
        } else {
            Err(unsupported())
        }
    }
}

/// Result of one file in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Uploaded { bytes: u64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub name: String,
    pub status: UploadStatus,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, UploadStatus::Uploaded { .. })
    }
}

/// Stage DDL, uploads, and directory refreshes
pub struct StageManager {
    gateway: Arc<dyn QueryGateway>,
    store: Arc<dyn ObjectStore>,
    backing: StageBacking,
}

impl StageManager {
    /// `store` must hold the objects `backing` points the stages at
    pub fn new(
        gateway: Arc<dyn QueryGateway>,
        store: Arc<dyn ObjectStore>,
        backing: StageBacking,
    ) -> Self {
        Self {
            gateway,
            store,
            backing,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn QueryGateway> {
        &self.gateway
    }

    pub fn backing(&self) -> &StageBacking {
        &self.backing
    }

    /// Create the schema and the external stage if they do not exist
    pub async fn ensure_stage(&self, location: &StageLocation) -> Result<(), CrowdError> {
        let schema = format!("{}.{}", location.database(), location.schema());
        let stage = location.fqn();
        let url = self.backing.stage_url(location);
        info!("Ensuring stage {stage} over {url}", stage: stage, url: url);

        self.gateway
            .execute(&Statement::new(format!("CREATE SCHEMA IF NOT EXISTS {schema}")))
            .await?;
        let create = Statement::new(format!(
            "CREATE STAGE IF NOT EXISTS {stage} {} \
             ENCRYPTION = (TYPE = 'AWS_SSE_S3') \
             DIRECTORY = (ENABLE = TRUE AUTO_REFRESH = TRUE)",
            self.backing.stage_clauses(location)
        ));
        let create = match self.backing.access() {
            StageAccess::Credentials { .. } => create.sensitive(),
            _ => create,
        };
        self.gateway.execute(&create).await?;
        Ok(())
    }

    /// Write one file to `stage/file_name`, replacing any existing object
    pub async fn upload(
        &self,
        location: &StageLocation,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<u64, CrowdError> {
        let path = self.backing.object_path(location, file_name);
        let size = bytes.len() as u64;
        let stage = location.at_fqn();
        let key = path.to_string();
        debug!("Uploading {file_name} ({size} bytes) to {stage} at {key}",
            file_name: file_name, size: size, stage: stage, key: key);
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(size)
    }

    /// Upload files one at a time; a failure only affects its own file
    pub async fn upload_batch(
        &self,
        location: &StageLocation,
        files: &[UploadFile],
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let name = file.name.clone();
            let result = match file.check() {
                Ok(()) => self.upload(location, &file.name, file.bytes.clone()).await,
                Err(e) => Err(e),
            };
            let status = match result {
                Ok(bytes) => {
                    info!("Uploaded {name}", name: name);
                    UploadStatus::Uploaded { bytes }
                }
                Err(e) => {
                    let message = format!("Error uploading {name}: {e}");
                    error!("{message}", message: message);
                    UploadStatus::Failed(message)
                }
            };
            outcomes.push(FileOutcome { name, status });
        }
        outcomes
    }

    /// Ask the directory table to pick up new objects
    pub async fn refresh_stage(&self, location: &StageLocation) -> Result<(), CrowdError> {
        let stage = location.fqn();
        info!("Refreshing stage {stage}", stage: stage);
        self.gateway
            .execute(&Statement::new(format!("ALTER STAGE {stage} REFRESH")))
            .await?;
        Ok(())
    }

    /// Which of `names` the directory table currently lists
    pub async fn visible_paths(
        &self,
        location: &StageLocation,
        names: &[String],
    ) -> Result<HashSet<String>, CrowdError> {
        if names.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let statement = names.iter().fold(
            Statement::new(format!(
                "SELECT RELATIVE_PATH FROM DIRECTORY({}) WHERE RELATIVE_PATH IN ({placeholders})",
                location.at_fqn()
            )),
            |statement, name| statement.bind_text(name.as_str()),
        );
        let result = self.gateway.execute(&statement).await?;
        Ok(result.strings("RELATIVE_PATH")?.into_iter().collect())
    }
}

/// Build the object store that holds the objects of every stage
pub fn build_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, CrowdError> {
    match config {
        StorageConfig::Local { path, url } => {
            info!("Stage storage: local mount {path} of {url}", path: path, url: url);
            std::fs::create_dir_all(path)?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(path)?;
            Ok(Arc::new(store))
        }
        StorageConfig::S3 {
            bucket,
            region,
            key,
            secret,
            endpoint,
            ..
        } => {
            info!("Stage storage: bucket {bucket} region {region}", bucket: bucket, region: region);
            use object_store::{ClientOptions, aws::AmazonS3Builder};

            let client_options =
                ClientOptions::new().with_timeout(std::time::Duration::from_secs(30));

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_client_options(client_options);
            if !region.is_empty() {
                builder = builder.with_region(region);
            }
            if !key.is_empty() {
                builder = builder
                    .with_access_key_id(key.as_declassified())
                    .with_secret_access_key(secret.as_declassified());
            }
            if !endpoint.is_empty() {
                builder = builder.with_endpoint(endpoint);
            }

            Ok(Arc::new(builder.build()?))
        }
    }
}
