// Error types for crowd counter operations

#[derive(Debug, thiserror::Error)]
pub enum CrowdError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Statement {handle} did not complete: {message}")]
    Statement { handle: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Missing column {0} in query result")]
    MissingColumn(String),

    #[error("Invalid row {index}: {reason}")]
    InvalidRow { index: usize, reason: String },

    #[error("Invalid selection: row {index} is outside a snapshot of {len} rows")]
    InvalidSelection { index: usize, len: usize },

    #[error("Unsupported upload {name}: only JPG, JPEG and PNG images are accepted")]
    UnsupportedUpload { name: String },

    #[error("Schema name is required. Select one or enter the name of a new schema")]
    SchemaRequired,

    #[error("Query returned no rows: {0}")]
    EmptyResult(String),

    #[error("No data loaded")]
    NoData,
}

impl CrowdError {
    pub fn invalid_row(index: usize, reason: impl Into<String>) -> Self {
        CrowdError::InvalidRow {
            index,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CrowdError::Config(message.into())
    }
}

/// Non-fatal problem reading a file descriptor
///
/// Kept apart from [`CrowdError`]: a warning degrades one panel, it never
/// aborts an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataWarning {
    #[error("Could not parse file descriptor JSON: {0}")]
    Malformed(String),

    #[error("File descriptor must be a JSON object, found {0}")]
    WrongType(&'static str),

    #[error("File descriptor is missing {0}")]
    MissingField(&'static str),
}
