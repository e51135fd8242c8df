//! Error types for label-relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
///
/// Anything in here is fatal for the stage that hit it; nothing retries.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Column \"{column}\" not found in table \"{table}\"")]
    MissingColumn { table: String, column: String },

    #[error("No {0} configured")]
    MissingCollaborator(&'static str),
}

/// Tabular store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Table \"{0}\" not found")]
    TableNotFound(String),

    #[error("Row too wide for table {table}: {actual} cells, header has {expected}")]
    RowWidth {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Cell ({row}, {col}) is outside table {table}")]
    OutOfRange { table: String, row: usize, col: usize },

    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Inbound source and outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Fetch from {name} failed: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Document-text extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Upload of {name} failed: {reason}")]
    Upload { name: String, reason: String },

    #[error("OCR conversion of {name} failed: {reason}")]
    Convert { name: String, reason: String },

    #[error("Reading converted document {id} failed: {reason}")]
    Read { id: String, reason: String },

    #[error("Deleting scratch object {id} failed: {reason}")]
    Cleanup { id: String, reason: String },
}

/// Pipeline stage errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Another run holds the lock at {path} (since {since})")]
    Locked { path: String, since: String },

    #[error("Run lock error: {0}")]
    Lock(String),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
