use thiserror::Error;

/// Main error type for fixdump
#[derive(Error, Debug)]
pub enum DumpError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed command input, reported before the store is touched
    #[error("Usage error: {0}")]
    Usage(String),

    /// Type identifier that does not resolve to a model in the store's schema
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Snapshot replay failures
    #[error("Load error: {0}")]
    Load(String),
}

impl DumpError {
    /// Usage errors are the only ones surfaced with the usage exit code.
    pub fn is_usage(&self) -> bool {
        matches!(self, DumpError::Usage(_))
    }
}

/// Convenient Result type using DumpError
pub type Result<T> = std::result::Result<T, DumpError>;
