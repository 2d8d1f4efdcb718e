use thiserror::Error;

/// Error taxonomy for the CDC engine.
///
/// `Transient` never crosses a thread boundary: the reader retries
/// internally and only escalates to `RedoFormat`/`Runtime` once a retry
/// budget is exhausted. Every other variant is caught at the top of its
/// owning worker thread, logged, and turned into a shared shutdown signal.
#[derive(Error, Debug)]
pub enum CdcError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("redo format error: {0}")]
    RedoFormat(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CdcError>;
