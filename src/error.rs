/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
///
/// Reserved for infrastructure failures (storage, IO, HTTP plumbing).
/// Repair outcomes, like a restart that exits non-zero or a dependency
/// that cannot be fixed, are data rather than errors and never surface
/// here.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("{0}")]
    Internal(String),
}
