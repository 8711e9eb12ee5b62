use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("AWS SDK S3 error: {0}")]
    S3Sdk(String), // General S3 SDK errors

    #[error("Status queue error: {0}")]
    Queue(String),

    // Aggregate failure raised after the granule retry loop exhausts its
    // budget with at least one file unresolved. Per-file failures were
    // already reported through the status queue before this is raised.
    #[error("One or more files failed to be requested from {archive_bucket}.")]
    RestoreRequest { archive_bucket: String },

    #[error("Reconciliation failed: {0}")]
    Reconcile(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
