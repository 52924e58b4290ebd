use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unknown catalog: {0}")]
    UnknownCatalog(String),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("Batch {0} not found")]
    BatchNotFound(String),

    #[error("Refusing to continue: {0}")]
    Safety(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
