use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelensError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("API request failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelensError>;
