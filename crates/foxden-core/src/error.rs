use thiserror::Error;

#[derive(Debug, Error)]
pub enum FoxdenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Forwarding error: {0}")]
    Forwarding(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Status service error: {0}")]
    Status(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FoxdenError>;
