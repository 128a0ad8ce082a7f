use thiserror::Error;

use crate::types::Target;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The automation surface (browser process or context) could not be
    /// allocated. Aborts the current batch only.
    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Login failed for {target}: {reason}")]
    Login { target: Target, reason: String },

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Locator error: {0}")]
    Locator(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn login(target: Target, reason: impl Into<String>) -> Self {
        Error::Login {
            target,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
