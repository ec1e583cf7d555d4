use reqwest::StatusCode;
use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Server { status: StatusCode, message: String },

    #[error("Image upload failed: {0}")]
    Upload(String),

    /// Update or delete attempted on a task that was never persisted.
    #[error("No task id provided")]
    MissingId,

    #[error("No task with id {0}")]
    NotFound(TaskId),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Keyring error: {0}")]
    Keyring(String),
}

impl Error {
    /// True for failures reported by the backend or the network, as opposed
    /// to local validation or configuration problems.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Server { .. } | Self::Upload(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
