use std::io;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BoxfishError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No player with id {0}")]
    PlayerNotFound(Uuid),

    #[error("No annotation with id {0}")]
    AnnotationNotFound(Uuid),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("An I/O error occurred: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BoxfishError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BoxfishError::InvalidArgument(message.into())
    }
}
