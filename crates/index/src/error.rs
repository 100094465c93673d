use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt artifact {path}: {source}")]
    CorruptArtifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job directory is locked by another process")]
    Locked,

    #[error(transparent)]
    Identity(#[from] mailsift_identity::IdentityError),

    #[error(transparent)]
    Extract(#[from] mailsift_extract::ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
