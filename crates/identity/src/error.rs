use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("match model used before training or loading an artifact")]
    ModelNotTrained,

    #[error("model artifact version {found} is not supported (expected {expected})")]
    UnsupportedModelVersion { found: u32, expected: u32 },

    #[error("malformed model artifact: {0}")]
    MalformedModel(String),

    #[error("feature vector has {got} entries, model expects {expected}")]
    FeatureArity { expected: usize, got: usize },

    #[error("training set produced no labelled pairs")]
    EmptyTrainingSet,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
