use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid file path '{0}': must be relative and must not escape its root")]
    InvalidPath(String),

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid size literal '{0}' (expected e.g. \"5mb\", \"512kb\", \"1048576\")")]
    InvalidSize(String),

    #[error("lambda is {size} bytes, exceeding the maximum of {max} bytes")]
    LambdaTooLarge { size: u64, max: u64 },

    #[error("zip packaging error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("directory walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
