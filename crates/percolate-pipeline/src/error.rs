use percolate_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("dependency installation failed: {0}")]
    ProvisioningError(String),

    #[error("build script failed: {0}")]
    BuildHookError(String),

    #[error("transpilation failed: {0}")]
    TranspileError(String),

    #[error("bundling failed: {0}")]
    BundleError(String),

    #[error("artifact assembly failed: {0}")]
    AssemblyError(String),

    #[error("artifact is {size} bytes, exceeding the maximum of {max} bytes")]
    ArtifactTooLarge { size: u64, max: u64 },

    #[error("entrypoint '{0}' is not one of the input files")]
    InvalidEntrypoint(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    CoreError(#[from] CoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
