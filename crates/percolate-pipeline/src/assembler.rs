use std::path::PathBuf;

use percolate_core::{CoreError, FileMap, FileRef, Lambda};

use crate::error::PipelineError;

/// `<module>.<export>` the runtime invokes.
pub const HANDLER: &str = "launcher.launcher";
pub const RUNTIME: &str = "nodejs8.10";
pub const LAUNCHER_FILE: &str = "launcher.js";
pub const BRIDGE_FILE: &str = "bridge.js";

/// Runtime bridge compiled into the crate, used when none is configured.
pub const EMBEDDED_BRIDGE: &str = include_str!("../assets/bridge.js");

/// Merges the bundle, the launcher and the runtime bridge into one lambda.
pub struct Assembler {
    bridge: Option<PathBuf>,
    max_size: u64,
}

impl Assembler {
    /// `bridge` of `None` packages [`EMBEDDED_BRIDGE`].
    pub fn new(bridge: Option<PathBuf>, max_size: u64) -> Self {
        Self { bridge, max_size }
    }

    fn bridge_file(&self) -> Result<FileRef, PipelineError> {
        match &self.bridge {
            Some(path) if path.is_file() => Ok(FileRef::fs_ref(path)),
            Some(path) => Err(PipelineError::AssemblyError(format!(
                "runtime bridge not found at {}",
                path.display()
            ))),
            None => Ok(FileRef::blob(EMBEDDED_BRIDGE)),
        }
    }

    pub fn assemble(&self, prepared: FileMap, launcher: FileRef) -> Result<Lambda, PipelineError> {
        let bridge = self.bridge_file()?;

        let mut files = prepared;
        files.insert(LAUNCHER_FILE.into(), launcher);
        files.insert(BRIDGE_FILE.into(), bridge);

        let lambda = Lambda::create(&files, HANDLER, RUNTIME).map_err(|e| match e {
            CoreError::IoError(io) => PipelineError::AssemblyError(io.to_string()),
            other => PipelineError::CoreError(other),
        })?;

        let lambda = lambda.with_max_size(self.max_size).map_err(|e| match e {
            CoreError::LambdaTooLarge { size, max } => PipelineError::ArtifactTooLarge { size, max },
            other => PipelineError::CoreError(other),
        })?;

        tracing::info!(
            files = lambda.files.len(),
            bytes = lambda.size(),
            max_bytes = self.max_size,
            digest = %lambda.digest,
            "Lambda assembled"
        );
        Ok(lambda)
    }
}
