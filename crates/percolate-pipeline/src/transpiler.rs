use std::ffi::OsStr;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use percolate_core::WorkspacePaths;

use crate::error::PipelineError;
use crate::process::run_command;
use crate::toolchain::COFFEE;

/// Compiles every source-dialect file in the user subtree to a sibling `.js`.
pub trait Transpiler: Send + Sync {
    fn transpile<'a>(
        &'a self,
        paths: &'a WorkspacePaths,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;
}

/// Runs the installed `coffee` compiler in whole-directory mode:
/// `coffee --compile --output <user> <user>`.
pub struct CoffeeTranspiler {
    bin: Option<PathBuf>,
}

impl CoffeeTranspiler {
    pub fn new() -> Self {
        Self { bin: None }
    }

    /// Use this `coffee` executable instead of the workspace's toolchain copy.
    pub fn with_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin = Some(path.into());
        self
    }

    fn bin_for(&self, paths: &WorkspacePaths) -> PathBuf {
        self.bin.clone().unwrap_or_else(|| COFFEE.bin_path(paths))
    }
}

impl Default for CoffeeTranspiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transpiler for CoffeeTranspiler {
    fn transpile<'a>(
        &'a self,
        paths: &'a WorkspacePaths,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let bin = self.bin_for(paths);
            let user = paths.user.as_os_str();
            run_command(
                bin.as_os_str(),
                [OsStr::new("--compile"), OsStr::new("--output"), user, user],
                &paths.user,
            )
            .await
            .map_err(PipelineError::TranspileError)?;
            Ok(())
        })
    }
}
