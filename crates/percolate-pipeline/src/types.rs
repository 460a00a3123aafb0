use std::collections::BTreeMap;
use std::path::PathBuf;

use percolate_core::{FileMap, Lambda};

/// Extra install arguments used by the build flow.
pub const BUILD_NPM_ARGUMENTS: &[&str] = &["--prefer-offline"];

/// Input to a build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub files: FileMap,
    pub entrypoint: String,
    /// Scratch root owned by this invocation.
    pub work_path: PathBuf,
}

/// Per-invocation build settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Appended to every dependency install.
    pub npm_arguments: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            npm_arguments: BUILD_NPM_ARGUMENTS.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Input to a cache preparation.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub files: FileMap,
    pub entrypoint: String,
    /// Build workspace to discard.
    pub work_path: PathBuf,
    /// Root that provisioning runs into and the snapshot is taken from.
    pub cache_path: PathBuf,
}

/// Original entrypoint → packaged lambda. Always exactly one entry.
pub type BuildOutput = BTreeMap<String, Lambda>;
