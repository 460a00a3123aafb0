use std::path::{Path, PathBuf};

use percolate_core::parse_size;
use serde::Deserialize;

use crate::error::PipelineError;

/// Options this builder declares to the deployment orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredConfig {
    pub max_lambda_size: &'static str,
}

pub const BUILDER_CONFIG: DeclaredConfig = DeclaredConfig {
    max_lambda_size: "5mb",
};

/// Directory to read the launcher template and bridge from instead of the
/// embedded copies.
pub const ASSETS_ENV: &str = "PERCOLATE_ASSETS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PercolateConfig {
    pub build: BuildConfig,
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub max_lambda_size: String,
    pub npm_bin: String,
    pub yarn_bin: String,
    /// Install the toolchains concurrently instead of one after another.
    pub parallel_toolchain_installs: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_lambda_size: BUILDER_CONFIG.max_lambda_size.into(),
            npm_bin: "npm".into(),
            yarn_bin: "yarn".into(),
            parallel_toolchain_installs: false,
        }
    }
}

/// Where the launcher template and runtime bridge come from.
///
/// `None` means the copy compiled into this crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub launcher_template: Option<PathBuf>,
    pub bridge: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        match std::env::var_os(ASSETS_ENV).map(PathBuf::from) {
            Some(dir) => Self {
                launcher_template: Some(dir.join("launcher.js")),
                bridge: Some(dir.join("bridge.js")),
            },
            None => Self {
                launcher_template: None,
                bridge: None,
            },
        }
    }
}

impl PercolateConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(PipelineError::IoError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content)
            .map_err(|e| PipelineError::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Load `path` if given, else `./percolate.toml` if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new("percolate.toml");
                if local.exists() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// The configured maximum lambda size in bytes.
    pub fn max_lambda_bytes(&self) -> Result<u64, PipelineError> {
        parse_size(&self.build.max_lambda_size).map_err(|e| {
            PipelineError::ConfigError(format!("build.max_lambda_size: {e}"))
        })
    }
}
