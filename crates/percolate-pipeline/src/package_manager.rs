use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::error::PipelineError;
use crate::process::run_command;

/// Installs dependencies and runs package scripts.
///
/// Implementations spawn a real package manager, or record calls for testing.
pub trait PackageManager: Send + Sync {
    /// Install the dependencies declared for `dir`. Re-installing into a
    /// populated tree updates it and must not fail.
    fn install<'a>(
        &'a self,
        dir: &'a Path,
        args: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

    /// Run `script` from the `package.json` governing `dir`.
    /// Resolves to `false` without running anything if it is not declared.
    fn run_script<'a>(
        &'a self,
        dir: &'a Path,
        script: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PipelineError>> + Send + 'a>>;
}

/// Which client a directory is managed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Npm,
    Yarn,
}

/// The nearest `package.json` at or above a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedManifest {
    pub package_json: PathBuf,
    pub client: ClientKind,
}

/// Walk up from `dir` to the nearest `package.json`. The project is npm
/// managed if a `package-lock.json` sits beside it and yarn managed otherwise.
pub fn scan_parent_dirs(dir: &Path) -> Option<ScannedManifest> {
    dir.ancestors().find_map(|candidate| {
        let package_json = candidate.join("package.json");
        if !package_json.is_file() {
            return None;
        }
        let client = if candidate.join("package-lock.json").is_file() {
            ClientKind::Npm
        } else {
            ClientKind::Yarn
        };
        Some(ScannedManifest {
            package_json,
            client,
        })
    })
}

/// Whether the manifest at `package_json` declares `scripts.<script>`.
pub fn declares_script(package_json: &Path, script: &str) -> Result<bool, PipelineError> {
    let content = std::fs::read_to_string(package_json)?;
    let manifest: serde_json::Value = serde_json::from_str(&content)?;
    Ok(manifest
        .get("scripts")
        .and_then(|scripts| scripts.get(script))
        .is_some())
}

/// Drives the `npm` and `yarn` command-line clients.
pub struct NodePackageManager {
    npm_bin: String,
    yarn_bin: String,
}

impl NodePackageManager {
    pub fn new() -> Self {
        Self {
            npm_bin: "npm".into(),
            yarn_bin: "yarn".into(),
        }
    }

    /// Override the client binaries, for hosts where they are not on PATH.
    pub fn with_bins(mut self, npm: impl Into<String>, yarn: impl Into<String>) -> Self {
        self.npm_bin = npm.into();
        self.yarn_bin = yarn.into();
        self
    }

    fn install_command(&self, client: ClientKind, dir: &Path, args: &[String]) -> (String, Vec<String>) {
        match client {
            ClientKind::Npm => {
                let mut full = vec!["install".to_string()];
                full.extend(args.iter().cloned());
                (self.npm_bin.clone(), full)
            }
            ClientKind::Yarn => {
                let mut full = vec![
                    "--ignore-engines".to_string(),
                    "--cwd".to_string(),
                    dir.display().to_string(),
                ];
                full.extend(args.iter().cloned());
                (self.yarn_bin.clone(), full)
            }
        }
    }

    fn script_command(&self, client: ClientKind, script: &str) -> (String, Vec<String>) {
        match client {
            ClientKind::Npm => (
                self.npm_bin.clone(),
                vec!["run-script".into(), script.to_string()],
            ),
            ClientKind::Yarn => (self.yarn_bin.clone(), vec!["run".into(), script.to_string()]),
        }
    }
}

impl Default for NodePackageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageManager for NodePackageManager {
    fn install<'a>(
        &'a self,
        dir: &'a Path,
        args: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(scanned) = scan_parent_dirs(dir) else {
                tracing::debug!(dir = %dir.display(), "No package.json; nothing to install");
                return Ok(());
            };

            let (program, full_args) = self.install_command(scanned.client, dir, args);
            tracing::info!(
                dir = %dir.display(),
                client = ?scanned.client,
                "Installing dependencies"
            );
            run_command(OsStr::new(&program), &full_args, dir)
                .await
                .map_err(PipelineError::ProvisioningError)?;
            Ok(())
        })
    }

    fn run_script<'a>(
        &'a self,
        dir: &'a Path,
        script: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(scanned) = scan_parent_dirs(dir) else {
                return Ok(false);
            };
            if !declares_script(&scanned.package_json, script)? {
                tracing::debug!(script, "Script not declared; skipping");
                return Ok(false);
            }

            let (program, full_args) = self.script_command(scanned.client, script);
            tracing::info!(script, dir = %dir.display(), "Running package script");
            run_command(OsStr::new(&program), &full_args, dir)
                .await
                .map_err(PipelineError::BuildHookError)?;
            Ok(true)
        })
    }
}
