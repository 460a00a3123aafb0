use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use percolate_core::workspace::USER_DIR;
use percolate_core::{Entrypoint, FileMap, FileRef, WorkspacePaths, join_key};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::process::run_command;
use crate::toolchain::NCC;

/// File ncc writes the bundled entrypoint to.
const BUNDLE_ENTRY: &str = "index.js";

/// A non-code file the bundler emitted alongside the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleAsset {
    pub source: Vec<u8>,
    pub permissions: Option<u32>,
}

/// One code unit plus the named assets it loads at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    pub code: Vec<u8>,
    pub assets: BTreeMap<String, BundleAsset>,
}

/// Resolves a module graph into a single code unit.
pub trait Bundler: Send + Sync {
    fn name(&self) -> &str;

    fn bundle<'a>(
        &'a self,
        paths: &'a WorkspacePaths,
        input: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<BundleOutput, PipelineError>> + Send + 'a>>;
}

/// Runs the installed `ncc build <input> -o <dir>` and reads back what it wrote.
pub struct NccBundler {
    bin: Option<PathBuf>,
}

impl NccBundler {
    pub fn new() -> Self {
        Self { bin: None }
    }

    /// Use this `ncc` executable instead of the workspace's toolchain copy.
    pub fn with_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin = Some(path.into());
        self
    }

    fn bin_for(&self, paths: &WorkspacePaths) -> PathBuf {
        self.bin.clone().unwrap_or_else(|| NCC.bin_path(paths))
    }
}

impl Default for NccBundler {
    fn default() -> Self {
        Self::new()
    }
}

impl Bundler for NccBundler {
    fn name(&self) -> &str {
        "ncc"
    }

    fn bundle<'a>(
        &'a self,
        paths: &'a WorkspacePaths,
        input: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<BundleOutput, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let out = tempfile::Builder::new()
                .prefix("ncc-out")
                .tempdir_in(&paths.root)?;
            let bin = self.bin_for(paths);

            run_command(
                bin.as_os_str(),
                [
                    OsStr::new("build"),
                    input.as_os_str(),
                    OsStr::new("-o"),
                    out.path().as_os_str(),
                ],
                &paths.root,
            )
            .await
            .map_err(PipelineError::BundleError)?;

            read_bundle_dir(out.path())
        })
    }
}

/// Read a bundler output directory: `index.js` is the code, everything else
/// an asset keyed by its path relative to the directory.
pub fn read_bundle_dir(dir: &Path) -> Result<BundleOutput, PipelineError> {
    let code_path = dir.join(BUNDLE_ENTRY);
    let code = std::fs::read(&code_path).map_err(|e| {
        PipelineError::BundleError(format!(
            "bundler produced no {}: {e}",
            code_path.display()
        ))
    })?;

    let mut assets = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| PipelineError::BundleError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name == BUNDLE_ENTRY {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| PipelineError::BundleError(e.to_string()))?;
        assets.insert(
            name,
            BundleAsset {
                source: std::fs::read(entry.path())?,
                permissions: permissions_of(&metadata),
            },
        );
    }

    Ok(BundleOutput { code, assets })
}

#[cfg(unix)]
fn permissions_of(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn permissions_of(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Place a bundle in the output FileMap.
///
/// The code goes to `user/<entrypoint>`. Every asset goes to
/// `user/<dirname(entrypoint)>/<name>`, so assets can never land on the
/// launcher or bridge at the archive root.
pub fn place_bundle(entrypoint: &Entrypoint, output: BundleOutput) -> FileMap {
    let mut prepared = FileMap::new();
    prepared.insert(
        join_key(&[USER_DIR, entrypoint.as_str()]),
        FileRef::blob(output.code),
    );
    for (name, asset) in output.assets {
        prepared.insert(
            join_key(&[USER_DIR, entrypoint.dirname(), &name]),
            FileRef::blob_with_mode(asset.source, asset.permissions),
        );
    }
    prepared
}

/// Bundle the JavaScript entrypoint found in `files` and place the result.
pub async fn bundle_entrypoint(
    bundler: &dyn Bundler,
    paths: &WorkspacePaths,
    files: &FileMap,
    js_entrypoint: &Entrypoint,
) -> Result<FileMap, PipelineError> {
    let input = files
        .get(js_entrypoint.as_str())
        .and_then(FileRef::fs_path)
        .ok_or_else(|| {
            PipelineError::BundleError(format!(
                "no file on disk for entrypoint {js_entrypoint}"
            ))
        })?;

    tracing::info!(
        bundler = bundler.name(),
        input = %input.display(),
        "Bundling entrypoint"
    );
    let output = bundler.bundle(paths, input).await?;
    tracing::info!(
        code_bytes = output.code.len(),
        assets = output.assets.len(),
        "Bundle produced"
    );

    Ok(place_bundle(js_entrypoint, output))
}
