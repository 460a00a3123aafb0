use std::path::{Path, PathBuf};

use percolate_core::workspace::USER_DIR;
use percolate_core::{FileMap, ToolchainKind, glob};

use crate::error::PipelineError;

/// Lockfile names kept in a snapshot, one per client dialect.
pub const LOCKFILES: &[&str] = &["package-lock.json", "yarn.lock"];

/// Path patterns, relative to the cache root, that make up a snapshot:
/// installed dependency trees and lockfiles of the user subtree and the
/// bundler toolchain.
pub fn cache_patterns() -> Vec<String> {
    [USER_DIR, ToolchainKind::Bundler.dir_name()]
        .iter()
        .flat_map(|dir| {
            std::iter::once(format!("{dir}/node_modules/**"))
                .chain(LOCKFILES.iter().map(move |lock| format!("{dir}/{lock}")))
        })
        .collect()
}

/// Collect every file under `cache_root` matching [`cache_patterns`].
pub fn collect_snapshot(cache_root: &Path) -> Result<FileMap, PipelineError> {
    let mut snapshot = FileMap::new();
    for pattern in cache_patterns() {
        let matched = glob(&pattern, cache_root)?;
        tracing::debug!(%pattern, count = matched.len(), "Cache pattern collected");
        snapshot.extend(matched);
    }
    Ok(snapshot)
}

/// Remove a stale build workspace. A missing directory is not an error.
pub async fn discard_workspace(work_path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_dir_all(work_path).await {
        Ok(()) => {
            tracing::debug!(path = %work_path.display(), "Build workspace removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Default cache location: ~/.percolate/cache/
pub fn default_cache_path() -> PathBuf {
    dirs_path().join("cache")
}

fn dirs_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".percolate")
}
