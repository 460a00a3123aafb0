use std::path::Path;

use anyhow::{Context, Result};
use percolate_core::{FileMap, FileRef};
use walkdir::WalkDir;

/// Directories never read from a source tree. Dependencies are reinstalled
/// during provisioning.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Read every file under `dir` into a FileMap keyed by its `/`-separated
/// path relative to `dir`. Entries are fs refs carrying their on-disk mode.
pub fn load_source_dir(dir: &Path) -> Result<FileMap> {
    if !dir.is_dir() {
        anyhow::bail!("source directory {} does not exist", dir.display());
    }

    let mut files = FileMap::new();
    let walker = WalkDir::new(dir).min_depth(1).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file = FileRef::fs_ref_from_disk(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        files.insert(key, file);
    }

    tracing::debug!(count = files.len(), dir = %dir.display(), "Source files loaded");
    Ok(files)
}
