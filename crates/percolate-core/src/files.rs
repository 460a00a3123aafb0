use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mode given to files that do not carry one: a regular file, `rw-r--r--`.
pub const DEFAULT_MODE: u32 = 0o100644;

/// A virtual file: either materialized content or a pointer at a file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileRef {
    Blob { data: Vec<u8>, mode: u32 },
    FsRef { fs_path: PathBuf, mode: u32 },
}

/// Relative `/`-separated path → virtual file.
///
/// A `BTreeMap` so that anything derived from it (archives, digests, logs)
/// comes out in a stable order.
pub type FileMap = BTreeMap<String, FileRef>;

impl FileRef {
    pub fn blob(data: impl Into<Vec<u8>>) -> Self {
        Self::Blob {
            data: data.into(),
            mode: DEFAULT_MODE,
        }
    }

    /// Blob with explicit mode bits; `None` falls back to [`DEFAULT_MODE`].
    pub fn blob_with_mode(data: impl Into<Vec<u8>>, mode: Option<u32>) -> Self {
        Self::Blob {
            data: data.into(),
            mode: mode.unwrap_or(DEFAULT_MODE),
        }
    }

    pub fn fs_ref(fs_path: impl Into<PathBuf>) -> Self {
        Self::FsRef {
            fs_path: fs_path.into(),
            mode: DEFAULT_MODE,
        }
    }

    /// Point at an existing file, taking its mode from the filesystem.
    ///
    /// Symlinks are not followed, so a link keeps its own mode.
    pub fn fs_ref_from_disk(fs_path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let fs_path = fs_path.into();
        let metadata = std::fs::symlink_metadata(&fs_path)?;
        Ok(Self::FsRef {
            mode: mode_of(&metadata),
            fs_path,
        })
    }

    pub fn mode(&self) -> u32 {
        match self {
            Self::Blob { mode, .. } | Self::FsRef { mode, .. } => *mode,
        }
    }

    /// The on-disk location, if this file is backed by one.
    pub fn fs_path(&self) -> Option<&Path> {
        match self {
            Self::Blob { .. } => None,
            Self::FsRef { fs_path, .. } => Some(fs_path),
        }
    }

    /// Read the file's bytes. Blobs are borrowed, fs refs are read from disk.
    pub fn contents(&self) -> Result<Cow<'_, [u8]>, CoreError> {
        match self {
            Self::Blob { data, .. } => Ok(Cow::Borrowed(data)),
            Self::FsRef { fs_path, .. } => Ok(Cow::Owned(std::fs::read(fs_path)?)),
        }
    }
}

/// Join path segments into a FileMap key.
///
/// Empty and `.` segments are dropped, so `join_key(&["user", ".", "a.js"])`
/// is `user/a.js`, matching what a top-level entrypoint's dirname produces.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject keys that are absolute or climb out of their root.
pub(crate) fn validate_key(key: &str) -> Result<(), CoreError> {
    let path = Path::new(key);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if key.is_empty() || escapes {
        return Err(CoreError::InvalidPath(key.to_string()));
    }
    Ok(())
}

/// Materialize `files` under `dest`.
///
/// Blobs are written out, fs refs are copied. Every file keeps its mode.
/// Returns a FileMap with the same keys, each now pointing at its on-disk
/// copy under `dest`.
pub async fn download(files: &FileMap, dest: &Path) -> Result<FileMap, CoreError> {
    let mut downloaded = FileMap::new();

    for (key, file) in files {
        validate_key(key)?;
        let target = dest.join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match file {
            FileRef::Blob { data, .. } => tokio::fs::write(&target, data).await?,
            FileRef::FsRef { fs_path, .. } => {
                if fs_path != &target {
                    tokio::fs::copy(fs_path, &target).await?;
                }
            }
        }
        set_mode(&target, file.mode()).await?;

        downloaded.insert(
            key.clone(),
            FileRef::FsRef {
                fs_path: target,
                mode: file.mode(),
            },
        );
    }

    tracing::debug!(
        count = downloaded.len(),
        dest = %dest.display(),
        "Files downloaded"
    );

    Ok(downloaded)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
pub(crate) fn mode_of(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_MODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn join_key_drops_dot_segments() {
        assert_eq!(join_key(&["user", ".", "index.js"]), "user/index.js");
        assert_eq!(join_key(&["user", "", "index.js"]), "user/index.js");
        assert_eq!(join_key(&["user", "api", "x.node"]), "user/api/x.node");
        assert_eq!(join_key(&["user", "api/v1", "h.js"]), "user/api/v1/h.js");
    }

    #[test]
    fn rejects_escaping_keys() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("api/handler.coffee").is_ok());
    }

    #[tokio::test]
    async fn download_writes_blobs_and_copies_refs() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("outside.txt");
        std::fs::write(&src, "from disk").unwrap();

        let mut files = FileMap::new();
        files.insert("api/handler.coffee".into(), FileRef::blob("x = 1"));
        files.insert("static/readme.txt".into(), FileRef::fs_ref(&src));

        let dest = tmp.path().join("user");
        let downloaded = download(&files, &dest).await.unwrap();

        assert_eq!(downloaded.len(), 2);
        let handler = downloaded["api/handler.coffee"].fs_path().unwrap();
        assert_eq!(handler, dest.join("api/handler.coffee"));
        assert_eq!(std::fs::read_to_string(handler).unwrap(), "x = 1");
        assert_eq!(
            std::fs::read_to_string(dest.join("static/readme.txt")).unwrap(),
            "from disk"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let mut files = FileMap::new();
        files.insert(
            "bin/run.sh".into(),
            FileRef::blob_with_mode("#!/bin/sh\n", Some(0o100755)),
        );

        download(&files, tmp.path()).await.unwrap();
        let mode = std::fs::metadata(tmp.path().join("bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn download_rejects_escaping_key() {
        let tmp = TempDir::new().unwrap();
        let mut files = FileMap::new();
        files.insert("../escape.js".into(), FileRef::blob(""));

        let err = download(&files, tmp.path()).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath(_)));
    }

    #[test]
    fn blob_contents_are_borrowed() {
        let file = FileRef::blob("hello");
        assert_eq!(file.contents().unwrap().as_ref(), b"hello");
        assert_eq!(file.mode(), DEFAULT_MODE);
        assert!(file.fs_path().is_none());
    }
}
