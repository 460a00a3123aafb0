use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::CoreError;
use crate::files::{FileMap, FileRef, mode_of};

/// A compiled path glob.
///
/// Supported syntax: `**` (any number of path segments), `*` (anything but
/// `/`), `?` (one character but `/`), and `{a,b}` alternation. Patterns are
/// matched against `/`-separated paths relative to the glob root, and dotfiles
/// are matched like any other file.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if pattern.starts_with('/') {
            return Err(invalid("pattern must be relative"));
        }

        let mut source = String::from("^");
        let mut chars = pattern.chars().peekable();
        let mut in_braces = false;

        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        source.push_str("(?:.*/)?");
                    } else {
                        source.push_str(".*");
                    }
                }
                '*' => source.push_str("[^/]*"),
                '?' => source.push_str("[^/]"),
                '{' if !in_braces => {
                    in_braces = true;
                    source.push_str("(?:");
                }
                '}' if in_braces => {
                    in_braces = false;
                    source.push(')');
                }
                ',' if in_braces => source.push('|'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        if in_braces {
            return Err(invalid("unclosed '{'"));
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    /// True when the pattern names exactly one path.
    fn is_literal(&self) -> bool {
        !self.pattern.contains(['*', '?', '{'])
    }

    /// Leading directory segments that contain no glob syntax.
    ///
    /// The final segment is never included, so `user/*.lock` walks `user` and
    /// `user/node_modules/**` walks `user/node_modules`.
    fn literal_base(&self) -> String {
        let segments: Vec<&str> = self.pattern.split('/').collect();
        let dirs = segments.split_last().map_or(&[][..], |(_, dirs)| dirs);
        dirs.iter()
            .take_while(|s| !s.contains(['*', '?', '{']))
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Collect every non-directory entry under `root` whose relative path matches
/// `pattern`, as fs refs carrying their on-disk mode.
///
/// A pattern whose base directory does not exist matches nothing. A pattern
/// without glob syntax is looked up directly instead of walked.
pub fn glob(pattern: &str, root: &Path) -> Result<FileMap, CoreError> {
    let compiled = GlobPattern::new(pattern)?;
    if compiled.is_literal() {
        return glob_literal(pattern, root);
    }
    let base = compiled.literal_base();
    let walk_root = if base.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&base)
    };

    let mut matched = FileMap::new();
    if !walk_root.is_dir() {
        return Ok(matched);
    }

    for entry in WalkDir::new(&walk_root).min_depth(1).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if compiled.matches(&key) {
            let mode = mode_of(&entry.metadata()?);
            matched.insert(
                key,
                FileRef::FsRef {
                    fs_path: entry.path().to_path_buf(),
                    mode,
                },
            );
        }
    }

    tracing::debug!(pattern, count = matched.len(), "Glob matched");
    Ok(matched)
}

fn glob_literal(pattern: &str, root: &Path) -> Result<FileMap, CoreError> {
    let path = root.join(pattern);
    let mut matched = FileMap::new();
    let metadata = match std::fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matched),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_dir() {
        matched.insert(
            pattern.to_string(),
            FileRef::FsRef {
                fs_path: path,
                mode: mode_of(&metadata),
            },
        );
    }
    tracing::debug!(pattern, count = matched.len(), "Glob matched");
    Ok(matched)
}
