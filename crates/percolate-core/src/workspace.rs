use std::path::{Path, PathBuf};

use crate::entrypoint::Entrypoint;

/// Subtree holding the user's files and their dependencies.
pub const USER_DIR: &str = "user";

/// Which auxiliary toolchain a subtree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolchainKind {
    Bundler,
    Transpiler,
}

impl ToolchainKind {
    /// Directory name of the toolchain's subtree under the workspace root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Bundler => "ncc",
            Self::Transpiler => "coffee",
        }
    }
}

/// The three disjoint subtrees of one scratch root.
///
/// Layout:
/// ```text
/// root/
///   user/     -- user files, user node_modules
///   ncc/      -- bundler toolchain
///   coffee/   -- transpiler toolchain
/// ```
///
/// Each subtree gets its own `package.json`, so no two of them share a
/// dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub user: PathBuf,
    pub bundler: PathBuf,
    pub transpiler: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            user: root.join(USER_DIR),
            bundler: root.join(ToolchainKind::Bundler.dir_name()),
            transpiler: root.join(ToolchainKind::Transpiler.dir_name()),
            root,
        }
    }

    pub fn toolchain(&self, kind: ToolchainKind) -> &Path {
        match kind {
            ToolchainKind::Bundler => &self.bundler,
            ToolchainKind::Transpiler => &self.transpiler,
        }
    }

    /// Directory containing the entrypoint inside the user subtree.
    pub fn entrypoint_dir(&self, entrypoint: &Entrypoint) -> PathBuf {
        match entrypoint.dirname() {
            "" => self.user.clone(),
            dir => self.user.join(dir),
        }
    }
}
