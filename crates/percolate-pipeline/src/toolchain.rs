use std::path::PathBuf;

use percolate_core::{FileMap, FileRef, ToolchainKind, WorkspacePaths};
use serde_json::json;

/// License field written into every synthesized toolchain manifest.
pub const MANIFEST_LICENSE: &str = "UNLICENSED";

/// One auxiliary tool the pipeline installs into its own subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toolchain {
    pub kind: ToolchainKind,
    pub package: &'static str,
    pub version: &'static str,
    /// Executable under `node_modules/.bin` the pipeline invokes.
    pub bin: &'static str,
}

pub const NCC: Toolchain = Toolchain {
    kind: ToolchainKind::Bundler,
    package: "@zeit/ncc",
    version: "0.16.0",
    bin: "ncc",
};

pub const COFFEE: Toolchain = Toolchain {
    kind: ToolchainKind::Transpiler,
    package: "coffeescript",
    version: "2.3.2",
    bin: "coffee",
};

/// Every toolchain a build needs, each pinned to one version.
pub const TOOLCHAINS: &[Toolchain] = &[NCC, COFFEE];

impl Toolchain {
    pub fn name(&self) -> &'static str {
        self.kind.dir_name()
    }

    /// The installed executable inside this toolchain's subtree.
    pub fn bin_path(&self, paths: &WorkspacePaths) -> PathBuf {
        paths
            .toolchain(self.kind)
            .join("node_modules")
            .join(".bin")
            .join(self.bin)
    }

    /// A `package.json` depending on exactly this toolchain's pinned package.
    pub fn manifest(&self) -> serde_json::Value {
        json!({
            "license": MANIFEST_LICENSE,
            "dependencies": { self.package: self.version },
        })
    }

    /// The manifest as a one-file FileMap, ready to download into the
    /// toolchain's subtree.
    pub fn manifest_files(&self) -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "package.json".into(),
            FileRef::blob(self.manifest().to_string()),
        );
        files
    }
}
