use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use percolate_core::{Entrypoint, FileMap, WorkspacePaths, download};

use crate::error::PipelineError;
use crate::package_manager::PackageManager;
use crate::toolchain::TOOLCHAINS;

/// One dependency install: an optional manifest to write first, and the
/// installs that must finish before it starts.
#[derive(Debug, Clone)]
pub struct InstallNode {
    pub label: String,
    pub dir: PathBuf,
    pub manifest: Option<FileMap>,
    pub depends_on: Vec<usize>,
}

/// A small dependency graph of installs.
///
/// The standard plan has the user install as its root and one node per
/// toolchain depending only on it, so the toolchains form a single wave of
/// mutually independent installs.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    nodes: Vec<InstallNode>,
}

impl InstallPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// User install at the entrypoint's directory, then every toolchain.
    pub fn for_workspace(paths: &WorkspacePaths, entrypoint: &Entrypoint) -> Self {
        let mut plan = Self::new();
        let user = plan.add(InstallNode {
            label: "user".into(),
            dir: paths.entrypoint_dir(entrypoint),
            manifest: None,
            depends_on: vec![],
        });
        for toolchain in TOOLCHAINS {
            plan.add(InstallNode {
                label: toolchain.name().into(),
                dir: paths.toolchain(toolchain.kind).to_path_buf(),
                manifest: Some(toolchain.manifest_files()),
                depends_on: vec![user],
            });
        }
        plan
    }

    /// Add a node, returning its index for use in later `depends_on` lists.
    pub fn add(&mut self, node: InstallNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn nodes(&self) -> &[InstallNode] {
        &self.nodes
    }

    /// Group nodes into waves: every node's dependencies sit in earlier waves.
    /// Within a wave nodes keep insertion order.
    pub fn waves(&self) -> Result<Vec<Vec<usize>>, PipelineError> {
        let mut wave_of: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut placed = 0;
        let mut waves: Vec<Vec<usize>> = Vec::new();

        while placed < self.nodes.len() {
            let current = waves.len();
            let ready: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| wave_of[i].is_none())
                .filter(|&i| {
                    self.nodes[i]
                        .depends_on
                        .iter()
                        .all(|&dep| wave_of.get(dep).copied().flatten().is_some_and(|w| w < current))
                })
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = (0..self.nodes.len())
                    .filter(|&i| wave_of[i].is_none())
                    .map(|i| self.nodes[i].label.as_str())
                    .collect();
                return Err(PipelineError::ProvisioningError(format!(
                    "install plan has a cycle or a missing dependency among: {}",
                    stuck.join(", ")
                )));
            }

            for &i in &ready {
                wave_of[i] = Some(current);
            }
            placed += ready.len();
            waves.push(ready);
        }

        Ok(waves)
    }
}

/// Populates a workspace: user files, user dependencies, toolchains.
pub struct Provisioner {
    package_manager: Arc<dyn PackageManager>,
    parallel: bool,
}

impl Provisioner {
    pub fn new(package_manager: Arc<dyn PackageManager>) -> Self {
        Self {
            package_manager,
            parallel: false,
        }
    }

    /// Run independent installs of a wave concurrently.
    pub fn with_parallel_installs(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Download `files` into the user subtree and run the standard install
    /// plan. Returns the downloaded files, keyed as in `files`.
    ///
    /// Any failed install aborts; nothing is retried.
    pub async fn provision(
        &self,
        files: &FileMap,
        entrypoint: &Entrypoint,
        paths: &WorkspacePaths,
        args: &[String],
    ) -> Result<FileMap, PipelineError> {
        tracing::info!(
            count = files.len(),
            dest = %paths.user.display(),
            "Downloading user files"
        );
        let downloaded = download(files, &paths.user).await?;

        let plan = InstallPlan::for_workspace(paths, entrypoint);
        self.execute(&plan, args).await?;

        Ok(downloaded)
    }

    pub async fn execute(&self, plan: &InstallPlan, args: &[String]) -> Result<(), PipelineError> {
        for wave in plan.waves()? {
            if self.parallel && wave.len() > 1 {
                try_join_all(wave.iter().map(|&i| self.install(&plan.nodes()[i], args))).await?;
            } else {
                for &i in &wave {
                    self.install(&plan.nodes()[i], args).await?;
                }
            }
        }
        Ok(())
    }

    async fn install(&self, node: &InstallNode, args: &[String]) -> Result<(), PipelineError> {
        if let Some(manifest) = &node.manifest {
            tracing::debug!(install = %node.label, dir = %node.dir.display(), "Writing package.json");
            download(manifest, &node.dir).await?;
        }

        tracing::info!(install = %node.label, dir = %node.dir.display(), "Installing dependencies");
        self.package_manager.install(&node.dir, args).await.map_err(|e| match e {
            PipelineError::ProvisioningError(_) => e,
            other => PipelineError::ProvisioningError(format!("{}: {other}", node.label)),
        })
    }
}
