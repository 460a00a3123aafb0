use std::sync::Arc;

use percolate_core::{Entrypoint, FileMap, FileRef, WorkspacePaths};
use tracing::Instrument;

use crate::assembler::Assembler;
use crate::bundler::{Bundler, NccBundler, bundle_entrypoint};
use crate::cache::{collect_snapshot, discard_workspace};
use crate::config::PercolateConfig;
use crate::error::PipelineError;
use crate::launcher::synthesize;
use crate::metrics::BuildMetrics;
use crate::package_manager::{NodePackageManager, PackageManager};
use crate::provision::Provisioner;
use crate::stage::{FailurePolicy, Stage, StageObserver, StageRunner, TracingObserver};
use crate::transpiler::{CoffeeTranspiler, Transpiler};
use crate::types::{BuildOptions, BuildOutput, BuildRequest, CacheRequest};

/// Package script run after dependencies are installed, if the user declares it.
pub const BUILD_SCRIPT: &str = "now-build";

/// Runs the build and cache-preparation flows.
///
/// Build:
/// 1. Provision: download user files, install user deps, install toolchains
/// 2. Run the user's build script
/// 3. Transpile the user subtree (a failure here is logged and skipped)
/// 4. Bundle the JavaScript entrypoint
/// 5. Render the launcher
/// 6. Assemble launcher, bridge and bundle into one lambda
///
/// Every collaborator that touches the outside world is a trait object, so
/// tests can swap in fakes.
pub struct Builder {
    package_manager: Arc<dyn PackageManager>,
    transpiler: Arc<dyn Transpiler>,
    bundler: Arc<dyn Bundler>,
    observer: Arc<dyn StageObserver>,
    metrics: Arc<BuildMetrics>,
    config: PercolateConfig,
}

impl Builder {
    pub fn new(config: PercolateConfig) -> Self {
        let package_manager = NodePackageManager::new()
            .with_bins(config.build.npm_bin.clone(), config.build.yarn_bin.clone());
        Self {
            package_manager: Arc::new(package_manager),
            transpiler: Arc::new(CoffeeTranspiler::new()),
            bundler: Arc::new(NccBundler::new()),
            observer: Arc::new(TracingObserver),
            metrics: Arc::new(BuildMetrics::new()),
            config,
        }
    }

    pub fn with_package_manager(mut self, package_manager: Arc<dyn PackageManager>) -> Self {
        self.package_manager = package_manager;
        self
    }

    pub fn with_transpiler(mut self, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpiler = transpiler;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BuildMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &PercolateConfig {
        &self.config
    }

    /// Build `request.entrypoint` into a lambda keyed by that same entrypoint.
    pub async fn build(
        &self,
        request: &BuildRequest,
        options: &BuildOptions,
    ) -> Result<BuildOutput, PipelineError> {
        let build_id = new_build_id();
        let span = tracing::info_span!("build", build_id = %build_id, entrypoint = %request.entrypoint);

        self.metrics.record_build_started();
        let result = self
            .run_build(&build_id, request, options)
            .instrument(span)
            .await;

        match &result {
            Ok(output) => {
                let bytes = output.values().map(|lambda| lambda.size()).sum();
                self.metrics.record_build_completed(bytes);
            }
            Err(e) => {
                tracing::error!(build_id = %build_id, error = %e, "Build failed");
                self.metrics.record_build_failed();
            }
        }
        result
    }

    async fn run_build(
        &self,
        build_id: &str,
        request: &BuildRequest,
        options: &BuildOptions,
    ) -> Result<BuildOutput, PipelineError> {
        let entrypoint = resolve_entrypoint(&request.entrypoint, &request.files)?;
        let max_size = self.config.max_lambda_bytes()?;
        let paths = WorkspacePaths::new(&request.work_path);
        let runner = StageRunner::new(build_id, self.observer.clone());

        tracing::info!(
            files = request.files.len(),
            work_path = %paths.root.display(),
            "Starting build"
        );

        let provisioner = self.provisioner();
        let downloaded = runner
            .run(
                Stage::Provision,
                FailurePolicy::Fatal,
                provisioner.provision(&request.files, &entrypoint, &paths, &options.npm_arguments),
            )
            .await
            .into_result()?;

        let entrypoint_dir = paths.entrypoint_dir(&entrypoint);
        let ran = runner
            .run(
                Stage::BuildHook,
                FailurePolicy::Fatal,
                self.package_manager.run_script(&entrypoint_dir, BUILD_SCRIPT),
            )
            .await
            .into_result()?;
        if !ran {
            tracing::debug!(script = BUILD_SCRIPT, "Build script not declared");
        }

        let transpiled = runner
            .run(
                Stage::Transpile,
                FailurePolicy::Recoverable,
                self.transpiler.transpile(&paths),
            )
            .await
            .recover()?;
        if transpiled.is_none() {
            tracing::warn!("Transpilation failed; bundling whatever JavaScript is on disk");
            self.metrics.record_transpile_recovered();
        }

        // Both the source path and its .js twin now point at the compiled file.
        let js_entrypoint = entrypoint.js_path();
        let compiled = FileRef::fs_ref(paths.user.join(js_entrypoint.as_str()));
        let mut files = downloaded;
        files.insert(entrypoint.as_str().to_string(), compiled.clone());
        files.insert(js_entrypoint.as_str().to_string(), compiled);

        let prepared = runner
            .run(
                Stage::Bundle,
                FailurePolicy::Fatal,
                bundle_entrypoint(&*self.bundler, &paths, &files, &js_entrypoint),
            )
            .await
            .into_result()?;

        let launcher = runner
            .run(
                Stage::Launcher,
                FailurePolicy::Fatal,
                synthesize(self.config.assets.launcher_template.as_deref(), &js_entrypoint),
            )
            .await
            .into_result()?;

        let assembler = Assembler::new(self.config.assets.bridge.clone(), max_size);
        let lambda = runner
            .run(Stage::Assemble, FailurePolicy::Fatal, async {
                assembler.assemble(prepared, launcher)
            })
            .await
            .into_result()?;

        tracing::info!(
            bytes = lambda.size(),
            files = lambda.files.len(),
            "Build complete"
        );

        let mut output = BuildOutput::new();
        output.insert(entrypoint.to_string(), lambda);
        Ok(output)
    }

    /// Discard the build workspace, provision into the cache root without
    /// extra install arguments, and return the files worth persisting.
    pub async fn prepare_cache(&self, request: &CacheRequest) -> Result<FileMap, PipelineError> {
        let build_id = new_build_id();
        let span = tracing::info_span!(
            "prepare_cache",
            build_id = %build_id,
            entrypoint = %request.entrypoint
        );
        self.run_prepare_cache(&build_id, request)
            .instrument(span)
            .await
    }

    async fn run_prepare_cache(
        &self,
        build_id: &str,
        request: &CacheRequest,
    ) -> Result<FileMap, PipelineError> {
        let entrypoint = resolve_entrypoint(&request.entrypoint, &request.files)?;
        let runner = StageRunner::new(build_id, self.observer.clone());

        discard_workspace(&request.work_path).await?;

        let paths = WorkspacePaths::new(&request.cache_path);
        let provisioner = self.provisioner();
        runner
            .run(
                Stage::Provision,
                FailurePolicy::Fatal,
                provisioner.provision(&request.files, &entrypoint, &paths, &[]),
            )
            .await
            .into_result()?;

        let snapshot = runner
            .run(Stage::CacheSnapshot, FailurePolicy::Fatal, async {
                collect_snapshot(&request.cache_path)
            })
            .await
            .into_result()?;

        tracing::info!(
            files = snapshot.len(),
            cache_path = %request.cache_path.display(),
            "Cache prepared"
        );
        self.metrics.record_cache_prepared(snapshot.len());
        Ok(snapshot)
    }

    fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.package_manager.clone())
            .with_parallel_installs(self.config.build.parallel_toolchain_installs)
    }
}

fn resolve_entrypoint(path: &str, files: &FileMap) -> Result<Entrypoint, PipelineError> {
    Entrypoint::within(path, files).map_err(|_| PipelineError::InvalidEntrypoint(path.to_string()))
}

fn new_build_id() -> String {
    format!("build_{}", uuid::Uuid::new_v4().simple())
}
