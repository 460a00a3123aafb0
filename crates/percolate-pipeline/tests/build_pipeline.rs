//! Build and cache flows driven end to end against in-process fakes.
//!
//! The package manager, transpiler and bundler are replaced so these tests run
//! without node, npm or network access. The launcher template and bridge
//! compiled into the crate are used as-is.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use percolate_core::{FileMap, FileRef, WorkspacePaths};
use percolate_pipeline::bundler::{BundleAsset, BundleOutput, Bundler};
use percolate_pipeline::metrics::BuildMetrics;
use percolate_pipeline::package_manager::PackageManager;
use percolate_pipeline::stage::{RecordingObserver, Stage, StageStatus};
use percolate_pipeline::transpiler::Transpiler;
use percolate_pipeline::{
    BuildOptions, BuildRequest, Builder, CacheRequest, PercolateConfig, PipelineError,
};
use tempfile::TempDir;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

#[derive(Default)]
struct FakePackageManager {
    installs: Mutex<Vec<(PathBuf, Vec<String>)>>,
    scripts: Mutex<Vec<(PathBuf, String)>>,
    fail_install_in: Option<&'static str>,
    fail_script: bool,
    /// Leave a dependency tree and lockfile behind, like a real install.
    populate: bool,
}

impl PackageManager for FakePackageManager {
    fn install<'a>(&'a self, dir: &'a Path, args: &'a [String]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.installs
                .lock()
                .unwrap()
                .push((dir.to_path_buf(), args.to_vec()));
            if let Some(name) = self.fail_install_in {
                if dir.ends_with(name) {
                    return Err(PipelineError::ProvisioningError(format!(
                        "{name}: registry unreachable"
                    )));
                }
            }
            if self.populate {
                let module = dir.join("node_modules/dep");
                std::fs::create_dir_all(&module)?;
                std::fs::write(module.join("index.js"), "module.exports = 1;")?;
                std::fs::write(dir.join("package-lock.json"), "{}")?;
            }
            Ok(())
        })
    }

    fn run_script<'a>(&'a self, dir: &'a Path, script: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.scripts
                .lock()
                .unwrap()
                .push((dir.to_path_buf(), script.to_string()));
            if self.fail_script {
                return Err(PipelineError::BuildHookError(format!("{script} exited 1")));
            }
            Ok(true)
        })
    }
}

/// Writes fixed compiled outputs into the user subtree, or fails.
struct FakeTranspiler {
    outputs: Vec<(&'static str, &'static str)>,
    fail: bool,
}

impl FakeTranspiler {
    fn compiling(path: &'static str, js: &'static str) -> Self {
        Self {
            outputs: vec![(path, js)],
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            outputs: vec![],
            fail: true,
        }
    }
}

impl Transpiler for FakeTranspiler {
    fn transpile<'a>(&'a self, paths: &'a WorkspacePaths) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.fail {
                return Err(PipelineError::TranspileError("unexpected indentation".into()));
            }
            for (path, js) in &self.outputs {
                std::fs::write(paths.user.join(path), js)?;
            }
            Ok(())
        })
    }
}

/// Returns the input file verbatim as the bundle, plus one asset.
#[derive(Default)]
struct FakeBundler {
    inputs: Mutex<Vec<PathBuf>>,
}

impl Bundler for FakeBundler {
    fn name(&self) -> &str {
        "fake"
    }

    fn bundle<'a>(
        &'a self,
        _paths: &'a WorkspacePaths,
        input: &'a Path,
    ) -> BoxFuture<'a, BundleOutput> {
        Box::pin(async move {
            self.inputs.lock().unwrap().push(input.to_path_buf());
            let code = std::fs::read(input).map_err(|e| {
                PipelineError::BundleError(format!("cannot read {}: {e}", input.display()))
            })?;
            let mut assets = BTreeMap::new();
            assets.insert(
                "data/table.json".to_string(),
                BundleAsset {
                    source: b"[1,2,3]".to_vec(),
                    permissions: None,
                },
            );
            Ok(BundleOutput { code, assets })
        })
    }
}

struct Harness {
    builder: Builder,
    package_manager: Arc<FakePackageManager>,
    bundler: Arc<FakeBundler>,
    observer: Arc<RecordingObserver>,
    metrics: Arc<BuildMetrics>,
}

fn harness(
    config: PercolateConfig,
    package_manager: FakePackageManager,
    transpiler: FakeTranspiler,
) -> Harness {
    let package_manager = Arc::new(package_manager);
    let bundler = Arc::new(FakeBundler::default());
    let observer = Arc::new(RecordingObserver::new());
    let metrics = Arc::new(BuildMetrics::new());
    let builder = Builder::new(config)
        .with_package_manager(package_manager.clone())
        .with_transpiler(Arc::new(transpiler))
        .with_bundler(bundler.clone())
        .with_observer(observer.clone())
        .with_metrics(metrics.clone());
    Harness {
        builder,
        package_manager,
        bundler,
        observer,
        metrics,
    }
}

fn handler_files() -> FileMap {
    let mut files = FileMap::new();
    files.insert(
        "api/handler.coffee".into(),
        FileRef::blob("module.exports = (req, res) -> res.end 'hi'"),
    );
    files.insert(
        "api/package.json".into(),
        FileRef::blob(r#"{"scripts":{"now-build":"echo built"}}"#),
    );
    files
}

fn build_request(work: &TempDir, files: FileMap, entrypoint: &str) -> BuildRequest {
    BuildRequest {
        files,
        entrypoint: entrypoint.into(),
        work_path: work.path().to_path_buf(),
    }
}

fn read_entry(zip_buffer: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_buffer)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

#[tokio::test]
async fn builds_nested_coffee_entrypoint() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::compiling("api/handler.js", "module.exports = function () {};"),
    );

    let output = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(output.keys().collect::<Vec<_>>(), vec!["api/handler.coffee"]);
    let lambda = &output["api/handler.coffee"];
    assert_eq!(lambda.handler, "launcher.launcher");
    assert_eq!(lambda.runtime, "nodejs8.10");
    assert_eq!(lambda.max_size, Some(5 * 1024 * 1024));
    assert_eq!(
        lambda.files,
        vec![
            "bridge.js",
            "launcher.js",
            "user/api/data/table.json",
            "user/api/handler.js",
        ]
    );

    assert_eq!(
        read_entry(&lambda.zip_buffer, "user/api/handler.js"),
        "module.exports = function () {};"
    );
    let launcher = read_entry(&lambda.zip_buffer, "launcher.js");
    assert!(launcher.contains("process.chdir(\"./user\");"));
    assert!(launcher.contains("require(\"./user/api/handler.js\")"));
    assert!(!launcher.contains("// PLACEHOLDER"));

    // The bundler saw the compiled file, not the source.
    let user = work.path().join("user");
    assert_eq!(
        h.bundler.inputs.lock().unwrap().as_slice(),
        &[user.join("api/handler.js")]
    );

    let installs = h.package_manager.installs.lock().unwrap();
    assert_eq!(installs[0].0, user.join("api"));
    assert!(installs.iter().all(|(_, args)| args == &["--prefer-offline"]));
    assert_eq!(
        h.package_manager.scripts.lock().unwrap().as_slice(),
        &[(user.join("api"), "now-build".to_string())]
    );

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.builds_started, 1);
    assert_eq!(snapshot.builds_completed, 1);
    assert_eq!(snapshot.builds_failed, 0);
}

#[tokio::test]
async fn stages_report_in_pipeline_order() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::compiling("api/handler.js", "module.exports = 1;"),
    );
    h.builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap();

    let finished: Vec<Stage> = h
        .observer
        .transitions()
        .into_iter()
        .filter(|(_, status)| *status == StageStatus::Succeeded)
        .map(|(stage, _)| stage)
        .collect();
    assert_eq!(
        finished,
        vec![
            Stage::Provision,
            Stage::BuildHook,
            Stage::Transpile,
            Stage::Bundle,
            Stage::Launcher,
            Stage::Assemble,
        ]
    );
    let events = h.observer.events();
    assert!(events.windows(2).all(|w| w[0].build_id == w[1].build_id));
}

#[tokio::test]
async fn transpile_failure_falls_back_to_shipped_javascript() {
    let work = TempDir::new().unwrap();
    let mut files = handler_files();
    files.insert(
        "api/handler.js".into(),
        FileRef::blob("module.exports = 'prebuilt';"),
    );
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::failing(),
    );

    let output = h
        .builder
        .build(
            &build_request(&work, files, "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap();

    let lambda = &output["api/handler.coffee"];
    assert_eq!(
        read_entry(&lambda.zip_buffer, "user/api/handler.js"),
        "module.exports = 'prebuilt';"
    );
    assert!(
        h.observer
            .transitions()
            .contains(&(Stage::Transpile, StageStatus::Recovered))
    );
    assert_eq!(h.metrics.snapshot().transpile_recoveries, 1);
}

#[tokio::test]
async fn transpile_failure_without_javascript_fails_in_bundling() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::failing(),
    );

    let err = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::BundleError(_)), "{err}");
    assert_eq!(h.metrics.snapshot().builds_failed, 1);
}

#[tokio::test]
async fn install_failure_rejects_before_bundling() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager {
            fail_install_in: Some("ncc"),
            ..Default::default()
        },
        FakeTranspiler::compiling("api/handler.js", "module.exports = 1;"),
    );

    let err = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ProvisioningError(_)), "{err}");
    assert_eq!(
        h.observer.transitions().last(),
        Some(&(Stage::Provision, StageStatus::Failed))
    );
    assert!(h.bundler.inputs.lock().unwrap().is_empty());
    assert!(h.package_manager.scripts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn build_script_failure_is_fatal() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager {
            fail_script: true,
            ..Default::default()
        },
        FakeTranspiler::compiling("api/handler.js", "module.exports = 1;"),
    );

    let err = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::BuildHookError(_)), "{err}");
}

#[tokio::test]
async fn unknown_entrypoint_is_rejected_up_front() {
    let work = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::failing(),
    );

    let err = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/missing.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidEntrypoint(_)));
    assert!(h.package_manager.installs.lock().unwrap().is_empty());
    assert!(h.observer.events().is_empty());
}

#[tokio::test]
async fn oversized_lambda_is_rejected() {
    let work = TempDir::new().unwrap();
    let config = PercolateConfig::from_toml("[build]\nmax_lambda_size = \"64b\"\n").unwrap();
    let h = harness(
        config,
        FakePackageManager::default(),
        FakeTranspiler::compiling("api/handler.js", "module.exports = 1;"),
    );

    let err = h
        .builder
        .build(
            &build_request(&work, handler_files(), "api/handler.coffee"),
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactTooLarge { max: 64, .. }), "{err}");
}

#[tokio::test]
async fn top_level_javascript_entrypoint_builds() {
    let work = TempDir::new().unwrap();
    let mut files = FileMap::new();
    files.insert("index.js".into(), FileRef::blob("module.exports = 'plain';"));
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::compiling("unused.js", ""),
    );

    let output = h
        .builder
        .build(&build_request(&work, files, "index.js"), &BuildOptions::default())
        .await
        .unwrap();

    let lambda = &output["index.js"];
    assert!(lambda.files.contains(&"user/index.js".to_string()));
    assert!(lambda.files.contains(&"user/data/table.json".to_string()));
    assert!(read_entry(&lambda.zip_buffer, "launcher.js").contains("require(\"./user/index.js\")"));
}

#[tokio::test]
async fn prepare_cache_snapshots_only_dependencies_and_lockfiles() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(work.path().join("stale.txt"), "old build").unwrap();

    let h = harness(
        PercolateConfig::default(),
        FakePackageManager {
            populate: true,
            ..Default::default()
        },
        FakeTranspiler::failing(),
    );

    let mut files = FileMap::new();
    files.insert("handler.coffee".into(), FileRef::blob("module.exports = -> 1"));
    files.insert("package.json".into(), FileRef::blob("{}"));

    let snapshot = h
        .builder
        .prepare_cache(&CacheRequest {
            files,
            entrypoint: "handler.coffee".into(),
            work_path: work.path().to_path_buf(),
            cache_path: cache.path().to_path_buf(),
        })
        .await
        .unwrap();

    assert!(!work.path().exists());
    let keys: Vec<&str> = snapshot.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "ncc/node_modules/dep/index.js",
            "ncc/package-lock.json",
            "user/node_modules/dep/index.js",
            "user/package-lock.json",
        ]
    );
    assert!(
        snapshot
            .values()
            .all(|file| file.fs_path().is_some_and(|p| p.starts_with(cache.path())))
    );

    let installs = h.package_manager.installs.lock().unwrap();
    assert_eq!(installs.len(), 3);
    assert!(installs.iter().all(|(_, args)| args.is_empty()));
    assert!(h.package_manager.scripts.lock().unwrap().is_empty());
    assert_eq!(h.metrics.snapshot().caches_prepared, 1);
}

#[tokio::test]
async fn prepare_cache_install_failure_is_fatal() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager {
            fail_install_in: Some("ncc"),
            ..Default::default()
        },
        FakeTranspiler::failing(),
    );

    let err = h
        .builder
        .prepare_cache(&CacheRequest {
            files: handler_files(),
            entrypoint: "api/handler.coffee".into(),
            work_path: work.path().to_path_buf(),
            cache_path: cache.path().to_path_buf(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ProvisioningError(_)), "{err}");
    assert_eq!(
        h.observer.transitions().last(),
        Some(&(Stage::Provision, StageStatus::Failed))
    );
    assert!(
        !h.observer
            .transitions()
            .iter()
            .any(|(stage, _)| *stage == Stage::CacheSnapshot)
    );
    assert_eq!(h.metrics.snapshot().caches_prepared, 0);
}

#[tokio::test]
async fn prepare_cache_rejects_unknown_entrypoint_before_discarding_work() {
    let work = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(work.path().join("stale.txt"), "old build").unwrap();
    let h = harness(
        PercolateConfig::default(),
        FakePackageManager::default(),
        FakeTranspiler::failing(),
    );

    let err = h
        .builder
        .prepare_cache(&CacheRequest {
            files: handler_files(),
            entrypoint: "api/missing.coffee".into(),
            work_path: work.path().to_path_buf(),
            cache_path: cache.path().to_path_buf(),
        })
        .await
        .unwrap_err();

    assert!(
        matches!(&err, PipelineError::InvalidEntrypoint(path) if path == "api/missing.coffee"),
        "{err}"
    );
    assert!(work.path().join("stale.txt").is_file());
    assert!(h.package_manager.installs.lock().unwrap().is_empty());
    assert!(h.observer.events().is_empty());
}
