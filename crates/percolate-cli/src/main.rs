use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use percolate_pipeline::cache::default_cache_path;
use percolate_pipeline::{BuildOptions, BuildRequest, Builder, CacheRequest, PercolateConfig};
use tracing_subscriber::{EnvFilter, fmt};

mod source;

use source::load_source_dir;

#[derive(Parser)]
#[command(
    name = "percolate",
    about = "Percolate: builds CoffeeScript entrypoints into deployable lambdas"
)]
struct Cli {
    /// Path to percolate.toml (default: ./percolate.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one entrypoint into a lambda archive
    Build {
        /// Directory holding the entrypoint and its sibling files
        src: PathBuf,

        /// Entrypoint path relative to the source directory
        #[arg(long)]
        entrypoint: String,

        /// Scratch directory for the build (default: a fresh temp dir)
        #[arg(long)]
        work_path: Option<PathBuf>,

        /// Where to write the lambda zip
        #[arg(long, default_value = "lambda.zip")]
        out: PathBuf,

        /// Install dependencies without --prefer-offline
        #[arg(long)]
        online: bool,
    },
    /// Provision into the cache directory and list the files worth keeping
    PrepareCache {
        /// Directory holding the entrypoint and its sibling files
        src: PathBuf,

        /// Entrypoint path relative to the source directory
        #[arg(long)]
        entrypoint: String,

        /// Build workspace to discard
        #[arg(long)]
        work_path: PathBuf,

        /// Cache root (default: ~/.percolate/cache)
        #[arg(long)]
        cache_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    fmt()
        .with_env_filter(EnvFilter::from_env("PERCOLATE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PercolateConfig::load(cli.config.as_deref()).context("loading config")?;
    let builder = Builder::new(config);

    match cli.command {
        Command::Build {
            src,
            entrypoint,
            work_path,
            out,
            online,
        } => run_build(&builder, &src, entrypoint, work_path, &out, online).await,
        Command::PrepareCache {
            src,
            entrypoint,
            work_path,
            cache_path,
        } => {
            let cache_path = cache_path.unwrap_or_else(default_cache_path);
            run_prepare_cache(&builder, &src, entrypoint, work_path, cache_path).await
        }
    }
}

async fn run_build(
    builder: &Builder,
    src: &Path,
    entrypoint: String,
    work_path: Option<PathBuf>,
    out: &Path,
    online: bool,
) -> Result<()> {
    let files = load_source_dir(src)?;

    // A temp workspace lives until this function returns.
    let (work_path, _scratch) = match work_path {
        Some(path) => (path, None),
        None => {
            let dir = tempfile::Builder::new().prefix("percolate-").tempdir()?;
            (dir.path().to_path_buf(), Some(dir))
        }
    };

    let options = if online {
        BuildOptions {
            npm_arguments: vec![],
        }
    } else {
        BuildOptions::default()
    };

    tracing::info!(
        src = %src.display(),
        %entrypoint,
        work_path = %work_path.display(),
        "Building"
    );

    let output = builder
        .build(
            &BuildRequest {
                files,
                entrypoint,
                work_path,
            },
            &options,
        )
        .await?;

    let mut summary = serde_json::Map::new();
    for (entrypoint, lambda) in &output {
        lambda
            .write_to(out)
            .with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(path = %out.display(), bytes = lambda.size(), "Lambda written");

        let mut entry = serde_json::to_value(lambda)?;
        if let Some(fields) = entry.as_object_mut() {
            fields.insert("zip".into(), out.display().to_string().into());
        }
        summary.insert(entrypoint.clone(), entry);
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_prepare_cache(
    builder: &Builder,
    src: &Path,
    entrypoint: String,
    work_path: PathBuf,
    cache_path: PathBuf,
) -> Result<()> {
    let files = load_source_dir(src)?;
    let snapshot = builder
        .prepare_cache(&CacheRequest {
            files,
            entrypoint,
            work_path,
            cache_path,
        })
        .await?;

    let keys: Vec<&String> = snapshot.keys().collect();
    println!("{}", serde_json::to_string_pretty(&keys)?);
    Ok(())
}
