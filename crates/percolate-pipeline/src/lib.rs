//! The percolate build pipeline.
//!
//! [`Builder`] turns a CoffeeScript entrypoint plus its sibling files into a
//! single deployable lambda, and prepares the dependency snapshot worth
//! carrying between builds.

pub mod assembler;
pub mod bundler;
pub mod cache;
pub mod config;
pub mod error;
pub mod launcher;
pub mod metrics;
pub mod orchestrator;
pub mod package_manager;
pub mod process;
pub mod provision;
pub mod stage;
pub mod toolchain;
pub mod transpiler;
pub mod types;

pub use config::{BUILDER_CONFIG, PercolateConfig};
pub use error::PipelineError;
pub use orchestrator::{BUILD_SCRIPT, Builder};
pub use types::{BuildOptions, BuildOutput, BuildRequest, CacheRequest};
