//! Core types for the percolate builder.
//!
//! Everything the build pipeline passes between stages lives here: the
//! virtual [`FileMap`], the [`Entrypoint`] and its derived JavaScript path,
//! the per-invocation [`WorkspacePaths`], and the two filesystem primitives
//! the pipeline leans on ([`download`] and [`glob()`]). Packaging a finished
//! file set into a deployable archive is handled by [`Lambda`].

pub mod entrypoint;
pub mod error;
pub mod files;
pub mod glob;
pub mod lambda;
pub mod workspace;

pub use entrypoint::Entrypoint;
pub use error::CoreError;
pub use files::{FileMap, FileRef, download, join_key};
pub use glob::{GlobPattern, glob};
pub use lambda::{Lambda, parse_size};
pub use workspace::{ToolchainKind, WorkspacePaths};
