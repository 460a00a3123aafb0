use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::files::FileMap;

/// Extension of the source dialect the transpiler compiles.
pub const SOURCE_EXTENSION: &str = ".coffee";

/// Extension of the transpiler's output.
pub const JS_EXTENSION: &str = ".js";

/// The user-designated primary module, as a FileMap key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entrypoint(String);

impl Entrypoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// An entrypoint that must be present in `files`.
    pub fn within(path: impl Into<String>, files: &FileMap) -> Result<Self, CoreError> {
        let path = path.into();
        if !files.contains_key(&path) {
            return Err(CoreError::InvalidPath(path));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path the transpiler writes this entrypoint's output to.
    ///
    /// `api/handler.coffee` becomes `api/handler.js`; anything without the
    /// source extension is returned unchanged.
    pub fn js_path(&self) -> Self {
        match self.0.strip_suffix(SOURCE_EXTENSION) {
            Some(stem) => Self(format!("{stem}{JS_EXTENSION}")),
            None => self.clone(),
        }
    }

    /// Containing directory, `""` for a top-level entrypoint.
    pub fn dirname(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(dir, _)| dir)
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Entrypoint {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
