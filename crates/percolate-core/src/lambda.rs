use std::io::{Cursor, Write};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::CoreError;
use crate::files::FileMap;

/// A packaged serverless function: a zip of its files plus the entry the
/// runtime invokes.
#[derive(Debug, Clone, Serialize)]
pub struct Lambda {
    #[serde(skip)]
    pub zip_buffer: Vec<u8>,
    /// `<module>.<export>` the runtime calls, e.g. `launcher.launcher`.
    pub handler: String,
    pub runtime: String,
    /// Upper bound on `zip_buffer.len()`, if one was configured.
    pub max_size: Option<u64>,
    /// SHA-256 hex of the archive bytes.
    pub digest: String,
    /// Archive entries, sorted.
    pub files: Vec<String>,
}

impl Lambda {
    /// Zip `files` into a lambda.
    ///
    /// Entries are written in key order with their mode bits and a fixed
    /// timestamp, so identical inputs produce identical archives.
    pub fn create(files: &FileMap, handler: &str, runtime: &str) -> Result<Self, CoreError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (name, file) in files {
            crate::files::validate_key(name)?;
            let options: FileOptions<'_, ()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(file.mode() & 0o777)
                .last_modified_time(zip::DateTime::default());
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&file.contents()?)?;
        }

        let zip_buffer = zip.finish()?.into_inner();
        let digest = hex::encode(Sha256::digest(&zip_buffer));

        tracing::debug!(
            files = files.len(),
            bytes = zip_buffer.len(),
            %digest,
            "Lambda archive created"
        );

        Ok(Self {
            zip_buffer,
            handler: handler.to_string(),
            runtime: runtime.to_string(),
            max_size: None,
            digest,
            files: files.keys().cloned().collect(),
        })
    }

    /// Attach a maximum archive size, failing if the archive already exceeds it.
    pub fn with_max_size(mut self, max: u64) -> Result<Self, CoreError> {
        let size = self.size();
        if size > max {
            return Err(CoreError::LambdaTooLarge { size, max });
        }
        self.max_size = Some(max);
        Ok(self)
    }

    pub fn size(&self) -> u64 {
        self.zip_buffer.len() as u64
    }

    /// Write the archive to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.zip_buffer)?;
        Ok(())
    }
}

/// Parse a size literal such as `5mb`, `512 KB`, `1.5gb` or `1048576` into
/// bytes. Units are binary (`1kb` = 1024 bytes).
pub fn parse_size(literal: &str) -> Result<u64, CoreError> {
    let invalid = || CoreError::InvalidSize(literal.to_string());
    let trimmed = literal.trim().to_ascii_lowercase();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1 << 10,
        "mb" | "m" => 1 << 20,
        "gb" | "g" => 1 << 30,
        _ => return Err(invalid()),
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(invalid());
    }
    Ok(bytes.floor() as u64)
}
