//! Per-request temporary file staging
//!
//! Each request gets its own directory named after its request id. The
//! directory and everything in it is removed when the [`StagedRequest`] is
//! dropped, on success and error paths alike.

use crate::error::{BgRemovalError, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

const INPUT_FILE: &str = "input.bin";
const OUTPUT_FILE: &str = "output.png";

/// Factory for per-request staging directories
#[derive(Debug, Clone, Default)]
pub struct RequestStaging {
    parent: Option<PathBuf>,
}

impl RequestStaging {
    /// Stage under `parent`, or the system temp directory when `None`
    #[must_use]
    pub fn new(parent: Option<PathBuf>) -> Self {
        Self { parent }
    }

    /// Create a fresh, uniquely named directory for one request
    ///
    /// # Errors
    /// - Parent directory missing or not writable
    pub fn stage(&self, request_id: Uuid) -> Result<StagedRequest> {
        let prefix = format!("bgremove-{request_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent).map_err(|e| {
                BgRemovalError::file_io_error("create staging directory in", parent, &e)
            })?,
            None => builder.tempdir().map_err(|e| {
                let parent = std::env::temp_dir();
                BgRemovalError::file_io_error("create staging directory in", parent, &e)
            })?,
        };

        log::trace!("Staging request {request_id} in {}", dir.path().display());
        Ok(StagedRequest { request_id, dir })
    }
}

/// Scoped staging directory for one request
#[derive(Debug)]
pub struct StagedRequest {
    request_id: Uuid,
    dir: TempDir,
}

impl StagedRequest {
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join(INPUT_FILE)
    }

    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE)
    }

    /// Write the request body to the staged input file
    ///
    /// # Errors
    /// - File write failure
    pub fn write_input(&self, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.input_path();
        std::fs::write(&path, bytes)
            .map_err(|e| BgRemovalError::file_io_error("write staged input", &path, &e))?;
        Ok(path)
    }

    /// Read back the staged output file
    ///
    /// # Errors
    /// - File missing or unreadable
    pub fn read_output(&self) -> Result<Vec<u8>> {
        let path = self.output_path();
        std::fs::read(&path)
            .map_err(|e| BgRemovalError::file_io_error("read staged output", &path, &e))
    }

    /// Remove the directory now, reporting failures instead of ignoring them
    ///
    /// # Errors
    /// - Directory removal failure
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| BgRemovalError::file_io_error("remove staging directory", &path, &e))
    }
}
