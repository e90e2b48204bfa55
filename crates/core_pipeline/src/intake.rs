//! Document intake
//!
//! Rejects unsupported or oversized uploads before any stage runs, then
//! stages the bytes in a temp file owned by a single invocation. The temp
//! file is removed when the [`StagedDocument`] is dropped, which covers
//! success, rejection and error paths alike.

use crate::config::IntakePolicy;
use crate::error::PipelineError;
use crate::types::{DocumentKind, RawDocument};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

impl IntakePolicy {
    /// Check a filename and payload size against the policy
    ///
    /// Returns the detected document kind on success.
    pub fn check(&self, filename: &str, size: usize) -> Result<DocumentKind, PipelineError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();

        let unsupported = || PipelineError::UnsupportedFileType {
            extension: extension.clone(),
            allowed: self.allowed_extensions.join(", "),
        };

        if !self.allowed_extensions.iter().any(|a| a == &extension) {
            return Err(unsupported());
        }
        let kind = DocumentKind::from_extension(&extension).ok_or_else(unsupported)?;

        if size > self.max_file_size {
            return Err(PipelineError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        Ok(kind)
    }
}

/// An uploaded document written to a scoped temp file
pub struct StagedDocument {
    file: NamedTempFile,
    document: RawDocument,
    filename: String,
}

impl StagedDocument {
    /// Validate and stage `bytes` under the policy's staging directory
    pub fn stage(policy: &IntakePolicy, filename: &str, bytes: &[u8]) -> Result<Self, PipelineError> {
        let kind = policy.check(filename, bytes.len())?;
        let suffix = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();

        let io_err = |e: std::io::Error| PipelineError::Internal(format!("Failed to stage upload: {e}"));

        let mut builder = tempfile::Builder::new();
        builder.prefix("rxscan-").suffix(&suffix);
        let mut file = match &policy.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(io_err)?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
        .map_err(io_err)?;

        file.write_all(bytes).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        debug!("Staged {} ({} bytes) at {}", filename, bytes.len(), file.path().display());

        let document = RawDocument {
            path: file.path().to_path_buf(),
            kind,
        };
        Ok(Self {
            file,
            document,
            filename: filename.to_string(),
        })
    }

    pub fn document(&self) -> &RawDocument {
        &self.document
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Original upload name
    pub fn filename(&self) -> &str {
        &self.filename
    }
}
