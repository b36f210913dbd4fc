//! The downloadable result of a successful conversion.

use crate::buffer::TransferBuffer;
use crate::error::FluxError;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Converted bytes plus the file name they should be saved under.
#[derive(Debug)]
pub struct Artifact {
    file_name: String,
    data: TransferBuffer,
}

/// Serializable description of an [`Artifact`], without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub size: usize,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, data: TransferBuffer) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address of the artifact bytes, for identity checks.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            file_name: self.file_name.clone(),
            size: self.len(),
        }
    }

    /// Write the bytes to `path` atomically.
    ///
    /// The data goes to a temp file in the destination directory first and
    /// is then renamed over `path`, so readers never see a partial file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), FluxError> {
        let path = path.as_ref();
        let write_err = |source: std::io::Error| FluxError::ArtifactWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(self.data()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        info!(path = %path.display(), bytes = self.len(), "artifact saved");
        Ok(())
    }

    /// Save under [`Self::file_name`] inside `dir`, returning the full path.
    pub fn save_in_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, FluxError> {
        let path = dir.as_ref().join(&self.file_name);
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_vec()
    }
}
