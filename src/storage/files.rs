//! Filesystem helpers for crash-safe writes and the image directory

use crate::dedup::ContentHash;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes `data` to `path` so that readers see either the old or the new file
///
/// The bytes go to a temporary file in the same directory, are flushed to
/// disk, and the temporary file is then renamed over `path`. Missing parent
/// directories are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable where the platform allows it
    #[cfg(unix)]
    {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Result of persisting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new file was written
    Written,
    /// A file for this hash already existed and was left untouched
    AlreadyPresent,
}

/// Directory holding one `<content-hash>.jpg` file per accepted image
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the directory if needed
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.file_name())
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Writes `bytes` under the name derived from `hash`
    ///
    /// An existing file with that name already holds these exact bytes, so it
    /// is reported as [`PersistOutcome::AlreadyPresent`] without rewriting.
    pub fn persist(&self, hash: &ContentHash, bytes: &[u8]) -> std::io::Result<PersistOutcome> {
        let path = self.path_for(hash);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => return Ok(PersistOutcome::AlreadyPresent),
            Ok(_) => {
                return Err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a file", path.display()),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        atomic_write(&path, bytes)?;
        Ok(PersistOutcome::Written)
    }

    /// Number of stored images
    pub fn count(&self) -> std::io::Result<usize> {
        Ok(crate::dedup::list_stored_images(&self.dir)?.len())
    }
}
