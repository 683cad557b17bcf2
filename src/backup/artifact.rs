// dbbackup/src/backup/artifact.rs
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A local file holding one database dump.
///
/// The file is removed when [`TempArtifact::release`] is called or, at the
/// latest, when the guard is dropped. Removal of a file that is already gone
/// is not an error, and releasing twice does nothing.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
}

impl TempArtifact {
    /// Creates an empty, uniquely named file in `dir` (or the system temp dir).
    /// The name carries the database and run timestamp, e.g.
    /// `dbbackup_a1B2c3_orders_20240115_093000.sql`.
    pub fn stage(dir: Option<&Path>, database: &str, timestamp: &str) -> Result<Self> {
        let suffix = format!("_{}_{}.sql", sanitize_for_filename(database), timestamp);
        let mut builder = tempfile::Builder::new();
        builder.prefix("dbbackup_").suffix(&suffix);

        let named = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .with_context(|| format!("Failed to create temporary file for database {}", database))?;

        // Ownership of the file moves to this guard; tempfile must not delete it.
        let (_file, path) = named.keep().with_context(|| {
            format!("Failed to persist temporary file for database {}", database)
        })?;

        debug!(path = %path.display(), "staged temporary artifact");
        Ok(TempArtifact {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes of the dump currently on disk.
    pub async fn size(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("Failed to read metadata of {}", self.path.display()))?;
        Ok(metadata.len())
    }

    /// Deletes the file. Idempotent.
    pub fn release(&mut self) -> std::io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        remove_if_exists(&self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path.display(), error = %e, "failed to remove temporary artifact");
        }
    }
}

/// Removes `path`, treating a missing file as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// Database names end up inside a file name; path separators must not.
fn sanitize_for_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
