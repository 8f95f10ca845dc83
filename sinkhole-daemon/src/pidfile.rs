//! Single-instance guard backed by a PID file.
//!
//! [`PidFile::acquire`] creates the file exclusively and records this
//! process' PID. The file is removed when the guard is released or
//! dropped, so every exit path out of the daemon's run loop cleans up.
//! A file that already exists is never touched: it belongs to another
//! instance, or to one that crashed and needs an operator to look at it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Held for as long as this daemon owns its PID file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    released: bool,
}

impl PidFile {
    /// Create `path` (and its parent directory) and write the current PID.
    ///
    /// # Errors
    ///
    /// - The file already exists. The message carries the PID found in it.
    /// - The path is not a regular file after creation
    /// - Any other I/O failure
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                let holder = holder.trim();
                return Err(anyhow::anyhow!(
                    "sinkhole already running with PID {} (pid file {})",
                    if holder.is_empty() { "unknown" } else { holder },
                    path.display()
                ));
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to create pid file {}: {}",
                    path.display(),
                    e
                ));
            }
        };

        // From here on the guard owns the file and removes it on any error.
        let guard = Self {
            path,
            released: false,
        };
        if !file.metadata()?.is_file() {
            return Err(anyhow::anyhow!(
                "pid file {} is not a regular file",
                guard.path.display()
            ));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        let pid = std::process::id();
        writeln!(file, "{pid}")?;
        tracing::info!(pid, path = %guard.path.display(), "pid file written");
        Ok(guard)
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now instead of at drop.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "pid file removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file")
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().mode(0o700).recursive(true).create(dir)?;
    }
    #[cfg(not(unix))]
    fs::create_dir_all(dir)?;
    Ok(())
}
