//! A built EPUB waiting in a private temporary directory until it is committed or discarded.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReaderFileError {
    #[error("Could not save reader file to {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not read reader file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Reader file {path} doesn't exist anymore: cleanup() was already called on it.")]
    Lifecycle { path: PathBuf },
}

#[derive(Debug)]
enum State {
    Live { dir: TempDir, path: PathBuf },
    Disposed { path: PathBuf },
}

/// Owns one temporary EPUB. Dropping a live file removes its temporary directory.
#[derive(Debug)]
pub struct ReaderFile {
    state: State,
}

impl ReaderFile {
    /// Take ownership of `path`, which must live inside `dir`.
    pub(crate) fn new(dir: TempDir, path: PathBuf) -> Self {
        Self {
            state: State::Live { dir, path },
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live { .. })
    }

    /// Path of the temporary EPUB.
    pub fn path(&self) -> Result<&Path, ReaderFileError> {
        match &self.state {
            State::Live { path, .. } => Ok(path),
            State::Disposed { path } => Err(ReaderFileError::Lifecycle { path: path.clone() }),
        }
    }

    /// File name of the temporary EPUB, e.g. `2026-10-19 news.epub`.
    pub fn file_name(&self) -> Result<String, ReaderFileError> {
        let path = self.path()?;
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// Contents of the temporary EPUB.
    pub fn bytes(&self) -> Result<Vec<u8>, ReaderFileError> {
        let path = self.path()?;
        fs::read(path).map_err(|source| ReaderFileError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Copy the EPUB to `destination` and return the saved bytes. Never overwrites: an
    /// existing destination is an error. A partially written destination is removed.
    pub fn save(&self, destination: &Path) -> Result<Vec<u8>, ReaderFileError> {
        let temp = self.path()?;
        let commit = |source: io::Error| ReaderFileError::Commit {
            path: destination.to_path_buf(),
            source,
        };
        let mut input = File::open(temp).map_err(commit)?;
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(commit)?;
        if let Err(e) = io::copy(&mut input, &mut output).and_then(|_| output.sync_all()) {
            drop(output);
            if let Err(remove) = fs::remove_file(destination) {
                warn!(
                    "Could not remove partial file {}: {}",
                    destination.display(),
                    remove
                );
            }
            return Err(commit(e));
        }
        debug!("Saved reader file to {}", destination.display());
        fs::read(destination).map_err(commit)
    }

    /// Remove the temporary directory. Safe to call more than once; failures are logged.
    pub fn cleanup(&mut self) {
        let path = match &self.state {
            State::Live { path, .. } => path.clone(),
            State::Disposed { .. } => return,
        };
        let previous = std::mem::replace(&mut self.state, State::Disposed { path });
        if let State::Live { dir, .. } = previous {
            let dir_path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed {}", dir_path.display()),
                Err(e) => warn!("Could not remove {}: {}", dir_path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_file(contents: &[u8]) -> io::Result<(ReaderFile, PathBuf)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("2026-10-19 news.epub");
        fs::write(&path, contents)?;
        let dir_path = dir.path().to_path_buf();
        Ok((ReaderFile::new(dir, path), dir_path))
    }

    #[test]
    fn save_copies_and_returns_bytes() -> anyhow::Result<()> {
        let (file, _) = live_file(b"epub bytes")?;
        let out = tempfile::tempdir()?;
        let dest = out.path().join("digest.epub");
        assert_eq!(file.save(&dest)?, b"epub bytes");
        assert_eq!(fs::read(&dest)?, b"epub bytes");
        assert!(file.is_live());
        Ok(())
    }

    #[test]
    fn save_never_overwrites() -> anyhow::Result<()> {
        let (file, _) = live_file(b"new")?;
        let out = tempfile::tempdir()?;
        let dest = out.path().join("digest.epub");
        fs::write(&dest, b"existing")?;
        let err = file.save(&dest).unwrap_err();
        match err {
            ReaderFileError::Commit { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fs::read(&dest)?, b"existing");
        Ok(())
    }

    #[test]
    fn save_can_run_more_than_once() -> anyhow::Result<()> {
        let (file, _) = live_file(b"x")?;
        let out = tempfile::tempdir()?;
        file.save(&out.path().join("a.epub"))?;
        file.save(&out.path().join("b.epub"))?;
        assert!(out.path().join("b.epub").exists());
        Ok(())
    }

    #[test]
    fn save_into_missing_directory_fails_cleanly() -> anyhow::Result<()> {
        let (file, _) = live_file(b"x")?;
        let out = tempfile::tempdir()?;
        let dest = out.path().join("missing").join("digest.epub");
        assert!(matches!(
            file.save(&dest),
            Err(ReaderFileError::Commit { .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn cleanup_is_idempotent_and_ends_the_lifecycle() -> anyhow::Result<()> {
        let (mut file, dir_path) = live_file(b"x")?;
        file.cleanup();
        file.cleanup();
        assert!(!dir_path.exists());
        assert!(!file.is_live());
        assert!(matches!(file.path(), Err(ReaderFileError::Lifecycle { .. })));
        assert!(matches!(file.bytes(), Err(ReaderFileError::Lifecycle { .. })));
        let out = tempfile::tempdir()?;
        let dest = out.path().join("digest.epub");
        assert!(matches!(
            file.save(&dest),
            Err(ReaderFileError::Lifecycle { .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn lifecycle_error_names_the_file() -> anyhow::Result<()> {
        let (mut file, _) = live_file(b"x")?;
        file.cleanup();
        let message = file.path().unwrap_err().to_string();
        assert!(message.contains("2026-10-19 news.epub"));
        assert!(message.contains("cleanup()"));
        Ok(())
    }

    #[test]
    fn drop_removes_temporary_directory() -> anyhow::Result<()> {
        let (file, dir_path) = live_file(b"x")?;
        assert!(dir_path.exists());
        drop(file);
        assert!(!dir_path.exists());
        Ok(())
    }

    #[test]
    fn unreadable_temp_file_is_a_read_error() -> anyhow::Result<()> {
        let (file, _) = live_file(b"x")?;
        fs::remove_file(file.path()?)?;
        let err = file.bytes().unwrap_err();
        assert!(matches!(err, ReaderFileError::Read { .. }));
        assert!(err.to_string().starts_with("Could not read reader file"));
        Ok(())
    }

    #[test]
    fn file_name_is_reported() -> anyhow::Result<()> {
        let (file, _) = live_file(b"x")?;
        assert_eq!(file.file_name()?, "2026-10-19 news.epub");
        Ok(())
    }
}
