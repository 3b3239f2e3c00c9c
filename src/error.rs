//! Error types for the tail library.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The main error type for tail operations.
///
/// Errors are stored by the lifecycle and handed out to every caller of
/// `wait`, so the type is `Clone`; I/O and watcher sources are shared.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The file could not be opened for a reason other than not existing yet.
    #[error("unable to open file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading a line failed with something other than end-of-file.
    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Seeking or querying the file position failed.
    #[error("seek error on {}: {source}", path.display())]
    Seek {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// A filesystem watch could not be established.
    #[error("file watcher error: {0}")]
    Watcher(#[source] Arc<notify::Error>),

    /// Other I/O errors, such as failing to stat the watched path.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Cancellation was observed while blocked.
    #[error("tail is dying")]
    Dying,

    /// Stop once everything up to end-of-file has been delivered.
    #[error("tail: stop at eof")]
    StopAtEof,

    /// A caller-supplied reason passed to `Tail::kill`.
    #[error("tail killed: {0}")]
    Killed(String),
}

impl Error {
    pub(crate) fn open(path: &Path, source: io::Error) -> Self {
        Error::Open {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        Error::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn seek(path: &Path, source: io::Error) -> Self {
        Error::Seek {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Builds a kill reason from any message.
    pub fn killed(reason: impl Into<String>) -> Self {
        Error::Killed(reason.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watcher(Arc::new(err))
    }
}

/// A convenient Result type for tail operations.
pub type Result<T> = std::result::Result<T, Error>;
