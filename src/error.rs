use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the registry and its backends.
#[derive(Debug, Error)]
pub enum Error {
    /// The path could not be opened (missing, a directory, no permission).
    #[error("Could not open {}: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The notification subsystem refused to watch the path.
    #[error("Could not create a watch for {}: {source}", path.display())]
    WatchCreationFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    /// Too many empty deliveries; the registry refuses to keep sending them.
    #[error("Excessive empty events ({count}), refusing to deliver")]
    ExcessiveEmptyEvents { count: usize },
    /// An already watched file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The notification subsystem could not be started.
    #[error("File change notifications unavailable: {0}")]
    BackendUnavailable(#[source] notify::Error),
}
