//! How a registry learns that a watched file may have changed.
//!
//! A backend is a [`Stream`] of [`Change`]s plus a way to start and stop
//! watching a path. The registry does not care which one it is driving; the
//! only difference it observes is the [`ChangeKind`] of each change.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;

use futures_util::stream::{Stream as FuturesStream, StreamExt};
use tracing::{info, warn};

use crate::{BackendKind, Error, RegistryOptions};

pub mod notify;
pub mod poll;

pub use self::notify::NotifyBackend;
pub use self::poll::PollBackend;

/// Opaque handle for one active watch, used only to cancel it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WatchToken(u64);

impl WatchToken {
    pub(crate) fn new(id: u64) -> Self {
        WatchToken(id)
    }
}

/// What a backend knows about a wakeup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    /// The file is readable. Says nothing about whether it grew.
    Readable,
    /// The OS reported that the file content was modified.
    Modified,
}

/// A single wakeup for a watched path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Change {
    pub token: WatchToken,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A source of file change wakeups.
pub trait Backend: FuturesStream<Item = Change> + Unpin {
    /// Starts watching `path`, which must exist.
    fn watch(&mut self, path: &Path) -> Result<WatchToken, Error>;

    /// Stops a watch. Changes already produced for `token` may still be
    /// yielded and are expected to be discarded by the consumer.
    fn unwatch(&mut self, token: WatchToken);

    fn kind(&self) -> BackendKind;
}

/// Either backend, picked once when the registry is built.
#[derive(Debug)]
pub enum AnyBackend {
    Notify(NotifyBackend),
    Poll(PollBackend),
}

impl AnyBackend {
    /// Picks a backend according to `options.backend`.
    ///
    /// With [`BackendKind::Auto`] the notification subsystem is probed once,
    /// falling back to polling if it cannot be started. Must be called from
    /// within a tokio runtime.
    pub fn select(options: &RegistryOptions) -> Result<Self, Error> {
        let backend = match options.backend {
            BackendKind::Notify => AnyBackend::Notify(NotifyBackend::new()?),
            BackendKind::Poll => AnyBackend::Poll(PollBackend::new(options.poll_interval)),
            BackendKind::Auto => match NotifyBackend::new() {
                Ok(backend) => AnyBackend::Notify(backend),
                Err(e) => {
                    warn!(error = %e, "Falling back to polling");
                    AnyBackend::Poll(PollBackend::new(options.poll_interval))
                }
            },
        };
        info!(backend = ?backend.kind(), "Selected file change backend");

        Ok(backend)
    }
}

impl Backend for AnyBackend {
    fn watch(&mut self, path: &Path) -> Result<WatchToken, Error> {
        match self {
            AnyBackend::Notify(backend) => backend.watch(path),
            AnyBackend::Poll(backend) => backend.watch(path),
        }
    }

    fn unwatch(&mut self, token: WatchToken) {
        match self {
            AnyBackend::Notify(backend) => backend.unwatch(token),
            AnyBackend::Poll(backend) => backend.unwatch(token),
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            AnyBackend::Notify(backend) => backend.kind(),
            AnyBackend::Poll(backend) => backend.kind(),
        }
    }
}

impl FuturesStream for AnyBackend {
    type Item = Change;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match &mut *self {
            AnyBackend::Notify(backend) => backend.poll_next_unpin(cx),
            AnyBackend::Poll(backend) => backend.poll_next_unpin(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_select_poll() {
        let options = RegistryOptions::default()
            .with_backend(BackendKind::Poll)
            .with_poll_interval(Duration::from_millis(5));

        let backend = AnyBackend::select(&options).unwrap();
        assert_eq!(backend.kind(), BackendKind::Poll);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[tokio::test]
    async fn test_select_auto_prefers_notify() {
        let backend = AnyBackend::select(&RegistryOptions::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Notify);
    }
}
