//! OS change notifications, driven by [`notify`](https://crates.io/crates/notify).
//!
//! Files are watched through their parent directory rather than directly.
//! A watch on the file itself follows the inode, so after a rename-style
//! rotation it would keep reporting the old file; the directory watch sees
//! the new file being created under the same name.

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;

use ::notify::event::{CreateKind, ModifyKind};
use ::notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use futures_util::ready;
use futures_util::stream::Stream as FuturesStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Backend, Change, ChangeKind, WatchToken};
use crate::{BackendKind, Error};

/// Manages notification watches, and can be polled to receive changes.
pub struct NotifyBackend {
    inner: RecommendedWatcher,
    /// Number of watched files per watched directory.
    watched_directories: HashMap<PathBuf, usize>,
    watched_files: HashMap<WatchToken, PathBuf>,
    pending: VecDeque<Change>,
    event_stream: mpsc::UnboundedReceiver<Result<::notify::Event, ::notify::Error>>,
    next_token: u64,
}

impl Debug for NotifyBackend {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("NotifyBackend")
            .field("watched_directories", &self.watched_directories)
            .field("watched_files", &self.watched_files)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl NotifyBackend {
    /// Starts the platform's notification watcher.
    pub fn new() -> Result<Self, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = ::notify::recommended_watcher(move |res: ::notify::Result<::notify::Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // and `NotifyBackend` controls both.
            let _ = tx.send(res);
        })
        .map_err(Error::BackendUnavailable)?;

        Ok(NotifyBackend {
            inner,
            watched_directories: HashMap::new(),
            watched_files: HashMap::new(),
            pending: VecDeque::new(),
            event_stream: rx,
            next_token: 0,
        })
    }

    fn add_directory(&mut self, path: &Path) -> Result<(), ::notify::Error> {
        if let Some(count) = self.watched_directories.get_mut(path) {
            *count += 1;
            return Ok(());
        }

        self.inner.watch(path, RecursiveMode::NonRecursive)?;
        self.watched_directories.insert(path.to_path_buf(), 1);

        Ok(())
    }

    fn remove_directory(&mut self, path: &Path) -> Result<(), ::notify::Error> {
        match self.watched_directories.get(path).copied() {
            None => {}
            Some(1) => {
                // Remove from map first in case `unwatch` fails.
                self.watched_directories.remove(path);
                self.inner.unwatch(path)?;
            }
            Some(_) => {
                if let Some(count) = self.watched_directories.get_mut(path) {
                    *count -= 1;
                }
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: ::notify::Event) {
        let relevant = match event.kind {
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => true,
            // Rotation by renaming the old file away and creating a new one
            EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => true,
            _ => false,
        };
        if !relevant {
            return;
        }

        for path in event.paths {
            let changes = self
                .watched_files
                .iter()
                .filter(|(_, watched)| **watched == path)
                .map(|(token, _)| Change {
                    token: *token,
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                });
            self.pending.extend(changes);
        }
    }
}

impl Backend for NotifyBackend {
    fn watch(&mut self, path: &Path) -> Result<WatchToken, Error> {
        let parent = path.parent().unwrap_or(path);
        self.add_directory(parent)
            .map_err(|source| Error::WatchCreationFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let token = WatchToken::new(self.next_token);
        self.next_token += 1;

        debug!(path = %path.display(), ?token, "Watching for modifications");
        self.watched_files.insert(token, path.to_path_buf());

        Ok(token)
    }

    fn unwatch(&mut self, token: WatchToken) {
        let path = match self.watched_files.remove(&token) {
            Some(path) => path,
            None => return,
        };

        self.pending.retain(|change| change.token != token);

        let parent = path.parent().unwrap_or(path.as_path());
        if let Err(e) = self.remove_directory(parent) {
            warn!(path = %path.display(), error = %e, "Failed to remove directory watch");
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Notify
    }
}

impl FuturesStream for NotifyBackend {
    type Item = Change;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(change) = this.pending.pop_front() {
                return task::Poll::Ready(Some(change));
            }

            match ready!(this.event_stream.poll_recv(cx)) {
                Some(Ok(event)) => this.handle_event(event),
                Some(Err(e)) => warn!(error = %e, "Error receiving file event"),
                None => return task::Poll::Ready(None),
            }
        }
    }
}
