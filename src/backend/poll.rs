//! Readiness polling: every tick, every watched file is reported readable.
//!
//! Regular files never block on read, so from the runtime's point of view
//! they are always ready. This backend does not try to be clever about it;
//! telling real growth apart from idle wakeups is left to the registry.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;
use std::time::Duration;

use futures_util::ready;
use futures_util::stream::Stream as FuturesStream;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

use super::{Backend, Change, ChangeKind, WatchToken};
use crate::{BackendKind, Error};

pub struct PollBackend {
    interval: Interval,
    watched: BTreeMap<WatchToken, PathBuf>,
    /// Changes produced by the last tick that have not been yielded yet.
    pending: VecDeque<Change>,
    next_token: u64,
}

impl Debug for PollBackend {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("PollBackend")
            .field("period", &self.interval.period())
            .field("watched", &self.watched)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl PollBackend {
    /// Constructs a new `PollBackend` ticking every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        PollBackend {
            interval,
            watched: BTreeMap::new(),
            pending: VecDeque::new(),
            next_token: 0,
        }
    }
}

impl Backend for PollBackend {
    fn watch(&mut self, path: &Path) -> Result<WatchToken, Error> {
        let token = WatchToken::new(self.next_token);
        self.next_token += 1;

        debug!(path = %path.display(), ?token, "Polling for readiness");
        self.watched.insert(token, path.to_path_buf());

        Ok(token)
    }

    fn unwatch(&mut self, token: WatchToken) {
        if self.watched.remove(&token).is_some() {
            self.pending.retain(|change| change.token != token);
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Poll
    }
}

impl FuturesStream for PollBackend {
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

            ready!(this.interval.poll_tick(cx));

            this.pending
                .extend(this.watched.iter().map(|(token, path)| Change {
                    token: *token,
                    path: path.clone(),
                    kind: ChangeKind::Readable,
                }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::StreamExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_every_tick_reports_every_watch() {
        let mut backend = PollBackend::new(Duration::from_millis(5));
        let foo = backend.watch(Path::new("/some/foo.log")).unwrap();
        let bar = backend.watch(Path::new("/some/bar.log")).unwrap();
        assert_ne!(foo, bar);

        let changes: Vec<Change> = timeout(Duration::from_secs(1), backend.by_ref().take(4).collect())
            .await
            .unwrap();

        assert!(changes.iter().all(|c| c.kind == ChangeKind::Readable));
        assert_eq!(changes.iter().filter(|c| c.token == foo).count(), 2);
        assert_eq!(changes.iter().filter(|c| c.token == bar).count(), 2);
    }

    #[tokio::test]
    async fn test_unwatch_drops_pending_changes() {
        let mut backend = PollBackend::new(Duration::from_millis(5));
        let foo = backend.watch(Path::new("/some/foo.log")).unwrap();
        let bar = backend.watch(Path::new("/some/bar.log")).unwrap();

        let first = timeout(Duration::from_secs(1), backend.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.token, foo);

        // `bar` is still queued from the same tick
        backend.unwatch(bar);

        for _ in 0..3 {
            let change = timeout(Duration::from_secs(1), backend.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(change.token, foo);
        }
    }
}
