//! Everything related to who is tailing which file, and reading what changed.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;

use futures_util::ready;
use futures_util::stream::{Stream as FuturesStream, StreamExt};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{AnyBackend, Backend, Change, ChangeKind, WatchToken};
use crate::{tail, Error, RegistryOptions, Subscriber};

/// Sent instead of a tail when the first subscriber joins an empty file.
pub const EMPTY_FILE_MESSAGE: &str = "<< File is empty, tail started >>";

/// Prefix of the message sent to a subscriber whose subscription failed.
pub const ERROR_MESSAGE_PREFIX: &str = "An error occurred: ";

/// A message fanned out to the subscribers of a given source path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Update {
    /// The path the message was read from.
    source: PathBuf,
    /// The appended text, trailing whitespace removed.
    message: String,
    /// How many subscribers it was delivered to.
    recipients: usize,
}

impl Update {
    /// Returns a reference to the file from where the message was read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Returns the delivered text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the number of subscribers the message was delivered to.
    pub fn recipients(&self) -> usize {
        self.recipients
    }

    /// Returns the internal components that make up an `Update`. Hidden as
    /// the return signature may change.
    #[doc(hidden)]
    pub fn into_inner(self) -> (PathBuf, String) {
        let Update {
            source, message, ..
        } = self;

        (source, message)
    }
}

struct WatchEntry<S> {
    file: File,
    /// File size as of the last read.
    size: u64,
    /// Never empty; the entry is dropped together with its last subscriber.
    subscribers: HashSet<S>,
    token: WatchToken,
}

/// An opened file with an active watch, ready to become a `WatchEntry`.
struct Reader {
    file: File,
    size: u64,
    content: String,
    token: WatchToken,
}

fn open_reader<B: Backend>(backend: &mut B, path: &Path, lines: usize) -> Result<Reader, Error> {
    debug!(path = %path.display(), lines, "Creating reader");

    let unavailable = |source: io::Error| Error::FileUnavailable {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(unavailable)?;
    if file.metadata().map_err(unavailable)?.is_dir() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::Other,
            "Is a directory",
        )));
    }

    let (content, size) = if lines > 0 {
        let tail = tail::read_last_lines(&mut file, lines).map_err(unavailable)?;
        (tail.to_message(), tail.end())
    } else {
        let size = file.seek(SeekFrom::End(0)).map_err(unavailable)?;
        (String::new(), size)
    };

    // Last, so that a failure leaves nothing to clean up in the backend.
    let token = backend.watch(path)?;

    Ok(Reader {
        file,
        size,
        content,
        token,
    })
}

/// Reads at most the bytes between `from` and `to`.
fn read_appended(file: &mut File, from: u64, to: u64) -> io::Result<String> {
    file.seek(SeekFrom::Start(from))?;
    let mut buf = Vec::new();
    file.by_ref().take(to - from).read_to_end(&mut buf)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Swaps the entry's handle and watch for fresh ones, returning the last
/// line of the new content.
///
/// The new watch is in place before the old one is cancelled, so that no
/// wakeup falls in between. On failure the old watch is cancelled anyway.
fn rotate<S, B: Backend>(
    backend: &mut B,
    entry: &mut WatchEntry<S>,
    path: &Path,
) -> Result<String, Error> {
    let reader = open_reader(backend, path, 1);
    backend.unwatch(entry.token);

    let reader = reader?;
    entry.file = reader.file;
    entry.size = reader.size;
    entry.token = reader.token;

    Ok(reader.content)
}

/// Makes `path` absolute by resolving its parent directory. The file name is
/// left alone, so paths to files that have since been removed still resolve
/// to the same key.
fn absolutify(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?;

    let parent = match path.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let dir = match parent.canonicalize() {
        Ok(dir) => dir,
        Err(_) if parent.is_absolute() => parent,
        Err(_) => std::env::current_dir()?.join(parent),
    };

    Ok(dir.join(file_name))
}

/// Lookup key for a path that may or may not resolve anymore.
fn lookup_key(path: &Path) -> PathBuf {
    absolutify(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Tracks the files being tailed and fans their new lines out to subscribers.
///
/// ## Driving the registry
///
/// `Registry` implements [`futures::Stream`]: each poll waits for the next
/// [`Change`] from its backend, reads whatever it implies and delivers it to
/// the subscribers of that path, yielding an [`Update`] for every delivery.
/// Changes that turn out to carry nothing new are skipped. The registry has
/// to be polled for subscribers to receive anything past their initial tail.
///
/// An `Err` item does not end the stream; whether to keep polling after
/// [`Error::ExcessiveEmptyEvents`] is up to the caller.
///
/// ## Rotation
///
/// A file that shrank since it was last read is considered rotated: it is
/// reopened and its last line delivered. A file truncated and rewritten to
/// exactly its previous size is not detected.
///
/// [`futures::Stream`]: https://docs.rs/futures/0.3/futures/stream/trait.Stream.html
pub struct Registry<S, B = AnyBackend> {
    backend: B,
    entries: HashMap<PathBuf, WatchEntry<S>>,
    options: RegistryOptions,
    /// Empty deliveries so far. Never decremented, see `reset_empty_events`.
    empty_events: usize,
}

impl<S, B: Debug> Debug for Registry<S, B> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Registry")
            .field("backend", &self.backend)
            .field("paths", &self.entries.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .field("empty_events", &self.empty_events)
            .finish()
    }
}

impl<S: Subscriber> Registry<S> {
    /// Constructs a new `Registry`, picking its backend as described by
    /// `options.backend`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: RegistryOptions) -> Result<Self, Error> {
        let backend = AnyBackend::select(&options)?;

        Ok(Self::with_backend(backend, options))
    }
}

impl<S: Subscriber, B: Backend> Registry<S, B> {
    pub fn with_backend(backend: B, options: RegistryOptions) -> Self {
        Registry {
            backend,
            entries: HashMap::new(),
            options,
            empty_events: 0,
        }
    }

    /// Adds `subscriber` to the tail of `path`.
    ///
    /// The first subscriber of a path receives one message: the last
    /// [`initial_lines`](RegistryOptions::initial_lines) of the file, or
    /// [`EMPTY_FILE_MESSAGE`] if there are none. Joining a path that is
    /// already tailed sends nothing, and joining it twice is a no-op.
    ///
    /// On failure the registry is left untouched.
    pub fn subscribe(&mut self, subscriber: S, path: impl AsRef<Path>) -> Result<(), Error> {
        let requested = path.as_ref();
        let path = absolutify(requested).map_err(|source| Error::FileUnavailable {
            path: requested.to_path_buf(),
            source,
        })?;

        if let Some(entry) = self.entries.get_mut(&path) {
            debug!(path = %path.display(), "Already tailing, adding subscriber");
            if !entry.subscribers.insert(subscriber) {
                debug!(path = %path.display(), "Subscriber already present");
            }
            return Ok(());
        }

        let reader = open_reader(&mut self.backend, &path, self.options.initial_lines)?;

        if reader.content.is_empty() {
            subscriber.deliver(EMPTY_FILE_MESSAGE);
        } else {
            subscriber.deliver(&reader.content);
        }

        let mut subscribers = HashSet::new();
        subscribers.insert(subscriber);

        self.entries.insert(
            path,
            WatchEntry {
                file: reader.file,
                size: reader.size,
                subscribers,
                token: reader.token,
            },
        );

        Ok(())
    }

    /// Like [`subscribe`](Self::subscribe), but a failure is reported to the
    /// subscriber as a message prefixed with [`ERROR_MESSAGE_PREFIX`].
    ///
    /// Returns `true` if the subscription went through.
    pub fn subscribe_or_report(&mut self, subscriber: S, path: impl AsRef<Path>) -> bool
    where
        S: Clone,
    {
        let path = path.as_ref();

        match self.subscribe(subscriber.clone(), path) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Subscription failed");
                subscriber.deliver(&format!("{}{}", ERROR_MESSAGE_PREFIX, e));
                false
            }
        }
    }

    /// Removes `subscriber` from the tail of `path`, dropping the tail
    /// altogether if it was the last one.
    ///
    /// Returns `false` if the path is not tailed or `subscriber` is not one
    /// of its subscribers.
    pub fn unsubscribe(&mut self, subscriber: &S, path: impl AsRef<Path>) -> bool {
        let path = lookup_key(path.as_ref());

        let entry = match self.entries.get_mut(&path) {
            Some(entry) => entry,
            None => {
                warn!(
                    path = %path.display(),
                    "Attempted to remove a subscriber from a path not present in the registry"
                );
                return false;
            }
        };

        if !entry.subscribers.remove(subscriber) {
            warn!(
                path = %path.display(),
                "Attempted to remove a subscriber not present in the registry"
            );
            return false;
        }

        if entry.subscribers.is_empty() {
            self.remove_reader(&path);
        }

        true
    }

    /// Removes `subscriber` from every path it is subscribed to, returning
    /// how many that was.
    pub fn unsubscribe_all(&mut self, subscriber: &S) -> usize {
        let paths: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.subscribers.contains(subscriber))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed = 0;
        for path in paths {
            if self.unsubscribe(subscriber, &path) {
                removed += 1;
            }
        }

        removed
    }

    fn remove_reader(&mut self, path: &Path) {
        if let Some(entry) = self.entries.remove(path) {
            debug!(path = %path.display(), "No subscribers left, removing reader");
            self.backend.unwatch(entry.token);
        }
    }

    /// Processes a wakeup produced by the backend.
    ///
    /// Changes for paths that are no longer tailed, or that were produced
    /// for a watch since replaced, are ignored.
    pub fn handle(&mut self, change: Change) -> Result<Option<Update>, Error> {
        match self.entries.get(&change.path) {
            Some(entry) if entry.token == change.token => {}
            _ => {
                trace!(path = %change.path.display(), "Ignoring stale change");
                return Ok(None);
            }
        }

        match change.kind {
            ChangeKind::Readable => self.on_change(&change.path),
            ChangeKind::Modified => self.on_modify(&change.path),
        }
    }

    /// Reads whatever was appended to `path` through its long-lived handle,
    /// after comparing the file size on disk with the last one seen.
    ///
    /// Returns `Ok(None)` if the size did not change.
    pub fn on_change(&mut self, path: &Path) -> Result<Option<Update>, Error> {
        self.update(path, ChangeKind::Readable)
    }

    /// Same as [`on_change`](Self::on_change), but reads through a freshly
    /// opened handle, for wakeups known to mean "content was modified".
    pub fn on_modify(&mut self, path: &Path) -> Result<Option<Update>, Error> {
        self.update(path, ChangeKind::Modified)
    }

    fn update(&mut self, path: &Path, kind: ChangeKind) -> Result<Option<Update>, Error> {
        let Registry {
            backend, entries, ..
        } = &mut *self;

        let entry = match entries.get_mut(path) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let stat = match kind {
            ChangeKind::Readable => fs::metadata(path).map(|meta| (meta.len(), None)),
            ChangeKind::Modified => {
                File::open(path).and_then(|file| Ok((file.metadata()?.len(), Some(file))))
            }
        };
        let (size, mut short_lived) = match stat {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Moved away, the replacement will show up as a rotation
                trace!(path = %path.display(), "File missing");
                return Ok(None);
            }
            Err(source) => {
                return Err(Error::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let message = if size == entry.size {
            return Ok(None);
        } else if size < entry.size {
            info!(
                path = %path.display(),
                size,
                previous = entry.size,
                "Detected rotation"
            );

            match rotate(backend, entry, path) {
                Ok(message) => message,
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "Could not reopen rotated file, dropping its subscribers"
                    );
                    entries.remove(path);
                    return Err(e);
                }
            }
        } else {
            let file = match short_lived.as_mut() {
                Some(file) => file,
                None => &mut entry.file,
            };
            let text = read_appended(file, entry.size, size).map_err(|source| Error::Read {
                path: path.to_path_buf(),
                source,
            })?;
            // Stat'd size, even if a handle left on a renamed-away file
            // read nothing
            entry.size = size;
            text
        };

        self.fan_out(path, &message)
    }

    fn fan_out(&mut self, path: &Path, message: &str) -> Result<Option<Update>, Error> {
        let message = message.trim_end();

        if message.is_empty() {
            warn!(path = %path.display(), "Reader called with no message, wasted call?");
            self.empty_events += 1;
            if self.empty_events > self.options.empty_event_limit {
                return Err(Error::ExcessiveEmptyEvents {
                    count: self.empty_events,
                });
            }
        }

        let entry = match self.entries.get(path) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        for subscriber in &entry.subscribers {
            subscriber.deliver(message);
        }

        let recipients = entry.subscribers.len();
        debug!(path = %path.display(), recipients, "Delivered update");

        Ok(Some(Update {
            source: path.to_path_buf(),
            message: message.to_owned(),
            recipients,
        }))
    }

    /// Returns `true` if `path` is currently tailed.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.entries.contains_key(&lookup_key(path.as_ref()))
    }

    pub fn subscriber_count(&self, path: impl AsRef<Path>) -> usize {
        self.entries
            .get(&lookup_key(path.as_ref()))
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Returns the file size recorded at the last read of `path`.
    pub fn recorded_size(&self, path: impl AsRef<Path>) -> Option<u64> {
        self.entries
            .get(&lookup_key(path.as_ref()))
            .map(|entry| entry.size)
    }

    /// Returns the number of tailed paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn empty_events(&self) -> usize {
        self.empty_events
    }

    /// Forgets past empty deliveries, lifting
    /// [`Error::ExcessiveEmptyEvents`].
    pub fn reset_empty_events(&mut self) {
        self.empty_events = 0;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }
}

impl<S: Subscriber + Unpin, B: Backend> Registry<S, B> {
    /// Waits for the next delivery, see [`Registry`].
    pub async fn next_update(&mut self) -> Option<Result<Update, Error>> {
        self.next().await
    }
}

impl<S: Subscriber + Unpin, B: Backend> FuturesStream for Registry<S, B> {
    type Item = Result<Update, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let change = match ready!(this.backend.poll_next_unpin(cx)) {
                Some(change) => change,
                None => return task::Poll::Ready(None),
            };

            match this.handle(change) {
                Ok(None) => continue,
                res => return task::Poll::Ready(res.transpose()),
            }
        }
    }
}
