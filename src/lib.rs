//! A library for tailing text files and fanning their new lines out to many
//! subscribers, surviving log rotation along the way.
//!
//! Change detection is done either through OS file notifications (driven by
//! [`notify`](https://crates.io/crates/notify)) or by polling, behind the
//! same [`Registry`].
//!
//! ## Example
//!
//! ```no_run
//! use tailcast::{ChannelSubscriber, Registry, RegistryOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tailcast::Error> {
//!     let mut registry = Registry::new(RegistryOptions::default())?;
//!
//!     // The subscriber immediately receives the last lines of the file.
//!     let (subscriber, mut messages) = ChannelSubscriber::new();
//!     registry.subscribe(subscriber, "some/file.log")?;
//!
//!     loop {
//!         tokio::select! {
//!             Some(message) = messages.recv() => println!("{}", message),
//!             update = registry.next_update() => match update {
//!                 Some(Ok(_)) => {}
//!                 Some(Err(e)) => return Err(e),
//!                 None => return Ok(()),
//!             },
//!         }
//!     }
//! }
//! ```
//!
//! ## Caveats
//!
//! Rotation is detected by the file shrinking. A file truncated and rewritten
//! to its previous size in between two wakeups looks unchanged.

mod error;
mod options;
mod registry;
mod subscriber;

pub mod backend;
pub mod tail;

pub use error::Error;
pub use options::{BackendKind, RegistryOptions};
pub use registry::{Registry, Update, EMPTY_FILE_MESSAGE, ERROR_MESSAGE_PREFIX};
pub use subscriber::{ChannelSubscriber, Subscriber};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
