//! Tails a given set of files, printing everything their subscriber receives.
//!
//! Usage:
//!     tail /path/to/file1 /path/to/file2 ...
//!
//! The files must exist. Set `RUST_LOG=debug` for the registry's own
//! diagnostics.

use tailcast::{ChannelSubscriber, Registry, RegistryOptions};
use tracing::error;

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut registry = Registry::new(RegistryOptions::default())?;
    let (subscriber, mut messages) = ChannelSubscriber::new();

    for f in &args {
        registry.subscribe_or_report(subscriber.clone(), f);
    }

    loop {
        tokio::select! {
            Some(message) = messages.recv() => println!("{}", message),
            update = registry.next_update() => match update {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Giving up");
                    return Err(e.into());
                }
                None => return Ok(()),
            },
        }
    }
}
