//! The receiving side of a tail: anything that can take a text message.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// A party interested in the lines appended to one or more files.
///
/// Subscribers are stored in sets, so `Eq` and `Hash` must reflect a stable
/// identity (one connection, one subscriber) rather than their contents.
pub trait Subscriber: Eq + Hash {
    /// Hands a message over to the subscriber.
    ///
    /// Delivery is best-effort: implementations must tolerate being called
    /// after the remote side has gone away, and swallow the failure.
    fn deliver(&self, text: &str);
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(0);

/// A [`Subscriber`] forwarding every message into an unbounded channel.
///
/// Clones share the same identity, so a clone can be handed to the registry
/// while the original is kept around to unsubscribe later.
#[derive(Clone, Debug)]
pub struct ChannelSubscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSubscriber {
    /// Constructs a new subscriber along with the receiving end of its
    /// messages.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);

        (ChannelSubscriber { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for ChannelSubscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelSubscriber {}

impl Hash for ChannelSubscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, text: &str) {
        // Only fails once the receiver is gone, which is the consumer's
        // business.
        let _ = self.tx.send(text.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_clones_share_identity() {
        let (first, _rx1) = ChannelSubscriber::new();
        let (second, _rx2) = ChannelSubscriber::new();

        let mut set = HashSet::new();
        assert!(set.insert(first.clone()));
        assert!(!set.insert(first.clone()));
        assert!(set.insert(second));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_deliver_after_receiver_dropped() {
        let (subscriber, mut rx) = ChannelSubscriber::new();
        subscriber.deliver("foo");
        assert_eq!(rx.try_recv().unwrap(), "foo");

        drop(rx);
        subscriber.deliver("bar");
    }
}
