//! Per-channel ownership hand-off.
//!
//! Every owner of a channel's output (an actor, or a cleanup of an
//! unregistered channel) queues behind the previous owner when it is
//! created, not when it first runs, so ownership follows creation order
//! regardless of how tasks are scheduled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::domain::ChannelKey;

/// Release signal of the most recent owner of a key.
struct Tail {
    generation: u64,
    released: oneshot::Receiver<()>,
}

#[derive(Default)]
pub(crate) struct LeaseChain {
    tails: Arc<DashMap<ChannelKey, Tail>>,
    next_generation: AtomicU64,
}

impl LeaseChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new owner of `key` behind the current one.
    pub fn enqueue(&self, key: &ChannelKey) -> PendingLease {
        let (release, released) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .tails
            .insert(
                key.clone(),
                Tail {
                    generation,
                    released,
                },
            )
            .map(|tail| tail.released);

        PendingLease {
            lease: Lease {
                key: key.clone(),
                generation,
                tails: self.tails.clone(),
                _release: release,
            },
            previous,
        }
    }

    /// Number of keys with a live owner.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tails.len()
    }
}

/// A place in the queue; resolves into a [`Lease`] once the predecessor is done.
pub(crate) struct PendingLease {
    lease: Lease,
    previous: Option<oneshot::Receiver<()>>,
}

impl PendingLease {
    pub async fn acquire(self) -> Lease {
        if let Some(previous) = self.previous {
            // An error means the sender was dropped, which is the release.
            let _ = previous.await;
        }
        self.lease
    }
}

/// Ownership of a key. Dropping it hands the key to the next owner.
pub(crate) struct Lease {
    key: ChannelKey,
    generation: u64,
    tails: Arc<DashMap<ChannelKey, Tail>>,
    _release: oneshot::Sender<()>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Last owner out forgets the key.
        let generation = self.generation;
        self.tails
            .remove_if(&self.key, |_, tail| tail.generation == generation);
    }
}
