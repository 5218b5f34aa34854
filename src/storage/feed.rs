//! Live queries on top of the storage
//!
//! Every write to a capsule is announced on the [`ChangeFeed`] with the ID of its owner. A
//! [`Subscription`] listens to the feed and re-reads the full set of the owner's capsules for
//! every change that concerns them, so subscribers always receive complete snapshots. When
//! announcements may have been missed, the feed asks every live query to read again.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capsules::Capsule;

use super::Result;
use super::Storage;

/// Announcements kept for slow listeners before they lag
const FEED_CAPACITY: usize = 256;

/// Snapshots kept for a slow subscriber before the producer waits
const SNAPSHOT_BUFFER: usize = 16;

/// Announcement on the change feed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
    /// The capsules of this owner changed
    Owner(Uuid),

    /// Announcements may have been lost, every live query reads again
    Resync,
}

/// Feed of owner IDs whose capsules changed
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    /// Sending side, cloned into every storage handle
    sender: broadcast::Sender<Change>,
}

impl ChangeFeed {
    /// Create a new feed without listeners
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);

        Self { sender }
    }

    /// Announce a change to the capsules of an owner
    pub fn notify(&self, owner_id: Uuid) {
        // no listeners is fine, nobody is watching this owner
        let listeners = self.sender.send(Change::Owner(owner_id)).unwrap_or_default();

        tracing::trace!(%owner_id, listeners, "Capsule change announced");
    }

    /// Make every live query read a fresh snapshot
    pub fn resync(&self) {
        let listeners = self.sender.send(Change::Resync).unwrap_or_default();

        tracing::debug!(listeners, "Capsule changes resync announced");
    }

    /// Start listening to announcements from now on
    fn listen(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to stop a live query
///
/// Stopping is idempotent, only the first call actually releases the query
#[derive(Clone, Debug)]
pub struct Unsubscribe {
    /// Cancels the producer and silences the subscription
    token: CancellationToken,

    /// Set by the first call to [`Unsubscribe::unsubscribe`]
    released: Arc<AtomicBool>,
}

impl Unsubscribe {
    /// Create a new, active handle
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop the live query
    ///
    /// Returns `true` when this call released it, `false` when it was already released
    pub fn unsubscribe(&self) -> bool {
        let first = !self.released.swap(true, Ordering::AcqRel);

        self.token.cancel();

        first
    }

    /// Is the live query released?
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A live query of all capsules of a single owner
///
/// Dropping the subscription releases the query
#[derive(Debug)]
pub struct Subscription {
    /// The owner being watched
    owner_id: Uuid,

    /// Snapshots in the order they were read
    receiver: mpsc::Receiver<Result<Vec<Capsule>>>,

    /// Stop handle, shared with the producer
    unsubscribe: Unsubscribe,
}

impl Subscription {
    /// A handle to stop this subscription from elsewhere
    pub fn handle(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }

    /// Wait for the next full snapshot
    ///
    /// Returns `None` once the subscription is released, snapshots that are still buffered at
    /// that point are never handed out
    pub async fn next(&mut self) -> Option<Result<Vec<Capsule>>> {
        if self.unsubscribe.is_released() {
            return None;
        }

        tokio::select! {
            biased;
            () = self.unsubscribe.token.cancelled() => None,
            snapshot = self.receiver.recv() => snapshot,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.unsubscribe.unsubscribe() {
            tracing::debug!(owner_id = %self.owner_id, "Live query released on drop");
        }
    }
}

/// Start a live query for an owner
pub(super) fn subscribe<S: Storage>(storage: S, owner_id: Uuid) -> Subscription {
    // listen before the first read, so no change falls in between
    let changes = storage.changes().listen();

    let (sender, receiver) = mpsc::channel(SNAPSHOT_BUFFER);
    let unsubscribe = Unsubscribe::new();

    tokio::spawn(produce(
        storage,
        owner_id,
        changes,
        sender,
        unsubscribe.token.clone(),
    ));

    tracing::debug!(%owner_id, "Live query started");

    Subscription {
        owner_id,
        receiver,
        unsubscribe,
    }
}

/// Read a snapshot for every relevant change, until cancelled
async fn produce<S: Storage>(
    storage: S,
    owner_id: Uuid,
    mut changes: broadcast::Receiver<Change>,
    sender: mpsc::Sender<Result<Vec<Capsule>>>,
    token: CancellationToken,
) {
    let mut should_read = true;

    loop {
        if should_read {
            let snapshot = storage.find_all_capsules_by_owner(&owner_id).await;

            tokio::select! {
                () = token.cancelled() => break,
                sent = sender.send(snapshot) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        should_read = tokio::select! {
            () = token.cancelled() => break,
            change = changes.recv() => match change {
                Ok(Change::Owner(changed_owner_id)) => changed_owner_id == owner_id,
                Ok(Change::Resync) => true,
                Err(RecvError::Lagged(skipped)) => {
                    // a fresh snapshot covers whatever was skipped
                    tracing::warn!(%owner_id, skipped, "Live query lagged behind the change feed");
                    true
                }
                Err(RecvError::Closed) => break,
            },
        };
    }

    tracing::debug!(%owner_id, "Live query stopped");
}
