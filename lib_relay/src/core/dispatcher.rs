//! # Subscriber Registry and Broadcast Fan-out
//!
//! The `Dispatcher` owns the set of connected local subscribers and pushes
//! every normalized event to all of them.
//!
//! ## How it works:
//!
//! 1.  **Per-subscriber channel**: registering a subscriber creates a
//!     bounded MPSC channel. The dispatcher keeps the sending half; the
//!     subscriber's socket task owns the receiving half and writes whatever
//!     arrives to its socket. A handle is "open" for as long as that receiver
//!     is alive and keeps up.
//!
//! 2.  **Serialize once**: an event is turned into JSON a single time and the
//!     resulting [`Frame`] (`Arc<str>`) is shared by every subscriber.
//!
//! 3.  **Pruning**: while broadcasting, handles that are no longer open, or
//!     whose queue is full, are dropped from the registry with `retain`. A
//!     stalled subscriber costs at most one full queue of frames and never
//!     blocks delivery to the others.
//!
//! Membership is guarded by a `std::sync::Mutex` that is never held across
//! an `.await`, which serializes registration, deregistration and fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::events::NormalizedEvent;

/// One serialized event, shared by every subscriber it is sent to.
pub type Frame = Arc<str>;

pub type SubscriberId = u64;

/// Frames a subscriber may fall behind by before it is dropped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Outcome of a single [`Dispatcher::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Handles the frame was queued on.
    pub delivered: usize,
    /// Handles removed because they were no longer open.
    pub pruned: usize,
}

/// # Subscriber Handle
///
/// The dispatcher's view of one connected subscriber.
struct SubscriberHandle {
    id: SubscriberId,
    /// Free-form label for logs, usually the peer address.
    label: String,
    sender: mpsc::Sender<Frame>,
}

impl SubscriberHandle {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

pub struct Dispatcher {
    clients: Mutex<Vec<SubscriberHandle>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher whose subscribers may each queue up to `buffer` frames.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
        }
    }

    fn clients(&self) -> MutexGuard<'_, Vec<SubscriberHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add Client
    ///
    /// Registers a new, open subscriber and returns its id together with the
    /// receiver its socket task should drain.
    pub fn add_client(&self, label: &str) -> (SubscriberId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut clients = self.clients();
        clients.push(SubscriberHandle {
            id,
            label: label.to_string(),
            sender: tx,
        });
        tracing::debug!(subscriber = id, peer = label, total = clients.len(), "Subscriber registered");
        (id, rx)
    }

    /// Deregisters a subscriber. Unknown ids are ignored, so the close and the
    /// error path of a socket may both call this.
    pub fn remove_client(&self, id: SubscriberId) {
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        if clients.len() != before {
            tracing::debug!(subscriber = id, total = clients.len(), "Subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients().len()
    }

    /// # Broadcast
    ///
    /// Sends `event` to every open subscriber and prunes the ones that are no
    /// longer open or have a full queue. Never waits on a subscriber. With no
    /// subscribers this returns immediately without serializing anything.
    pub fn broadcast(&self, event: &NormalizedEvent) -> BroadcastReport {
        let mut clients = self.clients();
        if clients.is_empty() {
            return BroadcastReport::default();
        }

        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event for broadcast");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        clients.retain(|client| {
            if !client.is_open() {
                tracing::info!(subscriber = client.id, peer = %client.label, "Subscriber no longer open. Pruning.");
                report.pruned += 1;
                return false;
            }
            match client.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = client.id, peer = %client.label, "Subscriber queue full. Pruning.");
                    report.pruned += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::info!(subscriber = client.id, peer = %client.label, "Subscriber no longer open. Pruning.");
                    report.pruned += 1;
                    false
                }
            }
        });
        report
    }

    /// Drops every handle. Each subscriber's receiver then yields `None`,
    /// which its socket task treats as the signal to close.
    pub fn close_all(&self) {
        let mut clients = self.clients();
        let closed = clients.len();
        clients.clear();
        tracing::info!(closed, "Closed all subscribers");
    }
}
