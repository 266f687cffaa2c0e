//! Correlation of replies to outstanding calls.
//!
//! Every blocking call registers a one-shot slot keyed by a fresh correlation
//! id. Whichever of reply or timeout happens first removes the slot; a reply
//! arriving after that finds nothing and is discarded.

use courier_core::{Envelope, PublishError, TransportError};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

type Slot = oneshot::Sender<Result<Envelope, PublishError>>;

/// The correlation-id to pending-call map.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default)]
pub struct PendingReplies {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PendingReplies {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding call.
    pub fn register(&self) -> PendingReply {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id.clone(), tx);
        trace!(correlation_id = %id, "registered pending reply");
        PendingReply {
            id,
            rx,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Deliver a reply.
    ///
    /// Returns `false` when nobody is waiting for `id` any more.
    pub fn complete(&self, id: &str, reply: Envelope) -> bool {
        self.resolve(id, Ok(reply))
    }

    /// Fail an outstanding call, e.g. because its destination went away.
    pub fn fail(&self, id: &str, err: PublishError) -> bool {
        self.resolve(id, Err(err))
    }

    fn resolve(&self, id: &str, result: Result<Envelope, PublishError>) -> bool {
        let slot = self.slots.lock().remove(id);
        match slot {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                debug!(correlation_id = id, "discarding reply for unknown or expired call");
                false
            }
        }
    }

    /// Get the number of outstanding calls.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingReplies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReplies")
            .field("outstanding", &self.len())
            .finish()
    }
}

/// One outstanding call.
///
/// Dropping it releases the registration, so a cancelled or timed-out caller
/// never leaves an entry behind.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Result<Envelope, PublishError>>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PendingReply {
    /// The correlation id to stamp on the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply.
    pub async fn wait(mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result.map_err(TransportError::from),
            // Sender dropped without answering.
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                debug!(correlation_id = %self.id, ?timeout, "reply timed out");
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.id);
    }
}
