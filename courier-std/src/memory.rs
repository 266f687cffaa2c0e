//! In-memory broker transport.
//!
//! A single-process stand-in for an AMQP-style broker: named queues, direct
//! bindings from `(exchange, routing key)` to queues, the default exchange
//! `""` that routes by queue name, and a direct reply-to address backed by
//! [`PendingReplies`]. Suitable for tests and single-node deployments.

use crate::{config::CourierConfig, correlation::PendingReplies};
use async_trait::async_trait;
use courier_core::{
    Acknowledger, Delivery, DeliveryStream, Envelope, PublishError, Transport, TransportError,
    headers,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

/// The reply-to address stamped on requests.
pub const REPLY_ADDRESS: &str = "amq.rabbitmq.reply-to";

struct QueueState {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
}

/// A snapshot of broker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages routed to at least one queue.
    pub published: u64,
    /// Deliveries acknowledged.
    pub acked: u64,
    /// Deliveries rejected, requeued or not.
    pub rejected: u64,
    /// Deliveries put back on their queue.
    pub requeued: u64,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    bindings: Mutex<HashMap<(String, String), Vec<String>>>,
    pending: PendingReplies,
    counters: Counters,
}

impl Inner {
    fn route(self: &Arc<Self>, exchange: &str, routing_key: &str, envelope: Envelope) -> Result<(), PublishError> {
        if exchange.is_empty() && routing_key == REPLY_ADDRESS {
            return self.deliver_reply(envelope);
        }

        let targets = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            self.bindings
                .lock()
                .get(&(exchange.to_string(), routing_key.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        let unroutable = || PublishError::Unroutable {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if targets.is_empty() {
            return Err(unroutable());
        }

        let queues = self.queues.lock();
        for name in &targets {
            let queue = queues.get(name).ok_or_else(unroutable)?;
            self.enqueue(name, &queue.tx, envelope.clone(), false)?;
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        trace!(exchange, routing_key, queues = targets.len(), "message routed");
        Ok(())
    }

    fn enqueue(
        self: &Arc<Self>,
        queue: &str,
        tx: &mpsc::UnboundedSender<Delivery>,
        envelope: Envelope,
        redelivered: bool,
    ) -> Result<(), PublishError> {
        let acker = MemoryAcker {
            broker: Arc::clone(self),
            queue: queue.to_string(),
            correlation_id: envelope.correlation_id().map(str::to_string),
            envelope: Some(envelope.clone()),
        };
        tx.send(Delivery::new(envelope, redelivered, Box::new(acker)))
            .map_err(|_| PublishError::Closed(queue.to_string()))
    }

    fn deliver_reply(&self, envelope: Envelope) -> Result<(), PublishError> {
        let Some(id) = envelope.correlation_id().map(str::to_string) else {
            warn!("dropping reply without correlation id");
            return Ok(());
        };
        if !self.pending.complete(&id, envelope) {
            debug!(correlation_id = %id, "late reply discarded");
        }
        Ok(())
    }
}

/// An in-process broker.
///
/// Cheap to clone; clones share queues, bindings and pending calls.
///
/// # Example
///
/// ```rust,ignore
/// let broker = InMemoryBroker::new();
/// broker.declare_queue("orders.queue");
/// broker.bind("orders.exchange", "orders", "orders.queue")?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue. Declaring an existing queue is a no-op.
    pub fn declare_queue(&self, name: impl Into<String>) -> &Self {
        let name = name.into();
        self.inner.queues.lock().entry(name).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            QueueState { tx, rx: Some(rx) }
        });
        self
    }

    /// Bind a queue to `(exchange, routing_key)`.
    pub fn bind(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: &str,
    ) -> Result<&Self, TransportError> {
        if !self.inner.queues.lock().contains_key(queue) {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }
        let mut bindings = self.inner.bindings.lock();
        let bound = bindings
            .entry((exchange.into(), routing_key.into()))
            .or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(self)
    }

    /// Declare the queues and bindings a service configuration expects.
    ///
    /// The consumer queue is bound to the publisher's default destination and
    /// the dead-letter queue to the dead-letter destination.
    pub fn provision(&self, config: &CourierConfig) -> Result<&Self, TransportError> {
        self.declare_queue(config.consumer.queue.as_str())
            .declare_queue(config.dead_letter.queue.as_str());
        self.bind(
            config.publisher.exchange.as_str(),
            config.publisher.routing_key.as_str(),
            &config.consumer.queue,
        )?;
        self.bind(
            config.dead_letter.exchange.as_str(),
            config.dead_letter.routing_key.as_str(),
            &config.dead_letter.queue,
        )?;
        debug!(service = %config.service, "topology provisioned");
        Ok(self)
    }

    /// Get a snapshot of the counters.
    pub fn stats(&self) -> BrokerStats {
        let counters = &self.inner.counters;
        BrokerStats {
            published: counters.published.load(Ordering::Relaxed),
            acked: counters.acked.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            requeued: counters.requeued.load(Ordering::Relaxed),
        }
    }

    /// Get the number of blocking calls still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queues", &self.inner.queues.lock().len())
            .field("pending", &self.inner.pending)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), PublishError> {
        self.inner.route(exchange, routing_key, envelope)
    }

    async fn publish_and_await_reply(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        let pending = self.inner.pending.register();
        let request = envelope
            .with_header(headers::REPLY_TO, REPLY_ADDRESS)
            .with_header(headers::CORRELATION_ID, pending.id());
        self.inner.route(exchange, routing_key, request)?;
        pending.wait(timeout).await
    }

    fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let mut queues = self.inner.queues.lock();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let rx = state
            .rx
            .take()
            .ok_or_else(|| TransportError::AlreadyConsumed(queue.to_string()))?;
        debug!(queue, "consumer attached");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Settles a delivery made by [`InMemoryBroker`].
///
/// A request dropped unsettled means its consumer went away without handling
/// it; the waiting caller is failed with [`PublishError::Closed`].
struct MemoryAcker {
    broker: Arc<Inner>,
    queue: String,
    correlation_id: Option<String>,
    envelope: Option<Envelope>,
}

impl MemoryAcker {
    fn settle(mut self: Box<Self>) {
        self.envelope = None;
        self.correlation_id = None;
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.broker.counters.acked.fetch_add(1, Ordering::Relaxed);
        self.settle();
        Ok(())
    }

    async fn reject(mut self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        let counters = &self.broker.counters;
        counters.rejected.fetch_add(1, Ordering::Relaxed);
        if requeue {
            if let Some(envelope) = self.envelope.take() {
                let broker = Arc::clone(&self.broker);
                let queue = self.queue.clone();
                self.settle();
                let queues = broker.queues.lock();
                let state = queues
                    .get(&queue)
                    .ok_or_else(|| TransportError::UnknownQueue(queue.clone()))?;
                broker.enqueue(&queue, &state.tx, envelope, true)?;
                broker.counters.requeued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        self.settle();
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if self.envelope.is_none() {
            return;
        }
        if let Some(id) = self.correlation_id.take() {
            debug!(queue = %self.queue, correlation_id = %id, "request dropped unsettled");
            self.broker
                .pending
                .fail(&id, PublishError::Closed(self.queue.clone()));
        }
    }
}
