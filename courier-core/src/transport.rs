//! The broker seam.
//!
//! Courier does not own connections, topology or delivery guarantees. It only
//! needs a way to publish an envelope, to publish one and wait for the
//! correlated reply, and to receive inbound deliveries with an ack handle.

use crate::{
    envelope::Envelope,
    error::{PublishError, TransportError},
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{fmt, time::Duration};

/// A stream of inbound deliveries for one queue.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// The broker client Courier publishes and consumes through.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish an envelope to an exchange with a routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), PublishError>;

    /// Publish a request and wait for the correlated reply.
    ///
    /// The transport stamps the reply-to address and correlation id. If the
    /// deadline passes, the pending registration must be released so a late
    /// reply is discarded.
    async fn publish_and_await_reply(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, TransportError>;

    /// Send a reply to the address a request carried.
    ///
    /// Defaults to publishing on the default exchange with the address as
    /// routing key.
    async fn reply(&self, reply_to: &str, envelope: Envelope) -> Result<(), PublishError> {
        self.publish("", reply_to, envelope).await
    }

    /// Publish a message to a dead-letter destination.
    async fn dead_letter(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), PublishError> {
        self.publish(exchange, routing_key, envelope).await
    }

    /// Start consuming a queue.
    fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge; the broker forgets the message.
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;

    /// Reject; with `requeue` the broker redelivers it.
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError>;
}

/// One inbound message plus the handle that settles it.
///
/// `ack` and `reject` consume the delivery, so it is settled exactly once.
pub struct Delivery {
    envelope: Envelope,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery.
    pub fn new(envelope: Envelope, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            redelivered,
            acker,
        }
    }

    /// The received message.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Whether the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge the delivery.
    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    /// Reject the delivery.
    pub async fn reject(self, requeue: bool) -> Result<(), TransportError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}
