//! Testing utilities for Courier.
//!
//! # Features
//!
//! - [`RecordingTransport`]: A transport that records everything sent through it
//! - [`Settlement`]: How a delivery made by the recording transport was settled
//! - [`init_tracing`]: Route `tracing` output to the test writer

use async_trait::async_trait;
use courier_core::{
    Acknowledger, Delivery, DeliveryStream, Envelope, PublishError, Transport, TransportError,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

// ============================================================================
// Recording Transport
// ============================================================================

type ReplyScript = Box<dyn Fn(&Envelope) -> Result<Envelope, TransportError> + Send + Sync>;

/// A record of a published message: exchange, routing key, envelope.
pub type Published = (String, String, Envelope);

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledged.
    Ack,
    /// Rejected.
    Reject {
        /// Whether redelivery was requested.
        requeue: bool,
    },
}

#[derive(Default)]
struct Recorded {
    published: Vec<Published>,
    replies: Vec<(String, Envelope)>,
    dead_letters: Vec<Published>,
    requests: Vec<Published>,
    settlements: Vec<Settlement>,
}

/// A transport that records instead of sending.
///
/// Blocking calls are answered by the script set with
/// [`reply_with`](Self::reply_with); without one they time out immediately.
/// It cannot be consumed from; hand deliveries to a consumer with
/// [`delivery`](Self::delivery).
///
/// # Example
///
/// ```rust,ignore
/// let transport = Arc::new(RecordingTransport::new());
/// publisher.send_event(&OrderShipped { id: 1 }, &ctx).await?;
/// assert_eq!(transport.published().len(), 1);
/// ```
#[derive(Default)]
pub struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
    script: Mutex<Option<ReplyScript>>,
    fail_publishes: Mutex<bool>,
    fail_dead_letters: Mutex<bool>,
}

impl RecordingTransport {
    /// Create a new recording transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer blocking calls with `script`.
    pub fn reply_with<F>(&self, script: F)
    where
        F: Fn(&Envelope) -> Result<Envelope, TransportError> + Send + Sync + 'static,
    {
        *self.script.lock() = Some(Box::new(script));
    }

    /// Make publishes and replies fail.
    pub fn fail_publishes(&self, fail: bool) {
        *self.fail_publishes.lock() = fail;
    }

    /// Make dead-letter publishes fail.
    pub fn fail_dead_letters(&self, fail: bool) {
        *self.fail_dead_letters.lock() = fail;
    }

    /// Wrap an envelope in a delivery whose settlement is recorded here.
    pub fn delivery(&self, envelope: Envelope) -> Delivery {
        let acker = RecordingAcker {
            recorded: Arc::clone(&self.recorded),
        };
        Delivery::new(envelope, false, Box::new(acker))
    }

    /// Get fire-and-forget publishes.
    pub fn published(&self) -> Vec<Published> {
        self.recorded.lock().published.clone()
    }

    /// Get replies as (reply-to address, envelope).
    pub fn replies(&self) -> Vec<(String, Envelope)> {
        self.recorded.lock().replies.clone()
    }

    /// Get dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<Published> {
        self.recorded.lock().dead_letters.clone()
    }

    /// Get requests made through blocking calls.
    pub fn requests(&self) -> Vec<Published> {
        self.recorded.lock().requests.clone()
    }

    /// Get delivery settlements in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.recorded.lock().settlements.clone()
    }

    fn refuse(&self, exchange: &str, routing_key: &str) -> Result<(), PublishError> {
        if *self.fail_publishes.lock() {
            return Err(PublishError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), PublishError> {
        self.refuse(exchange, routing_key)?;
        self.recorded
            .lock()
            .published
            .push((exchange.to_string(), routing_key.to_string(), envelope));
        Ok(())
    }

    async fn publish_and_await_reply(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        self.refuse(exchange, routing_key)?;
        let reply = match &*self.script.lock() {
            Some(script) => script(&envelope),
            None => Err(TransportError::Timeout(timeout)),
        };
        self.recorded
            .lock()
            .requests
            .push((exchange.to_string(), routing_key.to_string(), envelope));
        reply
    }

    async fn reply(&self, reply_to: &str, envelope: Envelope) -> Result<(), PublishError> {
        self.refuse("", reply_to)?;
        self.recorded
            .lock()
            .replies
            .push((reply_to.to_string(), envelope));
        Ok(())
    }

    async fn dead_letter(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), PublishError> {
        if *self.fail_dead_letters.lock() {
            return Err(PublishError::Closed(exchange.to_string()));
        }
        self.recorded
            .lock()
            .dead_letters
            .push((exchange.to_string(), routing_key.to_string(), envelope));
        Ok(())
    }

    fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        Err(TransportError::UnknownQueue(queue.to_string()))
    }
}

struct RecordingAcker {
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.recorded.lock().settlements.push(Settlement::Ack);
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        self.recorded
            .lock()
            .settlements
            .push(Settlement::Reject { requeue });
        Ok(())
    }
}

// ============================================================================
// Tracing
// ============================================================================

/// Install a test-friendly `tracing` subscriber.
///
/// Honors `RUST_LOG`, defaulting to `debug` for Courier crates. Safe to call
/// from every test; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courier=debug,courier_std=debug,courier_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
