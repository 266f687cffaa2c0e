#![allow(dead_code)]

use courier::{
    CourierConfig, Envelope, HandlerError, Listener, Message, RegistryBuilder, headers,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

// ============================================================================
// Payload Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub id: u64,
}

impl Message for CreateOrder {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrder {
    pub id: u64,
}

impl Message for GetOrder {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShipped {
    pub id: u64,
}

impl Message for OrderShipped {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrder {
    pub id: u64,
}

impl Message for CancelOrder {}

// ============================================================================
// Listeners
// ============================================================================

/// Orders service handlers, registered by hand.
#[derive(Default)]
pub struct OrderListener {
    pub seen: parking_lot::Mutex<HashSet<u64>>,
    pub shipped: AtomicU32,
    pub cancel_attempts: AtomicU32,
}

impl OrderListener {
    async fn create(&self, cmd: CreateOrder) -> Result<OrderStatus, HandlerError> {
        if !self.seen.lock().insert(cmd.id) {
            return Err(HandlerError::new("IllegalStateException", "duplicate"));
        }
        Ok(OrderStatus {
            status: "ok".to_string(),
        })
    }

    async fn get(&self, query: GetOrder) -> Result<Option<u64>, HandlerError> {
        Ok(self.seen.lock().contains(&query.id).then_some(query.id))
    }

    async fn on_shipped(&self, _event: OrderShipped) {
        self.shipped.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_cancel(&self, cmd: CancelOrder) -> Result<(), HandlerError> {
        self.cancel_attempts.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::new(
            "IllegalStateException",
            format!("order {} cannot be cancelled", cmd.id),
        ))
    }
}

impl Listener for OrderListener {
    fn register(self: Arc<Self>, builder: &mut RegistryBuilder) {
        let this = self.clone();
        builder.command("OrderListener", "create", move |cmd: CreateOrder| {
            let this = this.clone();
            async move { this.create(cmd).await }
        });
        let this = self.clone();
        builder.query("OrderListener", "get", move |query: GetOrder| {
            let this = this.clone();
            async move { this.get(query).await }
        });
        let this = self.clone();
        builder.event("OrderListener", "on_shipped", move |event: OrderShipped| {
            let this = this.clone();
            async move { this.on_shipped(event).await }
        });
        let this = self;
        builder.notification("OrderListener", "on_cancel", move |cmd: CancelOrder| {
            let this = this.clone();
            async move { this.on_cancel(cmd).await }
        });
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn config() -> CourierConfig {
    CourierConfig::from_toml_str(
        r#"
        service = "orders"

        [publisher]
        exchange = "orders.exchange"
        routing_key = "orders"
        reply_timeout_ms = 500
        pass_through_headers = ["x-trace-id"]

        [consumer]
        queue = "orders.queue"
        concurrency = "1-4"

        [retry]
        max_attempts = 3
        initial_interval_ms = 100
        multiplier = 2.0
        max_interval_ms = 1000

        [dead_letter]
        exchange = "orders.dlx"
        routing_key = "orders.dead"
        queue = "orders.dlq"
        "#,
    )
    .expect("test configuration is valid")
}

pub fn envelope(kind: &str, payload_type: &str, body: &str) -> Envelope {
    Envelope::new(Default::default(), body.as_bytes().to_vec())
        .with_header(headers::MESSAGE_KIND, kind)
        .with_header(headers::PAYLOAD_TYPE, payload_type)
}
