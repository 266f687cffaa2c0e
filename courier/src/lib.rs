//! # courier - Message Dispatch and RPC over an Asynchronous Broker
//!
//! `courier` publishes four kinds of messages (commands, queries,
//! notifications and events) and routes inbound ones to exactly one
//! registered handler per `(kind, payload type)`. Commands and queries can
//! also be called synchronously: the publisher waits for a correlated reply
//! and turns a remote failure into a typed local error.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[derive(Serialize, Deserialize, Message)]
//! struct CreateOrder { id: u64 }
//!
//! #[derive(Default)]
//! struct OrderListener;
//!
//! #[listener]
//! impl OrderListener {
//!     #[command]
//!     async fn create(&self, cmd: CreateOrder) -> Result<serde_json::Value, HandlerError> {
//!         Ok(serde_json::json!({ "status": "ok" }))
//!     }
//! }
//!
//! let courier = Courier::builder()
//!     .config(config)
//!     .transport(Arc::new(broker))
//!     .listener(Arc::new(OrderListener))
//!     .build()?;
//! let consumer = courier.start()?;
//!
//! let status: serde_json::Value = courier
//!     .publisher()
//!     .do_command(&CreateOrder { id: 7 }, &HeaderContext::new())
//!     .await?;
//! ```
//!
//! ## Crates
//!
//! - `courier-core` - wire types, traits and errors
//! - `courier-std` - registry, router, publisher, retry, consumer, in-memory broker
//! - `courier-macros` - `#[derive(Message)]` and `#[listener]`

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

extern crate self as courier;

mod runtime;

pub use courier_core::{
    // Transport
    Acknowledger,
    // Errors
    BoxError,
    Delivery,
    DeliveryStream,
    // Wire
    Envelope,
    ExceptionInfo,
    // Handler
    Handler,
    HandlerError,
    HeaderContext,
    Headers,
    IntoReply,
    // Message
    Message,
    MessageKind,
    PublishError,
    PublisherTimeoutError,
    RegistryError,
    RemoteProcessError,
    ResponseEnvelope,
    RouteError,
    RpcError,
    Transport,
    TransportError,
    headers,
    simple_type_name,
};

pub use courier_std::{
    BrokerStats, ConcurrencyRange, ConfigError, Consumer, ConsumerHandle, CourierConfig,
    DeadLetterTarget, DeliveryOutcome, HandlerCandidate, HandlerDescriptor, HandlerRegistry,
    InMemoryBroker, Listener, PendingReplies, Publisher, PublisherConfig, RegistryBuilder,
    RetryDecision, RetryPolicy, RouteOutcome, Router, codec,
};

pub use runtime::{Courier, CourierBuilder, CourierError};

/// Configuration types.
pub mod config {
    pub use courier_std::config::{
        ConcurrencyRange, ConfigError, ConsumerSection, CourierConfig, DeadLetterSection,
        PublisherSection, RetrySection,
    };
}

/// Testing utilities.
#[cfg(feature = "testing")]
pub mod testing {
    pub use courier_std::testing::{RecordingTransport, Settlement, init_tracing};
}

/// Prelude module - common imports for Courier.
///
/// # Usage
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Courier, CourierConfig, CourierError, HandlerError, HeaderContext, InMemoryBroker,
        Listener, Message, MessageKind, Publisher, RegistryBuilder, RpcError,
    };

    #[cfg(feature = "macros")]
    pub use crate::listener;
}

#[cfg(feature = "macros")]
pub use courier_macros::{Message, listener};
