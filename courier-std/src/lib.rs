//! # courier-std
//!
//! Standard implementations for the Courier message dispatch and RPC layer.
//!
//! This crate provides:
//! - **Handler registry**: [`RegistryBuilder`], [`HandlerRegistry`], [`Listener`]
//! - **Routing**: [`Router`]
//! - **Response codec**: [`codec`]
//! - **RPC client**: [`Publisher`], backed by the correlation map [`PendingReplies`]
//! - **Retry and dead-lettering**: [`RetryPolicy`], [`Consumer`]
//! - **Transport**: [`InMemoryBroker`]
//! - **Configuration**: [`CourierConfig`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core
pub use courier_core;

// Modules
pub mod codec;
pub mod config;
pub mod consumer;
pub mod correlation;
pub mod memory;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod router;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConcurrencyRange, ConfigError, CourierConfig};
pub use consumer::{Consumer, ConsumerHandle, DeliveryOutcome};
pub use correlation::{PendingReplies, PendingReply};
pub use memory::{BrokerStats, InMemoryBroker};
pub use publisher::{Publisher, PublisherConfig};
pub use registry::{HandlerCandidate, HandlerDescriptor, HandlerRegistry, Listener, RegistryBuilder};
pub use retry::{DeadLetterTarget, FailureCause, RetryDecision, RetryPolicy};
pub use router::{RouteOutcome, Router};
