//! # courier-core
//!
//! Core types and traits for the Courier message dispatch and RPC layer.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! transports and listener libraries that don't need the full `courier-std`
//! implementation.
//!
//! # Wire Contract
//!
//! Courier moves four kinds of messages over an asynchronous broker:
//! [`MessageKind::Command`], [`MessageKind::Query`], [`MessageKind::Notification`]
//! and [`MessageKind::Event`]. Publisher and consumer agree on a small, fixed
//! header vocabulary (see [`headers`]) and on the [`ResponseEnvelope`] that carries
//! a handler's outcome back to a waiting caller.
//!
//! ## Layer 1: Wire ([`Envelope`])
//!
//! A string-keyed header map plus opaque body bytes. This is the only thing a
//! [`Transport`] ever sees.
//!
//! ## Layer 2: Payload ([`Message`])
//!
//! Typed, serializable payloads. Every payload has a stable type name that is
//! stamped into the `payload-type-name` header on the way out and used for
//! handler lookup on the way in.
//!
//! ## Layer 3: Handler ([`Handler`])
//!
//! User functions that receive exactly one payload and produce a reply (or a
//! [`HandlerError`]). [`TypedHandler`] erases the payload type so handlers of
//! different payloads can live in one registry.
//!
//! ## Layer 4: Outcome ([`ResponseEnvelope`])
//!
//! Either a value or an [`ExceptionInfo`], never both, tagged with the origin
//! service. Remote failures are carried as a stable root-cause kind string plus
//! message rather than a shared error type.
//!
//! # Error Types
//!
//! - [`RegistryError`] - Startup-fatal registry construction errors
//! - [`RouteError`] - Per-message routing errors
//! - [`RpcError`] - Errors observed by the caller of a blocking call
//! - [`PublishError`] / [`TransportError`] - Broker-level failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod handler;
pub mod headers;
mod kind;
mod message;
mod response;
mod transport;

// Re-exports
pub use envelope::Envelope;
pub use error::{
    BoxError, PublishError, PublisherTimeoutError, RegistryError, RemoteProcessError, RouteError,
    RpcError, TransportError,
};
pub use handler::{ErasedHandler, Handler, InvokeError, TypedHandler};
pub use headers::{HeaderContext, Headers};
pub use kind::{MessageKind, UnknownKindError};
pub use message::{Message, simple_type_name};
pub use response::{ExceptionInfo, HandlerError, IntoReply, ResponseEnvelope};
pub use transport::{Acknowledger, Delivery, DeliveryStream, Transport};
