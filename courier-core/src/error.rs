//! Error types for Courier.
//!
//! The taxonomy follows who observes the failure:
//!
//! - [`RegistryError`] - Startup-fatal; the process must not serve traffic
//! - [`RouteError`] - Per-message; reported to the retry policy
//! - [`RemoteProcessError`] - Reported by a peer through a reply
//! - [`PublisherTimeoutError`] / [`PublishError`] - Observed locally by a caller
//! - [`RpcError`] - Everything a blocking call can return

use crate::kind::MessageKind;
use std::time::Duration;
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structural errors found while building the handler registry.
///
/// Any of these means routing would be ambiguous or impossible; the embedding
/// application must refuse to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler method declares no payload parameter.
    #[error("handler {listener}::{method} ({kind}) declares no input parameter")]
    NoInputParameter {
        /// Listener owning the method.
        listener: &'static str,
        /// Method name.
        method: &'static str,
        /// Declared kind.
        kind: MessageKind,
    },

    /// A handler method declares more than one payload parameter.
    #[error("handler {listener}::{method} ({kind}) declares {count} input parameters, expected 1")]
    MultipleInputParameters {
        /// Listener owning the method.
        listener: &'static str,
        /// Method name.
        method: &'static str,
        /// Declared kind.
        kind: MessageKind,
        /// Number of declared parameters.
        count: usize,
    },

    /// Two handlers claim the same (kind, payload type).
    #[error("duplicate {kind} handler for {payload_type}: {existing} and {duplicate}")]
    DuplicateHandler {
        /// The contested kind.
        kind: MessageKind,
        /// The contested payload type.
        payload_type: &'static str,
        /// `Listener::method` registered first.
        existing: String,
        /// `Listener::method` registered second.
        duplicate: String,
    },

    /// A single-parameter candidate was submitted without an invoker.
    #[error("handler {listener}::{method} ({kind}) has no invoker bound")]
    UnboundHandler {
        /// Listener owning the method.
        listener: &'static str,
        /// Method name.
        method: &'static str,
        /// Declared kind.
        kind: MessageKind,
    },
}

/// Errors that can occur while routing one inbound message.
///
/// All of these are fatal to the message, never to the process.
#[derive(Error, Debug)]
pub enum RouteError {
    /// A required header is absent or empty.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but unusable.
    #[error("invalid value for header {name}: {value:?}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// No handler is registered for the key.
    #[error("no {kind} handler registered for payload type {payload_type}")]
    HandlerNotFound {
        /// Requested kind.
        kind: MessageKind,
        /// Requested payload type.
        payload_type: String,
    },

    /// The body could not be decoded into the handler's payload type.
    #[error("failed to decode {payload_type} payload")]
    PayloadDecode {
        /// Expected payload type.
        payload_type: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The reply could not be sent back to the caller.
    #[error("failed to send reply")]
    Reply(#[source] PublishError),
}

impl RouteError {
    /// A stable name for this failure, used in dead-letter diagnostics.
    pub fn root_cause_kind(&self) -> &'static str {
        match self {
            RouteError::MissingHeader(_) => "MissingHeader",
            RouteError::InvalidHeader { .. } => "InvalidHeader",
            RouteError::HandlerNotFound { .. } => "HandlerNotFound",
            RouteError::PayloadDecode { .. } => "PayloadDecode",
            RouteError::Reply(_) => "ReplyFailed",
        }
    }
}

/// Broker-level send failures.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Nothing is bound to the destination.
    #[error("no queue bound to exchange {exchange:?} with routing key {routing_key:?}")]
    Unroutable {
        /// Target exchange.
        exchange: String,
        /// Target routing key.
        routing_key: String,
    },

    /// The destination stopped consuming before the message could be handled.
    #[error("destination {0:?} is closed")]
    Closed(String),

    /// The payload could not be encoded.
    #[error("failed to encode message body")]
    Encode(#[source] serde_json::Error),

    /// Any other transport failure.
    #[error("transport failure")]
    Transport(#[source] BoxError),
}

/// Errors reported by a [`Transport`](crate::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply arrived within the deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The request could not be published, or the peer failed ungracefully.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The queue does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue already has a consumer.
    #[error("queue {0} is already being consumed")]
    AlreadyConsumed(String),

    /// The transport was shut down.
    #[error("transport has been shut down")]
    Closed,
}

/// A failure reported by the service that handled a request.
///
/// Distinguishes *remote* failures from local ones by type, never by string
/// matching. Carries only stable strings so services need not share error
/// types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin_service} failed with {root_cause_kind}: {message}")]
pub struct RemoteProcessError {
    /// The handler's error message.
    pub message: String,
    /// The reported root-cause kind.
    pub root_cause_kind: String,
    /// The service that produced the failure.
    pub origin_service: String,
}

/// No reply arrived for a blocking call within the configured timeout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no reply from {exchange}/{routing_key} within {timeout:?}")]
pub struct PublisherTimeoutError {
    /// Target exchange.
    pub exchange: String,
    /// Target routing key.
    pub routing_key: String,
    /// The deadline that elapsed.
    pub timeout: Duration,
}

/// Errors returned by blocking `do_command`/`do_query` calls.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The remote handler failed.
    #[error(transparent)]
    Remote(#[from] RemoteProcessError),

    /// No reply arrived in time.
    #[error(transparent)]
    Timeout(#[from] PublisherTimeoutError),

    /// The request could not be delivered.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The request payload could not be encoded.
    #[error("failed to encode request")]
    Encode(#[source] serde_json::Error),

    /// The reply could not be decoded into the expected type.
    #[error("failed to decode reply")]
    Decode(#[source] serde_json::Error),
}

impl RpcError {
    /// Whether the failure was reported by the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }

    /// Whether the call timed out locally.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }
}

// Convenience conversions
impl From<BoxError> for PublishError {
    fn from(err: BoxError) -> Self {
        PublishError::Transport(err)
    }
}
