//! # Handler Layer
//!
//! Wraps user-defined functions that process exactly one payload type.
//!
//! # Usage Patterns
//!
//! 1. **Direct closure**: `|cmd: CreateOrder| async move { ... }`
//! 2. **Struct implementation**: `impl Handler<CreateOrder> for CreateOrderHandler`
//! 3. **Listener methods**: `#[listener]` generates closures that call methods
//!
//! A registry stores handlers of many payload types side by side, so each
//! typed handler is wrapped in [`TypedHandler`] and stored as an
//! [`ErasedHandler`] that accepts raw body bytes.

use crate::{
    message::Message,
    response::{HandlerError, IntoReply},
};
use serde_json::Value;
use std::{future::Future, marker::PhantomData, pin::Pin};
use thiserror::Error;

/// A function that processes one payload type.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot handle payloads of type `{In}`",
    label = "missing `Handler<{In}>` implementation",
    note = "Handlers take the payload by value and return `()` or `Result<T, E>`."
)]
pub trait Handler<In: Message>: Send + Sync + 'static {
    /// The return type, converted into the reply.
    type Output: IntoReply + Send;

    /// Executes the handler logic.
    fn call(&self, input: In) -> impl Future<Output = Self::Output> + Send;
}

// Blanket impl for closures
impl<F, In, Out, Fut> Handler<In> for F
where
    In: Message,
    Out: IntoReply + Send,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send,
{
    type Output = Out;

    fn call(&self, input: In) -> impl Future<Output = Self::Output> + Send {
        (self)(input)
    }
}

/// Errors from invoking a type-erased handler.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The body did not decode into the handler's payload type.
    #[error("failed to decode {payload_type} payload")]
    Decode {
        /// Expected payload type.
        payload_type: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type-erased handler trait for dynamic dispatch.
///
/// The outer `Result` reports a failure to reach the handler at all; the
/// inner one is the handler's own outcome.
pub trait ErasedHandler: Send + Sync {
    /// The payload type this handler decodes.
    fn payload_type(&self) -> &'static str;

    /// Decode `body` and run the handler.
    fn call_erased<'a>(
        &'a self,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Result<Value, HandlerError>, InvokeError>> + Send + 'a>>;
}

/// Wrapper to implement [`ErasedHandler`] for a typed handler.
pub struct TypedHandler<In, H> {
    handler: H,
    _phantom: PhantomData<fn(In)>,
}

impl<In, H> TypedHandler<In, H> {
    /// Create a new wrapper around a typed handler.
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<In, H> ErasedHandler for TypedHandler<In, H>
where
    In: Message,
    H: Handler<In>,
{
    fn payload_type(&self) -> &'static str {
        In::type_name()
    }

    fn call_erased<'a>(
        &'a self,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Result<Value, HandlerError>, InvokeError>> + Send + 'a>>
    {
        Box::pin(async move {
            let input: In =
                serde_json::from_slice(body).map_err(|source| InvokeError::Decode {
                    payload_type: In::type_name(),
                    source,
                })?;
            let output = self.handler.call(input).await;
            Ok(output.into_reply())
        })
    }
}
