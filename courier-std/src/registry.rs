//! Handler registry.
//!
//! This module provides a builder for registering handlers and a frozen
//! registry for immutable, lock-free lookup during dispatch.
//!
//! Listeners contribute handlers through [`Listener::register`], either
//! written by hand or generated by `#[listener]`. Every candidate is validated
//! when [`RegistryBuilder::build`] runs; a structural error there means the
//! service must not start.

use courier_core::{
    ErasedHandler, Handler, HandlerError, InvokeError, Message, MessageKind, RegistryError,
    RouteError, TypedHandler,
};
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, error, info};

/// A component that owns handler methods.
///
/// # Example
///
/// ```rust,ignore
/// impl Listener for OrderListener {
///     fn register(self: Arc<Self>, builder: &mut RegistryBuilder) {
///         let this = self.clone();
///         builder.command("OrderListener", "create", move |cmd: CreateOrder| {
///             let this = this.clone();
///             async move { this.create(cmd).await }
///         });
///     }
/// }
/// ```
pub trait Listener: Send + Sync + 'static {
    /// Contribute this listener's handlers.
    fn register(self: Arc<Self>, builder: &mut RegistryBuilder);
}

enum Signature {
    Bound(Arc<dyn ErasedHandler>),
    Arity(usize),
}

/// One method offered for registration.
pub struct HandlerCandidate {
    listener: &'static str,
    method: &'static str,
    kind: MessageKind,
    signature: Signature,
}

impl HandlerCandidate {
    /// A candidate taking exactly one payload of type `P`.
    pub fn typed<P, H>(
        kind: MessageKind,
        listener: &'static str,
        method: &'static str,
        handler: H,
    ) -> Self
    where
        P: Message,
        H: Handler<P>,
    {
        Self {
            listener,
            method,
            kind,
            signature: Signature::Bound(Arc::new(TypedHandler::<P, H>::new(handler))),
        }
    }

    /// A candidate known only by its parameter count.
    ///
    /// Used for methods whose signature cannot be bound to a payload type;
    /// `build` reports them as structural errors.
    pub fn with_arity(
        kind: MessageKind,
        listener: &'static str,
        method: &'static str,
        parameters: usize,
    ) -> Self {
        Self {
            listener,
            method,
            kind,
            signature: Signature::Arity(parameters),
        }
    }

    fn qualified_name(&self) -> String {
        format!("{}::{}", self.listener, self.method)
    }
}

/// One registered handler.
///
/// Created once while building the registry and never mutated.
pub struct HandlerDescriptor {
    listener: &'static str,
    method: &'static str,
    kind: MessageKind,
    payload_type: &'static str,
    invoker: Arc<dyn ErasedHandler>,
}

impl HandlerDescriptor {
    /// The listener owning the handler.
    pub fn listener(&self) -> &'static str {
        self.listener
    }

    /// The handler method name.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// The message kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The payload type name.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// `Listener::method`, for diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.listener, self.method)
    }

    /// Decode `body` into the payload type and run the handler.
    pub async fn invoke(&self, body: &[u8]) -> Result<Result<Value, HandlerError>, InvokeError> {
        self.invoker.call_erased(body).await
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("listener", &self.listener)
            .field("method", &self.method)
            .field("kind", &self.kind)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RegistryBuilder - for constructing registries
// ============================================================================

/// Builder for constructing a [`HandlerRegistry`].
///
/// # Example
/// ```ignore
/// let registry = HandlerRegistry::builder()
///     .listener(Arc::new(OrderListener::default()))
///     .listener(Arc::new(BillingListener::default()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    candidates: Vec<HandlerCandidate>,
}

impl RegistryBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a listener for handlers.
    pub fn listener<L: Listener>(mut self, listener: Arc<L>) -> Self {
        self.add_listener(listener);
        self
    }

    /// Scan a listener for handlers (mutable version).
    pub fn add_listener<L: Listener>(&mut self, listener: Arc<L>) -> &mut Self {
        listener.register(self);
        self
    }

    /// Offer a candidate.
    pub fn candidate(&mut self, candidate: HandlerCandidate) -> &mut Self {
        self.candidates.push(candidate);
        self
    }

    /// Register a handler for `(kind, P)`.
    pub fn handle<P, H>(
        &mut self,
        kind: MessageKind,
        listener: &'static str,
        method: &'static str,
        handler: H,
    ) -> &mut Self
    where
        P: Message,
        H: Handler<P>,
    {
        self.candidate(HandlerCandidate::typed(kind, listener, method, handler))
    }

    /// Register a command handler.
    pub fn command<P, H>(&mut self, listener: &'static str, method: &'static str, handler: H) -> &mut Self
    where
        P: Message,
        H: Handler<P>,
    {
        self.handle(MessageKind::Command, listener, method, handler)
    }

    /// Register a query handler.
    pub fn query<P, H>(&mut self, listener: &'static str, method: &'static str, handler: H) -> &mut Self
    where
        P: Message,
        H: Handler<P>,
    {
        self.handle(MessageKind::Query, listener, method, handler)
    }

    /// Register a notification handler.
    pub fn notification<P, H>(
        &mut self,
        listener: &'static str,
        method: &'static str,
        handler: H,
    ) -> &mut Self
    where
        P: Message,
        H: Handler<P>,
    {
        self.handle(MessageKind::Notification, listener, method, handler)
    }

    /// Register an event handler.
    pub fn event<P, H>(&mut self, listener: &'static str, method: &'static str, handler: H) -> &mut Self
    where
        P: Message,
        H: Handler<P>,
    {
        self.handle(MessageKind::Event, listener, method, handler)
    }

    /// Get the number of offered candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Check if the builder has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Validate every candidate and freeze the registry.
    ///
    /// Candidates are checked in registration order: parameter count first,
    /// then key uniqueness. The first violation is returned.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let mut partitions: HashMap<MessageKind, HashMap<&'static str, HandlerDescriptor>> =
            HashMap::new();

        for candidate in self.candidates {
            let invoker = match candidate.signature {
                Signature::Bound(ref invoker) => Arc::clone(invoker),
                Signature::Arity(count) => {
                    let err = arity_error(&candidate, count);
                    error!(error = %err, "invalid handler signature");
                    return Err(err);
                }
            };

            let payload_type = invoker.payload_type();
            let partition = partitions.entry(candidate.kind).or_default();
            if let Some(existing) = partition.get(payload_type) {
                let err = RegistryError::DuplicateHandler {
                    kind: candidate.kind,
                    payload_type,
                    existing: existing.qualified_name(),
                    duplicate: candidate.qualified_name(),
                };
                error!(error = %err, "duplicate handler registration");
                return Err(err);
            }

            debug!(
                kind = %candidate.kind,
                payload_type,
                handler = %candidate.qualified_name(),
                "registered handler"
            );
            partition.insert(
                payload_type,
                HandlerDescriptor {
                    listener: candidate.listener,
                    method: candidate.method,
                    kind: candidate.kind,
                    payload_type,
                    invoker,
                },
            );
        }

        let registry = HandlerRegistry { partitions };
        info!(handlers = registry.len(), "handler registry built");
        Ok(registry)
    }
}

fn arity_error(candidate: &HandlerCandidate, count: usize) -> RegistryError {
    match count {
        0 => RegistryError::NoInputParameter {
            listener: candidate.listener,
            method: candidate.method,
            kind: candidate.kind,
        },
        1 => RegistryError::UnboundHandler {
            listener: candidate.listener,
            method: candidate.method,
            kind: candidate.kind,
        },
        count => RegistryError::MultipleInputParameters {
            listener: candidate.listener,
            method: candidate.method,
            kind: candidate.kind,
            count,
        },
    }
}

// ============================================================================
// HandlerRegistry - immutable, thread-safe handler storage
// ============================================================================

/// An immutable map from `(kind, payload type)` to exactly one handler.
///
/// Created by [`RegistryBuilder::build`]. Never mutated afterwards, so it can
/// be shared via `Arc` and read concurrently without locking.
#[derive(Debug)]
pub struct HandlerRegistry {
    partitions: HashMap<MessageKind, HashMap<&'static str, HandlerDescriptor>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Find the handler for a key.
    pub fn lookup(&self, kind: MessageKind, payload_type: &str) -> Result<&HandlerDescriptor, RouteError> {
        self.partitions
            .get(&kind)
            .and_then(|partition| partition.get(payload_type))
            .ok_or_else(|| RouteError::HandlerNotFound {
                kind,
                payload_type: payload_type.to_string(),
            })
    }

    /// Check if a handler exists for a key.
    pub fn contains(&self, kind: MessageKind, payload_type: &str) -> bool {
        self.lookup(kind, payload_type).is_ok()
    }

    /// Iterate over all handlers.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.partitions.values().flat_map(|partition| partition.values())
    }

    /// Get the number of registered handlers.
    pub fn len(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct CreateOrder {
        id: u64,
    }

    impl Message for CreateOrder {}

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    impl Message for OrderCreated {}

    async fn create(cmd: CreateOrder) -> Result<u64, HandlerError> {
        Ok(cmd.id)
    }

    async fn on_created(_: OrderCreated) {}

    #[test]
    fn test_lookup_returns_registered_descriptor() {
        let mut builder = RegistryBuilder::new();
        builder
            .command("Orders", "create", create)
            .event("Orders", "on_created", on_created);
        let registry = builder.build().unwrap();

        let descriptor = registry.lookup(MessageKind::Command, "CreateOrder").unwrap();
        assert_eq!(descriptor.qualified_name(), "Orders::create");
        assert_eq!(descriptor.payload_type(), "CreateOrder");

        let descriptor = registry.lookup(MessageKind::Event, "OrderCreated").unwrap();
        assert_eq!(descriptor.method(), "on_created");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_same_payload_under_different_kinds_is_allowed() {
        let mut builder = RegistryBuilder::new();
        builder
            .command("Orders", "create", create)
            .query("Orders", "preview", create);
        let registry = builder.build().unwrap();

        assert!(registry.contains(MessageKind::Command, "CreateOrder"));
        assert!(registry.contains(MessageKind::Query, "CreateOrder"));
    }

    #[test]
    fn test_duplicate_names_both_methods() {
        let mut builder = RegistryBuilder::new();
        builder
            .command("Orders", "create", create)
            .command("Legacy", "create_v1", create);

        match builder.build() {
            Err(RegistryError::DuplicateHandler {
                kind,
                payload_type,
                existing,
                duplicate,
            }) => {
                assert_eq!(kind, MessageKind::Command);
                assert_eq!(payload_type, "CreateOrder");
                assert_eq!(existing, "Orders::create");
                assert_eq!(duplicate, "Legacy::create_v1");
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_errors() {
        let mut builder = RegistryBuilder::new();
        builder.candidate(HandlerCandidate::with_arity(MessageKind::Query, "Orders", "all", 0));
        assert!(matches!(
            builder.build(),
            Err(RegistryError::NoInputParameter { method: "all", .. })
        ));

        let mut builder = RegistryBuilder::new();
        builder.candidate(HandlerCandidate::with_arity(MessageKind::Query, "Orders", "pair", 2));
        assert!(matches!(
            builder.build(),
            Err(RegistryError::MultipleInputParameters { count: 2, .. })
        ));
    }

    #[test]
    fn test_arity_checked_before_duplicates() {
        let mut builder = RegistryBuilder::new();
        builder
            .command("Orders", "create", create)
            .candidate(HandlerCandidate::with_arity(MessageKind::Command, "Orders", "bad", 3))
            .command("Legacy", "create", create);

        assert!(matches!(
            builder.build(),
            Err(RegistryError::MultipleInputParameters { method: "bad", .. })
        ));
    }

    #[test]
    fn test_missing_handler_is_route_error() {
        let registry = RegistryBuilder::new().build().unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.lookup(MessageKind::Command, "Nope"),
            Err(RouteError::HandlerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_descriptor_invokes_handler() {
        let mut builder = RegistryBuilder::new();
        builder.command("Orders", "create", create);
        let registry = builder.build().unwrap();

        let descriptor = registry.lookup(MessageKind::Command, "CreateOrder").unwrap();
        let out = descriptor.invoke(br#"{"id":7}"#).await.unwrap();
        assert_eq!(out.unwrap(), Value::from(7));
    }
}
