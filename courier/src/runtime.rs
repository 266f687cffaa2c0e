//! The assembled service runtime.

use courier_core::{RegistryError, Transport, TransportError};
use courier_std::{
    ConfigError, Consumer, ConsumerHandle, CourierConfig, HandlerRegistry, Listener, Publisher,
    RegistryBuilder, Router,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from assembling or starting a [`Courier`].
#[derive(Error, Debug)]
pub enum CourierError {
    /// The handler registry is malformed; the service must not start.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport refused an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No transport was supplied to the builder.
    #[error("no transport configured")]
    MissingTransport,
}

/// Builder for [`Courier`].
///
/// # Example
///
/// ```rust,ignore
/// let courier = Courier::builder()
///     .config(CourierConfig::from_toml_file("courier.toml")?)
///     .transport(Arc::new(broker))
///     .listener(Arc::new(OrderListener::default()))
///     .build()?;
/// let consumer = courier.start()?;
/// ```
#[derive(Default)]
pub struct CourierBuilder {
    config: CourierConfig,
    transport: Option<Arc<dyn Transport>>,
    registry: RegistryBuilder,
}

impl CourierBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transport.
    pub fn transport<T: Transport>(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(transport as Arc<dyn Transport>);
        self
    }

    /// Register a listener's handlers.
    pub fn listener<L: Listener>(mut self, listener: Arc<L>) -> Self {
        self.registry.add_listener(listener);
        self
    }

    /// Register handlers explicitly.
    pub fn handlers(mut self, register: impl FnOnce(&mut RegistryBuilder)) -> Self {
        register(&mut self.registry);
        self
    }

    /// Validate configuration, build the registry and wire the components.
    ///
    /// Any registry error is returned; the caller decides how to exit.
    pub fn build(self) -> Result<Courier, CourierError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(CourierError::MissingTransport)?;
        let registry = Arc::new(self.registry.build()?);

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            self.config.service.as_str(),
        ));
        let publisher = Publisher::new(Arc::clone(&transport), self.config.publisher_config());

        info!(
            service = %self.config.service,
            handlers = registry.len(),
            queue = %self.config.consumer.queue,
            "courier assembled"
        );

        Ok(Courier {
            config: self.config,
            transport,
            registry,
            router,
            publisher,
        })
    }
}

/// Registry, router, publisher and consumer for one service.
pub struct Courier {
    config: CourierConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    router: Arc<Router>,
    publisher: Publisher,
}

impl Courier {
    /// Start building.
    pub fn builder() -> CourierBuilder {
        CourierBuilder::default()
    }

    /// The configuration in use.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The publisher.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// A consumer for the configured queue, retry policy and dead-letter
    /// destination.
    pub fn consumer(&self) -> Consumer {
        Consumer::new(
            Arc::clone(&self.router),
            Arc::clone(&self.transport),
            self.config.consumer.queue.as_str(),
        )
        .with_policy(self.config.retry_policy())
        .with_dead_letter(self.config.dead_letter_target())
        .with_concurrency(self.config.consumer.concurrency.max)
    }

    /// Start consuming in the background.
    pub fn start(&self) -> Result<ConsumerHandle, CourierError> {
        let handle = Arc::new(self.consumer()).spawn()?;
        info!(
            service = %self.config.service,
            queue = %self.config.consumer.queue,
            concurrency = %self.config.consumer.concurrency,
            prefetch = self.config.consumer.prefetch,
            "courier started"
        );
        Ok(handle)
    }
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("service", &self.config.service)
            .field("handlers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::HandlerError;
    use courier_std::InMemoryBroker;

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Ping;

    impl courier_core::Message for Ping {}

    #[test]
    fn test_build_requires_transport() {
        assert!(matches!(
            Courier::builder().build(),
            Err(CourierError::MissingTransport)
        ));
    }

    #[test]
    fn test_registry_errors_are_returned() {
        let result = Courier::builder()
            .transport(Arc::new(InMemoryBroker::new()))
            .handlers(|builder| {
                builder
                    .query("A", "ping", |_: Ping| async { Ok::<_, HandlerError>(1) })
                    .query("B", "ping", |_: Ping| async { Ok::<_, HandlerError>(2) });
            })
            .build();
        assert!(matches!(
            result,
            Err(CourierError::Registry(RegistryError::DuplicateHandler { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CourierConfig::default();
        config.retry.max_attempts = 0;
        let result = Courier::builder()
            .config(config)
            .transport(Arc::new(InMemoryBroker::new()))
            .build();
        assert!(matches!(result, Err(CourierError::Config(_))));
    }

    #[test]
    fn test_start_needs_declared_queue() {
        let courier = Courier::builder()
            .transport(Arc::new(InMemoryBroker::new()))
            .build()
            .unwrap();
        assert!(matches!(
            courier.start(),
            Err(CourierError::Transport(TransportError::UnknownQueue(_)))
        ));
    }
}
