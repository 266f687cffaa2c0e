//! The publish side: fire-and-forget sends and blocking calls.

use crate::codec;
use courier_core::{
    Envelope, HeaderContext, Message, MessageKind, PublishError, PublisherTimeoutError, RpcError,
    Transport, TransportError, headers,
};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};

/// Default time a blocking call waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Publisher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// The identity stamped into `message-source`.
    pub service: String,
    /// Default target exchange.
    pub exchange: String,
    /// Default routing key.
    pub routing_key: String,
    /// How long blocking calls wait for a reply.
    pub reply_timeout: Duration,
    /// Context values copied onto outgoing messages when present.
    pub pass_through: Vec<String>,
}

impl PublisherConfig {
    /// Settings publishing to `exchange`/`routing_key` as `service`.
    pub fn new(
        service: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            pass_through: Vec::new(),
        }
    }

    /// Set the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Add a pass-through header name.
    pub fn pass_through(mut self, name: impl Into<String>) -> Self {
        self.pass_through.push(name.into());
        self
    }
}

/// Sends messages through a [`Transport`].
///
/// Every operation has a variant taking an explicit destination (`*_to`) and
/// one using the configured default.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    config: Arc<PublisherConfig>,
}

impl Publisher {
    /// Create a publisher.
    pub fn new(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    /// The publisher settings.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publish an event to the default destination.
    pub async fn send_event<P: Message>(&self, body: &P, ctx: &HeaderContext) -> Result<(), PublishError> {
        self.send_event_to(&self.config.exchange, &self.config.routing_key, body, ctx)
            .await
    }

    /// Publish an event.
    pub async fn send_event_to<P: Message>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<(), PublishError> {
        self.send(MessageKind::Event, exchange, routing_key, body, ctx)
            .await
    }

    /// Publish a notification to the default destination.
    pub async fn send_notification<P: Message>(
        &self,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<(), PublishError> {
        self.send_notification_to(&self.config.exchange, &self.config.routing_key, body, ctx)
            .await
    }

    /// Publish a notification.
    pub async fn send_notification_to<P: Message>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<(), PublishError> {
        self.send(MessageKind::Notification, exchange, routing_key, body, ctx)
            .await
    }

    /// Send a command to the default destination and wait for its reply.
    pub async fn do_command<P, R>(&self, body: &P, ctx: &HeaderContext) -> Result<R, RpcError>
    where
        P: Message,
        R: DeserializeOwned,
    {
        self.do_command_to(&self.config.exchange, &self.config.routing_key, body, ctx)
            .await
    }

    /// Send a command and wait for its reply.
    pub async fn do_command_to<P, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<R, RpcError>
    where
        P: Message,
        R: DeserializeOwned,
    {
        self.call(MessageKind::Command, exchange, routing_key, body, ctx)
            .await
    }

    /// Send a query to the default destination and wait for its reply.
    pub async fn do_query<P, R>(&self, body: &P, ctx: &HeaderContext) -> Result<R, RpcError>
    where
        P: Message,
        R: DeserializeOwned,
    {
        self.do_query_to(&self.config.exchange, &self.config.routing_key, body, ctx)
            .await
    }

    /// Send a query and wait for its reply.
    pub async fn do_query_to<P, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<R, RpcError>
    where
        P: Message,
        R: DeserializeOwned,
    {
        self.call(MessageKind::Query, exchange, routing_key, body, ctx)
            .await
    }

    #[instrument(level = "debug", skip(self, body, ctx), fields(payload_type = P::type_name()))]
    async fn send<P: Message>(
        &self,
        kind: MessageKind,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<(), PublishError> {
        let envelope = self.stamp(kind, body, ctx)?;
        self.transport
            .publish(exchange, routing_key, envelope)
            .await
            .inspect_err(|err| warn!(error = %err, "publish failed"))?;
        debug!("published");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, body, ctx), fields(payload_type = P::type_name()))]
    async fn call<P, R>(
        &self,
        kind: MessageKind,
        exchange: &str,
        routing_key: &str,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<R, RpcError>
    where
        P: Message,
        R: DeserializeOwned,
    {
        let envelope = self.stamp(kind, body, ctx).map_err(|err| match err {
            PublishError::Encode(source) => RpcError::Encode(source),
            other => RpcError::Publish(other),
        })?;
        let timeout = self.config.reply_timeout;

        let reply = self
            .transport
            .publish_and_await_reply(exchange, routing_key, envelope, timeout)
            .await
            .map_err(|err| match err {
                TransportError::Timeout(_) => {
                    warn!(?timeout, "no reply before deadline");
                    RpcError::Timeout(PublisherTimeoutError {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                        timeout,
                    })
                }
                TransportError::Publish(err) => RpcError::Publish(err),
                other => RpcError::Publish(PublishError::Transport(Box::new(other))),
            })?;

        let response = codec::from_bytes(reply.body())?;
        if let Some(exception) = response.exception() {
            debug!(
                origin = %exception.origin_service,
                root_cause = %exception.root_cause_kind,
                "remote handler failed"
            );
        }
        codec::decode(response)
    }

    fn stamp<P: Message>(
        &self,
        kind: MessageKind,
        body: &P,
        ctx: &HeaderContext,
    ) -> Result<Envelope, PublishError> {
        let mut envelope = Envelope::new(Default::default(), codec::encode_payload(body)?)
            .with_header(headers::MESSAGE_KIND, kind.as_str())
            .with_header(headers::PAYLOAD_TYPE, P::type_name())
            .with_header(headers::MESSAGE_TIMESTAMP, headers::timestamp_now())
            .with_header(headers::MESSAGE_SOURCE, self.config.service.as_str());

        for name in &self.config.pass_through {
            if let Some(value) = ctx.get(name) {
                envelope.set_header(name.as_str(), value);
            }
        }
        Ok(envelope)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
