//! Inbound message routing.
//!
//! The [`Router`] resolves an envelope to exactly one handler, runs it, and
//! sends the outcome back when the sender is waiting for a reply. It never
//! retries; see [`Consumer`](crate::Consumer) for that.

use crate::{codec, registry::HandlerRegistry};
use courier_core::{
    Envelope, InvokeError, MessageKind, ResponseEnvelope, RouteError, Transport, headers,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What happened to one routed message.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    /// The message kind.
    pub kind: MessageKind,
    /// The payload type name.
    pub payload_type: String,
    /// The encoded handler outcome.
    pub response: ResponseEnvelope,
    /// Whether the response was sent back to the caller.
    pub replied: bool,
}

impl RouteOutcome {
    /// Whether the handler failed without anyone being told.
    ///
    /// A failure that reached a waiting caller is settled; one that did not
    /// is handed to the retry policy.
    pub fn needs_redelivery(&self) -> bool {
        self.response.has_exception() && !self.replied
    }
}

/// Dispatches inbound envelopes to registered handlers.
pub struct Router {
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn Transport>,
    service: String,
}

impl Router {
    /// Create a router answering as `service`.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        transport: Arc<dyn Transport>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            service: service.into(),
        }
    }

    /// The registry this router reads.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The service identity stamped on replies.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Route one envelope.
    ///
    /// Missing headers, unknown keys and undecodable bodies fail the message.
    /// A handler failure does not: it is encoded into the outcome.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            kind = envelope.header(headers::MESSAGE_KIND).unwrap_or_default(),
            payload_type = envelope.header(headers::PAYLOAD_TYPE).unwrap_or_default(),
        )
    )]
    pub async fn route(&self, envelope: &Envelope) -> Result<RouteOutcome, RouteError> {
        let kind = envelope.kind()?;
        let payload_type = envelope.payload_type()?;
        let descriptor = self.registry.lookup(kind, payload_type)?;

        let outcome = descriptor
            .invoke(envelope.body())
            .await
            .map_err(|err| match err {
                InvokeError::Decode {
                    payload_type,
                    source,
                } => RouteError::PayloadDecode {
                    payload_type: payload_type.to_string(),
                    source,
                },
            })?;

        if let Err(failure) = &outcome {
            warn!(
                handler = %descriptor.qualified_name(),
                root_cause = failure.kind(),
                message = failure.message(),
                "handler failed"
            );
        }

        let response = codec::encode(outcome, &self.service);

        let replied = match envelope.reply_to() {
            Some(reply_to) if kind.expects_reply() => {
                self.reply(reply_to, envelope.correlation_id(), &response)
                    .await?;
                true
            }
            Some(_) => {
                debug!("ignoring reply-to on fire-and-forget message");
                false
            }
            None => false,
        };

        Ok(RouteOutcome {
            kind,
            payload_type: payload_type.to_string(),
            response,
            replied,
        })
    }

    async fn reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        response: &ResponseEnvelope,
    ) -> Result<(), RouteError> {
        let body = codec::to_bytes(response).map_err(RouteError::Reply)?;
        let mut reply = Envelope::new(Default::default(), body)
            .with_header(headers::MESSAGE_TIMESTAMP, headers::timestamp_now())
            .with_header(headers::MESSAGE_SOURCE, self.service.as_str());
        if let Some(id) = correlation_id {
            reply.set_header(headers::CORRELATION_ID, id);
        }

        self.transport
            .reply(reply_to, reply)
            .await
            .map_err(RouteError::Reply)?;
        debug!(reply_to, "reply sent");
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("service", &self.service)
            .field("handlers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::RegistryBuilder, testing::RecordingTransport};
    use courier_core::{HandlerError, Message};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct CreateOrder {
        id: u64,
    }

    impl Message for CreateOrder {}

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderShipped {
        id: u64,
    }

    impl Message for OrderShipped {}

    fn router(transport: Arc<RecordingTransport>) -> Router {
        let mut builder = RegistryBuilder::new();
        builder
            .command("Orders", "create", |cmd: CreateOrder| async move {
                if cmd.id == 0 {
                    return Err(HandlerError::new("IllegalStateException", "duplicate"));
                }
                Ok(json!({"status": "ok", "id": cmd.id}))
            })
            .event("Orders", "shipped", |_: OrderShipped| async {});
        Router::new(Arc::new(builder.build().unwrap()), transport, "orders")
    }

    fn command(body: &str) -> Envelope {
        Envelope::new(Default::default(), body.as_bytes().to_vec())
            .with_header(headers::MESSAGE_KIND, "COMMAND")
            .with_header(headers::PAYLOAD_TYPE, "CreateOrder")
    }

    #[tokio::test]
    async fn test_missing_kind_header_fails_regardless_of_body() {
        let router = router(Arc::new(RecordingTransport::new()));
        let env = Envelope::new(Default::default(), br#"{"id":1}"#.to_vec())
            .with_header(headers::PAYLOAD_TYPE, "CreateOrder");

        assert!(matches!(
            router.route(&env).await,
            Err(RouteError::MissingHeader(headers::MESSAGE_KIND))
        ));
    }

    #[tokio::test]
    async fn test_unknown_payload_type_is_not_found() {
        let router = router(Arc::new(RecordingTransport::new()));
        let env = command("{}").with_header(headers::PAYLOAD_TYPE, "DeleteOrder");

        assert!(matches!(
            router.route(&env).await,
            Err(RouteError::HandlerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_body_is_payload_decode_error() {
        let router = router(Arc::new(RecordingTransport::new()));
        let err = router.route(&command(r#"{"id":"x"}"#)).await.unwrap_err();
        assert_eq!(err.root_cause_kind(), "PayloadDecode");
    }

    #[tokio::test]
    async fn test_reply_carries_response_and_correlation_id() {
        let transport = Arc::new(RecordingTransport::new());
        let router = router(transport.clone());
        let env = command(r#"{"id":7}"#)
            .with_header(headers::REPLY_TO, "amq.reply")
            .with_header(headers::CORRELATION_ID, "abc");

        let outcome = router.route(&env).await.unwrap();
        assert!(outcome.replied);
        assert!(!outcome.needs_redelivery());
        assert_eq!(outcome.response.value()["status"], "ok");

        let replies = transport.replies();
        assert_eq!(replies.len(), 1);
        let (address, reply) = &replies[0];
        assert_eq!(address, "amq.reply");
        assert_eq!(reply.correlation_id(), Some("abc"));
        assert_eq!(reply.header(headers::MESSAGE_SOURCE), Some("orders"));

        let decoded = codec::from_bytes(reply.body()).unwrap();
        assert_eq!(decoded, outcome.response);
    }

    #[tokio::test]
    async fn test_handler_failure_is_encoded_not_raised() {
        let transport = Arc::new(RecordingTransport::new());
        let router = router(transport.clone());

        let outcome = router.route(&command(r#"{"id":0}"#)).await.unwrap();
        let exception = outcome.response.exception().unwrap();
        assert_eq!(exception.message, "duplicate");
        assert_eq!(exception.origin_service, "orders");
        assert!(outcome.needs_redelivery());
        assert!(transport.replies().is_empty());
    }

    #[tokio::test]
    async fn test_event_never_replies() {
        let transport = Arc::new(RecordingTransport::new());
        let router = router(transport.clone());
        let env = Envelope::new(Default::default(), br#"{"id":3}"#.to_vec())
            .with_header(headers::MESSAGE_KIND, "EVENT")
            .with_header(headers::PAYLOAD_TYPE, "OrderShipped")
            .with_header(headers::REPLY_TO, "amq.reply");

        let outcome = router.route(&env).await.unwrap();
        assert!(!outcome.replied);
        assert!(transport.replies().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reply_send_is_route_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_publishes(true);
        let router = router(transport);
        let env = command(r#"{"id":7}"#).with_header(headers::REPLY_TO, "amq.reply");

        assert!(matches!(router.route(&env).await, Err(RouteError::Reply(_))));
    }
}
