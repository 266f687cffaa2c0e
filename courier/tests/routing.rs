//! Routing inbound envelopes through the in-memory broker.

mod common;

use common::{OrderListener, envelope};
use courier::{
    HandlerRegistry, InMemoryBroker, MessageKind, RouteError, Router, Transport, codec, headers,
};
use futures::StreamExt;
use std::sync::{Arc, atomic::Ordering};

fn router(broker: &InMemoryBroker, listener: Arc<OrderListener>) -> Router {
    let registry = HandlerRegistry::builder().listener(listener).build().unwrap();
    Router::new(Arc::new(registry), Arc::new(broker.clone()), "orders")
}

#[tokio::test]
async fn test_query_reply_reaches_reply_queue() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("client.replies");
    let mut replies = broker.consume("client.replies").unwrap();
    let listener = Arc::new(OrderListener::default());
    listener.seen.lock().insert(11);
    let router = router(&broker, listener);

    let request = envelope("QUERY", "GetOrder", r#"{"id":11}"#)
        .with_header(headers::REPLY_TO, "client.replies")
        .with_header(headers::CORRELATION_ID, "c-11");
    let outcome = router.route(&request).await.unwrap();
    assert_eq!(outcome.kind, MessageKind::Query);
    assert!(outcome.replied);

    let delivery = replies.next().await.unwrap();
    let reply = delivery.envelope();
    assert_eq!(reply.correlation_id(), Some("c-11"));
    assert_eq!(reply.header(headers::MESSAGE_SOURCE), Some("orders"));
    assert!(reply.header(headers::MESSAGE_TIMESTAMP).is_some());

    let response = codec::from_bytes(reply.body()).unwrap();
    assert_eq!(response.origin_service(), "orders");
    let found: Option<u64> = codec::decode(response).unwrap();
    assert_eq!(found, Some(11));
}

#[tokio::test]
async fn test_event_with_reply_to_is_not_answered() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("client.replies");
    let listener = Arc::new(OrderListener::default());
    let router = router(&broker, Arc::clone(&listener));

    let event = envelope("EVENT", "OrderShipped", r#"{"id":3}"#)
        .with_header(headers::REPLY_TO, "client.replies");
    let outcome = router.route(&event).await.unwrap();

    assert!(!outcome.replied);
    assert_eq!(listener.shipped.load(Ordering::SeqCst), 1);
    assert_eq!(broker.stats().published, 0);
}

#[tokio::test]
async fn test_failed_command_replies_with_exception() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("client.replies");
    let mut replies = broker.consume("client.replies").unwrap();
    let listener = Arc::new(OrderListener::default());
    listener.seen.lock().insert(5);
    let router = router(&broker, listener);

    let request = envelope("COMMAND", "CreateOrder", r#"{"id":5}"#)
        .with_header(headers::REPLY_TO, "client.replies");
    let outcome = router.route(&request).await.unwrap();
    assert!(outcome.replied);
    assert!(!outcome.needs_redelivery());

    let delivery = replies.next().await.unwrap();
    let response = codec::from_bytes(delivery.envelope().body()).unwrap();
    let exception = response.exception().unwrap();
    assert_eq!(exception.root_cause_kind, "IllegalStateException");
    assert_eq!(exception.message, "duplicate");
    assert_eq!(exception.origin_service, "orders");
}

#[tokio::test]
async fn test_failed_notification_needs_redelivery() {
    let broker = InMemoryBroker::new();
    let listener = Arc::new(OrderListener::default());
    let router = router(&broker, Arc::clone(&listener));

    let outcome = router
        .route(&envelope("NOTIFICATION", "CancelOrder", r#"{"id":9}"#))
        .await
        .unwrap();

    assert!(outcome.needs_redelivery());
    assert_eq!(listener.cancel_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_envelopes_fail_the_message() {
    let broker = InMemoryBroker::new();
    let router = router(&broker, Arc::new(OrderListener::default()));

    let no_kind = courier::Envelope::new(Default::default(), b"{}".to_vec())
        .with_header(headers::PAYLOAD_TYPE, "CreateOrder");
    assert!(matches!(
        router.route(&no_kind).await,
        Err(RouteError::MissingHeader(headers::MESSAGE_KIND))
    ));

    let bad_kind = envelope("BROADCAST", "CreateOrder", "{}");
    assert!(matches!(
        router.route(&bad_kind).await,
        Err(RouteError::InvalidHeader { .. })
    ));

    let unknown = envelope("COMMAND", "DeleteOrder", "{}");
    assert!(matches!(
        router.route(&unknown).await,
        Err(RouteError::HandlerNotFound { kind: MessageKind::Command, .. })
    ));

    let wrong_kind = envelope("EVENT", "CreateOrder", r#"{"id":1}"#);
    assert!(matches!(
        router.route(&wrong_kind).await,
        Err(RouteError::HandlerNotFound { kind: MessageKind::Event, .. })
    ));

    let garbled = envelope("COMMAND", "CreateOrder", "not json");
    assert!(matches!(
        router.route(&garbled).await,
        Err(RouteError::PayloadDecode { .. })
    ));
}
