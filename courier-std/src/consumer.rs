//! Delivery consumer.
//!
//! Pulls deliveries from a queue and runs each one through the retry policy
//! and the router on a bounded pool of concurrent workers. Workers share
//! nothing mutable; the registry behind the router is read-only.

use crate::{
    retry::{DeadLetterTarget, FailureCause, RetryDecision, RetryPolicy, dead_letter_envelope},
    router::Router,
};
use courier_core::{Delivery, DeliveryStream, Transport, TransportError};
use futures::{StreamExt, future};
use std::{future::Future, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled and acknowledged.
    Succeeded {
        /// Invocations it took.
        attempts: u32,
    },
    /// Retries exhausted; published to the dead-letter destination and acknowledged.
    DeadLettered {
        /// Invocations it took.
        attempts: u32,
    },
    /// Retries exhausted with no dead-letter destination; rejected without requeue.
    Discarded {
        /// Invocations it took.
        attempts: u32,
    },
    /// The dead-letter publish failed; rejected with requeue.
    Requeued {
        /// Invocations it took.
        attempts: u32,
    },
}

impl DeliveryOutcome {
    /// Invocations it took.
    pub fn attempts(&self) -> u32 {
        match *self {
            DeliveryOutcome::Succeeded { attempts }
            | DeliveryOutcome::DeadLettered { attempts }
            | DeliveryOutcome::Discarded { attempts }
            | DeliveryOutcome::Requeued { attempts } => attempts,
        }
    }
}

/// Consumes one queue.
pub struct Consumer {
    router: Arc<Router>,
    transport: Arc<dyn Transport>,
    queue: String,
    policy: RetryPolicy,
    dead_letter: Option<DeadLetterTarget>,
    concurrency: usize,
}

impl Consumer {
    /// Create a consumer with the default retry policy and a single worker.
    pub fn new(router: Arc<Router>, transport: Arc<dyn Transport>, queue: impl Into<String>) -> Self {
        Self {
            router,
            transport,
            queue: queue.into(),
            policy: RetryPolicy::default(),
            dead_letter: None,
            concurrency: 1,
        }
    }

    /// Set the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the dead-letter destination.
    pub fn with_dead_letter(mut self, target: DeadLetterTarget) -> Self {
        self.dead_letter = Some(target);
        self
    }

    /// Set the number of deliveries processed at once.
    ///
    /// A delivery waiting out its retry backoff keeps its worker slot, so with
    /// one worker a failing message holds up the queue for its whole backoff
    /// schedule.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    /// The consumed queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run one delivery to a terminal state.
    ///
    /// Backoff between attempts is slept in place, occupying the caller's
    /// worker for the duration.
    pub async fn process(&self, delivery: Delivery) -> DeliveryOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let cause = match self.router.route(delivery.envelope()).await {
                Ok(outcome) if !outcome.needs_redelivery() => {
                    debug!(attempt, payload_type = %outcome.payload_type, "delivery handled");
                    if let Err(err) = delivery.ack().await {
                        warn!(error = %err, "failed to acknowledge delivery");
                    }
                    return DeliveryOutcome::Succeeded { attempts: attempt };
                }
                Ok(outcome) => match outcome.response.exception() {
                    Some(exception) => FailureCause::from(exception),
                    None => FailureCause {
                        kind: "Unknown".into(),
                        message: "handler failed".into(),
                    },
                },
                Err(err) => FailureCause::from(&err),
            };

            match self.policy.decide(attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        root_cause = %cause.kind,
                        message = %cause.message,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DeadLetter => return self.give_up(delivery, &cause, attempt).await,
            }
        }
    }

    async fn give_up(&self, delivery: Delivery, cause: &FailureCause, attempts: u32) -> DeliveryOutcome {
        let Some(target) = &self.dead_letter else {
            error!(
                attempts,
                root_cause = %cause.kind,
                message = %cause.message,
                "retries exhausted, discarding delivery"
            );
            if let Err(err) = delivery.reject(false).await {
                warn!(error = %err, "failed to reject delivery");
            }
            return DeliveryOutcome::Discarded { attempts };
        };

        let dead = dead_letter_envelope(delivery.envelope(), cause);
        match self
            .transport
            .dead_letter(&target.exchange, &target.routing_key, dead)
            .await
        {
            Ok(()) => {
                error!(
                    attempts,
                    exchange = %target.exchange,
                    routing_key = %target.routing_key,
                    root_cause = %cause.kind,
                    message = %cause.message,
                    "retries exhausted, dead-lettered delivery"
                );
                if let Err(err) = delivery.ack().await {
                    warn!(error = %err, "failed to acknowledge dead-lettered delivery");
                }
                DeliveryOutcome::DeadLettered { attempts }
            }
            Err(err) => {
                error!(error = %err, attempts, "dead-letter publish failed, requeueing delivery");
                if let Err(err) = delivery.reject(true).await {
                    warn!(error = %err, "failed to requeue delivery");
                }
                DeliveryOutcome::Requeued { attempts }
            }
        }
    }

    /// Consume until the queue closes.
    pub async fn run(&self) -> Result<(), TransportError> {
        self.run_until(future::pending()).await
    }

    /// Consume until `shutdown` resolves.
    ///
    /// After shutdown no new deliveries are taken; in-flight ones finish.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()> + Send,
    {
        let stream = self.transport.consume(&self.queue)?;
        self.drive(stream, shutdown).await;
        Ok(())
    }

    /// Start consuming on a background task.
    ///
    /// Dropping the returned handle detaches the consumer; it keeps running
    /// until the queue closes. Only [`ConsumerHandle::shutdown`] stops it.
    pub fn spawn(self: Arc<Self>) -> Result<ConsumerHandle, TransportError> {
        let stream = self.transport.consume(&self.queue)?;
        let (shutdown, mut signal) = watch::channel(false);
        let task = tokio::spawn(async move {
            let stopped = async move {
                if signal.wait_for(|stop| *stop).await.is_err() {
                    debug!("consumer handle dropped, running detached");
                    future::pending::<()>().await;
                }
            };
            self.drive(stream, stopped).await;
        });
        Ok(ConsumerHandle { shutdown, task })
    }

    async fn drive<F>(&self, stream: DeliveryStream, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        info!(queue = %self.queue, workers = self.concurrency, "consumer started");
        stream
            .take_until(shutdown)
            .for_each_concurrent(self.concurrency, |delivery| async move {
                self.process(delivery).await;
            })
            .await;
        info!(queue = %self.queue, "consumer stopped");
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .field("dead_letter", &self.dead_letter)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

/// Handle to a consumer running in the background.
///
/// Dropping it detaches the consumer rather than stopping it.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the consumer; call `shutdown` to stop it"]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop taking deliveries and wait for in-flight ones to finish.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }

    /// Whether the consumer task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::RegistryBuilder,
        testing::{RecordingTransport, Settlement},
    };
    use courier_core::{Envelope, HandlerError, Message, headers};
    use serde::{Deserialize, Serialize};
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    #[derive(Debug, Serialize, Deserialize)]
    struct Flaky {
        fail_times: u32,
    }

    impl Message for Flaky {}

    fn consumer(transport: Arc<RecordingTransport>, calls: Arc<AtomicU32>) -> Consumer {
        let mut builder = RegistryBuilder::new();
        builder.event("Jobs", "flaky", move |job: Flaky| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= job.fail_times {
                    Err(HandlerError::new("Transient", format!("attempt {n} failed")))
                } else {
                    Ok(())
                }
            }
        });
        let router = Router::new(Arc::new(builder.build().unwrap()), transport.clone(), "jobs");
        Consumer::new(Arc::new(router), transport, "jobs")
            .with_policy(RetryPolicy::new(
                3,
                Duration::from_millis(100),
                2.0,
                Duration::from_secs(1),
            ))
            .with_dead_letter(DeadLetterTarget::new("jobs.dlx", "jobs.dead"))
    }

    fn event(fail_times: u32) -> Envelope {
        Envelope::new(Default::default(), format!(r#"{{"fail_times":{fail_times}}}"#).into_bytes())
            .with_header(headers::MESSAGE_KIND, "EVENT")
            .with_header(headers::PAYLOAD_TYPE, "Flaky")
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_retry_budget() {
        let transport = Arc::new(RecordingTransport::new());
        let calls = Arc::new(AtomicU32::new(0));
        let consumer = consumer(transport.clone(), calls.clone());

        let outcome = consumer.process(transport.delivery(event(2))).await;
        assert_eq!(outcome, DeliveryOutcome::Succeeded { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.settlements(), vec![Settlement::Ack]);
        assert!(transport.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_delivery_is_dead_lettered() {
        let transport = Arc::new(RecordingTransport::new());
        let calls = Arc::new(AtomicU32::new(0));
        let consumer = consumer(transport.clone(), calls.clone());
        let original = event(u32::MAX);

        let outcome = consumer.process(transport.delivery(original.clone())).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let dead = transport.dead_letters();
        assert_eq!(dead.len(), 1);
        let (exchange, routing_key, env) = &dead[0];
        assert_eq!((exchange.as_str(), routing_key.as_str()), ("jobs.dlx", "jobs.dead"));
        assert_eq!(env.body(), original.body());
        assert_eq!(env.header(headers::EXCEPTION_ROOT_CAUSE), Some("Transient"));
        assert_eq!(env.header(headers::EXCEPTION_MESSAGE), Some("attempt 3 failed"));
        assert!(env.header(headers::FAILED_AT).is_some());
        assert_eq!(transport.settlements(), vec![Settlement::Ack]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dead_letter_requeues() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_dead_letters(true);
        let consumer = consumer(transport.clone(), Arc::new(AtomicU32::new(0)));

        let outcome = consumer.process(transport.delivery(event(u32::MAX))).await;
        assert_eq!(outcome, DeliveryOutcome::Requeued { attempts: 3 });
        assert_eq!(
            transport.settlements(),
            vec![Settlement::Reject { requeue: true }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_routing_errors_are_retried_too() {
        let transport = Arc::new(RecordingTransport::new());
        let consumer = consumer(transport.clone(), Arc::new(AtomicU32::new(0)));
        let env = Envelope::new(Default::default(), b"{}".to_vec())
            .with_header(headers::PAYLOAD_TYPE, "Flaky");

        let outcome = consumer.process(transport.delivery(env)).await;
        assert_eq!(outcome.attempts(), 3);
        let (_, _, dead) = &transport.dead_letters()[0];
        assert_eq!(dead.header(headers::EXCEPTION_ROOT_CAUSE), Some("MissingHeader"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_dead_letter_target_discards() {
        let transport = Arc::new(RecordingTransport::new());
        let mut consumer = consumer(transport.clone(), Arc::new(AtomicU32::new(0)));
        consumer.dead_letter = None;

        let outcome = consumer.process(transport.delivery(event(u32::MAX))).await;
        assert_eq!(outcome, DeliveryOutcome::Discarded { attempts: 3 });
        assert_eq!(
            transport.settlements(),
            vec![Settlement::Reject { requeue: false }]
        );
    }
}
