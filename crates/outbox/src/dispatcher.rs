//! Dispatcher: publishes one claimed outbox entry to the broker.
//!
//! The broker is reached through the [`Producer`] trait so the relay can be
//! driven by an in-memory producer in tests. Every publish is raced against a
//! deadline and a cancellation token; whichever finishes first decides the
//! [`DispatchOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::claim::ClaimedEntry;
use crate::envelope::EnvelopeHeader;

/// A single message ready for the broker.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub topic: &'a str,
    /// Partition key: the notification id.
    pub key: &'a str,
    /// Envelope bytes exactly as stored in the outbox.
    pub payload: &'a [u8],
    /// Outbox attempt count at claim time, sent as a header.
    pub attempt: i32,
    pub envelope_version: u32,
}

/// Failure reported by a [`Producer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Broker unavailable, timed out, or otherwise worth retrying.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// The broker refused the message itself.
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Acknowledged, idempotent broker producer.
///
/// Implementations must only return `Ok` once the broker has acknowledged the
/// write. One handle is shared by every publish in the process.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<(), SendError>;
}

/// What happened to one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published,
    Retryable(String),
    Terminal(String),
}

impl From<Result<(), SendError>> for DispatchOutcome {
    fn from(result: Result<(), SendError>) -> Self {
        match result {
            Ok(()) => DispatchOutcome::Published,
            Err(SendError::Transient(reason)) => DispatchOutcome::Retryable(reason),
            Err(SendError::Rejected(reason)) => DispatchOutcome::Terminal(reason),
        }
    }
}

pub struct Dispatcher {
    producer: Arc<dyn Producer>,
    topic: String,
    publish_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        producer: Arc<dyn Producer>,
        topic: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            publish_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `entry` once.
    ///
    /// A payload without a notification id can never succeed and is
    /// `Terminal`. The deadline is the publish timeout or the end of the
    /// entry's lease, whichever comes first; nothing is sent once the lease
    /// is gone. Hitting the deadline or `cancel` before the broker
    /// acknowledges is `Retryable`; the abandoned send may still land, which
    /// at-least-once delivery tolerates.
    pub async fn dispatch(
        &self,
        entry: &ClaimedEntry,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let header = match EnvelopeHeader::peek(&entry.payload) {
            Ok(header) => header,
            Err(e) => return DispatchOutcome::Terminal(e.to_string()),
        };

        let budget = self.publish_timeout.min(entry.lease_remaining());
        if budget.is_zero() {
            return DispatchOutcome::Retryable("lease expired before publish".to_string());
        }

        let message = OutboundMessage {
            topic: &self.topic,
            key: &header.notification_id,
            payload: &entry.payload,
            attempt: entry.attempt_count,
            envelope_version: header.version,
        };

        tokio::select! {
            result = self.producer.send(message) => DispatchOutcome::from(result),
            _ = tokio::time::sleep(budget) => DispatchOutcome::Retryable(format!(
                "no broker acknowledgment within {}ms",
                budget.as_millis()
            )),
            _ = cancel.cancelled() => {
                DispatchOutcome::Retryable("publish cancelled before acknowledgment".to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// A message captured by [`RecordingProducer`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct SentMessage {
        pub topic: String,
        pub key: String,
        pub payload: Vec<u8>,
        pub attempt: i32,
    }

    /// In-memory producer that records sends and replays scripted results.
    #[derive(Default)]
    pub struct RecordingProducer {
        sent: Mutex<Vec<SentMessage>>,
        script: Mutex<Vec<Result<(), SendError>>>,
        delay: Option<Duration>,
    }

    impl RecordingProducer {
        /// Results are consumed front to back; once exhausted every send succeeds.
        pub fn scripted(results: Vec<Result<(), SendError>>) -> Self {
            Self {
                script: Mutex::new(results),
                ..Default::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<SentMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn send(&self, message: OutboundMessage<'_>) -> Result<(), SendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sent.lock().unwrap().push(SentMessage {
                topic: message.topic.to_string(),
                key: message.key.to_string(),
                payload: message.payload.to_vec(),
                attempt: message.attempt,
            });
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use notihub_common::types::OutboxStatus;

    use super::testing::RecordingProducer;
    use super::*;

    fn entry(payload: &[u8], attempt_count: i32) -> ClaimedEntry {
        ClaimedEntry {
            id: Uuid::new_v4(),
            payload: payload.to_vec(),
            status: OutboxStatus::Queued,
            attempt_count,
            due_at: Utc::now(),
            lease_expires_at: Utc::now() + chrono::Duration::seconds(30),
        }
    }

    fn dispatcher(producer: Arc<RecordingProducer>) -> Dispatcher {
        Dispatcher::new(producer, "notifications", Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_dispatch_forwards_payload_verbatim() {
        let producer = Arc::new(RecordingProducer::default());
        let payload = br#"{ "notificationId": "abc-123",  "content": "hi" }"#;

        let outcome = dispatcher(producer.clone())
            .dispatch(&entry(payload, 2), &CancellationToken::new())
            .await;

        assert_eq!(outcome, DispatchOutcome::Published);
        let sent = producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "notifications");
        assert_eq!(sent[0].key, "abc-123");
        assert_eq!(sent[0].payload, payload.to_vec());
        assert_eq!(sent[0].attempt, 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_terminal_and_never_sent() {
        let producer = Arc::new(RecordingProducer::default());
        let outcome = dispatcher(producer.clone())
            .dispatch(&entry(br#"{"content":"hi"}"#, 0), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Terminal(_)));
        assert!(producer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_errors_map_to_outcomes() {
        let producer = Arc::new(RecordingProducer::scripted(vec![
            Err(SendError::Transient("broker down".into())),
            Err(SendError::Rejected("message too large".into())),
        ]));
        let d = dispatcher(producer);
        let e = entry(br#"{"notificationId":"n1"}"#, 0);
        let cancel = CancellationToken::new();

        assert_eq!(
            d.dispatch(&e, &cancel).await,
            DispatchOutcome::Retryable("broker down".into())
        );
        assert_eq!(
            d.dispatch(&e, &cancel).await,
            DispatchOutcome::Terminal("message too large".into())
        );
        assert_eq!(d.dispatch(&e, &cancel).await, DispatchOutcome::Published);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_before_ack_is_retryable() {
        let producer = Arc::new(RecordingProducer::slow(Duration::from_secs(60)));
        let d = Dispatcher::new(producer.clone(), "notifications", Duration::from_millis(500));

        let outcome = d
            .dispatch(&entry(br#"{"notificationId":"n1"}"#, 0), &CancellationToken::new())
            .await;

        match outcome {
            DispatchOutcome::Retryable(reason) => assert!(reason.contains("500ms")),
            other => panic!("expected retryable, got {:?}", other),
        }
        assert!(producer.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_before_ack_is_retryable() {
        let producer = Arc::new(RecordingProducer::slow(Duration::from_secs(60)));
        let d = dispatcher(producer);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = d
            .dispatch(&entry(br#"{"notificationId":"n1"}"#, 0), &cancel)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Retryable("publish cancelled before acknowledgment".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_shrinks_to_remaining_lease() {
        let producer = Arc::new(RecordingProducer::slow(Duration::from_secs(60)));
        let d = dispatcher(producer.clone());
        let mut e = entry(br#"{"notificationId":"n1"}"#, 0);
        e.lease_expires_at = Utc::now() + chrono::Duration::milliseconds(200);

        let started = tokio::time::Instant::now();
        let outcome = d.dispatch(&e, &CancellationToken::new()).await;

        assert!(matches!(outcome, DispatchOutcome::Retryable(_)));
        assert!(started.elapsed() <= Duration::from_millis(200));
        assert!(producer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_is_never_sent() {
        let producer = Arc::new(RecordingProducer::default());
        let mut e = entry(br#"{"notificationId":"n1"}"#, 0);
        e.lease_expires_at = Utc::now() - chrono::Duration::seconds(1);

        let outcome = dispatcher(producer.clone())
            .dispatch(&e, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Retryable("lease expired before publish".into())
        );
        assert!(producer.sent().is_empty());
    }
}
