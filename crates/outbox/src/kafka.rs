//! rdkafka-backed [`Producer`].
//!
//! The producer is idempotent and waits for every in-sync replica before a
//! send resolves, so internal transport retries never duplicate a message at
//! the broker.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::dispatcher::{OutboundMessage, Producer, SendError};

/// Internal librdkafka retries for one logical send.
const SEND_RETRIES: &str = "5";

#[derive(Clone)]
pub struct KafkaProducer {
    inner: FutureProducer,
}

impl KafkaProducer {
    /// `message_timeout` caps how long librdkafka keeps retrying one message
    /// before reporting `MessageTimedOut`.
    pub fn new(brokers: &str, message_timeout: Duration) -> anyhow::Result<Self> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("retries", SEND_RETRIES)
            .set("max.in.flight.requests.per.connection", "1")
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .create()?;

        tracing::info!(brokers, "Kafka producer created (idempotent, acks=all)");
        Ok(Self { inner })
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<(), SendError> {
        let attempt = message.attempt.to_string();
        let version = message.envelope_version.to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "attempt",
                value: Some(attempt.as_str()),
            })
            .insert(Header {
                key: "envelope-version",
                value: Some(version.as_str()),
            });

        let record = FutureRecord::to(message.topic)
            .key(message.key)
            .payload(message.payload)
            .headers(headers);

        // A full local queue fails fast instead of stalling the relay.
        match self.inner.send(record, Duration::from_secs(0)).await {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(classify(&err)),
        }
    }
}

/// Sort a producer error into retryable or rejected.
///
/// Only codes known to be transient are retried; anything unrecognised is
/// treated as a rejection so it fails instead of looping forever.
pub fn classify(err: &KafkaError) -> SendError {
    let retryable = match err {
        KafkaError::Canceled => true,
        other => other.rdkafka_error_code().is_some_and(is_transient_code),
    };

    if retryable {
        SendError::Transient(err.to_string())
    } else {
        SendError::Rejected(err.to_string())
    }
}

fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
    )
}
