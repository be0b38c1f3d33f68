//! Transactional outbox for notifications.
//!
//! [`intake`] writes a notification and its dispatch event atomically.
//! [`relay`] is the polling side: it claims due outbox rows under a lease
//! ([`claim`]), publishes them ([`dispatcher`], [`kafka`]) and records the
//! outcome ([`reconcile`], [`backoff`]).

pub mod backoff;
pub mod claim;
pub mod dispatcher;
pub mod envelope;
pub mod intake;
pub mod kafka;
pub mod reconcile;
pub mod relay;
