//! HTTP intake for notifications.
//!
//! - `POST /notifications`: validate and queue a notification
//! - `GET  /notifications/{id}`: current delivery status
//! - `GET  /health`: liveness

pub mod routes;
pub mod state;
