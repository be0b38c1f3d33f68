//! Shared application state for the Axum API server.

use std::time::Duration;

use notihub_common::config::AppConfig;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Upper bound on the intake transaction.
    pub intake_timeout: Duration,
}

impl AppState {
    pub fn new(pool: PgPool, config: &AppConfig) -> Self {
        Self {
            pool,
            intake_timeout: config.intake_timeout(),
        }
    }
}
