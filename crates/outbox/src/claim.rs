//! Lease-based batch claiming of due outbox rows.
//!
//! A claim pushes `next_attempt_at` forward by the lease, so the same row is
//! invisible to every other claimer until the lease runs out. Concurrent
//! claimers never block each other: rows locked by an in-progress claim are
//! skipped, not waited on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use notihub_common::types::OutboxStatus;

/// An outbox row handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ClaimedEntry {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    /// `next_attempt_at` as it was before this claim.
    pub due_at: DateTime<Utc>,
    /// The moment this claim stops protecting the row.
    pub lease_expires_at: DateTime<Utc>,
}

impl ClaimedEntry {
    /// Time left on this claim, measured against `now`. Zero once expired.
    pub fn lease_remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.lease_expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn lease_remaining(&self) -> Duration {
        self.lease_remaining_at(Utc::now())
    }
}

/// Claim up to `limit` due rows, oldest-due first.
///
/// Due means `status` is QUEUED or PENDING and `next_attempt_at <= now()`.
/// Runs as a single read-committed transaction and commits before returning.
pub async fn claim_batch(
    pool: &PgPool,
    limit: u32,
    lease: Duration,
) -> Result<Vec<ClaimedEntry>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
        .execute(&mut *tx)
        .await?;

    let mut rows: Vec<ClaimedEntry> = sqlx::query_as(
        r#"
        WITH due AS (
            SELECT id, next_attempt_at
            FROM outbox
            WHERE status IN ('QUEUED', 'PENDING')
              AND next_attempt_at <= NOW()
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE outbox o
        SET next_attempt_at = NOW() + make_interval(secs => $2),
            updated_at = NOW()
        FROM due
        WHERE o.id = due.id
        RETURNING o.id, o.payload, o.status, o.attempt_count,
                  due.next_attempt_at AS due_at, o.next_attempt_at AS lease_expires_at
        "#,
    )
    .bind(i64::from(limit))
    .bind(lease.as_secs_f64())
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    // RETURNING order is unspecified; keep oldest rows first for the dispatcher.
    rows.sort_by_key(|r| r.due_at);
    Ok(rows)
}
