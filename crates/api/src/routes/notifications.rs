//! Notification intake routes.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use notihub_common::error::AppError;
use notihub_common::types::NotificationRecord;
use notihub_outbox::intake::{CreateNotificationParams, CreateNotificationResponse, IntakeService};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/notifications/{id}", get(get_notification))
}

/// POST /notifications: Queue a notification for asynchronous delivery.
///
/// Returns 202 once the notification and its outbox event are committed.
/// Delivery results are only visible through `GET /notifications/{id}`.
async fn create_notification(
    State(state): State<AppState>,
    body: Result<Json<CreateNotificationParams>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), AppError> {
    let Json(params) =
        body.map_err(|e| AppError::Validation(format!("invalid json: {}", e.body_text())))?;

    let response = IntakeService::queue(&state.pool, &params, state.intake_timeout)
        .await
        .inspect_err(|e| {
            if !e.is_client_error() {
                tracing::error!(error = %e, "Failed to queue notification");
            }
        })?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /notifications/:id: Fetch a notification and its delivery status.
async fn get_notification(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<NotificationRecord>, AppError> {
    let Path(id) = id.map_err(|e| {
        AppError::Validation(format!("invalid notification id: {}", e.body_text()))
    })?;
    let record = IntakeService::get(&state.pool, id).await?;
    Ok(Json(record))
}
