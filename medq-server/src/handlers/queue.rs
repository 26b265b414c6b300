use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use medq_core::PositionUpdate;
use medq_model::{
    AppointmentID, ClinicID, QueueEntry, QueueEntryView, QueueID, QueuePosition,
    QueueStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::AppResult;

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub appointment_id: AppointmentID,
    pub priority: i16,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    pub priority: i16,
}

#[derive(Debug, Serialize)]
pub struct ClinicQueueResponse {
    pub entries: Vec<QueueEntryView>,
    pub total: usize,
}

pub async fn check_in_handler(
    State(state): State<AppState>,
    Json(request): Json<CheckInRequest>,
) -> AppResult<impl IntoResponse> {
    let entry = state
        .engine
        .check_in(request.appointment_id, request.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn clinic_queue_handler(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
) -> AppResult<Json<ClinicQueueResponse>> {
    let entries = state.engine.queue_with_details(ClinicID(clinic_id)).await?;
    let total = entries.len();
    Ok(Json(ClinicQueueResponse { entries, total }))
}

pub async fn position_handler(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<QueuePosition>> {
    let position = state
        .engine
        .position(AppointmentID(appointment_id))
        .await?;
    Ok(Json(position))
}

/// Long-lived SSE channel pushing the position payload on every relevant
/// queue change. Opening a second stream for the same appointment ends the
/// first.
pub async fn stream_position_handler(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.hub.open(AppointmentID(appointment_id)).await;
    let stream = UnboundedReceiverStream::new(receiver)
        .map(|update| Ok(position_update_to_event(update)));

    Sse::new(stream).keep_alive(default_keep_alive())
}

pub async fn update_status_handler(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> AppResult<Json<QueueEntry>> {
    let status: QueueStatus = request.status.parse()?;
    let entry = state
        .engine
        .update_status(QueueID(queue_id), status)
        .await?;
    Ok(Json(entry))
}

pub async fn requeue_handler(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RequeueRequest>,
) -> AppResult<Json<QueueEntry>> {
    let entry = state
        .engine
        .requeue_missed(AppointmentID(appointment_id), request.priority)
        .await?;
    Ok(Json(entry))
}

pub async fn call_next_handler(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
) -> AppResult<Json<QueueEntry>> {
    let entry = state.engine.call_next(ClinicID(clinic_id)).await?;
    Ok(Json(entry))
}

pub async fn call_by_appointment_handler(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<QueueEntry>> {
    let entry = state
        .engine
        .call_by_appointment(AppointmentID(appointment_id))
        .await?;
    Ok(Json(entry))
}

pub async fn appointment_history_handler(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<Vec<QueueEntry>>> {
    let history = state
        .engine
        .queue_history(AppointmentID(appointment_id))
        .await?;
    Ok(Json(history))
}

pub async fn currently_serving_handler(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
) -> AppResult<Json<Option<QueueEntry>>> {
    let serving = state.engine.currently_serving(ClinicID(clinic_id)).await?;
    Ok(Json(serving))
}

pub async fn missed_entries_handler(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
) -> AppResult<Json<Vec<QueueEntry>>> {
    let missed = state.engine.missed_entries(ClinicID(clinic_id)).await?;
    Ok(Json(missed))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn position_update_to_event(update: PositionUpdate) -> Event {
    let event = Event::default().event("queue-update");
    match serde_json::to_string(&update) {
        Ok(data) => event.data(data),
        Err(err) => {
            warn!(%err, "failed to encode position update");
            event.data("{}")
        }
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
