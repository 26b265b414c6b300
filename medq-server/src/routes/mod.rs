use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    AppState,
    handlers::queue::{
        appointment_history_handler, call_by_appointment_handler, call_next_handler,
        check_in_handler, clinic_queue_handler, currently_serving_handler, health_handler,
        missed_entries_handler, position_handler, requeue_handler, stream_position_handler,
        update_status_handler,
    },
};

/// All queue endpoints, mounted under `/api/queue`.
pub fn create_queue_router() -> Router<AppState> {
    Router::new()
        .route("/check-in", post(check_in_handler))
        .route("/clinic/{clinic_id}", get(clinic_queue_handler))
        .route("/clinic/{clinic_id}/call-next", post(call_next_handler))
        .route(
            "/clinic/{clinic_id}/currently-serving",
            get(currently_serving_handler),
        )
        .route("/clinic/{clinic_id}/missed", get(missed_entries_handler))
        .route("/position/{appointment_id}", get(position_handler))
        .route(
            "/position/{appointment_id}/stream",
            get(stream_position_handler),
        )
        .route("/call/{appointment_id}", post(call_by_appointment_handler))
        .route("/requeue/{appointment_id}", post(requeue_handler))
        .route(
            "/appointment/{appointment_id}",
            get(appointment_history_handler),
        )
        .route("/{queue_id}/status", patch(update_status_handler))
        .route("/health", get(health_handler))
}

/// Assemble the full application router with middleware applied.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/queue", create_queue_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
