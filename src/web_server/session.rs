//! JSON and SSE routes that drive the live session.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;

use super::prelude::*;
use crate::protocol::HealthResponse;

#[derive(Serialize, Deserialize)]
pub(crate) struct DomainRequest {
    pub domain: Domain,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct VisibilityRequest {
    pub visibility: Visibility,
}

pub(crate) async fn get_session(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::success(state.session.snapshot()))
}

pub(crate) async fn start_session(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SessionSnapshot>> {
    match state.session.start().await {
        Ok(()) => {
            info!("Session started from web client");
            Json(ApiResponse::success(state.session.snapshot()))
        }
        Err(e) => {
            warn!("Failed to start session: {e}");
            let message = state
                .session
                .snapshot()
                .last_error
                .unwrap_or_else(|| e.to_string());
            Json(ApiResponse::error(message))
        }
    }
}

pub(crate) async fn end_session(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SessionSnapshot>> {
    match state.session.end().await {
        Ok(()) => Json(ApiResponse::success(state.session.snapshot())),
        Err(e) => {
            error!("Failed to end session: {e}");
            Json(ApiResponse::error(format!("Failed to end session: {e}")))
        }
    }
}

pub(crate) async fn set_domain(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DomainRequest>,
) -> Json<ApiResponse<()>> {
    match state.session.set_domain(payload.domain) {
        Ok(()) => Json(ApiResponse::success(())),
        Err(e) => {
            error!("Failed to set domain: {e}");
            Json(ApiResponse::error(format!("Failed to set domain: {e}")))
        }
    }
}

pub(crate) async fn set_visibility(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VisibilityRequest>,
) -> Json<ApiResponse<()>> {
    debug!("Page visibility changed to {:?}", payload.visibility);
    match state.session.set_visibility(payload.visibility) {
        Ok(()) => Json(ApiResponse::success(())),
        Err(e) => {
            error!("Failed to forward visibility change: {e}");
            Json(ApiResponse::error(format!(
                "Failed to forward visibility change: {e}"
            )))
        }
    }
}

/// Stream every snapshot change as a server-sent event
pub(crate) async fn session_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut updates = state.session.subscribe();

    let stream = async_stream::stream! {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            match Event::default().event("snapshot").json_data(&snapshot) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(e) => warn!("Failed to serialize session snapshot: {e}"),
            }
            if updates.changed().await.is_err() {
                debug!("Session closed; ending event stream");
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) async fn health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    match state.inference.health().await {
        Ok(health) => (StatusCode::OK, Json(ApiResponse::success(health))),
        Err(e) => {
            warn!("Inference service health check failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(format!(
                    "Inference service at {} is unavailable: {e}",
                    state.inference.base_url()
                ))),
            )
        }
    }
}
