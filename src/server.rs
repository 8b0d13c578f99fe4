//! Web server implementation using Axum.

use axum::{
    Router, middleware,
    response::Redirect,
    routing::{get, post},
};
use std::num::NonZeroU16;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Settings;
use crate::inference::InferenceClient;
use crate::session::SessionHandle;
use crate::web_server::{middleware::no_cache_middleware, pages, session};
use crate::{OurError, OurResult};

/// Application state shared across handlers
pub struct AppState {
    pub settings: Settings,
    pub session: SessionHandle,
    pub inference: InferenceClient,
}

/// Build the page and API routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/session", get(session::get_session))
        .route("/session/start", post(session::start_session))
        .route("/session/end", post(session::end_session))
        .route("/session/domain", post(session::set_domain))
        .route("/session/visibility", post(session::set_visibility))
        .route("/session/events", get(session::session_events))
        .route("/health", get(session::health))
        .layer(middleware::from_fn(no_cache_middleware));

    Router::new()
        .route("/", get(pages::home))
        .route("/asl", get(pages::asl))
        .route("/isl", get(pages::isl))
        .route("/isl/static", get(pages::isl_static))
        .route("/isl/dynamic", get(pages::isl_dynamic))
        .nest("/api", api)
        .nest_service(
            "/static",
            ServeDir::new(concat!(env!("CARGO_MANIFEST_DIR"), "/static")),
        )
        .fallback(|| async { Redirect::to("/") })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn start_server(host: String, port: NonZeroU16, state: Arc<AppState>) -> OurResult<()> {
    let app = create_router(state);

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OurError::App(format!("Failed to bind to {addr}: {e}")))?;

    info!("Web server listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| OurError::App(format!("Server error: {e}")))?;

    Ok(())
}
