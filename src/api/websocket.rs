use crate::api::relay_info::{accepts, RelayInformation, NOSTR_JSON};
use crate::relay::RelayEngine;
use crate::subscription::ConnectionManager;
use axum::{
    extract::{ws::WebSocketUpgrade, Request, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Shared application state for the relay endpoints
#[derive(Clone)]
pub struct RelayAppState {
    pub engine: Arc<RelayEngine>,
    pub relay_info: Arc<RelayInformation>,
    pub static_dir: PathBuf,
}

/// GET / - WebSocket upgrade, NIP-11 document, or the static index
async fn root_handler(
    State(state): State<Arc<RelayAppState>>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    req: Request,
) -> Response {
    if let Some(ws) = ws {
        return upgrade(ws, state);
    }

    if accepts(&headers, NOSTR_JSON) || accepts(&headers, "application/json") {
        return state.relay_info.respond(&headers);
    }

    serve_static(&state.static_dir, req).await
}

/// GET /nostr - WebSocket upgrade, otherwise the NIP-11 document
async fn nostr_handler(
    State(state): State<Arc<RelayAppState>>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
) -> Response {
    match ws {
        Some(ws) => upgrade(ws, state),
        None => state.relay_info.respond(&headers),
    }
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<RelayAppState>) -> Response {
    info!("WebSocket upgrade request received");
    let engine = Arc::clone(&state.engine);
    ws.on_upgrade(move |socket| ConnectionManager::new(engine).handle(socket))
}

async fn serve_static(dir: &Path, req: Request) -> Response {
    let result: Result<_, Infallible> = ServeDir::new(dir).oneshot(req).await;
    match result {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Create the relay router: protocol endpoints, NIP-11 and static files
pub fn create_router(
    engine: Arc<RelayEngine>,
    relay_info: RelayInformation,
    static_dir: impl Into<PathBuf>,
) -> Router {
    let static_dir = static_dir.into();
    let state = Arc::new(RelayAppState {
        engine,
        relay_info: Arc::new(relay_info),
        static_dir: static_dir.clone(),
    });

    Router::new()
        .route("/", get(root_handler))
        .route("/nostr", get(nostr_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
