//! HTTP binding of the chunk protocol.

pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Room for the multipart framing and text fields around one chunk.
const MULTIPART_SLACK: usize = 64 * 1024;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.max_chunk_bytes.saturating_add(MULTIPART_SLACK);

    let api_routes = Router::new()
        .route(
            "/upload-chunk",
            post(handlers::handle_upload_chunk).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/files", get(handlers::handle_files))
        .route("/sessions", get(handlers::handle_sessions));

    Router::new()
        .nest("/api", api_routes)
        .route("/uploads/{*name}", get(handlers::handle_download))
        .with_state(state)
        .layer(cors)
}

/// Serve until a message arrives on `shutdown`.
pub async fn serve(
    state: ApiState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, backend = state.store.backend_kind(), "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("API stopped");
    Ok(())
}
