//! HTTP surface of the TruthLens agent.
//!
//! One router exposes the conversation list, the current selection, the
//! message view, sends, and an SSE feed of live snapshots. Every handler goes
//! through the single [`ChatEngine`](crate::chat::ChatEngine) held in
//! [`AppState`], so HTTP clients and in-process watchers share one view.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chat::ChatResult;

/// API router with request tracing and CORS open to any origin.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener until `shutdown_signal` resolves.
///
/// The engine keeps running afterwards; the caller shuts it down.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_signal: F,
) -> ChatResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, model = %state.model_name, "TruthLens API listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!(%addr, "TruthLens API stopped");
    Ok(())
}

/// Bind `0.0.0.0:port` and serve until `shutdown_signal` resolves.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> ChatResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    serve(listener, state, shutdown_signal).await
}
