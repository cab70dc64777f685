// Server assembly: routing, middleware, startup and shutdown.

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    api, auth,
    config::ServerConfig,
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    metrics,
    rooms,
    state::AppState,
};

const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Run the backend until a shutdown signal arrives.
pub async fn run(config: ServerConfig) -> Result<()> {
    let state = AppState::from_config(&config)?;
    metrics::set_global_metrics(state.metrics.clone());

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set PRIMAL_JWT_SECRET in production");
    }

    let app = build_router(state);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "primal server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let ops = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(state.clone());

    apply_middleware(
        ops.merge(rooms::ws::router(state.clone()))
            .merge(auth::routes::router(state.clone()))
            .merge(api::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;

    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
