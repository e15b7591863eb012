//! semblanced — the semblance daemon.
//!
//! Single authority over one instance store; the `semblance` CLI connects
//! here. Exposes the action dispatcher over HTTP:
//!
//! - `POST /action` — dispatch one action request
//! - `GET  /info`   — engine stats
//! - `GET  /health` — server status
//!
//! Build and run: `cargo run --features server --bin semblanced`

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use semblance::config::Config;
use semblance::dispatch::{ActionDispatcher, Request, Response};
use semblance::engine::Engine;
use semblance::paths::SemblancePaths;
use semblance::schema::MemorySchema;

struct ServerState {
    engine: Engine,
    dispatcher: ActionDispatcher,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    instances: usize,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instances: state.engine.store().len(),
    })
}

#[derive(Serialize)]
struct InfoResponse {
    instances: usize,
    matchers: Vec<String>,
    persistent: bool,
    query_timeout_ms: u64,
}

async fn info(State(state): State<Arc<ServerState>>) -> Json<InfoResponse> {
    let info = state.engine.info();
    Json(InfoResponse {
        instances: info.instances,
        matchers: info.matchers,
        persistent: info.persistent,
        query_timeout_ms: info.query_timeout_ms,
    })
}

async fn action(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<Request>,
) -> Json<Response> {
    // Matching is CPU-bound and the store blocks; keep it off the runtime
    // worker threads.
    let state = Arc::clone(&state);
    let response = tokio::task::spawn_blocking(move || state.dispatcher.dispatch(&request))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("action task panicked: {e}");
            Response {
                ok: false,
                result: None,
                error: Some(semblance::dispatch::ResponseError {
                    code: "semblance::dispatch::internal".to_string(),
                    message: "internal dispatch failure".to_string(),
                }),
            }
        });
    Json(response)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,oxigraph=warn")),
        )
        .init();

    let paths = SemblancePaths::resolve().unwrap_or_else(|e| {
        tracing::error!("failed to resolve XDG paths: {e}");
        std::process::exit(1);
    });
    if let Err(e) = paths.ensure_dirs() {
        tracing::error!("failed to create XDG directories: {e}");
        std::process::exit(1);
    }

    let mut config = Config::load_or_default(&paths.config_file()).unwrap_or_else(|e| {
        tracing::error!("failed to load config: {e}");
        std::process::exit(1);
    });
    if config.store.data_dir.is_none() {
        config.store.data_dir = Some(paths.store_dir());
    }
    if let Ok(bind) = std::env::var("SEMBLANCE_BIND") {
        config.server.bind = bind;
    }
    if let Ok(port) = std::env::var("SEMBLANCE_PORT") {
        config.server.port = port.parse().unwrap_or_else(|_| {
            tracing::error!("SEMBLANCE_PORT must be a valid u16");
            std::process::exit(1);
        });
    }
    let bind = config.server.bind.clone();
    let port = config.server.port;
    let addr = format!("{bind}:{port}");

    let engine = Engine::new(config, Arc::new(MemorySchema::new())).unwrap_or_else(|e| {
        tracing::error!("failed to open engine: {e}");
        std::process::exit(1);
    });
    let dispatcher = engine.dispatcher();
    let state = Arc::new(ServerState { engine, dispatcher });

    tracing::info!("semblanced initialized");

    // Write PID file so the `semblance` CLI can discover this server.
    if let Err(e) = semblance::client::write_pid_file(&paths, port, &bind) {
        tracing::warn!("failed to write PID file: {e}");
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/action", post(action))
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("semblanced listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            semblance::client::remove_pid_file(&paths);
            std::process::exit(1);
        }
    };

    // Serve with graceful shutdown on SIGTERM/SIGINT.
    let paths_for_shutdown = paths.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = ctrl_c => {},
                            _ = sigterm.recv() => {},
                        }
                    }
                    Err(_) => {
                        ctrl_c.await.ok();
                    }
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
            tracing::info!("semblanced shutting down");
            semblance::client::remove_pid_file(&paths_for_shutdown);
        })
        .await;

    // The shutdown handler normally removes the PID file; cover the error
    // path as well.
    semblance::client::remove_pid_file(&paths);
    if let Err(e) = served {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
