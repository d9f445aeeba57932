//! Nancy HTTP ingress (`service` feature): exposes `NancyCore` over the
//! API surface named in §6 — knowledge-packet and legacy ingest, query,
//! health, metrics, and mode control.
//!
//! # Environment Variables
//! - `NANCY_CONFIG_PATH`: path to the TOML configuration document (default: built-in defaults)
//! - `NANCY_MODE`: overrides `nancy_core.mode` (`legacy`, `hybrid`, `mcp`)
//! - `NANCY_HOST`: host to bind to (default: 127.0.0.1)
//! - `NANCY_PORT`: port to bind to (default: 8080)
//! - `RUST_LOG`: log level filter (default: nancy_core=info)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nancy_core::error::{ErrorResponse, NancyError};
use nancy_core::history::IngestOutcome;
use nancy_core::legacy::LegacyUpload;
use nancy_core::mode::Mode;
use nancy_core::query::QueryOptions;
use nancy_core::NancyCore;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Nancy orchestration core starting");

    let core = match NancyCore::start_from_env().await {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "startup failed");
            return match e {
                NancyError::Config(_) => ExitCode::from(2),
                _ => ExitCode::from(1),
            };
        }
    };

    let host = std::env::var("NANCY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("NANCY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(a) => a,
        Err(e) => {
            error!(host = %host, port = port, error = %e, "invalid address");
            return ExitCode::from(1);
        }
    };

    let app = router(Arc::clone(&core));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            return ExitCode::from(1);
        }
    };

    info!(addr = %addr, mode = %core.mode(), "listening");

    let shutdown_core = Arc::clone(&core);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_core))
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::from(1);
    }

    info!("shutdown complete");
    ExitCode::SUCCESS
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nancy_core=info,tower_http=info"));
    let subscriber = tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true));
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {err}");
    }
}

fn router(core: Arc<NancyCore>) -> Router {
    Router::new()
        .route("/ingest/knowledge-packet", post(ingest_knowledge_packet))
        .route("/ingest/legacy", post(ingest_legacy))
        .route("/query", post(query))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/mode", get(get_mode).post(set_mode))
        .with_state(core)
}

async fn shutdown_signal(core: Arc<NancyCore>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, initiating graceful shutdown"),
        _ = terminate => info!("received sigterm, initiating graceful shutdown"),
    }

    core.shutdown().await;
}

fn error_response(e: NancyError) -> Response {
    let status = match &e {
        NancyError::Validation(_) | NancyError::HashMismatch { .. } | NancyError::UnknownEnumValue { .. } => {
            StatusCode::BAD_REQUEST
        }
        NancyError::ModeRejection { .. } => StatusCode::CONFLICT,
        NancyError::Timeout | NancyError::Mcp(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::from(&e))).into_response()
}

/// `POST /ingest/knowledge-packet` (§6).
async fn ingest_knowledge_packet(State(core): State<Arc<NancyCore>>, Json(body): Json<Value>) -> Response {
    match core.ingest_knowledge_packet(&body).await {
        Ok(response) => {
            let status = match response.outcome {
                IngestOutcome::Ingested | IngestOutcome::SkippedDuplicate | IngestOutcome::Partial => {
                    StatusCode::OK
                }
                IngestOutcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `POST /ingest/legacy` (§6, mode ≠ mcp).
async fn ingest_legacy(State(core): State<Arc<NancyCore>>, mut multipart: Multipart) -> Response {
    let mut file_name = None;
    let mut text = None;
    let mut author = None;
    let mut tags = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({"outcome": "failed", "message": e.to_string()})))
                    .into_response()
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                match field.text().await {
                    Ok(t) => text = Some(t),
                    Err(e) => {
                        return (StatusCode::BAD_REQUEST, Json(json!({"outcome": "failed", "message": e.to_string()})))
                            .into_response()
                    }
                }
            }
            "author" => {
                author = field.text().await.ok().filter(|s| !s.is_empty());
            }
            "tags" => {
                if let Ok(t) = field.text().await {
                    tags = t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                }
            }
            _ => {}
        }
    }

    let (Some(file_name), Some(text)) = (file_name, text) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"outcome": "failed", "message": "multipart body must include a named 'file' field"})),
        )
            .into_response();
    };

    let upload = LegacyUpload { file_name, text, author, tags };
    match core.ingest_legacy(upload).await {
        Ok(response) => {
            let status = match response.outcome {
                IngestOutcome::Ingested | IngestOutcome::SkippedDuplicate | IngestOutcome::Partial => {
                    StatusCode::OK
                }
                IngestOutcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    n_results: Option<usize>,
    #[serde(default)]
    options: Option<QueryOptions>,
}

/// `POST /query` (§6, §4.6).
async fn query(State(core): State<Arc<NancyCore>>, Json(body): Json<QueryRequest>) -> Response {
    let mut options = body.options.unwrap_or_default();
    if options.k.is_none() {
        options.k = body.n_results;
    }
    match core.query(&body.question, options).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /health` (§6, §4.8).
async fn health(State(core): State<Arc<NancyCore>>) -> Response {
    let health = core.health().await;
    let status = match health.status {
        nancy_core::metrics::AggregateStatus::Healthy | nancy_core::metrics::AggregateStatus::Degraded => {
            StatusCode::OK
        }
        nancy_core::metrics::AggregateStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health)).into_response()
}

/// `GET /metrics` (§6, §4.8): Prometheus text exposition format.
async fn metrics(State(core): State<Arc<NancyCore>>) -> impl IntoResponse {
    core.metrics_export()
}

#[derive(Debug, Serialize)]
struct ModeResponse {
    mode: Mode,
}

/// `GET /mode` (§6, §4.7).
async fn get_mode(State(core): State<Arc<NancyCore>>) -> Json<ModeResponse> {
    Json(ModeResponse { mode: core.mode() })
}

#[derive(Debug, Deserialize)]
struct SetModeRequest {
    mode: Mode,
}

/// `POST /mode` (§6, §4.7): unconditional, drain-before-transition switch.
async fn set_mode(State(core): State<Arc<NancyCore>>, Json(body): Json<SetModeRequest>) -> Response {
    match core.set_mode(body.mode).await {
        Ok(()) => Json(ModeResponse { mode: core.mode() }).into_response(),
        Err(e) => error_response(e),
    }
}
