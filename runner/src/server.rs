//! Thin HTTP surface over the dataset and the baseline documents.

use crate::config::ServerConfig;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tsbs_report_analysis::{
    convert::parse_baseline_csv, query::run_query, BaselineDocument, BaselineError, BaselineKind,
    BaselineStore, FilterRequest, FilterResponse,
};
use tsbs_report_ingest::{FilterOptions, LoadHandle, OptionsCache, ReportLoader};

// the initial load is watched this long after startup gave up waiting
const LATE_LOAD_WAIT: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct ServiceState {
    loader: Arc<ReportLoader>,
    baselines: BaselineStore,
    options: Arc<OptionsCache>,
    table_limit: usize,
    request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
}

#[derive(Debug, Clone)]
pub struct ServiceFailure {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    loaded: bool,
    runs: usize,
    records: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UploadParams {
    // overlay onto the stored document instead of replacing it
    #[serde(default)]
    merge: bool,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message,
            },
        };

        (self.status, Json(payload)).into_response()
    }
}

fn failure(status: StatusCode, code: &'static str, message: impl Into<String>) -> ServiceFailure {
    ServiceFailure {
        status,
        code,
        message: message.into(),
    }
}

fn invalid_json(rejection: &JsonRejection) -> ServiceFailure {
    failure(rejection.status(), "invalid_json", rejection.body_text())
}

fn parse_kind(kind: &str) -> Result<BaselineKind, ServiceFailure> {
    kind.parse()
        .map_err(|e| failure(StatusCode::NOT_FOUND, "unknown_baseline", format!("{e}")))
}

impl ServiceState {
    pub fn new(loader: Arc<ReportLoader>, baselines: BaselineStore, server: &ServerConfig) -> Self {
        Self {
            loader,
            baselines,
            options: Arc::new(OptionsCache::new(server.options_ttl())),
            table_limit: server.table_limit,
            request_timeout: server.request_timeout(),
        }
    }

    /// Run blocking work off the async workers, bounded by the request timeout
    async fn run_blocking<T, F>(&self, code: &'static str, label: &'static str, op: F) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(ServiceState) -> Result<T, ServiceFailure> + Send + 'static,
    {
        let state = self.clone();
        let handle = tokio::task::spawn_blocking(move || op(state));

        let joined = tokio::time::timeout(self.request_timeout, handle)
            .await
            .map_err(|_| {
                warn!("{label} timed out after {} ms", self.request_timeout.as_millis());
                failure(
                    StatusCode::SERVICE_UNAVAILABLE,
                    code,
                    format!("{label} timed out after {} ms", self.request_timeout.as_millis()),
                )
            })?;

        joined.map_err(|e| {
            error!("{label} failed to complete: {e}");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{label} join failure: {e}"),
            )
        })?
    }
}

pub fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/options", get(options))
        .route("/data", post(data))
        .route("/baselines/:kind", get(get_baseline).post(put_baseline))
        .route("/baselines/:kind/upload", post(upload_baseline))
        .with_state(state)
}

/// Listen right away, the initial load keeps filling the store meanwhile
pub async fn serve(
    bind: SocketAddr,
    state: ServiceState,
    load: LoadHandle,
    startup_wait: Duration,
) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Serving on {bind}");

    tokio::task::spawn_blocking(move || watch_initial_load(load, startup_wait));

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

fn watch_initial_load(mut load: LoadHandle, startup_wait: Duration) {
    if let Some(summary) = load.wait(startup_wait) {
        info!(runs = summary.ingested + summary.restored, "Initial load complete");
        return;
    }

    warn!(
        "Initial load still running after {}s, serving partial data",
        startup_wait.as_secs()
    );
    match load.wait(LATE_LOAD_WAIT) {
        Some(summary) => info!(
            runs = summary.ingested + summary.restored,
            elapsed = ?summary.elapsed,
            "Initial load complete"
        ),
        None => error!("Initial load never reported completion"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    info!("Shutting down");
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let store = state.loader.store();

    Json(HealthResponse {
        status: "ok",
        loaded: state.loader.is_loaded(),
        runs: store.run_count(),
        records: store.len(),
    })
}

async fn options(State(state): State<ServiceState>) -> Result<Json<FilterOptions>, ServiceFailure> {
    state
        .run_blocking("options_failed", "options", |state| {
            Ok(state.options.get(state.loader.store()))
        })
        .await
        .map(Json)
}

async fn data(
    State(state): State<ServiceState>,
    payload: Result<Json<FilterRequest>, JsonRejection>,
) -> Result<Json<FilterResponse>, ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| invalid_json(&rejection))?;

    state
        .run_blocking("query_failed", "filter query", move |state| {
            Ok(run_query(
                state.loader.store(),
                &state.baselines,
                &request,
                state.table_limit,
            ))
        })
        .await
        .map(Json)
}

async fn get_baseline(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
) -> Result<Json<BaselineDocument>, ServiceFailure> {
    let kind = parse_kind(&kind)?;

    state
        .run_blocking("baseline_failed", "baseline load", move |state| {
            Ok(state.baselines.load(kind))
        })
        .await
        .map(Json)
}

async fn put_baseline(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
    payload: Result<Json<BaselineDocument>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ServiceFailure> {
    let kind = parse_kind(&kind)?;
    let Json(document) = payload.map_err(|rejection| invalid_json(&rejection))?;

    state
        .run_blocking("save_failed", "baseline save", move |state| {
            state.baselines.try_save(kind, &document).map_err(|e| {
                failure(StatusCode::INTERNAL_SERVER_ERROR, "save_failed", format!("{e}"))
            })?;

            Ok(json!({ "kind": kind.as_str(), "configurations": document.len() }))
        })
        .await
        .map(Json)
}

async fn upload_baseline(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
    Query(params): Query<UploadParams>,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceFailure> {
    let kind = parse_kind(&kind)?;

    state
        .run_blocking("save_failed", "baseline upload", move |state| {
            let document = parse_baseline_csv(&body)
                .map_err(|e| failure(StatusCode::BAD_REQUEST, "invalid_csv", format!("{e}")))?;
            let configurations = document.len();
            let save_failed =
                |e: BaselineError| failure(StatusCode::INTERNAL_SERVER_ERROR, "save_failed", format!("{e}"));

            if params.merge {
                let summary = state.baselines.merge(kind, document).map_err(save_failed)?;

                Ok(json!({
                    "kind": kind.as_str(),
                    "configurations": configurations,
                    "added_configurations": summary.added_configurations,
                    "updated_values": summary.updated_values,
                }))
            } else {
                state.baselines.try_save(kind, &document).map_err(save_failed)?;

                Ok(json!({ "kind": kind.as_str(), "configurations": configurations }))
            }
        })
        .await
        .map(Json)
}
