use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ReminderBotError, Result};
use crate::interfaces::clock::{Clock, SystemClock};
use crate::interfaces::extraction::{CandidateExtractor, LineExtractor, RawCandidate};
use crate::providers::deliverer_from_config;
use crate::reminders::{format_run_date, ReminderStore};
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::services::engine::{EngineOptions, IngestReport, ReminderEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReminderEngine>,
    pub extractor: Arc<dyn CandidateExtractor>,
    pub token: String,
}

impl AppState {
    pub fn new(engine: Arc<ReminderEngine>, token: impl Into<String>) -> Self {
        Self {
            engine,
            extractor: Arc::new(LineExtractor),
            token: token.into(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    owner_id: String,
    #[serde(default)]
    candidates: Vec<RawCandidate>,
}

#[derive(Deserialize)]
struct IngestTextRequest {
    owner_id: String,
    text: String,
}

#[derive(Serialize)]
struct SkippedResponse {
    subject: String,
    reason: String,
    detail: String,
}

#[derive(Serialize)]
struct IngestResponse {
    scheduled: usize,
    nothing_understood: bool,
    skipped: Vec<SkippedResponse>,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            scheduled: report.scheduled,
            nothing_understood: report.nothing_understood(),
            skipped: report
                .skipped
                .into_iter()
                .map(|skip| SkippedResponse {
                    subject: skip.subject,
                    reason: skip.reason.kind().to_string(),
                    detail: skip.reason.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct OwnerQuery {
    owner_id: String,
}

#[derive(Serialize)]
struct PendingEntry {
    when: String,
    subject: String,
    recurrence: String,
}

#[derive(Serialize)]
struct PendingResponse {
    reminders: Vec<PendingEntry>,
}

#[derive(Deserialize)]
struct ClearRequest {
    owner_id: String,
}

#[derive(Serialize)]
struct ClearResponse {
    cancelled_timers: usize,
    removed_records: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/ingest_text", post(ingest_text))
        .route("/reminders", get(list_reminders))
        .route("/clear", post(clear))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IngestRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    if let Err(err) = require_owner(&payload.owner_id) {
        return err.into_response();
    }

    match state
        .engine
        .ingest_raw(payload.owner_id.trim(), payload.candidates)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(IngestResponse::from(report))).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn ingest_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IngestTextRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    if let Err(err) = require_owner(&payload.owner_id) {
        return err.into_response();
    }

    match state
        .engine
        .ingest_text(payload.owner_id.trim(), &payload.text, state.extractor.as_ref())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(IngestResponse::from(report))).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn list_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    if let Err(err) = require_owner(&query.owner_id) {
        return err.into_response();
    }

    let now = state.engine.now();
    let reminders = state
        .engine
        .list_pending(query.owner_id.trim(), now)
        .await
        .into_iter()
        .map(|pending| PendingEntry {
            when: format_run_date(&pending.when),
            subject: pending.subject,
            recurrence: pending.recurrence.to_string(),
        })
        .collect();
    (StatusCode::OK, Json(PendingResponse { reminders })).into_response()
}

async fn clear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ClearRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    if let Err(err) = require_owner(&payload.owner_id) {
        return err.into_response();
    }

    match state.engine.clear(payload.owner_id.trim()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(ClearResponse {
                cancelled_timers: report.cancelled_timers,
                removed_records: report.removed_records,
            }),
        )
            .into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

type Rejection = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn internal_error(err: ReminderBotError) -> Rejection {
    tracing::error!(error = %err, "request failed");
    reject(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

fn require_owner(owner_id: &str) -> std::result::Result<(), Rejection> {
    if owner_id.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "owner_id is required"));
    }
    Ok(())
}

fn authorize(headers: &HeaderMap, token: &str) -> std::result::Result<(), Rejection> {
    let expected_token = token.trim();
    if expected_token.is_empty() {
        return Err(reject(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("").trim();

    if bearer == expected_token || api_key.trim() == expected_token {
        Ok(())
    } else {
        Err(reject(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

/// Builds the store, scheduler and engine for one process lifetime and
/// rebuilds timers from disk. The returned receiver feeds fired-timer
/// follow-ups and must be handed to [`ReminderEngine::spawn_fired_listener`].
pub async fn start_engine(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<(
    Arc<ReminderEngine>,
    tokio::sync::mpsc::UnboundedReceiver<crate::scheduler::FiredReminder>,
)> {
    let tz = config.timezone()?;
    let store_path = config.store_path();
    let store = Arc::new(ReminderStore::new(&store_path)?);
    let deliverer = deliverer_from_config(config)?;
    tracing::info!(
        store = %store_path,
        timezone = %tz,
        deliverer = deliverer.name(),
        "starting reminder engine"
    );

    let (scheduler, fired_rx) =
        Scheduler::new(deliverer, clock.clone(), SchedulerSettings::from_config(config));
    let engine = Arc::new(ReminderEngine::new(
        store,
        scheduler,
        clock,
        tz,
        EngineOptions::from_config(config),
    ));
    engine.reconcile().await?;
    Ok((engine, fired_rx))
}

pub async fn run(config: &Config) -> Result<()> {
    run_with_shutdown(config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if config.token().trim().is_empty() {
        tracing::warn!("no daemon token configured, every authenticated route will refuse requests");
    }

    let (engine, fired_rx) = start_engine(config, Arc::new(SystemClock)).await?;
    let listener_task = engine.clone().spawn_fired_listener(fired_rx);

    let state = AppState::new(engine.clone(), config.token());
    let app = build_router(state);

    let addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let served = async {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ReminderBotError::Runtime(format!("cannot bind {addr}: {e}")))?;
        tracing::info!(addr = %addr, "reminder daemon listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ReminderBotError::Runtime(e.to_string()))
    }
    .await;

    let cancelled = engine.scheduler().shutdown();
    listener_task.abort();
    tracing::info!(cancelled, "reminder daemon stopped");
    served
}

/// Keeps the daemon alive: every failed lifecycle is logged and restarted
/// after the configured backoff. Timers come back through reconciliation.
pub async fn supervise(config: Config) -> Result<()> {
    let backoff = config.daemon.restart_backoff();
    let mut restarts: u64 = 0;
    loop {
        match run(&config).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                restarts += 1;
                tracing::error!(
                    error = %err,
                    restarts,
                    backoff_secs = backoff.as_secs(),
                    "reminder daemon failed, restarting"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
