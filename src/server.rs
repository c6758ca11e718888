//! HTTP surface for activity ingestion and feature windows.
//!
//! Handlers only frame requests; all semantics live in the ingest pipeline
//! and the range scheduler.
//!
//! # Architecture
//!
//! ```text
//! Client ──→ POST /api/activity/events ──→ IngestPipeline ──→ WindowStore
//!                                               │
//!                                               ├──→ Scorer (best effort)
//!                                               └──→ Notifier (user:{id})
//! ```
//!
//! The caller's identity comes from the upstream auth layer as the
//! `x-user-id` header.

use crate::config::Config;
use crate::core::aggregator::FeatureAggregator;
use crate::core::features::FeatureParams;
use crate::core::scheduler::{RangeReport, RangeRequest, RangeScheduler};
use crate::core::FeatureWindow;
use crate::error::AggregationError;
use crate::events::types::Source;
use crate::events::validate::{IncomingTimestamp, Rejection};
use crate::ingest::IngestPipeline;
use crate::notify::{notify_best_effort, BroadcastNotifier, LiveWindowUpdate};
use crate::scorer::{FatigueScore, ScorerClient, ScorerConfig};
use crate::store::{MemoryEventLog, MemoryWindowStore};
use crate::transparency::{create_shared_log_with_persistence, SharedTransparencyLog};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Fatigue scorer endpoint
    pub scorer: ScorerConfig,
    /// Directory for transparency stats
    pub data_path: PathBuf,
    /// Aggregation parameters
    pub params: FeatureParams,
    /// Cap on hours per aggregate request
    pub max_range_hours: i64,
    /// Buffered live updates per user channel
    pub notify_capacity: usize,
}

impl ServerConfig {
    /// Create a new server configuration with default aggregation settings
    pub fn new(port: u16, scorer: ScorerConfig, data_path: PathBuf) -> Self {
        let defaults = Config::default();
        Self {
            port,
            scorer,
            data_path,
            params: defaults.feature_params(),
            max_range_hours: defaults.max_range_hours,
            notify_capacity: defaults.notify_capacity,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.server_port,
            scorer: config.scorer.clone(),
            data_path: config.data_path.clone(),
            params: config.feature_params(),
            max_range_hours: config.max_range_hours,
            notify_capacity: config.notify_capacity,
        }
    }
}

/// Shared server state
pub struct ServerState {
    pipeline: IngestPipeline,
    scorer: Option<ScorerClient>,
    notifier: Arc<BroadcastNotifier>,
    transparency: SharedTransparencyLog,
}

impl ServerState {
    /// Build state over fresh in-memory stores.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let transparency =
            create_shared_log_with_persistence(config.data_path.join("transparency.json"));

        let events = Arc::new(MemoryEventLog::new());
        let aggregator = FeatureAggregator::new(events.clone(), config.params);
        let scheduler = RangeScheduler::new(aggregator, Arc::new(MemoryWindowStore::new()))
            .with_max_hours(config.max_range_hours)
            .with_transparency_log(transparency.clone());
        let pipeline =
            IngestPipeline::new(events, scheduler).with_transparency_log(transparency.clone());

        let scorer = if config.scorer.enabled {
            Some(ScorerClient::new(config.scorer.clone())?)
        } else {
            None
        };

        Ok(Self {
            pipeline,
            scorer,
            notifier: Arc::new(BroadcastNotifier::new(config.notify_capacity)),
            transparency,
        })
    }

    /// Live update channels, for in-process subscribers.
    pub fn notifier(&self) -> Arc<BroadcastNotifier> {
        self.notifier.clone()
    }

    pub fn transparency(&self) -> &SharedTransparencyLog {
        &self.transparency
    }

    async fn score(&self, window: &FeatureWindow) -> Option<FatigueScore> {
        let client = self.scorer.as_ref()?;
        match client.score(&window.features).await {
            Ok(score) => Some(score),
            Err(e) => {
                tracing::warn!(user_id = %window.user_id, "fatigue scoring skipped: {e}");
                self.transparency.record_scoring_failure();
                None
            }
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<AggregationError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: AggregationError) -> Self {
        let code = match &err {
            AggregationError::InvalidInput(_) => "INVALID_INPUT",
            AggregationError::InvalidWindow(_) => "INVALID_WINDOW",
            AggregationError::InvalidRange(_) => "INVALID_RANGE",
            AggregationError::RangeTooLarge { .. } => "RANGE_TOO_LARGE",
            AggregationError::Storage(_) => "STORAGE_ERROR",
        };
        if err.is_client_error() {
            api_error(StatusCode::BAD_REQUEST, code, err.to_string())
        } else {
            tracing::error!("request failed: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, code, "Server error")
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized"))
}

fn parse_source(source: Option<&str>) -> Result<Source, ApiError> {
    match source {
        Some(s) => s
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, "INVALID_SOURCE", e)),
        None => Ok(Source::Unknown),
    }
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Response from the events endpoint
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub window: LiveWindowUpdate,
    pub rejected: Vec<Rejection>,
}

/// POST /api/activity/events
async fn post_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let outcome = state.pipeline.ingest(&user_id, body, Utc::now())?;

    let score = state.score(&outcome.window).await;
    let update = LiveWindowUpdate::new(outcome.window, score);
    notify_best_effort(state.notifier.as_ref(), &update, Some(&state.transparency));

    Ok(Json(IngestResponse {
        success: true,
        message: "Events ingested".to_string(),
        window: update,
        rejected: outcome.rejected,
    }))
}

/// Body of the aggregate endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBody {
    pub from: Option<IncomingTimestamp>,
    pub to: Option<IncomingTimestamp>,
    pub source: Option<String>,
    #[serde(default)]
    pub force_recompute: bool,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: RangeReport,
}

/// POST /api/activity/aggregate
async fn aggregate(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<AggregateBody>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let user_id = user_id(&headers)?;

    let dates = |ts: Option<IncomingTimestamp>| {
        ts.ok_or_else(|| "missing".to_string())
            .and_then(|ts| ts.parse())
            .map_err(|_| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_INPUT",
                    "from and to (valid dates) are required",
                )
            })
    };
    let request = RangeRequest {
        user_id,
        source: parse_source(body.source.as_deref())?,
        from: dates(body.from)?,
        to: dates(body.to)?,
        force_recompute: body.force_recompute,
    };

    let report = state.pipeline.scheduler().backfill(&request)?;
    Ok(Json(AggregateResponse {
        success: true,
        report,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CurrentQuery {
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub success: bool,
    pub window: FeatureWindow,
}

/// GET /api/activity/features/current
async fn current_window(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<CurrentQuery>,
) -> Result<Json<WindowResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let source = parse_source(query.source.as_deref())?;
    let window = state
        .pipeline
        .scheduler()
        .current(&user_id, source, Utc::now())?;
    Ok(Json(WindowResponse {
        success: true,
        window,
    }))
}

/// Build the router over existing state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/activity/events", post(post_events))
        .route("/api/activity/aggregate", post(aggregate))
        .route("/api/activity/features/current", get(current_window))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    serve(state, config.port).await
}

/// Run the HTTP server over caller-provided state.
///
/// Stats are not persisted on shutdown; the caller owns `state` and saves
/// its transparency log when it is done with it.
pub async fn serve(
    state: Arc<ServerState>,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Aggregation server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
