//! Read-only HTTP status API.
//!
//! Runs on its own tokio runtime next to the control loop thread and only
//! reads the `LoopStatus` snapshot the loop refreshes after every tick.
//! Pattern selection stays with the remote feed; nothing here writes.

use crate::{CancelSignal, Shutdown};
use crate::control::{LoopState, LoopStatus};
use crate::pattern::Timing;
use crate::registry::PatternRegistry;
use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Loop snapshot (control loop writes, handlers read)
    pub status: Arc<Mutex<LoopStatus>>,
    /// Registered patterns in selection order
    pub patterns: Arc<Vec<PatternInfo>>,
}

impl AppState {
    pub fn new(
        status: Arc<Mutex<LoopStatus>>,
        registry: &PatternRegistry,
        timing: &Timing,
    ) -> Self {
        Self {
            status,
            patterns: Arc::new(PatternInfo::list(registry, timing)),
        }
    }
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_patterns),
    components(schemas(LoopStatus, LoopState, PatternInfo)),
    tags(
        (name = "system", description = "Loop status"),
        (name = "patterns", description = "Pattern catalog"),
    ),
    info(
        title = "LED Strip API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Status of a remotely controlled addressable LED strip"
    )
)]
pub struct ApiDoc;

// ── Response types ───────────────────────────────────────────────────

/// One selectable pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PatternInfo {
    /// Numeric token that selects this pattern
    #[schema(example = 0)]
    pub index: usize,
    /// Name token that selects this pattern
    #[schema(example = "fall")]
    pub name: String,
    /// Phases in one cycle
    #[schema(example = 8)]
    pub phases: u32,
    /// Minimum milliseconds between frames
    #[schema(example = 50)]
    pub min_interval_ms: u64,
}

impl PatternInfo {
    pub fn list(registry: &PatternRegistry, timing: &Timing) -> Vec<Self> {
        registry
            .iter()
            .map(|p| Self {
                index: p.index(),
                name: p.name().to_string(),
                phases: p.cycle_len(),
                min_interval_ms: u64::try_from(timing.min_interval(p.kind().pace()).as_millis())
                    .unwrap_or(u64::MAX),
            })
            .collect()
    }
}

// ── Router ───────────────────────────────────────────────────────────

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(
                    utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
                        .validator_url("none"),
                ),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/patterns", get(get_patterns))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until `shutdown` is triggered.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            while !shutdown.pending() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tracing::info!("Status server shutting down");
        })
        .await
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: what the strip is doing
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current loop status", body = LoopStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<LoopStatus> {
    let status = state
        .status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(status)
}

/// GET /api/v1/patterns: selectable patterns in index order
#[utoipa::path(
    get,
    path = "/api/v1/patterns",
    tag = "patterns",
    responses(
        (status = 200, description = "Registered patterns", body = Vec<PatternInfo>)
    )
)]
async fn get_patterns(State(state): State<AppState>) -> Json<Vec<PatternInfo>> {
    Json(state.patterns.as_ref().clone())
}
