// Admin HTTP API for quota resolution and management
//
// Listens on the configured bind address (default: 127.0.0.1:8080).
// Exposes /health, /metrics and the /api quota routes.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::quota::{
    AdminContext, GuestDefaultRequest, GuestIdentity, OverrideRequest, PlanAssignmentRequest,
    QuotaError, QuotaLimit, QuotaService, Subject,
};

/// Default number of audit entries returned by /api/admin/actions
const DEFAULT_ACTIONS_LIMIT: usize = 100;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: QuotaService,
}

/// Error body returned by every /api route
#[derive(Debug)]
pub enum ApiError {
    Quota(QuotaError),
    BadRequest(String),
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        ApiError::Quota(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retryable) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone(), false),
            ApiError::Quota(err) => {
                let status = match err {
                    QuotaError::UnknownFeature(_) => StatusCode::NOT_FOUND,
                    QuotaError::InvalidSubject(_)
                    | QuotaError::InvalidAmount(_)
                    | QuotaError::InvalidLimit(_)
                    | QuotaError::InvalidFeature(_)
                    | QuotaError::UnknownPlan(_) => StatusCode::BAD_REQUEST,
                    QuotaError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                    QuotaError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    QuotaError::NoDefaultQuota(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string(), err.is_retryable())
            }
        };

        let body = json!({ "error": message, "retryable": retryable });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_subject(raw: &str) -> ApiResult<Subject> {
    Ok(raw.parse::<Subject>()?)
}

/// Optional JSON body; an empty body yields the default
fn optional_body<T: DeserializeOwned + Default>(bytes: &Bytes) -> ApiResult<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Required JSON body; a `limit` that is not a valid quota limit is an `InvalidLimit`
fn json_body<T: DeserializeOwned>(bytes: &Bytes) -> ApiResult<T> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    if let Some(limit) = value.get("limit") {
        if serde_json::from_value::<QuotaLimit>(limit.clone()).is_err() {
            return Err(QuotaError::InvalidLimit(limit.to_string()).into());
        }
    }

    serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Build the admin router
pub fn router(state: AppState, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/quotas/{subject}", get(list_quotas))
        .route("/api/quotas/{subject}/{feature}", get(get_quota))
        .route("/api/quotas/{subject}/{feature}/consume", post(consume))
        .route("/api/overrides/{subject}", get(list_overrides))
        .route(
            "/api/overrides/{subject}/{feature}",
            put(set_override).delete(remove_override),
        )
        .route("/api/usage/{subject}/{feature}/reset", post(reset_usage))
        .route("/api/guest-quotas", get(list_guest_defaults))
        .route(
            "/api/guest-quotas/{feature}",
            put(set_guest_default).delete(remove_guest_default),
        )
        .route("/api/guests/identify", post(identify_guest))
        .route("/api/plans/assignments/{user_id}", put(assign_plan))
        .route("/api/plans/assignments/{user_id}/{plan}", delete(revoke_plan))
        .route("/api/admin/actions", get(list_actions))
        .route("/api/dashboard", get(dashboard))
        .route("/api/dashboard/{subject}", get(subject_dashboard));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the admin HTTP server and run until Ctrl-C
pub async fn start_admin_server(
    service: QuotaService,
    addr: SocketAddr,
    metrics_enabled: bool,
) -> Result<()> {
    let app = router(AppState { service }, metrics_enabled);

    info!("Starting admin server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind admin server on {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down admin server");
        })
        .await
        .context("Admin server error")?;

    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.service.metrics().gather() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn list_quotas(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let quotas = state.service.resolver().resolve_all(&subject).await?;
    Ok(Json(quotas))
}

async fn get_quota(
    State(state): State<AppState>,
    Path((subject, feature)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let quota = state.service.resolver().resolve(&subject, &feature).await?;
    Ok(Json(quota))
}

#[derive(Debug, Deserialize)]
struct ConsumeBody {
    #[serde(default = "default_amount")]
    amount: u64,
}

impl Default for ConsumeBody {
    fn default() -> Self {
        Self {
            amount: default_amount(),
        }
    }
}

fn default_amount() -> u64 {
    1
}

/// Denials answer 429 with the full consume result
async fn consume(
    State(state): State<AppState>,
    Path((subject, feature)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let ConsumeBody { amount } = optional_body(&body)?;
    let result = state
        .service
        .tracker()
        .try_consume(&subject, &feature, amount)
        .await?;

    let status = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((status, Json(result)))
}

async fn list_overrides(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    Ok(Json(state.service.tracker().list_overrides(&subject).await?))
}

async fn set_override(
    State(state): State<AppState>,
    Path((subject, feature)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let request: OverrideRequest = json_body(&body)?;
    let record = state
        .service
        .tracker()
        .set_override(&subject, &feature, request)
        .await?;
    Ok(Json(record))
}

async fn remove_override(
    State(state): State<AppState>,
    Path((subject, feature)): Path<(String, String)>,
    Query(context): Query<AdminContext>,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let removed = state
        .service
        .tracker()
        .remove_override(&subject, &feature, context)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn reset_usage(
    State(state): State<AppState>,
    Path((subject, feature)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    let context: AdminContext = optional_body(&body)?;
    let previous = state
        .service
        .tracker()
        .reset_usage(&subject, &feature, context)
        .await?;
    Ok(Json(json!({ "previous_usage": previous })))
}

async fn list_guest_defaults(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.tracker().list_guest_defaults().await?))
}

async fn set_guest_default(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: GuestDefaultRequest = json_body(&body)?;
    let quota = state
        .service
        .tracker()
        .set_guest_default(&feature, request)
        .await?;
    Ok(Json(quota))
}

async fn remove_guest_default(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    Query(context): Query<AdminContext>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .service
        .tracker()
        .remove_guest_default(&feature, context)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn identify_guest(body: Bytes) -> ApiResult<impl IntoResponse> {
    let identity: GuestIdentity = json_body(&body)?;
    let subject = identity.subject()?;
    Ok(Json(json!({ "subject": subject })))
}

async fn assign_plan(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: PlanAssignmentRequest = json_body(&body)?;
    let assignment = state.service.tracker().assign_plan(&user_id, request).await?;
    Ok(Json(assignment))
}

async fn revoke_plan(
    State(state): State<AppState>,
    Path((user_id, plan)): Path<(String, String)>,
    Query(context): Query<AdminContext>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .service
        .tracker()
        .revoke_plan(&user_id, &plan, context)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct ActionsQuery {
    limit: Option<usize>,
}

async fn list_actions(
    State(state): State<AppState>,
    Query(query): Query<ActionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIONS_LIMIT);
    Json(state.service.tracker().audit().recent(limit).await)
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.dashboard().build().await?))
}

async fn subject_dashboard(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subject = parse_subject(&subject)?;
    Ok(Json(state.service.dashboard().subject(&subject).await?))
}
