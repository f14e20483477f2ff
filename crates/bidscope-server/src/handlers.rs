//! Request handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;

use bidscope_engine::{AnalyticsEngine, CacheStats, EngineError, MetricResult};
use bidscope_ext_memory::InMemoryBidLedger;
use bidscope_traits::{Bid, BidId, BidStatus, CompanyId, ProjectType, TraitError};

/// Application state.
pub struct AppState {
    /// The analytics engine
    pub engine: Arc<AnalyticsEngine>,
    /// Bid ledger (for bid writes)
    pub ledger: Arc<InMemoryBidLedger>,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check handler.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error response.
#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
    kind: String,
}

/// Handler failure, rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub enum ApiError {
    /// Analytics query failed
    Engine(EngineError),
    /// Ledger write failed
    Ledger(TraitError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<TraitError> for ApiError {
    fn from(e: TraitError) -> Self {
        ApiError::Ledger(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => {
                let status = match e {
                    EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::Unavailable(_) | EngineError::Shutdown => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    EngineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
                    EngineError::ConfigError(_) | EngineError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.kind())
            }
            ApiError::Ledger(e) => match e {
                TraitError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                TraitError::AlreadyExists(_) | TraitError::InvalidTransition(_) => {
                    (StatusCode::CONFLICT, "conflict")
                }
                TraitError::InvalidInput(_) | TraitError::ParseError(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument")
                }
                e if e.is_unavailable() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match self {
            ApiError::Engine(e) => e.to_string(),
            ApiError::Ledger(e) => e.to_string(),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", message);
        }
        (
            status,
            Json(ErrorResponse {
                error: message,
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn metric_response(result: &MetricResult) -> Response {
    (StatusCode::OK, Json(result)).into_response()
}

// =============================================================================
// ANALYTICS
// =============================================================================

/// Query parameters for windowed series.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    /// Window length in months. Defaults to the configured window.
    pub months: Option<i64>,
    /// `month`, `quarter` or `year`. Defaults to `month`.
    pub granularity: Option<String>,
}

/// Query parameters for trends.
#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    /// `month`, `quarter` or `year`. Defaults to `month`.
    pub timeframe: Option<String>,
    /// `project_type` or `amount_band`. Defaults to `project_type`.
    pub group_by: Option<String>,
}

/// Query parameters for project timelines.
#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    /// Project type, or `all`.
    #[serde(rename = "type")]
    pub project_type: Option<String>,
}

/// Success rate per period.
pub async fn get_success_rate(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    let result = state
        .engine
        .get_bid_success_rate(&company_id, query.months, query.granularity.as_deref())
        .await?;
    Ok(metric_response(&result))
}

/// Bid volume per period.
pub async fn get_volume(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    let result = state
        .engine
        .get_bid_volume(&company_id, query.months, query.granularity.as_deref())
        .await?;
    Ok(metric_response(&result))
}

/// Status distribution.
pub async fn get_distribution(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
) -> ApiResult {
    let result = state.engine.get_bid_distribution(&company_id).await?;
    Ok(metric_response(&result))
}

/// Overall statistics.
pub async fn get_statistics(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
) -> ApiResult {
    let result = state.engine.get_bid_statistics(&company_id).await?;
    Ok(metric_response(&result))
}

/// Performance metrics.
pub async fn get_performance(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
) -> ApiResult {
    let result = state.engine.get_performance_metrics(&company_id).await?;
    Ok(metric_response(&result))
}

/// Trends by project type or amount band.
pub async fn get_trends(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<String>,
    Query(query): Query<TrendQuery>,
) -> ApiResult {
    let result = state
        .engine
        .get_bid_trends(
            &company_id,
            query.timeframe.as_deref(),
            query.group_by.as_deref(),
        )
        .await?;
    Ok(metric_response(&result))
}

/// Response-time timelines across all companies.
pub async fn get_project_timelines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult {
    let result = state
        .engine
        .get_project_timelines(query.project_type.as_deref())
        .await?;
    Ok(metric_response(&result))
}

/// Aggregation cache counters.
pub async fn get_cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.engine.cache_stats())
}

// =============================================================================
// BIDS
// =============================================================================

/// Request to record a new bid.
#[derive(Debug, Deserialize)]
pub struct CreateBidRequest {
    /// Bid identifier
    pub id: String,
    /// Owning company
    pub company_id: String,
    /// Project category
    pub project_type: String,
    /// Bid amount
    pub amount: Decimal,
    /// Submission time. Defaults to now.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Request to change a bid's status.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    /// New status (`PENDING`, `WON`/`ACCEPTED`, `LOST`/`REJECTED`, `WITHDRAWN`)
    pub status: String,
    /// Time of the change. Defaults to now.
    pub at: Option<DateTime<Utc>>,
}

/// Record a new bid.
pub async fn create_bid(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBidRequest>,
) -> ApiResult {
    let bid = Bid::submitted(
        request.id,
        CompanyId::new(request.company_id),
        ProjectType::parse(&request.project_type)?,
        request.amount,
        request.submitted_at.unwrap_or_else(Utc::now),
    );
    let bid = state.ledger.record(bid)?;

    // Read-your-writes for this client; the listener covers other writers
    state.engine.invalidate(&bid.company_id);
    Ok((StatusCode::CREATED, Json(bid)).into_response())
}

/// Get a bid by ID.
pub async fn get_bid(State(state): State<Arc<AppState>>, Path(bid_id): Path<String>) -> ApiResult {
    let bid = state
        .ledger
        .get(&BidId::new(&bid_id))
        .ok_or_else(|| TraitError::NotFound(format!("bid {}", bid_id)))?;
    Ok((StatusCode::OK, Json(bid)).into_response())
}

/// Change a bid's status.
pub async fn update_bid_status(
    State(state): State<Arc<AppState>>,
    Path(bid_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> ApiResult {
    let status: BidStatus = request.status.parse()?;
    let bid = state.ledger.update_status(
        &BidId::new(bid_id),
        status,
        request.at.unwrap_or_else(Utc::now),
    )?;

    state.engine.invalidate(&bid.company_id);
    Ok((StatusCode::OK, Json(bid)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EngineError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::DeadlineExceeded(10), StatusCode::GATEWAY_TIMEOUT),
            (EngineError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::ConfigError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, _) = ApiError::from(err).status_and_kind();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_ledger_error_status_mapping() {
        let (status, kind) = ApiError::from(TraitError::AlreadyExists("b".into())).status_and_kind();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(kind, "conflict");

        let (status, _) =
            ApiError::from(TraitError::ConnectionFailed("down".into())).status_and_kind();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
