//! Route definitions.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use bidscope_engine::AnalyticsEngine;
use bidscope_ext_memory::InMemoryBidLedger;

use crate::handlers::{self, AppState};

/// Create the API router.
///
/// # Arguments
/// * `engine` - The analytics engine
/// * `ledger` - The bid ledger the engine reads and the bid endpoints write
pub fn create_router(engine: Arc<AnalyticsEngine>, ledger: Arc<InMemoryBidLedger>) -> Router {
    let state = Arc::new(AppState { engine, ledger });

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Bid analytics
        .route("/api/analytics/bids/success-rate/:company_id", get(handlers::get_success_rate))
        .route("/api/analytics/bids/volume/:company_id", get(handlers::get_volume))
        .route("/api/analytics/bids/distribution/:company_id", get(handlers::get_distribution))
        .route("/api/analytics/bids/statistics/:company_id", get(handlers::get_statistics))
        .route("/api/analytics/bids/performance/:company_id", get(handlers::get_performance))
        .route("/api/analytics/bids/trends/:company_id", get(handlers::get_trends))
        .route("/api/analytics/bids/projects/timelines", get(handlers::get_project_timelines))
        .route("/api/analytics/cache/stats", get(handlers::get_cache_stats))
        // Bids
        .route("/api/bids", post(handlers::create_bid))
        .route("/api/bids/:bid_id", get(handlers::get_bid))
        .route("/api/bids/:bid_id/status", put(handlers::update_bid_status))
        // State
        .with_state(state)
}
