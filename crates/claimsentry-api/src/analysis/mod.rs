pub mod handlers;
pub mod requests;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analysis/analyze", post(handlers::analyze_claim))
        .route("/analysis/results/:claim_id", get(handlers::get_result))
        .route("/analysis/batch-analyze", get(handlers::batch_analyze))
        .route(
            "/analysis/feature-importance",
            get(handlers::feature_importance),
        )
        .route("/analysis/explain/:claim_id", post(handlers::explain))
}
