pub mod handlers;
pub mod requests;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard/stats", get(handlers::stats))
        .route("/dashboard/trends", get(handlers::trends))
        .route("/dashboard/providers", get(handlers::providers))
        .route("/dashboard/geographic", get(handlers::geographic))
        .route("/dashboard/recent-alerts", get(handlers::recent_alerts))
        .route("/dashboard/network-graph", get(handlers::network_graph))
}
