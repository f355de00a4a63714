pub mod handlers;
pub mod requests;

use axum::routing::{get, post, put};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claims", get(handlers::list_claims))
        .route("/claims/", get(handlers::list_claims))
        .route("/claims/upload", post(handlers::upload_claim))
        .route("/claims/submit", post(handlers::submit_claim))
        .route(
            "/claims/:claim_id",
            get(handlers::get_claim).delete(handlers::delete_claim),
        )
        .route("/claims/:claim_id/status", put(handlers::update_status))
}
