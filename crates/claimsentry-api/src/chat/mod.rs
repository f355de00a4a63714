pub mod handlers;
pub mod requests;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat/message", post(handlers::send_message))
        .route("/chat/execute-code", post(handlers::execute_code))
        .route(
            "/chat/conversation/:conversation_id",
            get(handlers::get_conversation).delete(handlers::delete_conversation),
        )
        .route("/chat/suggestions", get(handlers::suggestions))
}
