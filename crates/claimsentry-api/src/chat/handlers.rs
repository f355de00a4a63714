use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use claimsentry_core::chat::{self, ChatMessage, Intent, Visualization};
use claimsentry_core::dashboard::Dashboard;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::chat::requests::{ChatRequest, SuggestionsQuery};
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
}

fn conversation_not_found() -> ApiError {
    ApiError::NotFound("Conversation not found".into())
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let conversation_id = state.conversations.open(request.conversation_id).await;
    state
        .conversations
        .append(&conversation_id, ChatMessage::user(message))
        .await;

    let dashboard = Dashboard::load(&state.detector).await?;
    let reply = state.assistant.respond(message, &dashboard, Utc::now());
    debug!(%conversation_id, intent = ?reply.intent, "chat reply");
    state
        .conversations
        .append(&conversation_id, ChatMessage::assistant(reply.message.clone()))
        .await;

    Ok(Json(ChatResponse {
        message: reply.message,
        conversation_id,
        intent: reply.intent,
        visualization: reply.visualization,
        suggestions: reply.suggestions,
    }))
}

pub async fn execute_code() -> ApiError {
    ApiError::NotImplemented("Code execution is disabled on this server".into())
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let messages = state
        .conversations
        .get(&conversation_id)
        .await
        .ok_or_else(conversation_not_found)?;
    Ok(Json(Conversation {
        conversation_id,
        messages,
    }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.conversations.delete(&conversation_id).await {
        return Err(conversation_not_found());
    }
    Ok(Json(json!({ "message": "Conversation deleted" })))
}

pub async fn suggestions(Query(query): Query<SuggestionsQuery>) -> Json<Value> {
    Json(json!({ "suggestions": chat::suggestions(&query.query) }))
}
