use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use claimsentry_core::extract::extract_claim;
use claimsentry_core::{Claim, ClaimStatus, ListQuery};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::claims::requests::StatusUpdate;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claim_id: String,
    pub status: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<ExtractedData>,
}

#[derive(Debug, Serialize)]
pub struct ExtractedData {
    #[serde(flatten)]
    pub claim: Claim,
    pub extraction_confidence: f64,
    pub extraction_method: String,
    pub fields_found: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimList {
    pub claims: Vec<Claim>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

fn claim_not_found(claim_id: &str) -> ApiError {
    ApiError::NotFound(format!("claim `{claim_id}` not found"))
}

pub async fn upload_claim(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClaimResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ApiError::BadRequest("uploaded file has no name".into()))?;
        let content = field.bytes().await?;
        let extraction = extract_claim(&filename, &content)?;
        let claim = state.store.insert(extraction.claim).await?;
        info!(
            claim_id = %claim.claim_id,
            %filename,
            fields = extraction.fields_found.len(),
            "claim extracted from upload"
        );
        return Ok(Json(ClaimResponse {
            claim_id: claim.claim_id.clone(),
            status: "extracted",
            message: "Document processed successfully",
            extracted_data: Some(ExtractedData {
                claim,
                extraction_confidence: extraction.extraction_confidence,
                extraction_method: extraction.extraction_method,
                fields_found: extraction.fields_found,
            }),
        }));
    }
    Err(ApiError::BadRequest("multipart field `file` is required".into()))
}

pub async fn submit_claim(
    State(state): State<AppState>,
    Json(mut claim): Json<Claim>,
) -> Result<Json<ClaimResponse>, ApiError> {
    claim.validate()?;
    claim.status = ClaimStatus::Pending;
    claim.risk_level = None;
    let stored = state.store.insert(claim).await?;
    // A resubmitted id replaces the claim, so its old analysis no longer applies.
    if state.detector.forget(&stored.claim_id).await {
        info!(claim_id = %stored.claim_id, "cached analysis dropped for resubmitted claim");
    }
    info!(claim_id = %stored.claim_id, "claim submitted");
    Ok(Json(ClaimResponse {
        claim_id: stored.claim_id,
        status: "submitted",
        message: "Claim submitted successfully",
        extracted_data: None,
    }))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> Result<Json<Claim>, ApiError> {
    let claim = state
        .store
        .get(&claim_id)
        .await?
        .ok_or_else(|| claim_not_found(&claim_id))?;
    Ok(Json(claim))
}

pub async fn list_claims(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ClaimList>, ApiError> {
    query.validate()?;
    let page = state.store.list(&query).await?;
    Ok(Json(ClaimList {
        claims: page.items,
        total: page.total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn delete_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete(&claim_id).await? {
        return Err(claim_not_found(&claim_id));
    }
    state.detector.forget(&claim_id).await;
    info!(%claim_id, "claim deleted");
    Ok(Json(json!({
        "message": "Claim deleted successfully",
        "claim_id": claim_id,
    })))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Claim>, ApiError> {
    let claim = state
        .store
        .update_status(&claim_id, update.status)
        .await?
        .ok_or_else(|| claim_not_found(&claim_id))?;
    info!(%claim_id, status = update.status.as_str(), "claim status updated");
    Ok(Json(claim))
}
