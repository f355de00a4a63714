use axum::extract::{Path, Query, State};
use axum::Json;
use claimsentry_core::detector::{BatchReport, Explanation};
use claimsentry_core::model::FeatureImportance;
use claimsentry_core::AnalysisResult;

use crate::analysis::requests::{AnalysisRequest, BatchQuery, MAX_BATCH_CLAIMS};
use crate::error::ApiError;
use crate::AppState;

pub async fn analyze_claim(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let result = state
        .detector
        .analyze(&request.claim_id, request.force_reanalysis)
        .await?;
    Ok(Json(result))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> Result<Json<AnalysisResult>, ApiError> {
    Ok(Json(state.detector.result(&claim_id).await?))
}

pub async fn batch_analyze(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<BatchReport>, ApiError> {
    let ids = query.ids();
    if ids.is_empty() {
        return Err(ApiError::BadRequest(
            "claim_ids must list at least one claim id".into(),
        ));
    }
    if ids.len() > MAX_BATCH_CLAIMS {
        return Err(ApiError::BadRequest(format!(
            "claim_ids lists {} claims; at most {MAX_BATCH_CLAIMS} may be analyzed per request",
            ids.len()
        )));
    }
    Ok(Json(state.detector.batch(&ids).await))
}

pub async fn feature_importance(State(state): State<AppState>) -> Json<Vec<FeatureImportance>> {
    Json(state.detector.feature_importance())
}

pub async fn explain(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> Result<Json<Explanation>, ApiError> {
    Ok(Json(state.detector.explain(&claim_id).await?))
}
