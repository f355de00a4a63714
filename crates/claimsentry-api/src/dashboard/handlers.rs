use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use claimsentry_core::dashboard::{
    Alert, Dashboard, DashboardStats, GeographicData, Granularity, ProviderSort, ProviderStats,
    TrendPoint,
};
use claimsentry_core::network::NetworkGraph;

use crate::dashboard::requests::{AlertsQuery, NetworkQuery, ProvidersQuery, StatsQuery, TrendsQuery};
use crate::error::ApiError;
use crate::AppState;

async fn snapshot(state: &AppState) -> Result<Dashboard, ApiError> {
    Ok(Dashboard::load(&state.detector).await?)
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DashboardStats>, ApiError> {
    let (start, end) = query.range()?;
    let dashboard = snapshot(&state).await?;
    Ok(Json(dashboard.stats(start, end, Utc::now())?))
}

pub async fn trends(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<Vec<TrendPoint>>, ApiError> {
    let granularity: Granularity = query.granularity.parse()?;
    let dashboard = snapshot(&state).await?;
    Ok(Json(dashboard.trends(query.days, granularity, Utc::now())?))
}

pub async fn providers(
    State(state): State<AppState>,
    Query(query): Query<ProvidersQuery>,
) -> Result<Json<Vec<ProviderStats>>, ApiError> {
    let sort_by: ProviderSort = query.sort_by.parse()?;
    let dashboard = snapshot(&state).await?;
    Ok(Json(dashboard.providers(query.limit, sort_by)?))
}

pub async fn geographic(State(state): State<AppState>) -> Result<Json<Vec<GeographicData>>, ApiError> {
    Ok(Json(snapshot(&state).await?.geographic()))
}

pub async fn recent_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(snapshot(&state).await?.recent_alerts(query.limit)?))
}

pub async fn network_graph(
    State(state): State<AppState>,
    Query(query): Query<NetworkQuery>,
) -> Result<Json<NetworkGraph>, ApiError> {
    let dashboard = snapshot(&state).await?;
    Ok(Json(dashboard.network_graph(query.claim_id.as_deref())?))
}
