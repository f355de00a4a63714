use chrono::{DateTime, NaiveDate, Utc};
use claimsentry_core::claims::flexible_datetime;
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl StatsQuery {
    pub fn range(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ApiError> {
        Ok((
            parse_date("start_date", self.start_date.as_deref())?,
            parse_end_date(self.end_date.as_deref())?,
        ))
    }
}

fn parse_date(param: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => flexible_datetime::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("`{param}` is not a valid date: {raw}"))),
    }
}

/// A bare `YYYY-MM-DD` end date covers the whole of that day.
fn parse_end_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let end_of_day = raw
        .map(str::trim)
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_nano_opt(23, 59, 59, 999_999_999));
    match end_of_day {
        Some(naive) => Ok(Some(naive.and_utc())),
        None => parse_date("end_date", raw),
    }
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

fn default_days() -> u32 {
    30
}

fn default_granularity() -> String {
    "day".into()
}

#[derive(Debug, Deserialize)]
pub struct ProvidersQuery {
    #[serde(default = "default_provider_limit")]
    pub limit: usize,
    #[serde(default = "default_sort")]
    pub sort_by: String,
}

fn default_provider_limit() -> usize {
    20
}

fn default_sort() -> String {
    "flagged_claims".into()
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    pub limit: usize,
}

fn default_alert_limit() -> usize {
    10
}

#[derive(Debug, Default, Deserialize)]
pub struct NetworkQuery {
    pub claim_id: Option<String>,
}
