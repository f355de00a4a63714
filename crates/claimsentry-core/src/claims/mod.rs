use std::fmt;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scoring::RiskLevel;

pub mod json_store;

/// Largest page the listing API will return in one response.
pub const MAX_PAGE_SIZE: usize = 100;

/// Lifecycle status of a stored claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    #[default]
    Pending,
    Analyzed,
    Flagged,
    Approved,
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzed => "analyzed",
            Self::Flagged => "flagged",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Status a claim moves to once an analysis has classified it.
    pub fn after_assessment(level: RiskLevel) -> Self {
        if level.is_flagged() {
            Self::Flagged
        } else {
            Self::Analyzed
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a claimant or provider is located.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Location {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Individually billed item on a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    pub amount: f64,
}

/// A health insurance claim as submitted, plus server-managed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub claim_id: String,
    pub policy_number: String,
    pub claimant_name: String,
    pub claimant_id: String,
    pub provider_name: String,
    pub provider_id: String,
    /// Amount claimed in HKD.
    pub claim_amount: f64,
    #[serde(with = "flexible_datetime")]
    pub claim_date: DateTime<Utc>,
    #[serde(with = "flexible_datetime")]
    pub policy_inception_date: DateTime<Utc>,
    pub treatment_code: String,
    pub diagnosis_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment_name: Option<String>,
    #[serde(default)]
    pub hospital_name: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub historical_amounts: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_amounts: Vec<f64>,
    #[serde(default)]
    pub status: ClaimStatus,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default = "Utc::now", with = "flexible_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", with = "flexible_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// Check the invariants every stored claim must satisfy.
    pub fn validate(&self) -> Result<(), ClaimValidationError> {
        let required = [
            ("policy_number", &self.policy_number),
            ("claimant_name", &self.claimant_name),
            ("claimant_id", &self.claimant_id),
            ("provider_name", &self.provider_name),
            ("provider_id", &self.provider_id),
            ("treatment_code", &self.treatment_code),
            ("diagnosis_code", &self.diagnosis_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ClaimValidationError::BlankField {
                    field: field.to_string(),
                });
            }
        }
        if !self.claim_amount.is_finite() || self.claim_amount <= 0.0 {
            return Err(ClaimValidationError::InvalidAmount {
                amount: self.claim_amount,
            });
        }
        Ok(())
    }

    pub fn district(&self) -> Option<&str> {
        self.location
            .as_ref()
            .map(|loc| loc.district.trim())
            .filter(|district| !district.is_empty())
    }

    /// Whole days between policy inception and the claim, floored like a calendar difference.
    pub fn days_since_policy_inception(&self) -> i64 {
        let seconds = (self.claim_date - self.policy_inception_date).num_seconds();
        seconds.div_euclid(86_400)
    }
}

/// Errors raised when a claim or a listing request breaks an invariant.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimValidationError {
    #[error("claim field `{field}` must not be blank")]
    BlankField { field: String },
    #[error("claim amount must be a positive finite number (got {amount})")]
    InvalidAmount { amount: f64 },
    #[error("page must be >= 1 and page_size within 1..={max} (got page {page}, page_size {page_size})")]
    InvalidPage {
        page: usize,
        page_size: usize,
        max: usize,
    },
}

/// Pagination and filtering options for listing claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub status: Option<ClaimStatus>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
            status: None,
            risk_level: None,
        }
    }
}

impl ListQuery {
    pub fn validate(&self) -> Result<(), ClaimValidationError> {
        if self.page == 0 || self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ClaimValidationError::InvalidPage {
                page: self.page,
                page_size: self.page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(())
    }

    pub fn matches(&self, claim: &Claim) -> bool {
        self.status.map_or(true, |status| claim.status == status)
            && self
                .risk_level
                .map_or(true, |level| claim.risk_level == Some(level))
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Abstraction over claim persistence so file-backed and in-memory stores can be swapped.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Store a claim, assigning an id when blank and stamping timestamps.
    async fn insert(&self, claim: Claim) -> AnyResult<Claim>;

    async fn get(&self, claim_id: &str) -> AnyResult<Option<Claim>>;

    /// Filter, sort newest first, and paginate.
    async fn list(&self, query: &ListQuery) -> AnyResult<Page<Claim>>;

    /// Remove a claim, returning whether it existed.
    async fn delete(&self, claim_id: &str) -> AnyResult<bool>;

    async fn update_status(&self, claim_id: &str, status: ClaimStatus)
        -> AnyResult<Option<Claim>>;

    /// Record the outcome of an analysis on the stored claim.
    async fn record_assessment(&self, claim_id: &str, level: RiskLevel) -> AnyResult<bool>;

    /// Snapshot of every stored claim.
    async fn all(&self) -> AnyResult<Vec<Claim>>;
}

/// Accepts RFC 3339 timestamps, naive ISO date-times, and plain dates (all read as UTC).
pub mod flexible_datetime {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("unrecognized date/time `{raw}`")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}
