use std::{collections::HashMap, fmt, str::FromStr};

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::claims::Claim;
use crate::detector::{AnalysisResult, FraudDetector};
use crate::districts::HONG_KONG_DISTRICTS;
use crate::features::is_flagged;
use crate::network::{self, NetworkGraph};
use crate::scoring::{round2, RiskLevel};

pub const DEFAULT_STATS_WINDOW_DAYS: i64 = 30;
pub const MAX_TREND_DAYS: u32 = 365;
pub const MAX_PROVIDERS: usize = 100;
pub const MAX_ALERTS: usize = 50;
const OVERVIEW_NODES: usize = 30;
const BENFORD_ALERT: &str = "BENFORD_ANOMALY";

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardError {
    #[error("`{param}` must be within {min}..={max} (got {value})")]
    OutOfRange {
        param: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown granularity `{0}` (expected day, week or month)")]
    InvalidGranularity(String),
    #[error("unknown sort key `{0}` (expected flagged_claims, avg_risk_score or total_amount)")]
    InvalidSortKey(String),
    #[error("start_date must not be after end_date")]
    InvalidDateRange,
    #[error("claim `{0}` not found")]
    ClaimNotFound(String),
}

fn check_range(param: &str, value: i64, min: i64, max: i64) -> Result<(), DashboardError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(DashboardError::OutOfRange {
            param: param.into(),
            value,
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
}

impl FromStr for Granularity {
    type Err = DashboardError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(DashboardError::InvalidGranularity(raw.into())),
        }
    }
}

impl Granularity {
    fn bucket(self, date: NaiveDate) -> String {
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.format("%Y-%m-%d").to_string()
            }
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSort {
    #[default]
    FlaggedClaims,
    AvgRiskScore,
    TotalAmount,
}

impl FromStr for ProviderSort {
    type Err = DashboardError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "flagged_claims" => Ok(Self::FlaggedClaims),
            "avg_risk_score" => Ok(Self::AvgRiskScore),
            "total_amount" => Ok(Self::TotalAmount),
            _ => Err(DashboardError::InvalidSortKey(raw.into())),
        }
    }
}

impl fmt::Display for ProviderSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FlaggedClaims => "flagged_claims",
            Self::AvgRiskScore => "avg_risk_score",
            Self::TotalAmount => "total_amount",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_claims: usize,
    pub flagged_claims: usize,
    pub analyzed_claims: usize,
    pub total_amount: f64,
    pub flagged_amount: f64,
    /// Flagged share of all claims in the window, in percent.
    pub detection_rate: f64,
    pub avg_risk_score: f64,
    pub critical_risk_count: usize,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub claims_count: usize,
    pub fraud_count: usize,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider_id: String,
    pub provider_name: String,
    pub total_claims: usize,
    pub flagged_claims: usize,
    pub avg_risk_score: f64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicData {
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub claims_count: usize,
    pub fraud_count: usize,
    pub avg_risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub claim_id: String,
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub flagged_rules: Vec<String>,
}

/// Point-in-time view over stored claims and their analyses.
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    claims: Vec<Claim>,
    analyses: HashMap<String, AnalysisResult>,
}

impl Dashboard {
    pub fn new(claims: Vec<Claim>, analyses: Vec<AnalysisResult>) -> Self {
        Self {
            claims,
            analyses: analyses
                .into_iter()
                .map(|result| (result.claim_id.clone(), result))
                .collect(),
        }
    }

    pub async fn load(detector: &FraudDetector) -> Result<Self> {
        let claims = detector.store().all().await?;
        Ok(Self::new(claims, detector.analyses().await))
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn analysis(&self, claim_id: &str) -> Option<&AnalysisResult> {
        self.analyses.get(claim_id)
    }

    fn score_of(&self, claim_id: &str) -> Option<f64> {
        self.analyses
            .get(claim_id)
            .map(|result| result.risk_score.overall_score)
    }

    fn avg_score<'a>(&self, claims: impl Iterator<Item = &'a Claim>) -> f64 {
        let scores: Vec<f64> = claims.filter_map(|c| self.score_of(&c.claim_id)).collect();
        if scores.is_empty() {
            0.0
        } else {
            round2(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Headline figures for claims created in `[start, end]`; defaults to the last 30 days.
    pub fn stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DashboardStats, DashboardError> {
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_STATS_WINDOW_DAYS));
        if start > end {
            return Err(DashboardError::InvalidDateRange);
        }
        let window: Vec<&Claim> = self
            .claims
            .iter()
            .filter(|c| c.created_at >= start && c.created_at <= end)
            .collect();
        let flagged: Vec<&&Claim> = window.iter().filter(|c| is_flagged(c)).collect();
        let count_level = |level: RiskLevel| {
            window
                .iter()
                .filter(|c| c.risk_level == Some(level))
                .count()
        };
        let total = window.len();
        Ok(DashboardStats {
            total_claims: total,
            flagged_claims: flagged.len(),
            analyzed_claims: window
                .iter()
                .filter(|c| self.analyses.contains_key(&c.claim_id))
                .count(),
            total_amount: round2(window.iter().map(|c| c.claim_amount).sum()),
            flagged_amount: round2(flagged.iter().map(|c| c.claim_amount).sum()),
            detection_rate: if total == 0 {
                0.0
            } else {
                round2(flagged.len() as f64 / total as f64 * 100.0)
            },
            avg_risk_score: self.avg_score(window.iter().copied()),
            critical_risk_count: count_level(RiskLevel::Critical),
            high_risk_count: count_level(RiskLevel::High),
            medium_risk_count: count_level(RiskLevel::Medium),
            low_risk_count: count_level(RiskLevel::Low),
        })
    }

    /// Per-bucket counts over the last `days` days, oldest first, empty buckets included.
    pub fn trends(
        &self,
        days: u32,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendPoint>, DashboardError> {
        check_range("days", i64::from(days), 1, i64::from(MAX_TREND_DAYS))?;
        let today = now.date_naive();
        let first = today - Duration::days(i64::from(days) - 1);

        let mut points: Vec<TrendPoint> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut day = first;
        while day <= today {
            let key = granularity.bucket(day);
            if !index.contains_key(&key) {
                index.insert(key.clone(), points.len());
                points.push(TrendPoint {
                    date: key,
                    claims_count: 0,
                    fraud_count: 0,
                    total_amount: 0.0,
                });
            }
            day += Duration::days(1);
        }

        for claim in &self.claims {
            let date = claim.created_at.date_naive();
            if date < first || date > today {
                continue;
            }
            if let Some(point) = index
                .get(&granularity.bucket(date))
                .and_then(|idx| points.get_mut(*idx))
            {
                point.claims_count += 1;
                point.total_amount += claim.claim_amount;
                if is_flagged(claim) {
                    point.fraud_count += 1;
                }
            }
        }
        for point in &mut points {
            point.total_amount = round2(point.total_amount);
        }
        Ok(points)
    }

    pub fn providers(
        &self,
        limit: usize,
        sort_by: ProviderSort,
    ) -> Result<Vec<ProviderStats>, DashboardError> {
        check_range("limit", limit as i64, 1, MAX_PROVIDERS as i64)?;
        let mut grouped: HashMap<&str, Vec<&Claim>> = HashMap::new();
        for claim in &self.claims {
            grouped
                .entry(claim.provider_id.as_str())
                .or_default()
                .push(claim);
        }
        let mut stats: Vec<ProviderStats> = grouped
            .into_iter()
            .map(|(provider_id, claims)| ProviderStats {
                provider_id: provider_id.to_string(),
                provider_name: claims
                    .first()
                    .map(|c| c.provider_name.clone())
                    .unwrap_or_default(),
                total_claims: claims.len(),
                flagged_claims: claims.iter().filter(|c| is_flagged(c)).count(),
                avg_risk_score: self.avg_score(claims.iter().copied()),
                total_amount: round2(claims.iter().map(|c| c.claim_amount).sum()),
            })
            .collect();
        stats.sort_by(|a, b| {
            let primary = match sort_by {
                ProviderSort::FlaggedClaims => b.flagged_claims.cmp(&a.flagged_claims),
                ProviderSort::AvgRiskScore => b.avg_risk_score.total_cmp(&a.avg_risk_score),
                ProviderSort::TotalAmount => b.total_amount.total_cmp(&a.total_amount),
            };
            primary.then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        stats.truncate(limit);
        Ok(stats)
    }

    pub fn geographic(&self) -> Vec<GeographicData> {
        HONG_KONG_DISTRICTS
            .iter()
            .map(|district| {
                let claims: Vec<&Claim> = self
                    .claims
                    .iter()
                    .filter(|c| {
                        c.district()
                            .is_some_and(|d| d.eq_ignore_ascii_case(district.name))
                    })
                    .collect();
                GeographicData {
                    region: district.name.to_string(),
                    latitude: district.latitude,
                    longitude: district.longitude,
                    claims_count: claims.len(),
                    fraud_count: claims.iter().filter(|c| is_flagged(c)).count(),
                    avg_risk_score: self.avg_score(claims.iter().copied()),
                }
            })
            .collect()
    }

    /// High and critical analyses, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, DashboardError> {
        check_range("limit", limit as i64, 1, MAX_ALERTS as i64)?;
        let mut flagged: Vec<&AnalysisResult> = self
            .analyses
            .values()
            .filter(|result| result.risk_score.risk_level.is_flagged())
            .collect();
        flagged.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.claim_id.cmp(&b.claim_id))
        });
        Ok(flagged
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, result)| {
                let mut flagged_rules: Vec<String> = result
                    .rule_based_flags
                    .iter()
                    .map(|flag| flag.rule_id.clone())
                    .collect();
                if result.benford_analysis.is_anomalous {
                    flagged_rules.push(BENFORD_ALERT.to_string());
                }
                Alert {
                    alert_id: format!("ALT{:05}", idx + 1),
                    claim_id: result.claim_id.clone(),
                    timestamp: result.timestamp,
                    risk_score: result.risk_score.overall_score,
                    risk_level: result.risk_score.risk_level,
                    reason: alert_reason(result, flagged_rules.len()),
                    flagged_rules,
                }
            })
            .collect())
    }

    /// Entity graph around one claim, or the flagged-claim network when no claim is given.
    pub fn network_graph(&self, claim_id: Option<&str>) -> Result<NetworkGraph, DashboardError> {
        match claim_id {
            Some(id) => {
                let claim = self
                    .claims
                    .iter()
                    .find(|c| c.claim_id == id)
                    .ok_or_else(|| DashboardError::ClaimNotFound(id.to_string()))?;
                Ok(network::claim_graph(claim, &self.claims, self.score_of(id)))
            }
            None => Ok(network::overview_graph(&self.claims, OVERVIEW_NODES)),
        }
    }
}

fn alert_reason(result: &AnalysisResult, indicators: usize) -> String {
    match (indicators, result.rule_based_flags.first()) {
        (0, _) => "Model indicates elevated fraud probability".to_string(),
        (1, Some(flag)) => flag.description.clone(),
        (1, None) => "Amount distribution deviates from Benford's Law".to_string(),
        _ => "Multiple suspicious indicators detected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::test_support::sample_claim;
    use crate::claims::{ClaimStatus, Location};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    fn claim(id: &str, provider: &str, amount: f64, days_ago: i64, level: Option<RiskLevel>) -> Claim {
        let mut claim = sample_claim(id);
        claim.provider_id = provider.into();
        claim.provider_name = format!("Provider {provider}");
        claim.claim_amount = amount;
        claim.created_at = now() - Duration::days(days_ago);
        claim.risk_level = level;
        if let Some(level) = level {
            claim.status = ClaimStatus::after_assessment(level);
        }
        claim
    }

    fn dashboard() -> Dashboard {
        Dashboard::new(
            vec![
                claim("A", "PRV1", 1_000.0, 1, Some(RiskLevel::Low)),
                claim("B", "PRV1", 2_000.0, 2, Some(RiskLevel::Critical)),
                claim("C", "PRV2", 5_000.0, 10, Some(RiskLevel::High)),
                claim("D", "PRV3", 700.0, 45, None),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn stats_default_to_last_thirty_days() {
        let stats = dashboard().stats(None, None, now()).unwrap();
        assert_eq!(stats.total_claims, 3);
        assert_eq!(stats.flagged_claims, 2);
        assert_eq!(stats.total_amount, 8_000.0);
        assert_eq!(stats.flagged_amount, 7_000.0);
        assert_eq!(stats.detection_rate, 66.67);
        assert_eq!(stats.critical_risk_count, 1);
        assert_eq!(stats.high_risk_count, 1);
        assert_eq!(stats.low_risk_count, 1);
        assert_eq!(stats.avg_risk_score, 0.0);

        let all = dashboard()
            .stats(Some(now() - Duration::days(100)), None, now())
            .unwrap();
        assert_eq!(all.total_claims, 4);
        assert!(matches!(
            dashboard().stats(Some(now()), Some(now() - Duration::days(1)), now()),
            Err(DashboardError::InvalidDateRange)
        ));
    }

    #[test]
    fn trends_fill_empty_days() {
        let points = dashboard().trends(3, Granularity::Day, now()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, "2024-03-18");
        assert_eq!(points[0].claims_count, 1);
        assert_eq!(points[0].fraud_count, 1);
        assert_eq!(points[1].claims_count, 1);
        assert_eq!(points[2].date, "2024-03-20");
        assert_eq!(points[2].claims_count, 0);
    }

    #[test]
    fn trends_bucket_by_week_and_month() {
        let weeks = dashboard().trends(14, Granularity::Week, now()).unwrap();
        // 2024-03-07 (Thu) .. 2024-03-20 (Wed) spans three Monday-started weeks.
        let dates: Vec<&str> = weeks.iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-03-04", "2024-03-11", "2024-03-18"]);
        // Claim C lands on Sunday 2024-03-10.
        assert_eq!(weeks[0].claims_count, 1);
        assert_eq!(weeks[1].claims_count, 0);
        assert_eq!(weeks[2].claims_count, 2);

        let months = dashboard().trends(60, Granularity::Month, now()).unwrap();
        assert_eq!(months.last().unwrap().date, "2024-03");
        assert_eq!(months.iter().map(|p| p.claims_count).sum::<usize>(), 4);
        assert!(dashboard().trends(0, Granularity::Day, now()).is_err());
        assert!(dashboard().trends(366, Granularity::Day, now()).is_err());
        assert_eq!("Week".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("hour".parse::<Granularity>().is_err());
    }

    #[test]
    fn providers_sorted_by_requested_key() {
        let by_flagged = dashboard().providers(10, ProviderSort::FlaggedClaims).unwrap();
        assert_eq!(by_flagged[0].provider_id, "PRV1");
        assert_eq!(by_flagged[0].total_claims, 2);
        assert_eq!(by_flagged[0].provider_name, "Provider PRV1");
        let by_amount = dashboard().providers(2, ProviderSort::TotalAmount).unwrap();
        assert_eq!(by_amount.len(), 2);
        assert_eq!(by_amount[0].provider_id, "PRV2");
        assert!(dashboard().providers(0, ProviderSort::TotalAmount).is_err());
        assert!("risk".parse::<ProviderSort>().is_err());
    }

    #[test]
    fn geographic_covers_every_district() {
        let mut dash = dashboard();
        dash.claims[0].location = Some(Location {
            district: "islands".into(),
            latitude: None,
            longitude: None,
        });
        let geo = dash.geographic();
        assert_eq!(geo.len(), 17);
        let southern = geo.iter().find(|g| g.region == "Southern").unwrap();
        assert_eq!(southern.claims_count, 3);
        assert_eq!(southern.fraud_count, 2);
        let islands = geo.iter().find(|g| g.region == "Islands").unwrap();
        assert_eq!(islands.claims_count, 1);
    }

    #[test]
    fn network_graph_requires_known_claim() {
        let dash = dashboard();
        assert!(matches!(
            dash.network_graph(Some("missing")),
            Err(DashboardError::ClaimNotFound(_))
        ));
        let graph = dash.network_graph(Some("A")).unwrap();
        assert_eq!(graph.nodes[0].id, "A");
        let overview = dash.network_graph(None).unwrap();
        assert!(overview.nodes.iter().any(|n| n.id == "provider:PRV1"));
    }
}
