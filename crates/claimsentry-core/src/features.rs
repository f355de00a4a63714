use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::claims::{Claim, ClaimStatus, Location};

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Tunables for feature extraction; all of them can be overridden from settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub high_risk_treatments: Vec<String>,
    pub high_risk_districts: Vec<String>,
    /// Reference mean and standard deviation for the amount z-score.
    pub amount_mean: f64,
    pub amount_std: f64,
    /// Amount at which the percentile feature saturates at 100.
    pub percentile_ceiling: f64,
    /// Prior flagged rate and its weight (in pseudo-claims) for smoothed risk scores.
    pub prior_rate: f64,
    pub prior_weight: f64,
    pub concurrent_window_days: i64,
    /// Floor applied to the location risk of a listed high-risk district.
    pub high_risk_district_floor: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            high_risk_treatments: ["T001", "T045", "T089", "T123", "T456"]
                .into_iter()
                .map(String::from)
                .collect(),
            high_risk_districts: ["Yau Tsim Mong", "Sham Shui Po", "Islands"]
                .into_iter()
                .map(String::from)
                .collect(),
            amount_mean: 30_000.0,
            amount_std: 25_000.0,
            percentile_ceiling: 200_000.0,
            prior_rate: 0.1,
            prior_weight: 5.0,
            concurrent_window_days: 7,
            high_risk_district_floor: 0.75,
        }
    }
}

/// Other stored claims a new claim is compared against.
#[derive(Debug, Clone, Default)]
pub struct ClaimHistory {
    claims: Vec<Claim>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tally {
    total: usize,
    flagged: usize,
}

impl ClaimHistory {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    /// History relative to `claim`, i.e. everything except the claim itself.
    pub fn excluding(claims: &[Claim], claim_id: &str) -> Self {
        Self::new(
            claims
                .iter()
                .filter(|other| other.claim_id != claim_id)
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    fn tally<F>(&self, predicate: F) -> Tally
    where
        F: Fn(&Claim) -> bool,
    {
        self.claims
            .iter()
            .filter(|claim| predicate(claim))
            .fold(Tally::default(), |mut tally, claim| {
                tally.total += 1;
                if is_flagged(claim) {
                    tally.flagged += 1;
                }
                tally
            })
    }

    fn by_claimant<'a>(&'a self, claimant_id: &'a str) -> impl Iterator<Item = &'a Claim> + 'a {
        self.claims
            .iter()
            .filter(move |claim| claim.claimant_id == claimant_id)
    }
}

/// Treated as fraudulent when an analysis or an investigator has said so.
pub fn is_flagged(claim: &Claim) -> bool {
    matches!(claim.status, ClaimStatus::Flagged | ClaimStatus::Rejected)
        || claim.risk_level.is_some_and(|level| level.is_flagged())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimFeatures {
    // basic
    pub claim_amount: f64,
    pub claim_amount_log: f64,
    pub is_round_amount: bool,
    pub has_documents: bool,
    pub document_count: usize,
    // temporal
    /// 0 = Monday.
    pub claim_day_of_week: u32,
    pub is_weekend: bool,
    pub claim_month: u32,
    pub days_since_policy_inception: i64,
    pub within_first_week: bool,
    pub within_first_month: bool,
    pub policy_age_months: f64,
    // provider
    pub provider_total_claims: usize,
    pub provider_fraud_rate: f64,
    pub provider_risk_score: f64,
    // claimant
    pub claim_frequency: usize,
    pub avg_historical_claim_amount: f64,
    pub max_historical_claim_amount: f64,
    pub claim_amount_deviation: f64,
    pub is_first_claim: bool,
    // treatment
    pub is_high_risk_treatment: bool,
    pub treatment_code_frequency: usize,
    pub treatment_avg_amount: f64,
    // location
    pub is_high_risk_location: bool,
    pub location_risk_score: f64,
    pub provider_claimant_distance_km: f64,
    // behavioural
    pub has_rush_submission: bool,
    pub concurrent_claims: usize,
    pub has_broker: bool,
    pub broker_risk_score: f64,
    // statistical
    pub amount_z_score: f64,
    pub amount_percentile: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    #[instrument(name = "extract_features", skip(self, claim, history), fields(claim_id = %claim.claim_id, history = history.len()))]
    pub fn extract(&self, claim: &Claim, history: &ClaimHistory) -> ClaimFeatures {
        let amount = claim.claim_amount;
        let days = claim.days_since_policy_inception();
        let weekday = claim.claim_date.weekday().num_days_from_monday();
        let hour = claim.claim_date.hour();

        let provider = history.tally(|other| other.provider_id == claim.provider_id);
        let provider_fraud_rate = rate(provider);

        let mut past_amounts: Vec<f64> = history
            .by_claimant(&claim.claimant_id)
            .map(|other| other.claim_amount)
            .collect();
        let claim_frequency = past_amounts.len();
        past_amounts.extend(claim.historical_amounts.iter().copied());
        let (avg_hist, max_hist, deviation) = claimant_amount_stats(amount, &past_amounts);

        let treatment_amounts: Vec<f64> = history
            .claims
            .iter()
            .filter(|other| other.treatment_code == claim.treatment_code)
            .map(|other| other.claim_amount)
            .collect();

        let district = claim.district();
        let is_high_risk_location = district.is_some_and(|d| {
            self.config
                .high_risk_districts
                .iter()
                .any(|listed| listed.eq_ignore_ascii_case(d))
        });
        let mut location_risk = match district {
            Some(d) => self.smoothed(history.tally(|other| other.district() == Some(d))),
            None => self.config.prior_rate,
        };
        if is_high_risk_location {
            location_risk = location_risk.max(self.config.high_risk_district_floor);
        }

        let window = self.config.concurrent_window_days;
        let concurrent_claims = history
            .by_claimant(&claim.claimant_id)
            .filter(|other| (other.claim_date - claim.claim_date).num_days().abs() <= window)
            .count();

        let broker_risk_score = match claim.broker_id.as_deref() {
            Some(broker) => {
                self.smoothed(history.tally(|other| other.broker_id.as_deref() == Some(broker)))
            }
            None => 0.0,
        };

        ClaimFeatures {
            claim_amount: amount,
            claim_amount_log: round4(amount.ln_1p()),
            is_round_amount: amount % 1_000.0 == 0.0,
            has_documents: !claim.documents.is_empty(),
            document_count: claim.documents.len(),
            claim_day_of_week: weekday,
            is_weekend: weekday >= 5,
            claim_month: claim.claim_date.month(),
            days_since_policy_inception: days,
            within_first_week: days < 7,
            within_first_month: days < 30,
            policy_age_months: round4(days as f64 / 30.0),
            provider_total_claims: provider.total,
            provider_fraud_rate: round4(provider_fraud_rate),
            provider_risk_score: round4(self.smoothed(provider)),
            claim_frequency,
            avg_historical_claim_amount: round4(avg_hist),
            max_historical_claim_amount: max_hist,
            claim_amount_deviation: round4(deviation),
            is_first_claim: past_amounts.is_empty(),
            is_high_risk_treatment: self
                .config
                .high_risk_treatments
                .iter()
                .any(|code| code.eq_ignore_ascii_case(&claim.treatment_code)),
            treatment_code_frequency: treatment_amounts.len(),
            treatment_avg_amount: round4(mean(&treatment_amounts)),
            is_high_risk_location,
            location_risk_score: round4(location_risk),
            provider_claimant_distance_km: round4(distance_km(
                claim.location.as_ref(),
                claim.provider_location.as_ref(),
            )),
            has_rush_submission: weekday >= 5 || hour >= 22 || hour <= 6,
            concurrent_claims,
            has_broker: claim.broker_id.is_some(),
            broker_risk_score: round4(broker_risk_score),
            amount_z_score: round4(self.z_score(amount)),
            amount_percentile: round4(
                (amount / self.config.percentile_ceiling * 100.0).clamp(0.0, 100.0),
            ),
        }
    }

    /// Flagged rate pulled toward the prior so small samples stay moderate.
    fn smoothed(&self, tally: Tally) -> f64 {
        let FeatureConfig {
            prior_rate,
            prior_weight,
            ..
        } = self.config;
        (tally.flagged as f64 + prior_rate * prior_weight) / (tally.total as f64 + prior_weight)
    }

    fn z_score(&self, amount: f64) -> f64 {
        if self.config.amount_std <= 0.0 {
            return 0.0;
        }
        (amount - self.config.amount_mean) / self.config.amount_std
    }
}

fn rate(tally: Tally) -> f64 {
    if tally.total == 0 {
        0.0
    } else {
        tally.flagged as f64 / tally.total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean, max, and how far `amount` sits from the mean in (std + 1) units.
fn claimant_amount_stats(amount: f64, history: &[f64]) -> (f64, f64, f64) {
    if history.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = mean(history);
    let max = history.iter().copied().fold(f64::MIN, f64::max);
    let variance = history.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / history.len() as f64;
    (avg, max, (amount - avg).abs() / (variance.sqrt() + 1.0))
}

/// Great-circle distance; zero when either side lacks coordinates.
pub fn distance_km(a: Option<&Location>, b: Option<&Location>) -> f64 {
    let (Some((lat1, lon1)), Some((lat2, lon2))) = (
        a.and_then(Location::coordinates),
        b.and_then(Location::coordinates),
    ) else {
        return 0.0;
    };
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
