//! Seeded synthetic claims for demos and load testing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::claims::{Claim, ClaimStatus};
use crate::districts::{self, HONG_KONG_DISTRICTS};
use crate::scoring::round2;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_FRAUD_RATE: f64 = 0.15;

/// Hospitals with the district they sit in.
const HOSPITALS: [(&str, &str); 10] = [
    ("Queen Mary Hospital", "Southern"),
    ("Princess Margaret Hospital", "Tsuen Wan"),
    ("Tuen Mun Hospital", "Tuen Mun"),
    ("Prince of Wales Hospital", "Sha Tin"),
    ("Queen Elizabeth Hospital", "Yau Tsim Mong"),
    ("United Christian Hospital", "Kwun Tong"),
    ("Pamela Youde Nethersole Eastern Hospital", "Eastern"),
    ("Kwong Wah Hospital", "Yau Tsim Mong"),
    ("Caritas Medical Centre", "Sham Shui Po"),
    ("North District Hospital", "North"),
];

/// Code, name and typical HKD range.
const TREATMENTS: [(&str, &str, f64, f64); 10] = [
    ("T001", "General Consultation", 500.0, 2_000.0),
    ("T045", "X-Ray Imaging", 800.0, 3_000.0),
    ("T089", "Blood Test Panel", 600.0, 1_500.0),
    ("T123", "Minor Surgery", 5_000.0, 20_000.0),
    ("T156", "Physiotherapy Session", 400.0, 1_200.0),
    ("T234", "MRI Scan", 5_000.0, 15_000.0),
    ("T345", "Emergency Treatment", 3_000.0, 25_000.0),
    ("T456", "Specialist Consultation", 1_000.0, 3_500.0),
    ("T567", "Dental Procedure", 800.0, 5_000.0),
    ("T678", "Hospitalization (per day)", 2_000.0, 8_000.0),
];

const FIRST_NAMES: [&str; 10] = [
    "Wing", "Ying", "Ming", "Fai", "Kit", "Siu", "Chi", "Wai", "Hei", "Lok",
];
const LAST_NAMES: [&str; 10] = [
    "Chan", "Wong", "Leung", "Lam", "Ng", "Cheung", "Tsang", "Ho", "Yu", "Chow",
];

const WATCHED_PROVIDERS: [&str; 3] = ["PRV0666", "PRV0999", "PRV1000"];
const WATCHED_BROKERS: [&str; 2] = ["BRK-0666", "BRK-0999"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    Upcoding,
    PhantomBilling,
    StagedAccident,
    DuplicateClaim,
    ExaggeratedAmount,
}

const FRAUD_TYPES: [FraudType; 5] = [
    FraudType::Upcoding,
    FraudType::PhantomBilling,
    FraudType::StagedAccident,
    FraudType::DuplicateClaim,
    FraudType::ExaggeratedAmount,
];

/// A generated claim with its ground-truth label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedClaim {
    #[serde(flatten)]
    pub claim: Claim,
    pub is_fraudulent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_type: Option<FraudType>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("fraud rate must be between 0 and 1 (got {0})")]
    InvalidFraudRate(f64),
}

pub struct ClaimGenerator {
    rng: fastrand::Rng,
}

impl Default for ClaimGenerator {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl ClaimGenerator {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// `count` claims of which `floor(count * fraud_rate)` are fraudulent, shuffled.
    pub fn generate(
        &mut self,
        count: usize,
        fraud_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<GeneratedClaim>, GeneratorError> {
        if !(0.0..=1.0).contains(&fraud_rate) {
            return Err(GeneratorError::InvalidFraudRate(fraud_rate));
        }
        let fraudulent = (count as f64 * fraud_rate).floor() as usize;
        let mut claims: Vec<GeneratedClaim> = (0..count)
            .map(|idx| self.claim(idx + 1, idx < fraudulent, now))
            .collect();
        self.rng.shuffle(&mut claims);
        info!(count, fraudulent, "generated synthetic claims");
        Ok(claims)
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.rng.usize(..items.len())]
    }

    fn claim(&mut self, index: usize, is_fraudulent: bool, now: DateTime<Utc>) -> GeneratedClaim {
        let inception = now - Duration::days(i64::from(self.rng.u32(180..=1800)));
        let elapsed = if is_fraudulent {
            self.rng.u32(1..=60)
        } else {
            self.rng.u32(90..=1000)
        };
        let claim_date = (inception + Duration::days(i64::from(elapsed))).min(now);
        let created_at =
            (claim_date + Duration::days(i64::from(self.rng.u32(1..=3)))).min(now);

        let district = *self.pick(&HONG_KONG_DISTRICTS);
        let (treatment_code, treatment_name, min_amount, max_amount) = *self.pick(&TREATMENTS);
        let claim_amount = if is_fraudulent {
            let inflated = max_amount * (0.7 + self.rng.f64() * 0.8);
            (inflated / 1_000.0).round() * 1_000.0
        } else {
            round2(min_amount + self.rng.f64() * (max_amount - min_amount))
        };

        let (hospital, hospital_district) = *self.pick(&HOSPITALS);
        let provider_id = if is_fraudulent {
            self.pick(&WATCHED_PROVIDERS).to_string()
        } else {
            format!("PRV{:04}", self.rng.u32(1..=500))
        };
        let broker_id = match (is_fraudulent, self.rng.u8(0..10)) {
            (true, roll) if roll < 5 => Some(self.pick(&WATCHED_BROKERS).to_string()),
            (false, roll) if roll < 3 => Some(format!("BRK-{:04}", self.rng.u32(1..=500))),
            _ => None,
        };
        let claimant_name = format!(
            "{} {}",
            self.pick(&FIRST_NAMES),
            self.pick(&LAST_NAMES)
        );
        let fraud_type = is_fraudulent.then(|| *self.pick(&FRAUD_TYPES));

        let claim = Claim {
            claim_id: format!("CLM{index:08}"),
            policy_number: format!("POL{}", self.rng.u32(100_000..=999_999)),
            claimant_name,
            claimant_id: format!("HK{}", self.rng.u32(1_000_000..=9_999_999)),
            provider_name: hospital.to_string(),
            provider_id,
            claim_amount,
            claim_date,
            policy_inception_date: inception,
            treatment_code: treatment_code.to_string(),
            diagnosis_code: format!("D{:03}", self.rng.u32(1..=999)),
            treatment_name: Some(treatment_name.to_string()),
            hospital_name: Some(hospital.to_string()),
            location: Some(district.location()),
            provider_location: districts::find(hospital_district).map(|d| d.location()),
            broker_id,
            documents: Vec::new(),
            line_items: Vec::new(),
            historical_amounts: Vec::new(),
            related_amounts: Vec::new(),
            status: ClaimStatus::Pending,
            risk_level: None,
            created_at,
            updated_at: created_at,
        };
        GeneratedClaim {
            claim,
            is_fraudulent,
            fraud_type,
        }
    }
}
