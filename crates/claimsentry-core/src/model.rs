use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::features::ClaimFeatures;
use crate::scoring::round2;

/// Inputs the model reports importance for and explains predictions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFeature {
    ClaimAmount,
    PolicyTenure,
    ProviderRisk,
    ClaimFrequency,
    TreatmentRisk,
    LocationRisk,
}

impl ModelFeature {
    pub const ALL: [ModelFeature; 6] = [
        Self::ClaimAmount,
        Self::PolicyTenure,
        Self::ProviderRisk,
        Self::ClaimFrequency,
        Self::TreatmentRisk,
        Self::LocationRisk,
    ];

    /// Name used in global importance listings.
    pub fn label(self) -> &'static str {
        match self {
            Self::ClaimAmount => "Claim Amount",
            Self::PolicyTenure => "Policy Tenure",
            Self::ProviderRisk => "Provider Risk",
            Self::ClaimFrequency => "Claim Frequency",
            Self::TreatmentRisk => "Treatment Risk",
            Self::LocationRisk => "Location Risk",
        }
    }

    /// Name of the underlying engineered feature, as shown in per-claim explanations.
    pub fn feature_name(self) -> &'static str {
        match self {
            Self::ClaimAmount => "Claim Amount",
            Self::PolicyTenure => "Days Since Policy Inception",
            Self::ProviderRisk => "Provider Risk Score",
            Self::ClaimFrequency => "Claim Frequency",
            Self::TreatmentRisk => "Treatment Code Risk",
            Self::LocationRisk => "Location Risk Score",
        }
    }

    pub fn raw_value(self, features: &ClaimFeatures) -> f64 {
        match self {
            Self::ClaimAmount => features.claim_amount,
            Self::PolicyTenure => features.days_since_policy_inception as f64,
            Self::ProviderRisk => features.provider_risk_score,
            Self::ClaimFrequency => features.claim_frequency as f64,
            Self::TreatmentRisk => bool_value(features.is_high_risk_treatment),
            Self::LocationRisk => features.location_risk_score,
        }
    }

    /// Risk-oriented value in `[0, 1]`; higher always means more suspicious.
    pub fn normalized(self, features: &ClaimFeatures) -> f64 {
        let value = match self {
            Self::ClaimAmount => features.amount_percentile / 100.0,
            Self::PolicyTenure => {
                let days = features.days_since_policy_inception.clamp(0, 365) as f64;
                1.0 - days / 365.0
            }
            Self::ProviderRisk => features.provider_risk_score,
            Self::ClaimFrequency => features.claim_frequency as f64 / 10.0,
            Self::TreatmentRisk => bool_value(features.is_high_risk_treatment),
            Self::LocationRisk => features.location_risk_score,
        };
        value.clamp(0.0, 1.0)
    }
}

fn bool_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: ModelFeature,
    pub name: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature_name: String,
    pub value: f64,
    pub contribution: f64,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    pub fraud_probability: f64,
    pub is_fraud: bool,
    pub confidence: f64,
    pub model_version: String,
    /// Indicators that fired, for models able to name them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<String>,
}

/// A classifier producing the ML component of the risk score.
pub trait FraudModel: Send + Sync {
    fn version(&self) -> &str;

    fn predict(&self, features: &ClaimFeatures) -> MlPrediction;

    /// Global importances, expected to sum to one.
    fn feature_importance(&self) -> Vec<FeatureImportance>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Probability above which a claim is classed as fraud.
    pub threshold: f64,
    pub confidence: f64,
    pub amount_threshold: f64,
    pub early_claim_days: i64,
    pub frequency_threshold: usize,
    pub provider_risk_threshold: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            confidence: 0.75,
            amount_threshold: 100_000.0,
            early_claim_days: 30,
            frequency_threshold: 5,
            provider_risk_threshold: 0.7,
        }
    }
}

/// Indicator-counting model used until a trained classifier is available.
#[derive(Debug, Clone, Default)]
pub struct HeuristicModel {
    config: ModelConfig,
}

impl HeuristicModel {
    pub const VERSION: &'static str = "heuristic_v1";

    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl FraudModel for HeuristicModel {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn predict(&self, features: &ClaimFeatures) -> MlPrediction {
        let config = &self.config;
        let checks = [
            (
                "high_amount",
                features.claim_amount > config.amount_threshold,
            ),
            (
                "early_claim",
                features.days_since_policy_inception < config.early_claim_days,
            ),
            (
                "frequent_claimant",
                features.claim_frequency > config.frequency_threshold,
            ),
            (
                "risky_provider",
                features.provider_risk_score > config.provider_risk_threshold,
            ),
        ];
        let indicators: Vec<String> = checks
            .iter()
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| name.to_string())
            .collect();
        let fraud_probability = indicators.len() as f64 / checks.len() as f64;
        trace!(fraud_probability, ?indicators, "heuristic prediction");
        MlPrediction {
            fraud_probability,
            is_fraud: fraud_probability > config.threshold,
            confidence: config.confidence,
            model_version: Self::VERSION.into(),
            indicators,
        }
    }

    fn feature_importance(&self) -> Vec<FeatureImportance> {
        let weights = [0.25, 0.20, 0.18, 0.15, 0.12, 0.10];
        ModelFeature::ALL
            .into_iter()
            .zip(weights)
            .map(|(feature, importance)| FeatureImportance {
                feature,
                name: feature.label().into(),
                importance,
            })
            .collect()
    }
}

/// Importance-weighted contribution of each model input for one claim, largest first.
pub fn feature_contributions(
    features: &ClaimFeatures,
    model: &dyn FraudModel,
) -> Vec<FeatureContribution> {
    let mut contributions: Vec<FeatureContribution> = model
        .feature_importance()
        .into_iter()
        .map(|entry| FeatureContribution {
            feature_name: entry.feature.feature_name().into(),
            value: round2(entry.feature.raw_value(features)),
            contribution: round2(entry.feature.normalized(features) * entry.importance * 100.0),
            importance: entry.importance,
        })
        .collect();
    contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    contributions
}
