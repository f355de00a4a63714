use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::RuleFlag;

/// Upper bound of every score handled by the aggregation layer.
pub const SCORE_MAX: f64 = 100.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const ML_CONFIDENCE_SHARE: f64 = 0.7;
const RULE_CONFIDENCE_BONUS: f64 = 0.3;
const MARGIN_FACTOR: f64 = 0.3;

/// Round to two decimal places, the precision used in every published score.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Thresholds that map numeric scores into qualitative risk levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 25.0,
            high: 50.0,
            critical: 75.0,
        }
    }
}

impl RiskThresholds {
    /// Breakpoints must be finite, strictly increasing and inside `(0, 100]`.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let ordered = [self.medium, self.high, self.critical];
        let valid = ordered.iter().all(|t| t.is_finite() && *t > 0.0 && *t <= SCORE_MAX)
            && self.medium < self.high
            && self.high < self.critical;
        if valid {
            Ok(())
        } else {
            Err(ScoringError::InvalidThresholds {
                medium: self.medium,
                high: self.high,
                critical: self.critical,
            })
        }
    }
}

/// Ordinal classification of an overall risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Map a numeric risk score (0–100) into a risk level.
    pub fn from_score(score: f64) -> Self {
        Self::from_score_with_thresholds(score, &RiskThresholds::default())
    }

    /// Map a numeric risk score using caller-provided thresholds.
    pub fn from_score_with_thresholds(score: f64, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.critical {
            Self::Critical
        } else if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// High and critical claims are considered flagged for investigation.
    pub fn is_flagged(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative weight of each detection method in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub ml: f64,
    pub benford: f64,
    pub rules: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            ml: 0.5,
            benford: 0.25,
            rules: 0.25,
        }
    }
}

impl ComponentWeights {
    /// Each weight must lie in `[0, 1]` and together they must sum to one.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let weights = [self.ml, self.benford, self.rules];
        let in_range = weights
            .iter()
            .all(|w| w.is_finite() && (0.0..=1.0).contains(w));
        let sum: f64 = weights.iter().sum();
        if in_range && (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE {
            Ok(())
        } else {
            Err(ScoringError::InvalidWeights {
                ml: self.ml,
                benford: self.benford,
                rules: self.rules,
            })
        }
    }
}

/// Per-method scores feeding the aggregate, each within `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ComponentScores {
    pub ml_score: f64,
    pub benford_score: f64,
    pub rule_score: f64,
}

impl ComponentScores {
    pub fn new(ml_score: f64, benford_score: f64, rule_score: f64) -> Self {
        Self {
            ml_score,
            benford_score,
            rule_score,
        }
    }

    /// Reject non-finite or out-of-range component scores.
    pub fn validate(&self) -> Result<(), ScoringError> {
        for (component, value) in [
            ("ml_score", self.ml_score),
            ("benford_score", self.benford_score),
            ("rule_score", self.rule_score),
        ] {
            if !value.is_finite() || !(0.0..=SCORE_MAX).contains(&value) {
                return Err(ScoringError::ComponentOutOfRange {
                    component: component.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    fn rounded(&self) -> Self {
        Self {
            ml_score: round2(self.ml_score),
            benford_score: round2(self.benford_score),
            rule_score: round2(self.rule_score),
        }
    }
}

/// Tunable configuration for the aggregation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ComponentWeights,
    #[serde(default)]
    pub thresholds: RiskThresholds,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.weights.validate()?;
        self.thresholds.validate()
    }
}

/// Decision-support score for a single claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub overall_score: f64,
    pub confidence_interval: (f64, f64),
    pub risk_level: RiskLevel,
    pub components: ComponentScores,
}

/// Errors emitted while validating scoring inputs or configuration.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringError {
    #[error("component `{component}` must be a finite value within 0.0..=100.0 (got {value})")]
    ComponentOutOfRange { component: String, value: f64 },
    #[error("component weights must each lie in 0.0..=1.0 and sum to 1.0 (got ml {ml}, benford {benford}, rules {rules})")]
    InvalidWeights { ml: f64, benford: f64, rules: f64 },
    #[error("risk thresholds must be strictly increasing within (0, 100] (got {medium}/{high}/{critical})")]
    InvalidThresholds {
        medium: f64,
        high: f64,
        critical: f64,
    },
}

/// Combine the three component scores into one classified risk score.
///
/// `ml_confidence` is the model's own confidence (clamped to `0..=1`); rule
/// hits tighten the confidence interval because they are deterministic.
pub fn aggregate(
    components: &ComponentScores,
    ml_confidence: f64,
    has_rule_flags: bool,
    config: &ScoringConfig,
) -> Result<RiskScore, ScoringError> {
    config.validate()?;
    components.validate()?;

    let weights = &config.weights;
    let weighted = weights.ml * components.ml_score
        + weights.benford * components.benford_score
        + weights.rules * components.rule_score;
    let overall = round2(weighted.clamp(0.0, SCORE_MAX));

    let ml_confidence = if ml_confidence.is_finite() {
        ml_confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let bonus = if has_rule_flags {
        RULE_CONFIDENCE_BONUS
    } else {
        0.0
    };
    let confidence = (ml_confidence * ML_CONFIDENCE_SHARE + bonus).min(1.0);
    let margin = (1.0 - confidence) * overall * MARGIN_FACTOR;
    let confidence_interval = (
        round2((overall - margin).max(0.0)),
        round2((overall + margin).min(SCORE_MAX)),
    );

    Ok(RiskScore {
        overall_score: overall,
        confidence_interval,
        risk_level: RiskLevel::from_score_with_thresholds(overall, &config.thresholds),
        components: components.rounded(),
    })
}

/// ML component: fraud probability scaled to 0–100.
pub fn ml_component(probability: f64) -> f64 {
    if probability.is_finite() {
        probability.clamp(0.0, 1.0) * SCORE_MAX
    } else {
        0.0
    }
}

/// Benford component: normalized deviation scaled to 0–100 and capped.
pub fn benford_component(deviation: f64) -> f64 {
    if deviation.is_finite() {
        (deviation.max(0.0) * SCORE_MAX).min(SCORE_MAX)
    } else {
        0.0
    }
}

/// Rule component: the most severe triggered rule decides the score.
pub fn rule_component(flags: &[RuleFlag]) -> f64 {
    flags
        .iter()
        .map(|flag| flag.severity.score())
        .fold(0.0, f64::max)
}
