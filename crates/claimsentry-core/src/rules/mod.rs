use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::claims::Claim;

pub mod engine;
pub mod file_repository;

/// How serious a triggered rule is; drives the rule component of the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of a single flag of this severity (0–100).
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 25.0,
            Self::Medium => 50.0,
            Self::High => 75.0,
            Self::Critical => 100.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Text fields of a claim that pattern and keyword rules can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimField {
    PolicyNumber,
    ClaimantId,
    ProviderId,
    ProviderName,
    TreatmentCode,
    DiagnosisCode,
    HospitalName,
    District,
    BrokerId,
}

impl ClaimField {
    pub fn value<'a>(&self, claim: &'a Claim) -> Option<&'a str> {
        match self {
            Self::PolicyNumber => Some(claim.policy_number.as_str()),
            Self::ClaimantId => Some(claim.claimant_id.as_str()),
            Self::ProviderId => Some(claim.provider_id.as_str()),
            Self::ProviderName => Some(claim.provider_name.as_str()),
            Self::TreatmentCode => Some(claim.treatment_code.as_str()),
            Self::DiagnosisCode => Some(claim.diagnosis_code.as_str()),
            Self::HospitalName => claim.hospital_name.as_deref(),
            Self::District => claim.district(),
            Self::BrokerId => claim.broker_id.as_deref(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_string())).ok()
    }
}

/// Declarative trigger evaluated against a single claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Claim amount strictly greater than `threshold` (HKD).
    AmountAbove { threshold: f64 },
    /// Claim filed fewer than `days` days after policy inception.
    PolicyAgeBelow { days: i64 },
    /// Claim dated on a Saturday or Sunday.
    WeekendSubmission,
    /// Amount is an exact multiple of `multiple` and strictly above `minimum`.
    RoundAmount { multiple: f64, minimum: f64 },
    /// Regular expression matched against a claim field.
    FieldPattern { field: ClaimField, pattern: String },
    /// Any keyword (case-insensitive) found in a claim field.
    FieldKeywords {
        field: ClaimField,
        keywords: Vec<String>,
    },
}

impl RuleCondition {
    /// Numeric threshold reported alongside a flag, when the condition has one.
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::AmountAbove { threshold } => Some(*threshold),
            Self::PolicyAgeBelow { days } => Some(*days as f64),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmountAbove { .. } => "amount_above",
            Self::PolicyAgeBelow { .. } => "policy_age_below",
            Self::WeekendSubmission => "weekend_submission",
            Self::RoundAmount { .. } => "round_amount",
            Self::FieldPattern { .. } => "field_pattern",
            Self::FieldKeywords { .. } => "field_keywords",
        }
    }
}

/// Definition of a single fraud rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier (e.g. `RULE_001`).
    pub id: String,
    /// Short human-readable name shown in reports.
    pub name: String,
    pub severity: Severity,
    /// Explanation used when a flag has no computed description.
    pub description: String,
    pub condition: RuleCondition,
}

impl Rule {
    /// Construct a new rule, validating invariants before returning.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        condition: RuleCondition,
    ) -> Result<Self, RuleValidationError> {
        let rule = Self {
            id: id.into(),
            name: name.into(),
            severity,
            description: description.into(),
            condition,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Validate invariants for existing rule definitions.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.id.trim().is_empty() {
            return Err(RuleValidationError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::EmptyName {
                rule_id: self.id.clone(),
            });
        }
        match &self.condition {
            RuleCondition::AmountAbove { threshold } => {
                if !threshold.is_finite() || *threshold <= 0.0 {
                    return Err(RuleValidationError::InvalidThreshold {
                        rule_id: self.id.clone(),
                        value: *threshold,
                    });
                }
            }
            RuleCondition::PolicyAgeBelow { days } => {
                if *days <= 0 {
                    return Err(RuleValidationError::InvalidThreshold {
                        rule_id: self.id.clone(),
                        value: *days as f64,
                    });
                }
            }
            RuleCondition::RoundAmount { multiple, minimum } => {
                if !multiple.is_finite() || *multiple <= 0.0 {
                    return Err(RuleValidationError::InvalidThreshold {
                        rule_id: self.id.clone(),
                        value: *multiple,
                    });
                }
                if !minimum.is_finite() || *minimum < 0.0 {
                    return Err(RuleValidationError::InvalidThreshold {
                        rule_id: self.id.clone(),
                        value: *minimum,
                    });
                }
            }
            RuleCondition::FieldPattern { pattern, .. } => {
                if pattern.is_empty() {
                    return Err(RuleValidationError::EmptyPattern {
                        rule_id: self.id.clone(),
                    });
                }
            }
            RuleCondition::FieldKeywords { keywords, .. } => {
                if keywords.iter().all(|k| k.trim().is_empty()) {
                    return Err(RuleValidationError::EmptyKeywords {
                        rule_id: self.id.clone(),
                    });
                }
            }
            RuleCondition::WeekendSubmission => {}
        }
        Ok(())
    }
}

/// Errors emitted while validating rule definitions.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleValidationError {
    #[error("rule id must not be blank")]
    EmptyId,
    #[error("rule `{rule_id}` name must not be blank")]
    EmptyName { rule_id: String },
    #[error("rule `{rule_id}` has an invalid threshold ({value})")]
    InvalidThreshold { rule_id: String, value: f64 },
    #[error("rule `{rule_id}` pattern must not be empty")]
    EmptyPattern { rule_id: String },
    #[error("rule `{rule_id}` needs at least one keyword")]
    EmptyKeywords { rule_id: String },
}

/// A rule that fired for a particular claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFlag {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub description: String,
    pub threshold: Option<f64>,
}

/// Abstraction over rule loading so different backends (files, in-memory) can be swapped transparently.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Retrieve the full rule set currently active.
    async fn load_rules(&self) -> AnyResult<Vec<Rule>>;

    /// Fetch a single rule by identifier if it exists.
    async fn get_rule(&self, rule_id: &str) -> AnyResult<Option<Rule>>;
}

/// Fixed, in-memory rule set.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleRepository {
    rules: Vec<Rule>,
}

impl StaticRuleRepository {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The five checks every deployment starts from.
    pub fn builtin() -> Self {
        let rules = vec![
            Rule {
                id: "RULE_001".into(),
                name: "High Claim Amount".into(),
                severity: Severity::Medium,
                description: "Claim amount exceeds threshold".into(),
                condition: RuleCondition::AmountAbove {
                    threshold: 200_000.0,
                },
            },
            Rule {
                id: "RULE_002".into(),
                name: "Early Claim Submission".into(),
                severity: Severity::High,
                description: "Claim submitted shortly after policy inception".into(),
                condition: RuleCondition::PolicyAgeBelow { days: 30 },
            },
            Rule {
                id: "RULE_003".into(),
                name: "Weekend Submission".into(),
                severity: Severity::Low,
                description: "Claim submitted on weekend".into(),
                condition: RuleCondition::WeekendSubmission,
            },
            Rule {
                id: "RULE_004".into(),
                name: "Round Number Amount".into(),
                severity: Severity::Low,
                description: "Claim amount is a round number, may indicate estimation".into(),
                condition: RuleCondition::RoundAmount {
                    multiple: 1_000.0,
                    minimum: 10_000.0,
                },
            },
            Rule {
                id: "RULE_005".into(),
                name: "High-Risk Provider".into(),
                severity: Severity::Critical,
                description: "Provider has history of fraudulent claims".into(),
                condition: RuleCondition::FieldPattern {
                    field: ClaimField::ProviderId,
                    pattern: "(666|999|000)$".into(),
                },
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl RuleRepository for StaticRuleRepository {
    async fn load_rules(&self) -> AnyResult<Vec<Rule>> {
        Ok(self.rules.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> AnyResult<Option<Rule>> {
        Ok(self.rules.iter().find(|rule| rule.id == rule_id).cloned())
    }
}
