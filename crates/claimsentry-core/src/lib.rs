pub mod benford;
pub mod chat;
pub mod claims;
pub mod dashboard;
pub mod datagen;
pub mod detector;
pub mod districts;
pub mod extract;
pub mod features;
pub mod model;
pub mod network;
pub mod report;
pub mod rules;
pub mod scoring;
pub mod settings;

pub use benford::{BenfordAnalysis, BenfordAnalyzer, BenfordConfig};
pub use claims::{
    json_store::JsonClaimStore, Claim, ClaimStatus, ClaimStore, ClaimValidationError, ListQuery,
    Location, Page,
};
pub use detector::{AnalysisError, AnalysisResult, FraudDetector};
pub use report::{render_analysis, render_risk_score, OutputFormat};
pub use rules::{
    engine::RuleEngine, file_repository::FileRuleRepository, Rule, RuleCondition, RuleFlag,
    RuleRepository, RuleValidationError, Severity,
};
pub use scoring::{
    aggregate, ComponentScores, RiskLevel, RiskScore, RiskThresholds, ScoringConfig, ScoringError,
};
pub use settings::Settings;
