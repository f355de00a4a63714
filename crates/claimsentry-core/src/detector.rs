use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::benford::{BenfordAnalysis, BenfordAnalyzer};
use crate::claims::{Claim, ClaimStore};
use crate::features::{ClaimHistory, FeatureEngineer};
use crate::model::{
    feature_contributions, FeatureContribution, FeatureImportance, FraudModel, HeuristicModel,
    MlPrediction,
};
use crate::network::{self, NetworkConnections};
use crate::rules::engine::RuleEngine;
use crate::rules::RuleFlag;
use crate::scoring::{
    self, ComponentScores, RiskLevel, RiskScore, ScoringConfig, ScoringError,
};

const PROVIDER_RULE_ID: &str = "RULE_005";
const TOP_FACTORS: usize = 5;
const SIMILAR_CASES: usize = 5;

/// Everything the pipeline concluded about one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub claim_id: String,
    pub timestamp: DateTime<Utc>,
    pub risk_score: RiskScore,
    pub ml_prediction: MlPrediction,
    pub benford_analysis: BenfordAnalysis,
    pub rule_based_flags: Vec<RuleFlag>,
    pub feature_contributions: Vec<FeatureContribution>,
    #[serde(default)]
    pub network_connections: Option<NetworkConnections>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    pub claim_id: String,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    /// 0–1, blending score proximity and shared rule hits.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub claim_id: String,
    pub summary: String,
    pub details: String,
    pub top_factors: Vec<FeatureContribution>,
    pub similar_cases: Vec<SimilarCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub claim_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<AnalysisResult>,
    pub errors: Vec<BatchFailure>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("claim `{0}` not found")]
    ClaimNotFound(String),
    #[error("analysis not found for claim `{0}`; run analysis first")]
    NotAnalyzed(String),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Runs the ML, Benford, and rule detectors over stored claims and keeps the results.
pub struct FraudDetector {
    store: Arc<dyn ClaimStore>,
    engine: RuleEngine,
    features: FeatureEngineer,
    benford: BenfordAnalyzer,
    model: Box<dyn FraudModel>,
    scoring: ScoringConfig,
    cache: RwLock<HashMap<String, AnalysisResult>>,
}

impl FraudDetector {
    pub fn new(store: Arc<dyn ClaimStore>, engine: RuleEngine) -> Self {
        Self {
            store,
            engine,
            features: FeatureEngineer::default(),
            benford: BenfordAnalyzer::default(),
            model: Box::new(HeuristicModel::default()),
            scoring: ScoringConfig::default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_model(mut self, model: Box<dyn FraudModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_features(mut self, features: FeatureEngineer) -> Self {
        self.features = features;
        self
    }

    pub fn with_benford(mut self, benford: BenfordAnalyzer) -> Self {
        self.benford = benford;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Result<Self, ScoringError> {
        scoring.validate()?;
        self.scoring = scoring;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<dyn ClaimStore> {
        &self.store
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn benford(&self) -> &BenfordAnalyzer {
        &self.benford
    }

    pub fn model(&self) -> &dyn FraudModel {
        self.model.as_ref()
    }

    /// Score a claim against the given history without touching the store or cache.
    pub fn assess(
        &self,
        claim: &Claim,
        history: &ClaimHistory,
    ) -> Result<AnalysisResult, ScoringError> {
        let features = self.features.extract(claim, history);
        let ml_prediction = self.model.predict(&features);
        let benford_analysis = self.benford.analyze(claim);
        let rule_based_flags = self.engine.evaluate(claim);
        let contributions = feature_contributions(&features, self.model.as_ref());
        let network_connections = network::connections(claim, history.claims());

        let components = ComponentScores::new(
            scoring::ml_component(ml_prediction.fraud_probability),
            scoring::benford_component(benford_analysis.deviation_score),
            scoring::rule_component(&rule_based_flags),
        );
        let risk_score = scoring::aggregate(
            &components,
            ml_prediction.confidence,
            !rule_based_flags.is_empty(),
            &self.scoring,
        )?;
        let recommendations = recommendations(&risk_score, &rule_based_flags, &benford_analysis);

        Ok(AnalysisResult {
            claim_id: claim.claim_id.clone(),
            timestamp: Utc::now(),
            risk_score,
            ml_prediction,
            benford_analysis,
            rule_based_flags,
            feature_contributions: contributions,
            network_connections,
            recommendations,
        })
    }

    /// Analyse a stored claim, reusing a cached result unless `force` is set.
    #[instrument(skip(self))]
    pub async fn analyze(&self, claim_id: &str, force: bool) -> Result<AnalysisResult, AnalysisError> {
        let claim = self
            .store
            .get(claim_id)
            .await?
            .ok_or_else(|| AnalysisError::ClaimNotFound(claim_id.to_string()))?;

        if !force {
            if let Some(cached) = self.cache.read().await.get(claim_id) {
                debug!("returning cached analysis");
                return Ok(cached.clone());
            }
        }

        let all = self.store.all().await?;
        let history = ClaimHistory::excluding(&all, claim_id);
        let result = self.assess(&claim, &history)?;

        if !self
            .store
            .record_assessment(claim_id, result.risk_score.risk_level)
            .await?
        {
            // Deleted while we were scoring it.
            return Err(AnalysisError::ClaimNotFound(claim_id.to_string()));
        }
        self.cache
            .write()
            .await
            .insert(claim_id.to_string(), result.clone());
        info!(
            score = result.risk_score.overall_score,
            level = %result.risk_score.risk_level,
            flags = result.rule_based_flags.len(),
            "claim analysed"
        );
        Ok(result)
    }

    pub async fn result(&self, claim_id: &str) -> Result<AnalysisResult, AnalysisError> {
        self.cache
            .read()
            .await
            .get(claim_id)
            .cloned()
            .ok_or_else(|| AnalysisError::NotAnalyzed(claim_id.to_string()))
    }

    /// Analyse each claim in turn; failures are collected rather than aborting the batch.
    pub async fn batch(&self, claim_ids: &[String]) -> BatchReport {
        let mut results = Vec::new();
        let mut errors = Vec::new();
        for claim_id in claim_ids {
            match self.analyze(claim_id, false).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(%claim_id, error = %err, "batch analysis failed");
                    errors.push(BatchFailure {
                        claim_id: claim_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        BatchReport {
            total: claim_ids.len(),
            successful: results.len(),
            failed: errors.len(),
            results,
            errors,
        }
    }

    pub async fn explain(&self, claim_id: &str) -> Result<Explanation, AnalysisError> {
        let cache = self.cache.read().await;
        let result = cache
            .get(claim_id)
            .ok_or_else(|| AnalysisError::NotAnalyzed(claim_id.to_string()))?;
        Ok(Explanation {
            claim_id: claim_id.to_string(),
            summary: summary(&result.risk_score),
            details: details(result),
            top_factors: result
                .feature_contributions
                .iter()
                .take(TOP_FACTORS)
                .cloned()
                .collect(),
            similar_cases: similar_cases(result, cache.values()),
        })
    }

    /// Snapshot of every cached analysis.
    pub async fn analyses(&self) -> Vec<AnalysisResult> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Drop a cached analysis, e.g. after its claim is deleted.
    pub async fn forget(&self, claim_id: &str) -> bool {
        self.cache.write().await.remove(claim_id).is_some()
    }

    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        self.model.feature_importance()
    }
}

/// Investigator actions, most urgent first.
pub fn recommendations(
    risk: &RiskScore,
    flags: &[RuleFlag],
    benford: &BenfordAnalysis,
) -> Vec<String> {
    let overall = risk.overall_score;
    let mut out = Vec::new();
    if overall >= 75.0 {
        out.push("URGENT: Initiate full investigation immediately".to_string());
        out.push("Contact claimant for additional documentation".to_string());
    }
    if overall >= 50.0 {
        out.push("Verify provider credentials and license status".to_string());
        out.push("Cross-reference with HKFI fraud database".to_string());
    }
    if flags.iter().any(|flag| flag.rule_id == PROVIDER_RULE_ID) {
        out.push("Review all recent claims from this provider".to_string());
    }
    if benford.is_anomalous {
        out.push("Audit claim amount calculation methodology".to_string());
    }
    if overall < 25.0 {
        out.push("Low risk - standard processing recommended".to_string());
    } else {
        out.push("Request additional supporting documents".to_string());
        out.push("Consider physical inspection if applicable".to_string());
    }
    out
}

pub fn summary(risk: &RiskScore) -> String {
    let score = risk.overall_score;
    match risk.risk_level {
        RiskLevel::Critical => format!(
            "This claim has been flagged as CRITICAL RISK with a score of {score:.1}/100. \
             Multiple fraud indicators were detected across machine learning, statistical analysis, \
             and rule-based checks. Immediate investigation is recommended."
        ),
        RiskLevel::High => format!(
            "This claim shows HIGH RISK indicators with a score of {score:.1}/100. \
             Several concerning patterns were identified that warrant further investigation."
        ),
        RiskLevel::Medium => format!(
            "This claim has MEDIUM RISK with a score of {score:.1}/100. \
             Some irregularities were detected but may have legitimate explanations."
        ),
        RiskLevel::Low => format!(
            "This claim appears LOW RISK with a score of {score:.1}/100. \
             No significant fraud indicators were detected."
        ),
    }
}

fn details(result: &AnalysisResult) -> String {
    let mut parts = Vec::new();
    let probability = result.ml_prediction.fraud_probability;
    if probability > 0.5 {
        parts.push(format!(
            "Machine learning model detected {:.1}% probability of fraud based on historical patterns.",
            probability * 100.0
        ));
    }
    if result.benford_analysis.is_anomalous {
        parts.push(
            "Statistical analysis (Benford's Law) detected anomalies in claim amounts, \
             suggesting possible manipulation."
                .to_string(),
        );
    }
    if !result.rule_based_flags.is_empty() {
        let names: Vec<&str> = result
            .rule_based_flags
            .iter()
            .take(3)
            .map(|flag| flag.rule_name.as_str())
            .collect();
        parts.push(format!(
            "Triggered {} rule-based checks including: {}",
            result.rule_based_flags.len(),
            names.join(", ")
        ));
    }
    if parts.is_empty() {
        "No significant concerns detected.".to_string()
    } else {
        parts.join(" ")
    }
}

fn similar_cases<'a>(
    target: &AnalysisResult,
    others: impl Iterator<Item = &'a AnalysisResult>,
) -> Vec<SimilarCase> {
    let rule_ids = |result: &AnalysisResult| -> Vec<String> {
        result
            .rule_based_flags
            .iter()
            .map(|flag| flag.rule_id.clone())
            .collect()
    };
    let target_rules = rule_ids(target);
    let mut cases: Vec<SimilarCase> = others
        .filter(|other| other.claim_id != target.claim_id)
        .map(|other| {
            let score_gap = (target.risk_score.overall_score - other.risk_score.overall_score).abs();
            let proximity = 1.0 - (score_gap / scoring::SCORE_MAX).min(1.0);
            let other_rules = rule_ids(other);
            let overlap = jaccard(&target_rules, &other_rules);
            SimilarCase {
                claim_id: other.claim_id.clone(),
                overall_score: other.risk_score.overall_score,
                risk_level: other.risk_score.risk_level,
                similarity: scoring::round2(0.6 * proximity + 0.4 * overlap),
            }
        })
        .collect();
    cases.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.claim_id.cmp(&b.claim_id))
    });
    cases.truncate(SIMILAR_CASES);
    cases
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.iter().filter(|id| b.contains(id)).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::json_store::JsonClaimStore;
    use crate::claims::test_support::sample_claim;
    use crate::claims::{ClaimStatus, ListQuery, Page};
    use crate::rules::{RuleRepository, StaticRuleRepository};
    use chrono::TimeZone;

    async fn detector_with(claims: Vec<Claim>) -> FraudDetector {
        let store = JsonClaimStore::in_memory();
        store.extend(claims).await.unwrap();
        let rules = StaticRuleRepository::builtin().load_rules().await.unwrap();
        FraudDetector::new(Arc::new(store), RuleEngine::compile(rules).unwrap())
    }

    fn suspicious_claim(id: &str) -> Claim {
        let mut claim = sample_claim(id);
        claim.claim_amount = 250_000.0;
        claim.claim_date = Utc.with_ymd_and_hms(2024, 3, 16, 11, 0, 0).unwrap();
        claim.policy_inception_date = Utc.with_ymd_and_hms(2024, 3, 6, 11, 0, 0).unwrap();
        claim.provider_id = "PRV0666".into();
        claim
    }

    #[tokio::test]
    async fn clean_claim_is_low_risk() {
        let detector = detector_with(vec![sample_claim("C1")]).await;
        let result = detector.analyze("C1", false).await.unwrap();
        assert_eq!(result.risk_score.overall_score, 0.0);
        assert_eq!(result.risk_score.risk_level, RiskLevel::Low);
        assert!(result.rule_based_flags.is_empty());
        assert_eq!(
            result.recommendations,
            vec!["Low risk - standard processing recommended"]
        );
        let stored = detector.store().get("C1").await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Analyzed);
        assert_eq!(stored.risk_level, Some(RiskLevel::Low));
    }

    #[tokio::test]
    async fn suspicious_claim_is_flagged() {
        let detector = detector_with(vec![suspicious_claim("C2")]).await;
        let result = detector.analyze("C2", false).await.unwrap();
        // ml 50 (amount + early claim), benford 0, rules 100
        assert_eq!(result.risk_score.components.ml_score, 50.0);
        assert_eq!(result.risk_score.components.rule_score, 100.0);
        assert_eq!(result.risk_score.overall_score, 50.0);
        assert_eq!(result.risk_score.risk_level, RiskLevel::High);
        assert_eq!(result.rule_based_flags.len(), 5);
        assert!(result
            .recommendations
            .contains(&"Review all recent claims from this provider".to_string()));
        assert!(result
            .recommendations
            .contains(&"Verify provider credentials and license status".to_string()));
        let stored = detector.store().get("C2").await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Flagged);
    }

    #[tokio::test]
    async fn caches_until_forced() {
        let detector = detector_with(vec![sample_claim("C3")]).await;
        let first = detector.analyze("C3", false).await.unwrap();
        let second = detector.analyze("C3", false).await.unwrap();
        assert_eq!(first.timestamp, second.timestamp);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let forced = detector.analyze("C3", true).await.unwrap();
        assert!(forced.timestamp > first.timestamp);
        assert_eq!(detector.result("C3").await.unwrap().timestamp, forced.timestamp);
    }

    #[tokio::test]
    async fn missing_claims_and_results() {
        let detector = detector_with(vec![]).await;
        assert!(matches!(
            detector.analyze("nope", false).await,
            Err(AnalysisError::ClaimNotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            detector.result("nope").await,
            Err(AnalysisError::NotAnalyzed(_))
        ));
        assert!(matches!(
            detector.explain("nope").await,
            Err(AnalysisError::NotAnalyzed(_))
        ));
    }

    #[tokio::test]
    async fn batch_collects_failures() {
        let detector = detector_with(vec![sample_claim("C4"), sample_claim("C5")]).await;
        let ids = vec!["C4".to_string(), "missing".to_string(), "C5".to_string()];
        let report = detector.batch(&ids).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].claim_id, "missing");
        assert_eq!(report.errors[0].error, "claim `missing` not found");
    }

    #[tokio::test]
    async fn explain_finds_similar_cases() {
        let detector = detector_with(vec![
            suspicious_claim("S1"),
            suspicious_claim("S2"),
            sample_claim("L1"),
        ])
        .await;
        for id in ["S1", "S2", "L1"] {
            detector.analyze(id, false).await.unwrap();
        }
        let explanation = detector.explain("S1").await.unwrap();
        assert!(explanation.summary.starts_with("This claim shows HIGH RISK"));
        assert!(explanation
            .details
            .starts_with("Triggered 5 rule-based checks including: High Claim Amount"));
        assert_eq!(explanation.top_factors.len(), 5);
        assert_eq!(explanation.similar_cases.len(), 2);
        assert_eq!(explanation.similar_cases[0].claim_id, "S2");
        assert!(explanation.similar_cases[0].similarity > explanation.similar_cases[1].similarity);
    }

    #[tokio::test]
    async fn forget_drops_cache_entry() {
        let detector = detector_with(vec![sample_claim("C6")]).await;
        detector.analyze("C6", false).await.unwrap();
        assert!(detector.forget("C6").await);
        assert!(!detector.forget("C6").await);
        assert!(detector.analyses().await.is_empty());
    }

    /// Loses the claim between the read and the assessment write.
    struct VanishingStore(JsonClaimStore);

    #[async_trait::async_trait]
    impl ClaimStore for VanishingStore {
        async fn insert(&self, claim: Claim) -> anyhow::Result<Claim> {
            self.0.insert(claim).await
        }

        async fn get(&self, claim_id: &str) -> anyhow::Result<Option<Claim>> {
            self.0.get(claim_id).await
        }

        async fn list(&self, query: &ListQuery) -> anyhow::Result<Page<Claim>> {
            self.0.list(query).await
        }

        async fn delete(&self, claim_id: &str) -> anyhow::Result<bool> {
            self.0.delete(claim_id).await
        }

        async fn update_status(
            &self,
            claim_id: &str,
            status: ClaimStatus,
        ) -> anyhow::Result<Option<Claim>> {
            self.0.update_status(claim_id, status).await
        }

        async fn record_assessment(&self, claim_id: &str, _level: RiskLevel) -> anyhow::Result<bool> {
            self.0.delete(claim_id).await?;
            Ok(false)
        }

        async fn all(&self) -> anyhow::Result<Vec<Claim>> {
            self.0.all().await
        }
    }

    #[tokio::test]
    async fn claim_deleted_mid_analysis_is_not_cached() {
        let store = JsonClaimStore::in_memory();
        store.insert(sample_claim("C7")).await.unwrap();
        let engine = RuleEngine::compile(StaticRuleRepository::builtin().rules().to_vec()).unwrap();
        let detector = FraudDetector::new(Arc::new(VanishingStore(store)), engine);

        assert!(matches!(
            detector.analyze("C7", false).await,
            Err(AnalysisError::ClaimNotFound(id)) if id == "C7"
        ));
        assert!(matches!(
            detector.result("C7").await,
            Err(AnalysisError::NotAnalyzed(_))
        ));
        assert!(detector.analyses().await.is_empty());
    }

    #[test]
    fn rejects_invalid_scoring_config() {
        let store: Arc<dyn ClaimStore> = Arc::new(JsonClaimStore::in_memory());
        let engine = RuleEngine::compile(Vec::new()).unwrap();
        let mut config = ScoringConfig::default();
        config.weights.ml = 0.9;
        assert!(FraudDetector::new(store, engine).with_scoring(config).is_err());
    }
}
