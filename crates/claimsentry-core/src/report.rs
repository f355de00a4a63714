use std::fmt::Write;

use serde::Serialize;

use crate::benford::BenfordAnalysis;
use crate::detector::AnalysisResult;
use crate::model::{FeatureContribution, MlPrediction};
use crate::network::NetworkConnections;
use crate::rules::RuleFlag;
use crate::scoring::{RiskLevel, RiskScore};

/// Format styles supported by the analysis reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Yaml,
}

/// Produce a report string from an `AnalysisResult` using the desired format.
pub fn render_analysis(result: &AnalysisResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonReport::from(result))?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&JsonReport::from(result))?),
    }
}

/// Render a bare risk score, as produced by the scoring endpoint.
pub fn render_risk_score(score: &RiskScore, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => {
            let mut out = String::new();
            write_score(&mut out, score)?;
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(score)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(score)?),
    }
}

fn level_label(level: RiskLevel) -> String {
    level.as_str().to_uppercase()
}

fn write_score(out: &mut String, score: &RiskScore) -> anyhow::Result<()> {
    writeln!(
        out,
        "Risk Score: {:.1} ({})",
        score.overall_score,
        level_label(score.risk_level)
    )?;
    writeln!(
        out,
        "Confidence Interval: {:.2} - {:.2}",
        score.confidence_interval.0, score.confidence_interval.1
    )?;
    writeln!(
        out,
        "Components: ml {:.1} • benford {:.1} • rules {:.1}",
        score.components.ml_score, score.components.benford_score, score.components.rule_score
    )?;
    Ok(())
}

fn render_human(result: &AnalysisResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Claim: {}", result.claim_id)?;
    write_score(&mut out, &result.risk_score)?;
    writeln!(out)?;

    let ml = &result.ml_prediction;
    writeln!(
        out,
        "Model ({}): probability {:.2}, confidence {:.2}",
        ml.model_version, ml.fraud_probability, ml.confidence
    )?;
    for indicator in &ml.indicators {
        writeln!(out, "  - {indicator}")?;
    }

    let benford = &result.benford_analysis;
    writeln!(
        out,
        "Benford: {} (deviation {:.2}, p-value {:.4}, n={})",
        if benford.is_anomalous { "anomalous" } else { "conforming" },
        benford.deviation_score,
        benford.p_value,
        benford.sample_size
    )?;
    writeln!(out)?;

    if result.rule_based_flags.is_empty() {
        writeln!(out, "No rules triggered.")?;
    } else {
        writeln!(out, "Rule Flags:")?;
        for flag in &result.rule_based_flags {
            writeln!(
                out,
                "  - {id} [{severity}] {name}: {desc}",
                id = flag.rule_id,
                severity = flag.severity.as_str(),
                name = flag.rule_name,
                desc = flag.description,
            )?;
        }
    }

    if !result.feature_contributions.is_empty() {
        writeln!(out)?;
        writeln!(out, "Top Factors:")?;
        for factor in result.feature_contributions.iter().take(5) {
            writeln!(
                out,
                "  - {name:>28}: contribution {contribution:.2} (value {value:.2})",
                name = factor.feature_name,
                contribution = factor.contribution,
                value = factor.value,
            )?;
        }
    }

    if let Some(network) = &result.network_connections {
        writeln!(
            out,
            "\nNetwork: {} flagged link(s) across {} related claim(s)",
            network.flagged_links,
            network.related_claims.len()
        )?;
    }

    writeln!(out, "\nRecommendations:")?;
    for recommendation in &result.recommendations {
        writeln!(out, "  - {recommendation}")?;
    }
    Ok(out)
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    claim_id: &'a str,
    risk_score: &'a RiskScore,
    ml_prediction: &'a MlPrediction,
    benford_analysis: &'a BenfordAnalysis,
    rule_based_flags: &'a [RuleFlag],
    feature_contributions: &'a [FeatureContribution],
    network_connections: Option<&'a NetworkConnections>,
    recommendations: &'a [String],
}

impl<'a> From<&'a AnalysisResult> for JsonReport<'a> {
    fn from(result: &'a AnalysisResult) -> Self {
        Self {
            claim_id: &result.claim_id,
            risk_score: &result.risk_score,
            ml_prediction: &result.ml_prediction,
            benford_analysis: &result.benford_analysis,
            rule_based_flags: &result.rule_based_flags,
            feature_contributions: &result.feature_contributions,
            network_connections: result.network_connections.as_ref(),
            recommendations: &result.recommendations,
        }
    }
}
