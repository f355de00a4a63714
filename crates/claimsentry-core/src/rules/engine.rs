use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use chrono::{Datelike, Weekday};
use regex::Regex;
use tracing::{debug, instrument, trace};

use super::{ClaimField, Rule, RuleCondition, RuleFlag};
use crate::claims::Claim;

const ROUND_TOLERANCE: f64 = 1e-9;

enum Matcher {
    Condition,
    Pattern(ClaimField, Regex),
    Keywords(ClaimField, AhoCorasick),
}

struct CompiledRule {
    rule: Rule,
    matcher: Matcher,
}

/// Rule set compiled once (regexes, keyword automata) and evaluated per claim.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    pub fn compile(rules: Vec<Rule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            rule.validate()?;
            let matcher = match &rule.condition {
                RuleCondition::FieldPattern { field, pattern } => {
                    let regex = Regex::new(pattern)
                        .with_context(|| format!("invalid regex pattern for rule {}", rule.id))?;
                    Matcher::Pattern(*field, regex)
                }
                RuleCondition::FieldKeywords { field, keywords } => {
                    let patterns: Vec<&str> = keywords
                        .iter()
                        .map(|k| k.trim())
                        .filter(|k| !k.is_empty())
                        .collect();
                    let automaton = AhoCorasick::builder()
                        .ascii_case_insensitive(true)
                        .build(patterns)
                        .with_context(|| {
                            format!("failed to build keyword automaton for rule {}", rule.id)
                        })?;
                    Matcher::Keywords(*field, automaton)
                }
                _ => Matcher::Condition,
            };
            compiled.push(CompiledRule { rule, matcher });
        }
        debug!(rules = compiled.len(), "rule engine compiled");
        Ok(Self { rules: compiled })
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Flags for every rule the claim triggers, in rule order.
    #[instrument(name = "evaluate_rules", skip(self, claim), fields(claim_id = %claim.claim_id))]
    pub fn evaluate(&self, claim: &Claim) -> Vec<RuleFlag> {
        let mut flags = Vec::new();
        for compiled in &self.rules {
            let rule = &compiled.rule;
            let Some(description) = Self::check(compiled, claim) else {
                continue;
            };
            trace!(rule_id = %rule.id, "rule triggered");
            flags.push(RuleFlag {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                severity: rule.severity,
                description,
                threshold: rule.condition.threshold(),
            });
        }
        flags
    }

    /// Returns the flag description when the rule fires.
    fn check(compiled: &CompiledRule, claim: &Claim) -> Option<String> {
        let rule = &compiled.rule;
        match (&rule.condition, &compiled.matcher) {
            (RuleCondition::AmountAbove { threshold }, _) => (claim.claim_amount > *threshold)
                .then(|| {
                    format!(
                        "Claim amount (HKD {}) exceeds threshold",
                        format_hkd(claim.claim_amount)
                    )
                }),
            (RuleCondition::PolicyAgeBelow { days }, _) => {
                let elapsed = claim.days_since_policy_inception();
                (elapsed < *days).then(|| {
                    format!("Claim submitted {elapsed} days after policy inception")
                })
            }
            (RuleCondition::WeekendSubmission, _) => {
                matches!(claim.claim_date.weekday(), Weekday::Sat | Weekday::Sun)
                    .then(|| rule.description.clone())
            }
            (RuleCondition::RoundAmount { multiple, minimum }, _) => {
                let remainder = claim.claim_amount % multiple;
                let round = remainder.abs() < ROUND_TOLERANCE
                    || (multiple - remainder).abs() < ROUND_TOLERANCE;
                (round && claim.claim_amount > *minimum).then(|| rule.description.clone())
            }
            (_, Matcher::Pattern(field, regex)) => field
                .value(claim)
                .filter(|value| regex.is_match(value))
                .map(|_| rule.description.clone()),
            (_, Matcher::Keywords(field, automaton)) => field
                .value(claim)
                .and_then(|value| automaton.find(value))
                .map(|_| rule.description.clone()),
            _ => None,
        }
    }
}

/// Format an amount with thousands separators and two decimals (`250,000.00`).
pub fn format_hkd(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::test_support::sample_claim;
    use crate::rules::{RuleRepository, Severity, StaticRuleRepository};
    use chrono::{TimeZone, Utc};

    fn builtin_engine() -> RuleEngine {
        let rules =
            futures::executor::block_on(StaticRuleRepository::builtin().load_rules()).unwrap();
        RuleEngine::compile(rules).unwrap()
    }

    fn ids(flags: &[RuleFlag]) -> Vec<&str> {
        flags.iter().map(|f| f.rule_id.as_str()).collect()
    }

    #[test]
    fn clean_claim_triggers_nothing() {
        let engine = builtin_engine();
        assert!(engine.evaluate(&sample_claim("C1")).is_empty());
    }

    #[test]
    fn suspicious_claim_triggers_every_builtin_rule() {
        let engine = builtin_engine();
        let mut claim = sample_claim("C2");
        claim.claim_amount = 250_000.0;
        // Saturday
        claim.claim_date = Utc.with_ymd_and_hms(2024, 3, 16, 11, 0, 0).unwrap();
        claim.policy_inception_date = Utc.with_ymd_and_hms(2024, 3, 6, 11, 0, 0).unwrap();
        claim.provider_id = "PRV0666".into();

        let flags = engine.evaluate(&claim);
        assert_eq!(
            ids(&flags),
            vec!["RULE_001", "RULE_002", "RULE_003", "RULE_004", "RULE_005"]
        );
        assert_eq!(
            flags[0].description,
            "Claim amount (HKD 250,000.00) exceeds threshold"
        );
        assert_eq!(
            flags[1].description,
            "Claim submitted 10 days after policy inception"
        );
        assert_eq!(flags[1].threshold, Some(30.0));
        assert_eq!(flags[4].severity, Severity::Critical);
    }

    #[test]
    fn round_amount_requires_minimum() {
        let engine = builtin_engine();
        let mut claim = sample_claim("C3");
        claim.claim_amount = 10_000.0;
        assert!(engine.evaluate(&claim).is_empty());
        claim.claim_amount = 11_000.0;
        assert_eq!(ids(&engine.evaluate(&claim)), vec!["RULE_004"]);
        claim.claim_amount = 11_000.5;
        assert!(engine.evaluate(&claim).is_empty());
    }

    #[test]
    fn keyword_rules_match_case_insensitively() {
        let rule = Rule::new(
            "BROKER_WATCH",
            "Watch-listed Broker",
            Severity::High,
            "Broker appears on the watch list",
            RuleCondition::FieldKeywords {
                field: ClaimField::BrokerId,
                keywords: vec!["brk-0666".into()],
            },
        )
        .unwrap();
        let engine = RuleEngine::compile(vec![rule]).unwrap();
        let mut claim = sample_claim("C4");
        assert!(engine.evaluate(&claim).is_empty());
        claim.broker_id = Some("BRK-0666".into());
        let flags = engine.evaluate(&claim);
        assert_eq!(ids(&flags), vec!["BROKER_WATCH"]);
        assert_eq!(flags[0].description, "Broker appears on the watch list");
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let rule = Rule {
            id: "BAD".into(),
            name: "Bad".into(),
            severity: Severity::Low,
            description: String::new(),
            condition: RuleCondition::FieldPattern {
                field: ClaimField::ProviderId,
                pattern: "(".into(),
            },
        };
        let err = RuleEngine::compile(vec![rule]).err().expect("should fail");
        assert!(err.to_string().contains("invalid regex pattern for rule BAD"));
    }

    #[test]
    fn formats_currency() {
        assert_eq!(format_hkd(250_000.0), "250,000.00");
        assert_eq!(format_hkd(1_234_567.891), "1,234,567.89");
        assert_eq!(format_hkd(999.0), "999.00");
        assert_eq!(format_hkd(-1000.0), "-1,000.00");
    }
}
