use std::{collections::HashSet, fs, path::PathBuf};

use anyhow::{Context, Result};

use super::{ClaimField, Rule, RuleCondition, RuleRepository, Severity};
use once_cell::sync::OnceCell;

/// Loads rules from a rule pack directory (`rules.json` and `watchlist.txt`).
pub struct FileRuleRepository {
    base_path: PathBuf,
    cache: OnceCell<Vec<Rule>>,
}

impl FileRuleRepository {
    /// Create a repository rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    fn rules_path(&self) -> PathBuf {
        self.base_path.join("rules.json")
    }

    fn watchlist_path(&self) -> PathBuf {
        self.base_path.join("watchlist.txt")
    }

    fn load_declarative(&self, seen: &mut HashSet<String>) -> Result<Vec<Rule>> {
        let path = self.rules_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read rule file at {}", path.display()))?;
        let rules: Vec<Rule> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON structure in rule file at {}", path.display()))?;
        for rule in &rules {
            if !seen.insert(rule.id.clone()) {
                return Err(anyhow::anyhow!("duplicate rule id `{}`", rule.id));
            }
            rule.validate()?;
        }
        Ok(rules)
    }

    fn load_watchlist(&self, seen: &mut HashSet<String>) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        let path = self.watchlist_path();
        if !path.exists() {
            return Ok(rules);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read watchlist at {}", path.display()))?;
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parts: Vec<_> = trimmed.splitn(5, '|').map(str::trim).collect();
            if parts.len() != 5 {
                return Err(anyhow::anyhow!(
                    "invalid watchlist format at {}:{} (expected id|severity|field|name|keywords)",
                    path.display(),
                    idx + 1
                ));
            }
            let id = parts[0].to_string();
            if !seen.insert(id.clone()) {
                return Err(anyhow::anyhow!("duplicate rule id `{id}`"));
            }
            let severity = Severity::parse(parts[1]).with_context(|| {
                format!(
                    "invalid severity `{}` for rule `{}` at {}:{}",
                    parts[1],
                    id,
                    path.display(),
                    idx + 1
                )
            })?;
            let field = ClaimField::parse(parts[2]).with_context(|| {
                format!(
                    "unknown claim field `{}` for rule `{}` at {}:{}",
                    parts[2],
                    id,
                    path.display(),
                    idx + 1
                )
            })?;
            let keywords = parts[4]
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            let name = parts[3];
            let rule = Rule::new(
                id,
                name,
                severity,
                format!("{name}: matched watch-listed value"),
                RuleCondition::FieldKeywords { field, keywords },
            )?;
            rules.push(rule);
        }
        Ok(rules)
    }
}

#[async_trait::async_trait]
impl RuleRepository for FileRuleRepository {
    async fn load_rules(&self) -> Result<Vec<Rule>> {
        let rules = self.cache.get_or_try_init(|| {
            let mut seen = HashSet::new();
            let mut rules = self.load_declarative(&mut seen)?;
            rules.extend(self.load_watchlist(&mut seen)?);
            Ok::<_, anyhow::Error>(rules)
        })?;
        Ok(rules.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        let rules = self.load_rules().await?;
        Ok(rules.into_iter().find(|rule| rule.id == rule_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::path::Path;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn loads_declarative_and_watchlist_rules() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            r#"
[
    {
        "id": "RULE_001",
        "name": "High Claim Amount",
        "severity": "medium",
        "description": "Claim amount exceeds threshold",
        "condition": { "type": "amount_above", "threshold": 200000 }
    },
    {
        "id": "RULE_003",
        "name": "Weekend Submission",
        "severity": "low",
        "description": "Claim submitted on weekend",
        "condition": { "type": "weekend_submission" }
    }
]
"#,
        );
        write(
            &temp.path().join("watchlist.txt"),
            r#"
# id|severity|field|name|keywords
BROKER_WATCH|high|broker_id|Watch-listed Broker|BRK-0666, BRK-0999
"#,
        );

        let repo = FileRuleRepository::new(temp.path());
        let mut rules = futures::executor::block_on(RuleRepository::load_rules(&repo)).unwrap();
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].id, "BROKER_WATCH");
        assert_eq!(rules[1].id, "RULE_001");
        assert_eq!(rules[2].id, "RULE_003");
        assert_eq!(rules[0].severity, Severity::High);
        assert!(matches!(
            &rules[0].condition,
            RuleCondition::FieldKeywords { field: ClaimField::BrokerId, keywords } if keywords.len() == 2
        ));
        assert_eq!(rules[2].condition, RuleCondition::WeekendSubmission);
    }

    #[test]
    fn missing_directory_yields_empty_pack() {
        let temp = tempfile::tempdir().unwrap();
        let repo = FileRuleRepository::new(temp.path().join("absent"));
        let rules = futures::executor::block_on(RuleRepository::load_rules(&repo)).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn duplicate_ids_error() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("watchlist.txt"),
            "DUP|low|provider_id|First|abc\nDUP|high|provider_id|Second|def",
        );
        let repo = FileRuleRepository::new(temp.path());
        let err = futures::executor::block_on(RuleRepository::load_rules(&repo)).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id `DUP`"));
    }

    #[test]
    fn rejects_unknown_field() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("watchlist.txt"),
            "W1|low|favourite_colour|Colour|red",
        );
        let repo = FileRuleRepository::new(temp.path());
        let err = futures::executor::block_on(RuleRepository::load_rules(&repo)).unwrap_err();
        assert!(err.to_string().contains("unknown claim field"));
    }

    #[test]
    fn rejects_invalid_declarative_rule() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            &json!([{
                "id": "NEG",
                "name": "Negative",
                "severity": "low",
                "description": "",
                "condition": { "type": "policy_age_below", "days": -3 }
            }])
            .to_string(),
        );
        let repo = FileRuleRepository::new(temp.path());
        let err = futures::executor::block_on(RuleRepository::load_rules(&repo)).unwrap_err();
        assert!(err.to_string().contains("invalid threshold"));
    }

    #[test]
    fn loads_sample_rule_pack_from_repo() {
        let repo_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../rules")
            .canonicalize()
            .expect("rules directory should exist");
        let repo = FileRuleRepository::new(repo_path);
        let rules = futures::executor::block_on(RuleRepository::load_rules(&repo))
            .expect("sample rules should parse");
        for id in ["RULE_001", "RULE_002", "RULE_003", "RULE_004", "RULE_005"] {
            assert!(
                rules.iter().any(|rule| rule.id == id),
                "rules.json should provide {id}"
            );
        }
        assert!(
            rules.iter().any(|rule| rule.id == "BROKER_WATCH"),
            "watchlist.txt should provide BROKER_WATCH"
        );
    }

    fn text_without_delimiter() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[A-Za-z0-9 _\\-]{3,48}")
            .unwrap()
            .prop_filter("value must contain non-whitespace", |s| {
                !s.trim().is_empty()
            })
    }

    proptest! {
        #[test]
        fn watchlist_rules_load(
            entries in proptest::collection::vec(
                (
                    text_without_delimiter(),
                    prop_oneof![Just("low"), Just("medium"), Just("high"), Just("critical")],
                    text_without_delimiter(),
                    text_without_delimiter()
                ),
                1..12
            )
        ) {
            let temp = tempfile::tempdir().unwrap();
            let mut buffer = String::new();
            for (idx, (id, severity, name, keyword)) in entries.iter().enumerate() {
                buffer.push_str(&format!(
                    "AUTO{idx}_{id}|{severity}|provider_id|{name}|{keyword}\n",
                    idx = idx,
                    id = id.trim(),
                    severity = severity,
                    name = name,
                    keyword = keyword
                ));
            }
            write(&temp.path().join("watchlist.txt"), &buffer);

            let repo = FileRuleRepository::new(temp.path());
            let rules = futures::executor::block_on(RuleRepository::load_rules(&repo))
                .expect("watchlist rules should parse");

            prop_assert_eq!(rules.len(), entries.len());
            for rule in rules {
                let is_keyword_rule = matches!(rule.condition, RuleCondition::FieldKeywords { .. });
                prop_assert!(is_keyword_rule);
            }
        }
    }
}
