//! Rule-based investigator assistant answering from live dashboard data.

use std::collections::{HashMap, VecDeque};

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::dashboard::{Dashboard, Granularity, ProviderSort};
use crate::detector::summary;

const MAX_SUGGESTIONS: usize = 5;
pub const MAX_CONVERSATIONS: usize = 1_000;

const VISUALIZATION_KEYWORDS: &[&str] = &[
    "generate", "create", "plot", "chart", "visualize", "graph", "show me",
];
const QUERY_KEYWORDS: &[&str] = &["how many", "what is", "show", "list", "find", "search"];
const EXPLANATION_KEYWORDS: &[&str] = &["why", "explain", "how does", "what causes", "understand"];

const SUGGESTIONS: &[&str] = &[
    "Analyze claim CLM12345678",
    "Show fraud trends for last 30 days",
    "Generate a risk score distribution chart",
    "Which providers have highest fraud rates?",
    "Explain how Benford's Law detects fraud",
    "Show geographic fraud hotspots in Hong Kong",
    "Create a network graph of suspicious connections",
    "What are the top risk factors?",
    "Compare this month to last month",
    "List high-risk claims",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Visualization,
    DataQuery,
    Explanation,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Chart-ready data the frontend can render directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub chart_type: String,
    pub title: String,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub intent: Intent,
    pub message: String,
    pub visualization: Option<Visualization>,
    pub suggestions: Vec<String>,
}

pub struct Assistant {
    visualization: AhoCorasick,
    query: AhoCorasick,
    explanation: AhoCorasick,
}

fn automaton(keywords: &[&str]) -> Result<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(keywords)
        .context("failed to build intent automaton")
}

/// A keyword only counts where a word starts, so "ml" never fires inside "html".
fn matches_word(keywords: &AhoCorasick, message: &str) -> bool {
    let bytes = message.as_bytes();
    keywords
        .find_overlapping_iter(message)
        .any(|found| found.start() == 0 || !bytes[found.start() - 1].is_ascii_alphanumeric())
}

fn contains_any(message: &str, words: &[&str]) -> bool {
    automaton(words)
        .map(|keywords| matches_word(&keywords, message))
        .unwrap_or(false)
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Assistant {
    pub fn new() -> Result<Self> {
        Ok(Self {
            visualization: automaton(VISUALIZATION_KEYWORDS)?,
            query: automaton(QUERY_KEYWORDS)?,
            explanation: automaton(EXPLANATION_KEYWORDS)?,
        })
    }

    /// Charts win over queries, queries over explanations.
    pub fn detect_intent(&self, message: &str) -> Intent {
        if matches_word(&self.visualization, message) {
            Intent::Visualization
        } else if matches_word(&self.query, message) {
            Intent::DataQuery
        } else if matches_word(&self.explanation, message) {
            Intent::Explanation
        } else {
            Intent::General
        }
    }

    pub fn respond(&self, message: &str, dashboard: &Dashboard, now: DateTime<Utc>) -> Reply {
        let intent = self.detect_intent(message);
        debug!(?intent, "chat intent detected");
        match intent {
            Intent::Visualization => {
                let (text, chart) = visualize(message, dashboard, now);
                Reply {
                    intent,
                    message: text,
                    visualization: Some(chart),
                    suggestions: owned(&[
                        "Modify the chart type",
                        "Filter by date range",
                        "Show geographic fraud hotspots in Hong Kong",
                    ]),
                }
            }
            Intent::DataQuery => Reply {
                intent,
                message: query(message, dashboard, now),
                visualization: None,
                suggestions: owned(&[
                    "Show more details",
                    "Compare with previous period",
                    "Generate report",
                ]),
            },
            Intent::Explanation => Reply {
                intent,
                message: explain(message, dashboard),
                visualization: None,
                suggestions: owned(&[
                    "Tell me more about Benford's Law",
                    "How does the ML model work?",
                    "What are the key risk factors?",
                ]),
            },
            Intent::General => Reply {
                intent,
                message: "I'm an assistant specialized in insurance fraud detection for Hong Kong claims. \
                          I can summarise claim statistics, chart fraud trends, explain detection methods, \
                          and walk through individual claim analyses. How can I assist you today?"
                    .into(),
                visualization: None,
                suggestions: owned(&[
                    "Analyze a specific claim",
                    "Show fraud trends",
                    "Generate custom visualization",
                ]),
            },
        }
    }
}

/// First word of the message that names a stored claim.
fn mentioned_claim<'a>(message: &str, dashboard: &'a Dashboard) -> Option<&'a str> {
    message
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            dashboard
                .claims()
                .iter()
                .find(|claim| claim.claim_id.eq_ignore_ascii_case(token))
                .map(|claim| claim.claim_id.as_str())
        })
}

fn visualize(message: &str, dashboard: &Dashboard, now: DateTime<Utc>) -> (String, Visualization) {
    if contains_any(message, &["provider"]) {
        let providers = dashboard
            .providers(10, ProviderSort::FlaggedClaims)
            .unwrap_or_default();
        let chart = Visualization {
            chart_type: "bar".into(),
            title: "Flagged Claims by Provider".into(),
            labels: providers.iter().map(|p| p.provider_id.clone()).collect(),
            series: vec![
                Series {
                    name: "Flagged Claims".into(),
                    values: providers.iter().map(|p| p.flagged_claims as f64).collect(),
                },
                Series {
                    name: "Total Claims".into(),
                    values: providers.iter().map(|p| p.total_claims as f64).collect(),
                },
            ],
        };
        return (
            format!("Here are the {} providers with the most flagged claims.", chart.labels.len()),
            chart,
        );
    }
    if contains_any(message, &["district", "geographic", "map", "region", "hotspot"]) {
        let geo = dashboard.geographic();
        let chart = Visualization {
            chart_type: "bar".into(),
            title: "Fraud Cases by District".into(),
            labels: geo.iter().map(|g| g.region.clone()).collect(),
            series: vec![
                Series {
                    name: "Claims".into(),
                    values: geo.iter().map(|g| g.claims_count as f64).collect(),
                },
                Series {
                    name: "Flagged".into(),
                    values: geo.iter().map(|g| g.fraud_count as f64).collect(),
                },
            ],
        };
        return ("Here is the distribution of claims across Hong Kong districts.".into(), chart);
    }
    if contains_any(message, &["distribution", "risk level", "risk score"]) {
        let stats = dashboard.stats(Some(DateTime::<Utc>::MIN_UTC), Some(now), now).ok();
        let counts = stats
            .map(|s| {
                vec![
                    s.low_risk_count as f64,
                    s.medium_risk_count as f64,
                    s.high_risk_count as f64,
                    s.critical_risk_count as f64,
                ]
            })
            .unwrap_or_else(|| vec![0.0; 4]);
        let chart = Visualization {
            chart_type: "pie".into(),
            title: "Risk Level Distribution".into(),
            labels: owned(&["low", "medium", "high", "critical"]),
            series: vec![Series {
                name: "Claims".into(),
                values: counts,
            }],
        };
        return ("Here is how analysed claims are spread across risk levels.".into(), chart);
    }

    let granularity = if contains_any(message, &["month"]) {
        Granularity::Month
    } else if contains_any(message, &["week"]) {
        Granularity::Week
    } else {
        Granularity::Day
    };
    let days = if granularity == Granularity::Month { 365 } else { 30 };
    let points = dashboard.trends(days, granularity, now).unwrap_or_default();
    let chart = Visualization {
        chart_type: "line".into(),
        title: "Claims and Fraud Detections Over Time".into(),
        labels: points.iter().map(|p| p.date.clone()).collect(),
        series: vec![
            Series {
                name: "Claims".into(),
                values: points.iter().map(|p| p.claims_count as f64).collect(),
            },
            Series {
                name: "Flagged".into(),
                values: points.iter().map(|p| p.fraud_count as f64).collect(),
            },
        ],
    };
    (
        format!("Here is the claim trend for the last {days} days."),
        chart,
    )
}

fn query(message: &str, dashboard: &Dashboard, now: DateTime<Utc>) -> String {
    if let Some(claim_id) = mentioned_claim(message, dashboard) {
        return claim_status(claim_id, dashboard);
    }
    if contains_any(message, &["provider"]) {
        let providers = dashboard
            .providers(3, ProviderSort::FlaggedClaims)
            .unwrap_or_default();
        if providers.is_empty() {
            return "No provider data is available yet.".into();
        }
        let listed: Vec<String> = providers
            .iter()
            .map(|p| {
                format!(
                    "{} ({}): {} flagged of {}",
                    p.provider_name, p.provider_id, p.flagged_claims, p.total_claims
                )
            })
            .collect();
        return format!("Providers with the most flagged claims: {}.", listed.join("; "));
    }
    match dashboard.stats(Some(DateTime::<Utc>::MIN_UTC), Some(now), now) {
        Ok(stats) => format!(
            "Based on the current data, there are {} flagged claims out of {} total claims, \
             representing a {:.1}% detection rate. The average risk score is {:.1} out of 100.",
            stats.flagged_claims, stats.total_claims, stats.detection_rate, stats.avg_risk_score
        ),
        Err(_) => "No claim data is available yet.".into(),
    }
}

fn claim_status(claim_id: &str, dashboard: &Dashboard) -> String {
    match dashboard.analysis(claim_id) {
        Some(result) => format!(
            "Claim {claim_id} scored {:.1}/100 ({}), with {} rule flags.",
            result.risk_score.overall_score,
            result.risk_score.risk_level,
            result.rule_based_flags.len()
        ),
        None => format!("Claim {claim_id} has not been analysed yet. Run an analysis to score it."),
    }
}

fn explain(message: &str, dashboard: &Dashboard) -> String {
    if let Some(claim_id) = mentioned_claim(message, dashboard) {
        return match dashboard.analysis(claim_id) {
            Some(result) => summary(&result.risk_score),
            None => format!("Claim {claim_id} has not been analysed yet. Run an analysis to score it."),
        };
    }
    if contains_any(message, &["benford"]) {
        return "Benford's Law states that in naturally occurring numerical datasets, \
                the leading digit is more likely to be small (1 appears ~30% of the time, \
                9 appears ~4.6%). Fabricated amounts often deviate from this distribution because \
                people tend to pick numbers more uniformly or round them."
            .into();
    }
    if contains_any(message, &["model", "ml", "machine learning"]) {
        return "The machine learning component currently uses a transparent heuristic model: \
                it counts four risk indicators (a claim above HKD 100,000, a claim within 30 days of \
                policy inception, a claimant with more than five prior claims, and a provider whose \
                smoothed flag rate exceeds 0.7). The share of indicators present is the fraud probability."
            .into();
    }
    if contains_any(message, &["factor", "feature", "importance"]) {
        return "The strongest drivers are claim amount (25%), policy tenure (20%), provider risk (18%), \
                claim frequency (15%), treatment risk (12%) and location risk (10%)."
            .into();
    }
    "I can explain various aspects of the fraud detection system: Benford's Law, the model, \
     risk factors, or a specific claim's analysis. What would you like to know more about?"
        .into()
}

/// Example prompts whose words overlap the query; the first five when the query is blank.
pub fn suggestions(query: &str) -> Vec<String> {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect();
    SUGGESTIONS
        .iter()
        .filter(|suggestion| {
            words.is_empty() || {
                let lower = suggestion.to_lowercase();
                words.iter().any(|word| lower.contains(word.as_str()))
            }
        })
        .take(MAX_SUGGESTIONS)
        .map(|s| s.to_string())
        .collect()
}

/// In-memory chat histories keyed by conversation id.
///
/// Holds at most `capacity` conversations; opening one more drops the oldest.
#[derive(Debug)]
pub struct ConversationStore {
    capacity: usize,
    conversations: RwLock<Conversations>,
}

#[derive(Debug, Default)]
struct Conversations {
    histories: HashMap<String, Vec<ChatMessage>>,
    created: VecDeque<String>,
}

impl Conversations {
    fn entry(&mut self, id: &str, capacity: usize) -> &mut Vec<ChatMessage> {
        if !self.histories.contains_key(id) {
            while self.histories.len() >= capacity.max(1) {
                let Some(oldest) = self.created.pop_front() else {
                    break;
                };
                self.histories.remove(&oldest);
                debug!(conversation_id = %oldest, "evicted oldest conversation");
            }
            self.created.push_back(id.to_string());
        }
        self.histories.entry(id.to_string()).or_default()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::with_capacity(MAX_CONVERSATIONS)
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            conversations: RwLock::new(Conversations::default()),
        }
    }

    /// Reuse the given conversation (creating it if unknown) or start a new one.
    pub async fn open(&self, conversation_id: Option<String>) -> String {
        let id = conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.conversations.write().await.entry(&id, self.capacity);
        id
    }

    pub async fn append(&self, conversation_id: &str, message: ChatMessage) {
        self.conversations
            .write()
            .await
            .entry(conversation_id, self.capacity)
            .push(message);
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Vec<ChatMessage>> {
        self.conversations
            .read()
            .await
            .histories
            .get(conversation_id)
            .cloned()
    }

    pub async fn delete(&self, conversation_id: &str) -> bool {
        let mut conversations = self.conversations.write().await;
        conversations.created.retain(|id| id != conversation_id);
        conversations.histories.remove(conversation_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.histories.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::test_support::sample_claim;
    use crate::claims::ClaimStatus;
    use crate::scoring::RiskLevel;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    fn dashboard() -> Dashboard {
        let mut flagged = sample_claim("CLM00000001");
        flagged.status = ClaimStatus::Flagged;
        flagged.risk_level = Some(RiskLevel::High);
        Dashboard::new(vec![flagged, sample_claim("CLM00000002")], Vec::new())
    }

    #[test]
    fn detects_intents_in_priority_order() {
        let assistant = Assistant::new().unwrap();
        assert_eq!(assistant.detect_intent("Plot fraud by month"), Intent::Visualization);
        assert_eq!(assistant.detect_intent("Show me the trend"), Intent::Visualization);
        assert_eq!(assistant.detect_intent("How many claims are flagged?"), Intent::DataQuery);
        assert_eq!(assistant.detect_intent("Why was this flagged?"), Intent::Explanation);
        assert_eq!(assistant.detect_intent("hello"), Intent::General);
    }

    #[test]
    fn data_queries_use_live_counts() {
        let assistant = Assistant::new().unwrap();
        let reply = assistant.respond("How many claims are flagged?", &dashboard(), now());
        assert_eq!(reply.intent, Intent::DataQuery);
        assert!(reply
            .message
            .starts_with("Based on the current data, there are 1 flagged claims out of 2 total claims"));
        assert!(reply.message.contains("50.0% detection rate"));
        assert_eq!(reply.suggestions.len(), 3);
    }

    #[test]
    fn mentions_of_known_claims_are_resolved() {
        let assistant = Assistant::new().unwrap();
        let reply = assistant.respond("find clm00000002 please", &dashboard(), now());
        assert_eq!(
            reply.message,
            "Claim CLM00000002 has not been analysed yet. Run an analysis to score it."
        );
    }

    #[test]
    fn charts_carry_visualization_data() {
        let assistant = Assistant::new().unwrap();
        let reply = assistant.respond("Create a chart of providers", &dashboard(), now());
        let chart = reply.visualization.expect("chart attached");
        assert_eq!(chart.chart_type, "bar");
        assert_eq!(chart.labels, vec!["PRV0042"]);
        assert_eq!(chart.series[0].values, vec![1.0]);

        let trend = assistant
            .respond("plot the daily trend", &dashboard(), now())
            .visualization
            .unwrap();
        assert_eq!(trend.chart_type, "line");
        assert_eq!(trend.labels.len(), 30);
    }

    #[test]
    fn explanations_cover_methods() {
        let assistant = Assistant::new().unwrap();
        let reply = assistant.respond("Explain Benford", &dashboard(), now());
        assert!(reply.message.starts_with("Benford's Law states"));
    }

    #[test]
    fn suggestions_filter_by_query_words() {
        assert_eq!(suggestions("").len(), 5);
        let benford = suggestions("benford");
        assert_eq!(benford, vec!["Explain how Benford's Law detects fraud"]);
        let fraud = suggestions("Fraud");
        assert_eq!(fraud.len(), 4);
        assert_eq!(fraud[0], "Show fraud trends for last 30 days");
        assert!(suggestions("zzz").is_empty());
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let store = ConversationStore::new();
        let id = store.open(None).await;
        store.append(&id, ChatMessage::user("hi")).await;
        store.append(&id, ChatMessage::assistant("hello")).await;
        let history = store.get(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(store.open(Some(id.clone())).await, id);
        assert!(store.delete(&id).await);
        assert!(store.get(&id).await.is_none());
        assert!(!store.delete(&id).await);
    }

    #[tokio::test]
    async fn oldest_conversation_is_evicted_at_capacity() {
        let store = ConversationStore::with_capacity(2);
        let first = store.open(Some("first".into())).await;
        store.append(&first, ChatMessage::user("hi")).await;
        store.open(Some("second".into())).await;
        // Reopening an existing conversation does not count against the cap.
        store.open(Some("first".into())).await;
        assert_eq!(store.len().await, 2);

        store.append("third", ChatMessage::user("new")).await;
        assert_eq!(store.len().await, 2);
        assert!(store.get("first").await.is_none());
        assert!(store.get("second").await.is_some());
        assert_eq!(store.get("third").await.unwrap().len(), 1);

        assert!(store.delete("second").await);
        store.open(Some("fourth".into())).await;
        assert!(store.get("third").await.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[test]
    fn keywords_only_match_at_word_starts() {
        let assistant = Assistant::new().unwrap();
        assert_eq!(assistant.detect_intent("a sideshow of figures"), Intent::General);
        assert_eq!(assistant.detect_intent("SHOW flagged claims"), Intent::DataQuery);
        assert_eq!(assistant.detect_intent("Explain the (ML) scores"), Intent::Explanation);

        assert!(!contains_any("why is the html export empty", &["model", "ml", "machine learning"]));
        assert!(contains_any("Explain the ML model", &["model", "ml", "machine learning"]));
        assert!(contains_any("chart providers", &["provider"]));
        assert!(!contains_any("Plot by semimonthly totals", &["month"]));

        let reply = assistant.respond("why is the html export empty", &dashboard(), now());
        assert_eq!(reply.intent, Intent::Explanation);
        assert!(reply.message.starts_with("I can explain various aspects"));
        let reply = assistant.respond("Explain the ML model", &dashboard(), now());
        assert!(reply.message.starts_with("The machine learning component"));
    }
}
