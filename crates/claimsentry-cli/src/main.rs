use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use claimsentry_api::AppState;
use claimsentry_core::benford::BenfordAnalyzer;
use claimsentry_core::datagen::{ClaimGenerator, DEFAULT_FRAUD_RATE, DEFAULT_SEED};
use claimsentry_core::features::{ClaimHistory, FeatureEngineer};
use claimsentry_core::model::HeuristicModel;
use claimsentry_core::rules::StaticRuleRepository;
use claimsentry_core::{
    aggregate, render_analysis, render_risk_score, Claim, ComponentScores, FileRuleRepository,
    FraudDetector, JsonClaimStore, OutputFormat, RiskLevel, Rule, RuleEngine, RuleRepository,
    Settings,
};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "claimsentry",
    author,
    version,
    about = "Insurance claim fraud detection CLI"
)]
struct Cli {
    /// Settings file (TOML, YAML or JSON); `CLAIMSENTRY__*` variables still apply
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory containing rule packs (rules.json, watchlist.txt)
    #[arg(long = "rules-dir", value_name = "DIR", global = true)]
    rules_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Combine component scores into an overall risk score
    Score {
        /// Model score (0-100)
        #[arg(long)]
        ml: f64,
        /// Benford deviation score (0-100)
        #[arg(long)]
        benford: f64,
        /// Rule score (0-100)
        #[arg(long)]
        rules: f64,
        /// Model confidence (0-1)
        #[arg(long, default_value_t = 0.75)]
        confidence: f64,
        /// At least one rule fired
        #[arg(long)]
        flagged: bool,
        /// Emit the score as JSON
        #[arg(long)]
        json: bool,
    },
    /// Analyze a claim stored as JSON
    Analyze {
        /// Claim JSON file
        file: PathBuf,
        /// JSON array of earlier claims used for history features
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },
    /// List all loaded rules
    ListRules {
        /// Emit rules as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Generate synthetic claims as a JSON array
    Generate {
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long = "fraud-rate", default_value_t = DEFAULT_FRAUD_RATE)]
        fraud_rate: f64,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Write to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Human,
    Json,
    Yaml,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Human => OutputFormat::Human,
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.rules_dir {
        settings.rules_dir = dir;
    }

    match cli.command.unwrap_or(Commands::ListRules { json: false }) {
        Commands::Serve { host, port } => serve(settings, host, port).await?,
        Commands::Score {
            ml,
            benford,
            rules,
            confidence,
            flagged,
            json,
        } => score(&settings, ComponentScores::new(ml, benford, rules), confidence, flagged, json)?,
        Commands::Analyze {
            file,
            history,
            format,
        } => analyze(&settings, &file, history.as_deref(), format.into()).await?,
        Commands::ListRules { json } => list_rules(&settings.rules_dir, json).await?,
        Commands::Generate {
            count,
            fraud_rate,
            seed,
            output,
        } => generate(count, fraud_rate, seed, output.as_deref())?,
    }
    Ok(())
}

async fn serve(mut settings: Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    let state = AppState::from_settings(settings).await?;
    claimsentry_api::serve(state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
        }
        info!("shutting down");
    })
    .await
}

fn score(
    settings: &Settings,
    components: ComponentScores,
    confidence: f64,
    flagged: bool,
    json: bool,
) -> Result<()> {
    let score = aggregate(&components, confidence, flagged, &settings.scoring)?;
    if json {
        println!("{}", render_risk_score(&score, OutputFormat::Json)?);
        return Ok(());
    }
    println!("{}", level_badge(score.risk_level));
    print!("{}", render_risk_score(&score, OutputFormat::Human)?);
    Ok(())
}

async fn analyze(
    settings: &Settings,
    file: &Path,
    history: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let claim: Claim = read_json(file)?;
    claim.validate()?;
    let past: Vec<Claim> = match history {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let history = ClaimHistory::excluding(&past, &claim.claim_id);

    let engine = load_engine(&settings.rules_dir).await?;
    let detector = FraudDetector::new(Arc::new(JsonClaimStore::in_memory()), engine)
        .with_model(Box::new(HeuristicModel::new(settings.model.clone())))
        .with_features(FeatureEngineer::new(settings.features.clone()))
        .with_benford(BenfordAnalyzer::new(settings.benford.clone()))
        .with_scoring(settings.scoring)
        .context("invalid scoring configuration")?;
    let result = detector.assess(&claim, &history)?;

    if matches!(format, OutputFormat::Human) {
        println!("{}", level_badge(result.risk_score.risk_level));
    }
    print!("{}", render_analysis(&result, format)?);
    if !matches!(format, OutputFormat::Human) {
        println!();
    }
    Ok(())
}

async fn list_rules(rules_dir: &Path, json: bool) -> Result<()> {
    let mut rules = load_rules(rules_dir).await?;
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    println!(
        "{} rule(s) loaded from {}",
        rules.len(),
        rules_dir.display()
    );
    for rule in rules {
        println!(
            "- {id:<14} [{severity:8}] {kind:<18} :: {name}",
            id = rule.id,
            severity = rule.severity.as_str(),
            kind = rule.condition.kind(),
            name = rule.name,
        );
    }
    Ok(())
}

fn generate(count: usize, fraud_rate: f64, seed: u64, output: Option<&Path>) -> Result<()> {
    let claims = ClaimGenerator::with_seed(seed).generate(count, fraud_rate, Utc::now())?;
    let json = serde_json::to_string_pretty(&claims)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!(count = claims.len(), path = %path.display(), "synthetic claims written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Rule pack from `rules_dir`, or the built-in rules when the directory holds none.
async fn load_rules(rules_dir: &Path) -> Result<Vec<Rule>> {
    let repo = FileRuleRepository::new(rules_dir);
    let rules = RuleRepository::load_rules(&repo)
        .await
        .with_context(|| format!("failed to load rules from {}", rules_dir.display()))?;
    if rules.is_empty() {
        warn!(rules_dir = %rules_dir.display(), "no rule pack found, using built-in rules");
        return Ok(StaticRuleRepository::builtin().rules().to_vec());
    }
    Ok(rules)
}

async fn load_engine(rules_dir: &Path) -> Result<RuleEngine> {
    RuleEngine::compile(load_rules(rules_dir).await?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn level_badge(level: RiskLevel) -> String {
    let label = format!("{} RISK", level.as_str().to_uppercase());
    match level {
        RiskLevel::Low => label.green().bold().to_string(),
        RiskLevel::Medium => label.yellow().bold().to_string(),
        RiskLevel::High => label.red().bold().to_string(),
        RiskLevel::Critical => label.white().on_red().bold().to_string(),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
