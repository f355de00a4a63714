mod analysis;
mod chat;
mod claims;
mod dashboard;
pub mod error;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use claimsentry_core::benford::BenfordAnalyzer;
use claimsentry_core::chat::{Assistant, ConversationStore};
use claimsentry_core::features::FeatureEngineer;
use claimsentry_core::model::HeuristicModel;
use claimsentry_core::rules::StaticRuleRepository;
use claimsentry_core::{
    ClaimStore, FileRuleRepository, FraudDetector, JsonClaimStore, RuleEngine, RuleRepository,
    Settings,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn ClaimStore>,
    pub detector: Arc<FraudDetector>,
    pub assistant: Arc<Assistant>,
    pub conversations: Arc<ConversationStore>,
}

impl AppState {
    /// Wire the pipeline from an already-open store and compiled rules.
    pub fn new(settings: Settings, store: Arc<dyn ClaimStore>, engine: RuleEngine) -> Result<Self> {
        let detector = FraudDetector::new(Arc::clone(&store), engine)
            .with_model(Box::new(HeuristicModel::new(settings.model.clone())))
            .with_features(FeatureEngineer::new(settings.features.clone()))
            .with_benford(BenfordAnalyzer::new(settings.benford.clone()))
            .with_scoring(settings.scoring)
            .context("invalid scoring configuration")?;
        Ok(Self {
            settings: Arc::new(settings),
            store,
            detector: Arc::new(detector),
            assistant: Arc::new(Assistant::new()?),
            conversations: Arc::new(ConversationStore::new()),
        })
    }

    /// Open the configured store and rule pack, falling back to the built-in rules.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let store: Arc<dyn ClaimStore> = match &settings.storage.data_dir {
            Some(dir) => Arc::new(JsonClaimStore::open(dir.clone()).await?),
            None => Arc::new(JsonClaimStore::in_memory()),
        };

        let repo = FileRuleRepository::new(&settings.rules_dir);
        let mut rules = repo
            .load_rules()
            .await
            .with_context(|| format!("failed to load rules from {}", settings.rules_dir.display()))?;
        if rules.is_empty() {
            warn!(rules_dir = %settings.rules_dir.display(), "no rule pack found, using built-in rules");
            rules = StaticRuleRepository::builtin().load_rules().await?;
        }
        let engine = RuleEngine::compile(rules)?;
        info!(rules = engine.len(), "rule engine ready");
        Self::new(settings, store, engine)
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Hong Kong Insurance Fraud Detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "environment": state.settings.environment,
    }))
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(claims::router())
        .merge(analysis::router())
        .merge(dashboard::router())
        .merge(chat::router());

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .layer(cors_layer(&state.settings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = state.settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")
}
