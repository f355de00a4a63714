use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{Claim, ClaimStatus, ClaimStore, ListQuery, Page};
use crate::scoring::RiskLevel;

const CLAIMS_FILE: &str = "claims.json";

/// Claim store kept in memory and, when opened on a directory, mirrored to `claims.json`.
pub struct JsonClaimStore {
    path: Option<PathBuf>,
    claims: RwLock<HashMap<String, Claim>>,
}

impl JsonClaimStore {
    /// Store with no backing file; contents vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            claims: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) a store rooted at `data_dir`, loading any existing `claims.json`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(CLAIMS_FILE);
        let claims = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read claim store at {}", path.display()))?;
            serde_json::from_str::<HashMap<String, Claim>>(&raw)
                .with_context(|| format!("invalid JSON in claim store at {}", path.display()))?
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), claims = claims.len(), "claim store opened");
        Ok(Self {
            path: Some(path),
            claims: RwLock::new(claims),
        })
    }

    /// Seed the store with many claims at once (used for imports and synthetic data).
    pub async fn extend(&self, incoming: Vec<Claim>) -> Result<usize> {
        let count = incoming.len();
        self.commit(|claims| {
            for mut claim in incoming {
                if claim.claim_id.trim().is_empty() {
                    claim.claim_id = Uuid::new_v4().to_string();
                }
                claims.insert(claim.claim_id.clone(), claim);
            }
            Some(count)
        })
        .await
        .map(|count| count.unwrap_or_default())
    }

    /// Apply `change` to a copy of the map and swap it in once the copy is on disk.
    ///
    /// `change` returning `None` means nothing changed; the file is left alone.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut HashMap<String, Claim>) -> Option<T>,
    ) -> Result<Option<T>> {
        let mut claims = self.claims.write().await;
        let mut staged = claims.clone();
        let Some(outcome) = change(&mut staged) else {
            return Ok(None);
        };
        self.persist(&staged).await?;
        *claims = staged;
        Ok(Some(outcome))
    }

    async fn persist(&self, claims: &HashMap<String, Claim>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let ordered: BTreeMap<&String, &Claim> = claims.iter().collect();
        let body = serde_json::to_string_pretty(&ordered).context("failed to encode claims")?;
        // Write beside the store and rename so a failed write never truncates it.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, body)
            .await
            .with_context(|| format!("failed to write claim store at {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("failed to replace claim store at {}", path.display()))?;
        debug!(path = %path.display(), claims = claims.len(), "claim store persisted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClaimStore for JsonClaimStore {
    #[instrument(name = "store_claim", skip(self, claim))]
    async fn insert(&self, mut claim: Claim) -> Result<Claim> {
        if claim.claim_id.trim().is_empty() {
            claim.claim_id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        claim.created_at = now;
        claim.updated_at = now;

        let stored = claim.clone();
        self.commit(move |claims| {
            if claims.insert(claim.claim_id.clone(), claim).is_some() {
                debug!("replacing existing claim");
            }
            Some(())
        })
        .await?;
        Ok(stored)
    }

    async fn get(&self, claim_id: &str) -> Result<Option<Claim>> {
        Ok(self.claims.read().await.get(claim_id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Claim>> {
        let claims = self.claims.read().await;
        let mut matching: Vec<&Claim> = claims.values().filter(|c| query.matches(c)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.claim_id.cmp(&b.claim_id))
        });
        let total = matching.len();
        let start = query.page.saturating_sub(1).saturating_mul(query.page_size);
        let items = matching
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn delete(&self, claim_id: &str) -> Result<bool> {
        let removed = self
            .commit(|claims| claims.remove(claim_id).map(|_| ()))
            .await?;
        Ok(removed.is_some())
    }

    async fn update_status(&self, claim_id: &str, status: ClaimStatus) -> Result<Option<Claim>> {
        self.commit(|claims| {
            let claim = claims.get_mut(claim_id)?;
            claim.status = status;
            claim.updated_at = Utc::now();
            Some(claim.clone())
        })
        .await
    }

    async fn record_assessment(&self, claim_id: &str, level: RiskLevel) -> Result<bool> {
        let recorded = self
            .commit(|claims| {
                let claim = claims.get_mut(claim_id)?;
                claim.risk_level = Some(level);
                // Manual decisions outrank automated triage.
                if !matches!(claim.status, ClaimStatus::Approved | ClaimStatus::Rejected) {
                    claim.status = ClaimStatus::after_assessment(level);
                }
                claim.updated_at = Utc::now();
                Some(())
            })
            .await?;
        Ok(recorded.is_some())
    }

    async fn all(&self) -> Result<Vec<Claim>> {
        Ok(self.claims.read().await.values().cloned().collect())
    }
}
