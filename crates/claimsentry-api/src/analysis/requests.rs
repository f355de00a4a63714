use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub claim_id: String,
    #[serde(default)]
    pub force_reanalysis: bool,
}

/// Most claims one batch request may analyze.
pub const MAX_BATCH_CLAIMS: usize = 100;

/// `claim_ids` is a comma separated list.
#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub claim_ids: String,
}

impl BatchQuery {
    pub fn ids(&self) -> Vec<String> {
        self.claim_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
