use claimsentry_core::ClaimStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: ClaimStatus,
}
