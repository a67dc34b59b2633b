use async_trait::async_trait;

use crate::db::models::{MatchResult, MatchStats};
use crate::error::EngineResult;

/// Trait that every final-result provider must implement.
///
/// `Err(EngineError::DataUnavailable)` means "not published yet, ask again
/// next run"; any other error is a provider failure.
#[async_trait]
pub trait ResultProvider: Send + Sync {
    /// Final score and status for a match.
    async fn fetch_result(&self, match_id: &str) -> EngineResult<MatchResult>;

    /// Box-score stats (corners, cards) for a finished match.
    async fn fetch_stats(&self, match_id: &str) -> EngineResult<MatchStats>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
