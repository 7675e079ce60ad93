//! Candidate filter pipeline
//!
//! Applied to normalized candidates each tick, in fixed order: ledger
//! dedup, reply exclusion, age cutoff, then a stable ascending sort by
//! creation time.

use crate::model::Post;
use crate::ports::SyncLedger;

/// The fixed filter/order pipeline for one tick's candidates
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    /// Posts created strictly before this epoch second are dropped
    cutoff_epoch: i64,
}

impl FilterPipeline {
    pub fn new(cutoff_epoch: i64) -> Self {
        Self { cutoff_epoch }
    }

    pub fn cutoff_epoch(&self) -> i64 {
        self.cutoff_epoch
    }

    /// Reduce candidates to the ordered publish set for this tick
    pub async fn apply<L>(&self, ledger: &L, candidates: Vec<Post>) -> Vec<Post>
    where
        L: SyncLedger + ?Sized,
    {
        let mut kept = Vec::with_capacity(candidates.len());
        for post in candidates {
            if ledger.contains(&post.id).await {
                tracing::debug!(post_id = %post.id, "Already synced, dropping");
                continue;
            }
            // No replies are synchronized at all, pending dedicated
            // reply-threading support.
            if post.is_reply() {
                tracing::debug!(post_id = %post.id, "Reply, dropping");
                continue;
            }
            if post.created_at < self.cutoff_epoch {
                tracing::debug!(
                    post_id = %post.id,
                    created_at = post.created_at,
                    cutoff = self.cutoff_epoch,
                    "Older than cutoff, dropping"
                );
                continue;
            }
            kept.push(post);
        }

        // Stable: ties keep source-supplied relative order
        kept.sort_by_key(|p| p.created_at);
        kept
    }
}
