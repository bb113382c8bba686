// results.rs
use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cache::ResultsCache;
use crate::error::AppResult;
use crate::models::{OptionCount, OptionResult, ResultsSnapshot};
use crate::store::Store;

/// Share of `total_votes`, in percent rounded to two decimals. Zero when nobody voted.
pub fn percentage(option_votes: i64, total_votes: i64) -> f64 {
    if total_votes == 0 {
        return 0.0;
    }
    let share = option_votes as f64 / total_votes as f64 * 100.0;
    (share * 100.0).round() / 100.0
}

pub struct ResultsService {
    store: Arc<dyn Store>,
    cache: Arc<ResultsCache>,
}

impl ResultsService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<ResultsCache>) -> Self {
        Self { store, cache }
    }

    /// Cached snapshot if present, otherwise a fresh count from the vote ledger.
    #[instrument(skip(self))]
    pub async fn get_results(&self, poll_id: Uuid) -> AppResult<Arc<ResultsSnapshot>> {
        if let Some(snapshot) = self.cache.get(poll_id).await {
            return Ok(snapshot);
        }

        let token = self.cache.fill_token();
        let snapshot = Arc::new(self.aggregate(poll_id).await?);
        let kept = self
            .cache
            .set_unless_invalidated(token, poll_id, snapshot.clone(), self.cache.ttl())
            .await;
        debug!(kept, total_votes = snapshot.total_votes, "results recomputed");

        Ok(snapshot)
    }

    /// Counts ledger rows per option; the denormalized counter is reported but not trusted.
    pub async fn aggregate(&self, poll_id: Uuid) -> AppResult<ResultsSnapshot> {
        let poll = self.store.get_poll(poll_id).await?;
        let counts = self.store.option_counts(poll_id).await?;
        Ok(build_snapshot(poll_id, poll.question, counts))
    }
}

fn build_snapshot(poll_id: Uuid, question: String, counts: Vec<OptionCount>) -> ResultsSnapshot {
    let total_votes: i64 = counts.iter().map(|count| count.total_votes).sum();
    let options = counts
        .into_iter()
        .map(|count| OptionResult {
            percentage: percentage(count.total_votes, total_votes),
            id: count.id,
            option_text: count.option_text,
            votes_count: count.votes_count,
            total_votes: count.total_votes,
        })
        .collect();

    ResultsSnapshot {
        poll_id,
        question,
        options,
        total_votes,
    }
}
