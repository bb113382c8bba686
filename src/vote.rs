// vote.rs
//! Vote casting: keeps the one-vote-per-(user, poll) ledger and the per-option
//! counters consistent, then invalidates the poll's cached results.
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cache::ResultsCache;
use crate::error::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, Vote};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    /// First vote of this user on the poll.
    Created,
    /// The user's vote moved away from `from`.
    Moved { from: Uuid },
    /// Re-vote for the already selected option; nothing was written.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote: Vote,
    /// Counter of the voted option after the call settled.
    pub votes_count: i32,
    pub change: VoteChange,
}

pub struct VoteService {
    store: Arc<dyn Store>,
    cache: Arc<ResultsCache>,
}

impl VoteService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<ResultsCache>) -> Self {
        Self { store, cache }
    }

    #[instrument(skip(self))]
    pub async fn cast_vote(
        &self,
        user_id: Uuid,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> AppResult<VoteReceipt> {
        let receipt = self.apply(user_id, poll_id, option_id).await?;

        // Locks are released by now; the cache is never touched inside the transaction.
        match receipt.change {
            VoteChange::Unchanged => debug!("re-vote for the same option, nothing to do"),
            change => {
                self.cache.invalidate(poll_id).await;
                info!(?change, votes_count = receipt.votes_count, "vote recorded");
            }
        }

        Ok(receipt)
    }

    async fn apply(&self, user_id: Uuid, poll_id: Uuid, option_id: Uuid) -> AppResult<VoteReceipt> {
        // Lock order: poll, option, vote. Any early return drops `tx` and rolls back.
        let mut tx = self.store.begin_vote().await?;

        let poll = tx
            .lock_poll(poll_id)
            .await?
            .ok_or(AppError::NotFound("poll"))?;
        if poll.is_expired_at(Utc::now()) {
            return Err(AppError::InvalidOperation("Poll expired".into()));
        }

        let option = tx
            .lock_option(poll_id, option_id)
            .await?
            .ok_or(AppError::NotFound("option"))?;

        let receipt = match tx.lock_vote(user_id, poll_id).await? {
            None => {
                let vote = Vote {
                    id: Uuid::new_v4(),
                    user_id,
                    poll_id,
                    option_id: option.id,
                    voted_at: Utc::now(),
                };
                tx.insert_vote(&vote).await?;
                let votes_count = tx.adjust_votes_count(option.id, 1).await?;
                tx.record_audit(&AuditEntry::new(user_id, AuditAction::CastVote, vote.id))
                    .await?;

                VoteReceipt {
                    vote,
                    votes_count,
                    change: VoteChange::Created,
                }
            }
            Some(vote) if vote.option_id == option.id => {
                return Ok(VoteReceipt {
                    vote,
                    votes_count: option.votes_count,
                    change: VoteChange::Unchanged,
                });
            }
            Some(mut vote) => {
                let from = vote.option_id;
                tx.adjust_votes_count(from, -1).await?;
                tx.repoint_vote(vote.id, option.id).await?;
                let votes_count = tx.adjust_votes_count(option.id, 1).await?;
                tx.record_audit(&AuditEntry::new(user_id, AuditAction::ChangedVote, vote.id))
                    .await?;
                vote.option_id = option.id;

                VoteReceipt {
                    vote,
                    votes_count,
                    change: VoteChange::Moved { from },
                }
            }
        };

        tx.commit().await?;
        Ok(receipt)
    }
}
