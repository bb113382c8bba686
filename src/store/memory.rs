// store/memory.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, VoteTx};
use crate::models::{
    AuditAction, AuditEntry, NewOption, NewPoll, OptionCount, OptionPatch, Poll, PollOption,
    PollPatch, Vote,
};

#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryState {
    polls: HashMap<Uuid, Poll>,
    options: HashMap<Uuid, PollOption>,
    votes: HashMap<Uuid, Vote>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn poll(&self, poll_id: Uuid) -> StoreResult<&Poll> {
        self.polls.get(&poll_id).ok_or(StoreError::NotFound("poll"))
    }

    fn push_option(&mut self, poll_id: Uuid, option_text: String) -> PollOption {
        let position = self
            .options
            .values()
            .filter(|option| option.poll_id == poll_id)
            .map(|option| option.position + 1)
            .max()
            .unwrap_or(0);

        let option = PollOption {
            id: Uuid::new_v4(),
            poll_id,
            option_text,
            votes_count: 0,
            position,
        };
        self.options.insert(option.id, option.clone());
        option
    }
}

/// Whole-store mutex; every transaction is serializable by construction.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            lock_timeout,
        }
    }

    async fn lock(&self) -> StoreResult<OwnedMutexGuard<MemoryState>> {
        tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| StoreError::Transient("timed out waiting for store lock".into()))
    }

    /// Runs `f` on a staged copy that replaces the live state only if `f` succeeds.
    async fn transact<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut MemoryState) -> StoreResult<T> + Send,
        T: Send,
    {
        let mut guard = self.lock().await?;
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        *guard = staged;
        Ok(out)
    }

    #[cfg(test)]
    pub async fn votes(&self) -> Vec<Vote> {
        self.state.lock().await.votes.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    #[cfg(test)]
    pub(crate) async fn hold_lock(&self) -> OwnedMutexGuard<MemoryState> {
        self.state.clone().lock_owned().await
    }
}

pub struct MemoryVoteTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl VoteTx for MemoryVoteTx {
    async fn lock_poll(&mut self, poll_id: Uuid) -> StoreResult<Option<Poll>> {
        Ok(self.staged.polls.get(&poll_id).cloned())
    }

    async fn lock_option(
        &mut self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> StoreResult<Option<PollOption>> {
        Ok(self
            .staged
            .options
            .get(&option_id)
            .filter(|option| option.poll_id == poll_id)
            .cloned())
    }

    async fn lock_vote(&mut self, user_id: Uuid, poll_id: Uuid) -> StoreResult<Option<Vote>> {
        Ok(self
            .staged
            .votes
            .values()
            .find(|vote| vote.user_id == user_id && vote.poll_id == poll_id)
            .cloned())
    }

    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()> {
        let duplicate = self
            .staged
            .votes
            .values()
            .any(|existing| existing.user_id == vote.user_id && existing.poll_id == vote.poll_id);
        if duplicate {
            return Err(StoreError::Transient("duplicate vote for user and poll".into()));
        }
        self.staged.votes.insert(vote.id, vote.clone());
        Ok(())
    }

    async fn repoint_vote(&mut self, vote_id: Uuid, option_id: Uuid) -> StoreResult<()> {
        let vote = self
            .staged
            .votes
            .get_mut(&vote_id)
            .ok_or(StoreError::NotFound("vote"))?;
        vote.option_id = option_id;
        Ok(())
    }

    async fn adjust_votes_count(&mut self, option_id: Uuid, delta: i32) -> StoreResult<i32> {
        let option = self
            .staged
            .options
            .get_mut(&option_id)
            .ok_or(StoreError::NotFound("option"))?;
        option.votes_count += delta;
        Ok(option.votes_count)
    }

    async fn record_audit(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        self.staged.audit.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryVoteTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin_vote(&self) -> StoreResult<Box<dyn VoteTx>> {
        let guard = self.lock().await?;
        let staged = guard.clone();
        Ok(Box::new(MemoryVoteTx { guard, staged }))
    }

    async fn create_poll(
        &self,
        actor: Uuid,
        new_poll: NewPoll,
    ) -> StoreResult<(Poll, Vec<PollOption>)> {
        self.transact(move |state| {
            let now = Utc::now();
            let poll = Poll {
                id: Uuid::new_v4(),
                question: new_poll.question,
                description: new_poll.description,
                category_id: new_poll.category_id,
                created_by: actor,
                is_public: new_poll.is_public,
                allow_multiple: new_poll.allow_multiple,
                expires_at: new_poll.expires_at,
                created_at: now,
                updated_at: now,
            };
            state.polls.insert(poll.id, poll.clone());

            let options: Vec<PollOption> = new_poll
                .options
                .into_iter()
                .map(|option| state.push_option(poll.id, option.option_text))
                .collect();

            state.audit.push(AuditEntry::new(actor, AuditAction::CreatedPoll, poll.id));
            Ok((poll, options))
        })
        .await
    }

    async fn get_poll(&self, poll_id: Uuid) -> StoreResult<Poll> {
        self.lock().await?.poll(poll_id).cloned()
    }

    async fn list_polls(&self, viewer: Uuid) -> StoreResult<Vec<Poll>> {
        let state = self.lock().await?;
        let mut polls: Vec<Poll> = state
            .polls
            .values()
            .filter(|poll| poll.is_visible_to(viewer))
            .cloned()
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(polls)
    }

    async fn update_poll(&self, actor: Uuid, poll_id: Uuid, patch: PollPatch) -> StoreResult<Poll> {
        self.transact(move |state| {
            let poll = state
                .polls
                .get_mut(&poll_id)
                .ok_or(StoreError::NotFound("poll"))?;
            patch.apply(poll);
            let poll = poll.clone();

            state.audit.push(AuditEntry::new(actor, AuditAction::UpdatedPoll, poll_id));
            Ok(poll)
        })
        .await
    }

    async fn delete_poll(&self, actor: Uuid, poll_id: Uuid) -> StoreResult<()> {
        self.transact(move |state| {
            state
                .polls
                .remove(&poll_id)
                .ok_or(StoreError::NotFound("poll"))?;
            state.options.retain(|_, option| option.poll_id != poll_id);
            state.votes.retain(|_, vote| vote.poll_id != poll_id);

            state.audit.push(AuditEntry::new(actor, AuditAction::DeletedPoll, poll_id));
            Ok(())
        })
        .await
    }

    async fn add_option(
        &self,
        actor: Uuid,
        poll_id: Uuid,
        new_option: NewOption,
    ) -> StoreResult<PollOption> {
        self.transact(move |state| {
            state.poll(poll_id)?;
            let option = state.push_option(poll_id, new_option.option_text);

            state.audit.push(AuditEntry::new(actor, AuditAction::CreatedOption, option.id));
            Ok(option)
        })
        .await
    }

    async fn get_option(&self, option_id: Uuid) -> StoreResult<PollOption> {
        self.lock()
            .await?
            .options
            .get(&option_id)
            .cloned()
            .ok_or(StoreError::NotFound("option"))
    }

    async fn update_option(
        &self,
        actor: Uuid,
        option_id: Uuid,
        patch: OptionPatch,
    ) -> StoreResult<PollOption> {
        self.transact(move |state| {
            let option = state
                .options
                .get_mut(&option_id)
                .ok_or(StoreError::NotFound("option"))?;
            option.option_text = patch.option_text;
            let option = option.clone();

            state.audit.push(AuditEntry::new(actor, AuditAction::UpdatedOption, option_id));
            Ok(option)
        })
        .await
    }

    async fn delete_option(&self, actor: Uuid, option_id: Uuid) -> StoreResult<()> {
        self.transact(move |state| {
            state
                .options
                .remove(&option_id)
                .ok_or(StoreError::NotFound("option"))?;
            state.votes.retain(|_, vote| vote.option_id != option_id);

            state.audit.push(AuditEntry::new(actor, AuditAction::DeletedOption, option_id));
            Ok(())
        })
        .await
    }

    async fn option_counts(&self, poll_id: Uuid) -> StoreResult<Vec<OptionCount>> {
        let state = self.lock().await?;
        let mut options: Vec<&PollOption> = state
            .options
            .values()
            .filter(|option| option.poll_id == poll_id)
            .collect();
        options.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));

        Ok(options
            .into_iter()
            .map(|option| OptionCount {
                id: option.id,
                option_text: option.option_text.clone(),
                votes_count: option.votes_count,
                total_votes: state
                    .votes
                    .values()
                    .filter(|vote| vote.option_id == option.id)
                    .count() as i64,
            })
            .collect())
    }
}
