// src/poll.rs
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::cache::ResultsCache;
use crate::error::{AppError, AppResult};
use crate::models::{
    NewOption, NewPoll, OptionPatch, Poll, PollDetail, PollOption, PollPatch, PollWithOptions,
};
use crate::store::Store;

const MAX_OPTION_TEXT: usize = 255;

fn validate_question(question: &str) -> AppResult<()> {
    if question.trim().is_empty() {
        return Err(AppError::Validation("question must not be blank".into()));
    }
    Ok(())
}

fn validate_option_text(option_text: &str) -> AppResult<()> {
    if option_text.trim().is_empty() {
        return Err(AppError::Validation("option_text must not be blank".into()));
    }
    if option_text.chars().count() > MAX_OPTION_TEXT {
        return Err(AppError::Validation(format!(
            "option_text must be at most {MAX_OPTION_TEXT} characters"
        )));
    }
    Ok(())
}

/// Poll and option management. Only the poll's creator may change it.
pub struct PollService {
    store: Arc<dyn Store>,
    cache: Arc<ResultsCache>,
}

impl PollService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<ResultsCache>) -> Self {
        Self { store, cache }
    }

    async fn owned_poll(&self, actor: Uuid, poll_id: Uuid) -> AppResult<Poll> {
        let poll = self.store.get_poll(poll_id).await?;
        if poll.created_by != actor {
            return Err(AppError::Forbidden);
        }
        Ok(poll)
    }

    async fn owned_option(&self, actor: Uuid, option_id: Uuid) -> AppResult<PollOption> {
        let option = self.store.get_option(option_id).await?;
        self.owned_poll(actor, option.poll_id).await?;
        Ok(option)
    }

    pub async fn list_polls(&self, viewer: Uuid) -> AppResult<Vec<Poll>> {
        Ok(self.store.list_polls(viewer).await?)
    }

    pub async fn create_poll(&self, actor: Uuid, new_poll: NewPoll) -> AppResult<PollWithOptions> {
        validate_question(&new_poll.question)?;
        for option in &new_poll.options {
            validate_option_text(&option.option_text)?;
        }

        let (poll, options) = self.store.create_poll(actor, new_poll).await?;
        info!(poll_id = %poll.id, options = options.len(), "poll created");
        Ok(PollWithOptions { poll, options })
    }

    pub async fn poll_detail(&self, poll_id: Uuid) -> AppResult<PollDetail> {
        let poll = self.store.get_poll(poll_id).await?;
        let options = self.store.option_counts(poll_id).await?;
        Ok(PollDetail { poll, options })
    }

    pub async fn update_poll(&self, actor: Uuid, poll_id: Uuid, patch: PollPatch) -> AppResult<Poll> {
        self.owned_poll(actor, poll_id).await?;
        if let Some(question) = &patch.question {
            validate_question(question)?;
        }

        let poll = self.store.update_poll(actor, poll_id, patch).await?;
        self.cache.invalidate(poll_id).await;
        info!(%poll_id, "poll updated");
        Ok(poll)
    }

    pub async fn delete_poll(&self, actor: Uuid, poll_id: Uuid) -> AppResult<()> {
        self.owned_poll(actor, poll_id).await?;

        self.store.delete_poll(actor, poll_id).await?;
        self.cache.invalidate(poll_id).await;
        info!(%poll_id, "poll deleted");
        Ok(())
    }

    pub async fn add_option(
        &self,
        actor: Uuid,
        poll_id: Uuid,
        new_option: NewOption,
    ) -> AppResult<PollOption> {
        self.owned_poll(actor, poll_id).await?;
        validate_option_text(&new_option.option_text)?;

        let option = self.store.add_option(actor, poll_id, new_option).await?;
        self.cache.invalidate(poll_id).await;
        info!(%poll_id, option_id = %option.id, "option added");
        Ok(option)
    }

    pub async fn update_option(
        &self,
        actor: Uuid,
        option_id: Uuid,
        patch: OptionPatch,
    ) -> AppResult<PollOption> {
        let current = self.owned_option(actor, option_id).await?;
        validate_option_text(&patch.option_text)?;

        let option = self.store.update_option(actor, option_id, patch).await?;
        self.cache.invalidate(current.poll_id).await;
        info!(poll_id = %current.poll_id, %option_id, "option updated");
        Ok(option)
    }

    /// Removes the option together with every vote cast for it.
    pub async fn delete_option(&self, actor: Uuid, option_id: Uuid) -> AppResult<()> {
        let option = self.owned_option(actor, option_id).await?;

        self.store.delete_option(actor, option_id).await?;
        self.cache.invalidate(option.poll_id).await;
        info!(poll_id = %option.poll_id, %option_id, "option deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::results::ResultsService;
    use crate::store::memory::MemoryStore;
    use crate::vote::VoteService;

    struct Harness {
        store: Arc<MemoryStore>,
        polls: PollService,
        votes: VoteService,
        results: ResultsService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(5)));
        let cache = Arc::new(ResultsCache::new(100, Duration::from_secs(30)));
        Harness {
            polls: PollService::new(store.clone(), cache.clone()),
            votes: VoteService::new(store.clone(), cache.clone()),
            results: ResultsService::new(store.clone(), cache),
            store,
        }
    }

    fn new_poll(question: &str, options: &[&str]) -> NewPoll {
        NewPoll {
            question: question.into(),
            description: Some("Test question".into()),
            category_id: None,
            is_public: true,
            allow_multiple: false,
            expires_at: None,
            options: options
                .iter()
                .map(|text| NewOption {
                    option_text: text.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_poll_with_options_is_audited() {
        let h = harness();
        let owner = Uuid::new_v4();

        let created = h
            .polls
            .create_poll(owner, new_poll("What is the best fruit?", &["Apple", "Banana"]))
            .await
            .unwrap();

        assert_eq!(created.options.len(), 2);
        assert_eq!(created.poll.created_by, owner);

        let log = h.store.audit_log().await;
        let last = log.last().unwrap();
        assert_eq!(last.action, "Created poll");
        assert_eq!(last.target_type, "Poll");
        assert_eq!(last.user_id, owner);
        assert_eq!(last.target_id, created.poll.id);
    }

    #[tokio::test]
    async fn blank_question_or_option_is_rejected() {
        let h = harness();
        let owner = Uuid::new_v4();

        let err = h.polls.create_poll(owner, new_poll("  ", &["A"])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = h.polls.create_poll(owner, new_poll("Q?", &[""])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let long = "x".repeat(MAX_OPTION_TEXT + 1);
        let err = h.polls.create_poll(owner, new_poll("Q?", &[long.as_str()])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(h.store.audit_log().await.is_empty());
    }

    #[tokio::test]
    async fn only_owner_can_update_or_delete() {
        let h = harness();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Old question?", &["A"])).await.unwrap();
        let poll_id = created.poll.id;

        let patch = PollPatch {
            question: Some("Hijacked".into()),
            ..PollPatch::default()
        };
        let err = h.polls.update_poll(stranger, poll_id, patch).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let err = h.polls.delete_poll(stranger, poll_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let blank = PollPatch {
            question: Some(" ".into()),
            ..PollPatch::default()
        };
        let err = h.polls.update_poll(stranger, poll_id, blank).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let patch = PollPatch {
            question: Some("Updated".into()),
            allow_multiple: Some(true),
            ..PollPatch::default()
        };
        let updated = h.polls.update_poll(owner, poll_id, patch).await.unwrap();
        assert_eq!(updated.question, "Updated");
        assert!(updated.allow_multiple);

        h.polls.delete_poll(owner, poll_id).await.unwrap();
        let err = h.polls.poll_detail(poll_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("poll")));
    }

    #[tokio::test]
    async fn updating_question_refreshes_results() {
        let h = harness();
        let owner = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Before?", &["A"])).await.unwrap();
        let poll_id = created.poll.id;
        assert_eq!(h.results.get_results(poll_id).await.unwrap().question, "Before?");

        let patch = PollPatch {
            question: Some("After?".into()),
            ..PollPatch::default()
        };
        h.polls.update_poll(owner, poll_id, patch).await.unwrap();

        assert_eq!(h.results.get_results(poll_id).await.unwrap().question, "After?");
    }

    #[tokio::test]
    async fn added_option_appears_in_results() {
        let h = harness();
        let owner = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Favorite drink?", &[])).await.unwrap();
        let poll_id = created.poll.id;
        assert!(h.results.get_results(poll_id).await.unwrap().options.is_empty());

        let option = h
            .polls
            .add_option(owner, poll_id, NewOption { option_text: "Coffee".into() })
            .await
            .unwrap();

        let results = h.results.get_results(poll_id).await.unwrap();
        assert_eq!(results.options.len(), 1);
        assert_eq!(results.options[0].id, option.id);
    }

    #[tokio::test]
    async fn adding_option_to_missing_poll_is_not_found() {
        let h = harness();

        let err = h
            .polls
            .add_option(Uuid::new_v4(), Uuid::new_v4(), NewOption { option_text: "Tea".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound("poll")));
    }

    #[tokio::test]
    async fn deleting_option_drops_its_votes() {
        let h = harness();
        let owner = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Q?", &["yes", "no"])).await.unwrap();
        let (poll_id, yes, no) = (created.poll.id, created.options[0].id, created.options[1].id);
        h.votes.cast_vote(Uuid::new_v4(), poll_id, yes).await.unwrap();
        h.votes.cast_vote(Uuid::new_v4(), poll_id, no).await.unwrap();
        assert_eq!(h.results.get_results(poll_id).await.unwrap().total_votes, 2);

        let err = h.polls.delete_option(Uuid::new_v4(), yes).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        h.polls.delete_option(owner, yes).await.unwrap();

        let results = h.results.get_results(poll_id).await.unwrap();
        assert_eq!(results.total_votes, 1);
        assert_eq!(results.options.len(), 1);
        assert_eq!(h.store.votes().await.len(), 1);
    }

    #[tokio::test]
    async fn detail_annotates_options_with_live_tally() {
        let h = harness();
        let owner = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Best color?", &["Red", "Blue"])).await.unwrap();
        h.votes
            .cast_vote(Uuid::new_v4(), created.poll.id, created.options[1].id)
            .await
            .unwrap();

        let detail = h.polls.poll_detail(created.poll.id).await.unwrap();

        assert_eq!(detail.options.len(), 2);
        assert_eq!(detail.options[0].total_votes, 0);
        assert_eq!(detail.options[1].total_votes, 1);
        assert_eq!(detail.options[1].votes_count, 1);
    }

    #[tokio::test]
    async fn renaming_option_requires_ownership() {
        let h = harness();
        let owner = Uuid::new_v4();
        let created = h.polls.create_poll(owner, new_poll("Q?", &["Tpyo"])).await.unwrap();
        let option_id = created.options[0].id;

        let patch = OptionPatch { option_text: "Typo".into() };
        let err = h.polls.update_option(Uuid::new_v4(), option_id, patch.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        // Ownership is checked before the payload.
        let blank = OptionPatch { option_text: " ".into() };
        let err = h.polls.update_option(Uuid::new_v4(), option_id, blank.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let err = h.polls.update_option(owner, option_id, blank).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let renamed = h.polls.update_option(owner, option_id, patch).await.unwrap();
        assert_eq!(renamed.option_text, "Typo");
    }
}
