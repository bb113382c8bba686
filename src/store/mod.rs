//! Storage seam for polls, options, the vote ledger and the audit trail.
//!
//! Two backends implement [`Store`]:
//! - [`postgres::PostgresStore`]: the durable store, row locks via `SELECT ... FOR UPDATE`.
//! - [`memory::MemoryStore`]: a single mutex-guarded state for local runs and tests.
//!
//! Vote casting is the only multi-row read-modify-write path, so it gets its own
//! transaction handle ([`VoteTx`]) exposing the locking primitives the vote service
//! sequences. Every other mutation is a single store call that commits its own audit
//! entry in the same transaction.
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditEntry, NewOption, NewPoll, OptionCount, OptionPatch, Poll, PollOption, PollPatch, Vote,
};

pub mod memory;
pub mod postgres;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Lock wait timeout, serialization failure or similar. Nothing was applied.
    #[error("transient conflict: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Postgres error codes that mean "retry the whole transaction".
const TRANSIENT_CODES: [&str; 4] = [
    "55P03", // lock_not_available (lock_timeout)
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation racing a concurrent insert
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::PoolTimedOut => Some("connection pool timed out".to_string()),
            sqlx::Error::Database(db_err) => db_err
                .code()
                .filter(|code| TRANSIENT_CODES.iter().any(|t| &**code == *t))
                .map(|_| db_err.message().to_string()),
            _ => None,
        };

        match transient {
            Some(reason) => StoreError::Transient(reason),
            None => StoreError::Database(err),
        }
    }
}

/// Transaction over the rows a single vote touches.
///
/// Callers lock in the order poll, option, vote. Dropping the handle without
/// [`VoteTx::commit`] discards every change made through it.
#[async_trait]
pub trait VoteTx: Send {
    async fn lock_poll(&mut self, poll_id: Uuid) -> StoreResult<Option<Poll>>;

    /// Only returns the option if it belongs to `poll_id`.
    async fn lock_option(&mut self, poll_id: Uuid, option_id: Uuid)
        -> StoreResult<Option<PollOption>>;

    async fn lock_vote(&mut self, user_id: Uuid, poll_id: Uuid) -> StoreResult<Option<Vote>>;

    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()>;

    async fn repoint_vote(&mut self, vote_id: Uuid, option_id: Uuid) -> StoreResult<()>;

    /// Relative counter update; returns the counter after the change.
    async fn adjust_votes_count(&mut self, option_id: Uuid, delta: i32) -> StoreResult<i32>;

    async fn record_audit(&mut self, entry: &AuditEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin_vote(&self) -> StoreResult<Box<dyn VoteTx>>;

    async fn create_poll(
        &self,
        actor: Uuid,
        new_poll: NewPoll,
    ) -> StoreResult<(Poll, Vec<PollOption>)>;

    async fn get_poll(&self, poll_id: Uuid) -> StoreResult<Poll>;

    /// Public polls plus the viewer's own, newest first.
    async fn list_polls(&self, viewer: Uuid) -> StoreResult<Vec<Poll>>;

    async fn update_poll(&self, actor: Uuid, poll_id: Uuid, patch: PollPatch) -> StoreResult<Poll>;

    async fn delete_poll(&self, actor: Uuid, poll_id: Uuid) -> StoreResult<()>;

    async fn add_option(
        &self,
        actor: Uuid,
        poll_id: Uuid,
        new_option: NewOption,
    ) -> StoreResult<PollOption>;

    async fn get_option(&self, option_id: Uuid) -> StoreResult<PollOption>;

    async fn update_option(
        &self,
        actor: Uuid,
        option_id: Uuid,
        patch: OptionPatch,
    ) -> StoreResult<PollOption>;

    async fn delete_option(&self, actor: Uuid, option_id: Uuid) -> StoreResult<()>;

    /// Options of a poll in display order, with `total_votes` counted from the ledger.
    async fn option_counts(&self, poll_id: Uuid) -> StoreResult<Vec<OptionCount>>;
}
