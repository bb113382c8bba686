// store/postgres.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, VoteTx};
use crate::models::{
    AuditAction, AuditEntry, NewOption, NewPoll, OptionCount, OptionPatch, Poll, PollOption,
    PollPatch, Vote,
};

const POLL_COLUMNS: &str = "id, question, description, category_id, created_by, is_public, \
                            allow_multiple, expires_at, created_at, updated_at";
const OPTION_COLUMNS: &str = "id, poll_id, option_text, votes_count, position";
const VOTE_COLUMNS: &str = "id, user_id, poll_id, option_id, voted_at";

pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Opens a transaction whose row-lock waits give up after `lock_timeout`.
    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO audit_log (id, user_id, action, target_type, target_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.target_type)
    .bind(entry.target_id)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_option(
    conn: &mut PgConnection,
    poll_id: Uuid,
    option_text: &str,
    position: i32,
) -> StoreResult<PollOption> {
    let option = sqlx::query_as::<_, PollOption>(&format!(
        "INSERT INTO options (id, poll_id, option_text, votes_count, position) \
         VALUES ($1, $2, $3, 0, $4) RETURNING {OPTION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(poll_id)
    .bind(option_text)
    .bind(position)
    .fetch_one(conn)
    .await?;
    Ok(option)
}

async fn lock_poll_row(conn: &mut PgConnection, poll_id: Uuid) -> StoreResult<Option<Poll>> {
    let poll = sqlx::query_as::<_, Poll>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1 FOR UPDATE"
    ))
    .bind(poll_id)
    .fetch_optional(conn)
    .await?;
    Ok(poll)
}

pub struct PgVoteTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl VoteTx for PgVoteTx {
    async fn lock_poll(&mut self, poll_id: Uuid) -> StoreResult<Option<Poll>> {
        lock_poll_row(&mut self.tx, poll_id).await
    }

    async fn lock_option(
        &mut self,
        poll_id: Uuid,
        option_id: Uuid,
    ) -> StoreResult<Option<PollOption>> {
        let option = sqlx::query_as::<_, PollOption>(&format!(
            "SELECT {OPTION_COLUMNS} FROM options WHERE id = $1 AND poll_id = $2 FOR UPDATE"
        ))
        .bind(option_id)
        .bind(poll_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(option)
    }

    async fn lock_vote(&mut self, user_id: Uuid, poll_id: Uuid) -> StoreResult<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(&format!(
            "SELECT {VOTE_COLUMNS} FROM votes WHERE user_id = $1 AND poll_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(poll_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(vote)
    }

    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO votes (id, user_id, poll_id, option_id, voted_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(vote.id)
        .bind(vote.user_id)
        .bind(vote.poll_id)
        .bind(vote.option_id)
        .bind(vote.voted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn repoint_vote(&mut self, vote_id: Uuid, option_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE votes SET option_id = $2 WHERE id = $1")
            .bind(vote_id)
            .bind(option_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("vote"));
        }
        Ok(())
    }

    async fn adjust_votes_count(&mut self, option_id: Uuid, delta: i32) -> StoreResult<i32> {
        let votes_count: Option<i32> = sqlx::query_scalar(
            "UPDATE options SET votes_count = votes_count + $2 WHERE id = $1 RETURNING votes_count",
        )
        .bind(option_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;
        votes_count.ok_or(StoreError::NotFound("option"))
    }

    async fn record_audit(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        insert_audit(&mut self.tx, entry).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin_vote(&self) -> StoreResult<Box<dyn VoteTx>> {
        let tx = self.begin().await?;
        Ok(Box::new(PgVoteTx { tx }))
    }

    async fn create_poll(
        &self,
        actor: Uuid,
        new_poll: NewPoll,
    ) -> StoreResult<(Poll, Vec<PollOption>)> {
        let mut tx = self.begin().await?;
        let now = Utc::now();

        let poll = sqlx::query_as::<_, Poll>(&format!(
            "INSERT INTO polls ({POLL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             RETURNING {POLL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_poll.question)
        .bind(&new_poll.description)
        .bind(new_poll.category_id)
        .bind(actor)
        .bind(new_poll.is_public)
        .bind(new_poll.allow_multiple)
        .bind(new_poll.expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut options = Vec::with_capacity(new_poll.options.len());
        for (position, option) in new_poll.options.iter().enumerate() {
            options.push(insert_option(&mut tx, poll.id, &option.option_text, position as i32).await?);
        }

        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::CreatedPoll, poll.id)).await?;
        tx.commit().await?;
        Ok((poll, options))
    }

    async fn get_poll(&self, poll_id: Uuid) -> StoreResult<Poll> {
        sqlx::query_as::<_, Poll>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("poll"))
    }

    async fn list_polls(&self, viewer: Uuid) -> StoreResult<Vec<Poll>> {
        let polls = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE is_public OR created_by = $1 \
             ORDER BY created_at DESC, id"
        ))
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;
        Ok(polls)
    }

    async fn update_poll(&self, actor: Uuid, poll_id: Uuid, patch: PollPatch) -> StoreResult<Poll> {
        let mut tx = self.begin().await?;
        let mut poll = lock_poll_row(&mut tx, poll_id)
            .await?
            .ok_or(StoreError::NotFound("poll"))?;
        patch.apply(&mut poll);

        sqlx::query(
            "UPDATE polls SET question = $2, description = $3, category_id = $4, is_public = $5, \
             allow_multiple = $6, expires_at = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(poll.id)
        .bind(&poll.question)
        .bind(&poll.description)
        .bind(poll.category_id)
        .bind(poll.is_public)
        .bind(poll.allow_multiple)
        .bind(poll.expires_at)
        .bind(poll.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::UpdatedPoll, poll.id)).await?;
        tx.commit().await?;
        Ok(poll)
    }

    async fn delete_poll(&self, actor: Uuid, poll_id: Uuid) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        let result = sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("poll"));
        }

        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::DeletedPoll, poll_id)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_option(
        &self,
        actor: Uuid,
        poll_id: Uuid,
        new_option: NewOption,
    ) -> StoreResult<PollOption> {
        let mut tx = self.begin().await?;
        // The poll lock serializes position assignment.
        lock_poll_row(&mut tx, poll_id)
            .await?
            .ok_or(StoreError::NotFound("poll"))?;

        let position: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM options WHERE poll_id = $1",
        )
        .bind(poll_id)
        .fetch_one(&mut *tx)
        .await?;

        let option = insert_option(&mut tx, poll_id, &new_option.option_text, position).await?;
        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::CreatedOption, option.id)).await?;
        tx.commit().await?;
        Ok(option)
    }

    async fn get_option(&self, option_id: Uuid) -> StoreResult<PollOption> {
        sqlx::query_as::<_, PollOption>(&format!(
            "SELECT {OPTION_COLUMNS} FROM options WHERE id = $1"
        ))
        .bind(option_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("option"))
    }

    async fn update_option(
        &self,
        actor: Uuid,
        option_id: Uuid,
        patch: OptionPatch,
    ) -> StoreResult<PollOption> {
        let mut tx = self.begin().await?;
        let option = sqlx::query_as::<_, PollOption>(&format!(
            "UPDATE options SET option_text = $2 WHERE id = $1 RETURNING {OPTION_COLUMNS}"
        ))
        .bind(option_id)
        .bind(&patch.option_text)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("option"))?;

        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::UpdatedOption, option.id)).await?;
        tx.commit().await?;
        Ok(option)
    }

    async fn delete_option(&self, actor: Uuid, option_id: Uuid) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        let poll_id: Uuid = sqlx::query_scalar("SELECT poll_id FROM options WHERE id = $1")
            .bind(option_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("option"))?;
        // Same lock order as a vote: the cascade below touches vote rows.
        lock_poll_row(&mut tx, poll_id)
            .await?
            .ok_or(StoreError::NotFound("poll"))?;

        let result = sqlx::query("DELETE FROM options WHERE id = $1")
            .bind(option_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("option"));
        }

        insert_audit(&mut tx, &AuditEntry::new(actor, AuditAction::DeletedOption, option_id)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn option_counts(&self, poll_id: Uuid) -> StoreResult<Vec<OptionCount>> {
        let counts = sqlx::query_as::<_, OptionCount>(
            "SELECT o.id, o.option_text, o.votes_count, COUNT(v.id) AS total_votes \
             FROM options o LEFT JOIN votes v ON v.option_id = o.id \
             WHERE o.poll_id = $1 \
             GROUP BY o.id, o.option_text, o.votes_count, o.position \
             ORDER BY o.position, o.id",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }
}
