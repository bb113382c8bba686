// models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub created_by: Uuid,
    pub is_public: bool,
    /// Stored and echoed back; a user still holds one vote per poll.
    pub allow_multiple: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    /// A poll with no expiry never closes.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.is_public || self.created_by == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub poll_id: Uuid,
    pub option_text: String,
    pub votes_count: i32,
    #[serde(skip_serializing)]
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: Uuid,
    pub user_id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub voted_at: DateTime<Utc>,
}

/// Per-option tally: the cached counter next to the live ledger count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OptionCount {
    pub id: Uuid,
    pub option_text: String,
    pub votes_count: i32,
    pub total_votes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreatedPoll,
    UpdatedPoll,
    DeletedPoll,
    CreatedOption,
    UpdatedOption,
    DeletedOption,
    CastVote,
    ChangedVote,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreatedPoll => "Created poll",
            AuditAction::UpdatedPoll => "Updated poll",
            AuditAction::DeletedPoll => "Deleted poll",
            AuditAction::CreatedOption => "Created option",
            AuditAction::UpdatedOption => "Updated option",
            AuditAction::DeletedOption => "Deleted option",
            AuditAction::CastVote => "Cast vote",
            AuditAction::ChangedVote => "Changed vote",
        }
    }

    pub fn target_type(&self) -> &'static str {
        match self {
            AuditAction::CreatedPoll | AuditAction::UpdatedPoll | AuditAction::DeletedPoll => {
                "Poll"
            }
            AuditAction::CreatedOption
            | AuditAction::UpdatedOption
            | AuditAction::DeletedOption => "Option",
            AuditAction::CastVote | AuditAction::ChangedVote => "Vote",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(user_id: Uuid, action: AuditAction, target_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action: action.as_str().to_string(),
            target_type: action.target_type().to_string(),
            target_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOption {
    pub option_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPoll {
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub options: Vec<NewOption>,
}

fn default_public() -> bool {
    true
}

/// Partial poll update. Nullable fields use `Some(None)` for an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollPatch {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub category_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub allow_multiple: Option<bool>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl PollPatch {
    pub fn apply(self, poll: &mut Poll) {
        if let Some(question) = self.question {
            poll.question = question;
        }
        if let Some(description) = self.description {
            poll.description = description;
        }
        if let Some(category_id) = self.category_id {
            poll.category_id = category_id;
        }
        if let Some(is_public) = self.is_public {
            poll.is_public = is_public;
        }
        if let Some(allow_multiple) = self.allow_multiple {
            poll.allow_multiple = allow_multiple;
        }
        if let Some(expires_at) = self.expires_at {
            poll.expires_at = expires_at;
        }
        poll.updated_at = Utc::now();
    }
}

fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionPatch {
    pub option_text: String,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub option_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub message: String,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub votes_count: i32,
}

#[derive(Debug, Serialize)]
pub struct PollWithOptions {
    #[serde(flatten)]
    pub poll: Poll,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Serialize)]
pub struct PollDetail {
    #[serde(flatten)]
    pub poll: Poll,
    pub options: Vec<OptionCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub id: Uuid,
    pub option_text: String,
    pub votes_count: i32,
    pub total_votes: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub poll_id: Uuid,
    pub question: String,
    pub options: Vec<OptionResult>,
    pub total_votes: i64,
}
