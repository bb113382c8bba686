// handlers.rs
use std::sync::Arc;

use axum::extract::{Path, State};
use http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::extract::Json;
use crate::models::{
    NewOption, NewPoll, OptionPatch, Poll, PollDetail, PollOption, PollPatch, PollWithOptions,
    ResultsSnapshot, VoteRequest, VoteResponse,
};
use crate::state::AppState;
use crate::vote::VoteChange;

type SharedState = State<Arc<AppState>>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Polls visible to the caller
pub async fn list_polls(
    State(state): SharedState,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<Poll>>> {
    Ok(Json(state.polls.list_polls(user).await?))
}

/// Create a poll together with its initial options
pub async fn create_poll(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Json(new_poll): Json<NewPoll>,
) -> AppResult<(StatusCode, Json<PollWithOptions>)> {
    let created = state.polls.create_poll(user, new_poll).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Poll with every option annotated with its live tally
pub async fn get_poll(
    State(state): SharedState,
    AuthUser(_): AuthUser,
    Path(poll_id): Path<Uuid>,
) -> AppResult<Json<PollDetail>> {
    Ok(Json(state.polls.poll_detail(poll_id).await?))
}

pub async fn update_poll(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(poll_id): Path<Uuid>,
    Json(patch): Json<PollPatch>,
) -> AppResult<Json<Poll>> {
    Ok(Json(state.polls.update_poll(user, poll_id, patch).await?))
}

pub async fn delete_poll(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(poll_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.polls.delete_poll(user, poll_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Append an option to an existing poll (owner only)
pub async fn add_option(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(poll_id): Path<Uuid>,
    Json(new_option): Json<NewOption>,
) -> AppResult<(StatusCode, Json<PollOption>)> {
    let option = state.polls.add_option(user, poll_id, new_option).await?;
    Ok((StatusCode::CREATED, Json(option)))
}

pub async fn update_option(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(option_id): Path<Uuid>,
    Json(patch): Json<OptionPatch>,
) -> AppResult<Json<PollOption>> {
    Ok(Json(state.polls.update_option(user, option_id, patch).await?))
}

pub async fn delete_option(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(option_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.polls.delete_option(user, option_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Vote for an option, or move an existing vote to it
pub async fn vote(
    State(state): SharedState,
    AuthUser(user): AuthUser,
    Path(poll_id): Path<Uuid>,
    Json(vote_data): Json<VoteRequest>,
) -> AppResult<Json<VoteResponse>> {
    let receipt = state
        .votes
        .cast_vote(user, poll_id, vote_data.option_id)
        .await?;

    let message = match receipt.change {
        VoteChange::Created => "Vote recorded",
        VoteChange::Moved { .. } => "Vote changed",
        VoteChange::Unchanged => "Vote unchanged",
    };

    Ok(Json(VoteResponse {
        message: message.to_string(),
        poll_id,
        option_id: receipt.vote.option_id,
        votes_count: receipt.votes_count,
    }))
}

/// Aggregated results, served from the short-lived cache when possible
pub async fn get_results(
    State(state): SharedState,
    AuthUser(_): AuthUser,
    Path(poll_id): Path<Uuid>,
) -> AppResult<Json<ResultsSnapshot>> {
    let snapshot = state.results.get_results(poll_id).await?;
    Ok(Json(ResultsSnapshot::clone(&snapshot)))
}
