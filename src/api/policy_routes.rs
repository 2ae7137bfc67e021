//! Operator policy endpoints wrapping `PolicyOrchestrator` (spec §6).

use crate::api::AppState;
use crate::error::PolicyError;
use crate::policy::{ApplyOutcome, Policy, PolicyIntent};
use crate::publish::Topic;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// `?force=true` bypasses conflict rejection (spec §4.5 step 3, §6).
#[derive(Debug, Deserialize)]
pub struct ForceParam {
    #[serde(default)]
    force: bool,
}

fn now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

fn status_for(err: &PolicyError) -> StatusCode {
    match err {
        PolicyError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PolicyError::ConflictDetected(_) => StatusCode::CONFLICT,
        PolicyError::NotFound(_) => StatusCode::NOT_FOUND,
        PolicyError::NoHistory(_) => StatusCode::CONFLICT,
    }
}

fn err_response(err: PolicyError) -> (StatusCode, Json<serde_json::Value>) {
    let status = status_for(&err);
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

async fn emit_policy_event(state: &AppState, event: &str, policy: &Policy) {
    let payload = serde_json::json!({
        "event": event,
        "policy_id": policy.policy_id,
        "version": policy.version,
        "status": policy.status,
        "timestamp_ns": now_ns(),
    });
    let _ = state.log.publish(Topic::PolicyEvents, payload);
}

pub async fn create_policy(
    State(state): State<AppState>,
    Query(ForceParam { force }): Query<ForceParam>,
    Json(intent): Json<PolicyIntent>,
) -> Result<Json<ApplyOutcome>, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state
        .orchestrator
        .create_policy(intent, now_ns(), "operator", force)
        .await
        .map_err(err_response)?;
    emit_policy_event(&state, "created", &outcome.policy).await;
    Ok(Json(outcome))
}

pub async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(ForceParam { force }): Query<ForceParam>,
    Json(mut intent): Json<PolicyIntent>,
) -> Result<Json<ApplyOutcome>, (StatusCode, Json<serde_json::Value>)> {
    intent.id = id;
    let outcome = state
        .orchestrator
        .update_policy(intent, now_ns(), "operator", force)
        .await
        .map_err(err_response)?;
    emit_policy_event(&state, "updated", &outcome.policy).await;
    Ok(Json(outcome))
}

pub async fn delete_policy(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state.orchestrator.delete_policy(&id, now_ns()).await.map_err(err_response)?;
    let payload = serde_json::json!({ "event": "deleted", "policy_id": id, "timestamp_ns": now_ns() });
    let _ = state.log.publish(Topic::PolicyEvents, payload);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rollback_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApplyOutcome>, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state.orchestrator.rollback_policy(&id, now_ns()).await.map_err(err_response)?;
    emit_policy_event(&state, "rolled_back", &outcome.policy).await;
    Ok(Json(outcome))
}

pub async fn get_policy(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Policy>, StatusCode> {
    state.orchestrator.get_policy(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn list_policies(State(state): State<AppState>) -> Json<Vec<Policy>> {
    Json(state.orchestrator.list_policies())
}

pub async fn validate_intent(State(state): State<AppState>, Json(intent): Json<PolicyIntent>) -> Json<serde_json::Value> {
    let result = state.orchestrator.validate_intent(&intent, now_ns());
    Json(serde_json::json!(result))
}

pub async fn check_conflicts(State(state): State<AppState>, Json(intent): Json<PolicyIntent>) -> Json<serde_json::Value> {
    let conflicts = state.orchestrator.check_conflicts_for(&intent, now_ns());
    Json(serde_json::json!({ "conflicts": conflicts }))
}
