// Job state endpoints - the HTTP surface of the state machine.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use fieldops_shared::{ChangeSource, Job, JobState, JobStateTransition};

use crate::error::ApiResult;
use crate::state_machine::{AllowedTransition, JobUpdates, TransitionRequest};
use crate::AppState;

pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/state-transitions", post(create_state_transition))
        .route("/:id/allowed-transitions", get(get_allowed_transitions))
        .route("/:id/state-history", get(get_state_history))
}

#[derive(Debug, Deserialize)]
pub struct StateTransitionPayload {
    pub to_state: JobState,
    pub changed_by: Option<Uuid>,
    pub changed_by_role: Option<String>,
    pub change_source: Option<ChangeSource>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub job_updates: Option<JobUpdates>,
}

#[derive(Debug, Serialize)]
pub struct StateTransitionResponse {
    pub job: Job,
    pub transition: JobStateTransition,
}

async fn create_state_transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StateTransitionPayload>,
) -> ApiResult<Json<StateTransitionResponse>> {
    let outcome = state
        .state_machine
        .transition(
            id,
            payload.to_state,
            TransitionRequest {
                changed_by: payload.changed_by,
                changed_by_role: payload.changed_by_role,
                change_source: payload.change_source,
                reason: payload.reason,
                notes: payload.notes,
                job_updates: payload.job_updates,
            },
        )
        .await?;

    Ok(Json(StateTransitionResponse {
        job: outcome.job,
        transition: outcome.transition,
    }))
}

#[derive(Debug, Serialize)]
pub struct AllowedTransitionsResponse {
    pub job_id: Uuid,
    pub current_state: JobState,
    pub allowed: Vec<AllowedTransition>,
}

async fn get_allowed_transitions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AllowedTransitionsResponse>> {
    let (job, allowed) = state.state_machine.allowed_transitions(id).await?;

    Ok(Json(AllowedTransitionsResponse {
        job_id: job.id,
        current_state: job.status,
        allowed,
    }))
}

#[derive(Debug, Serialize)]
pub struct StateHistoryResponse {
    pub job_id: Uuid,
    pub current_state: JobState,
    pub history: Vec<JobStateTransition>,
}

async fn get_state_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StateHistoryResponse>> {
    let (job, history) = state.state_machine.state_history(id).await?;

    Ok(Json(StateHistoryResponse {
        job_id: job.id,
        current_state: job.status,
        history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_payload_parses_with_minimal_fields() {
        let payload: StateTransitionPayload =
            serde_json::from_value(json!({"to_state": "scheduled"})).unwrap();

        assert_eq!(payload.to_state, JobState::Scheduled);
        assert!(payload.change_source.is_none());
        assert!(payload.job_updates.is_none());
    }

    #[test]
    fn test_transition_payload_parses_job_updates() {
        let payload: StateTransitionPayload = serde_json::from_value(json!({
            "to_state": "in_progress",
            "change_source": "automated",
            "job_updates": {"jha_acknowledged_at": "2026-03-02T08:00:00Z"}
        }))
        .unwrap();

        assert_eq!(payload.change_source, Some(ChangeSource::Automated));
        assert!(payload
            .job_updates
            .unwrap()
            .jha_acknowledged_at
            .is_some());
    }
}
