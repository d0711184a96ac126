use axum::{extract::State, http::StatusCode, response::Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use fieldops_shared::EntityKind;

use crate::workflows::{BusinessEvent, TriggerType};
use crate::AppState;

pub mod automation_logs;
pub mod jobs;
pub mod workflows;

pub use automation_logs::automation_log_routes;
pub use jobs::job_routes;
pub use workflows::workflow_routes;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = crate::database::health_check(&state.db_pool).await;
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "database": db_ok,
        })),
    )
}

fn empty_payload() -> serde_json::Value {
    json!({})
}

/// Ingress for the CRUD layer: a state-affecting fact happened. The
/// caller gets 202 immediately; engine failures are logged, never
/// returned.
#[derive(Debug, Deserialize)]
pub struct EmitEventPayload {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

pub async fn emit_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EmitEventPayload>,
) -> StatusCode {
    state.event_bus.emit_business_event(BusinessEvent::new(
        payload.trigger_type,
        payload.entity_type,
        payload.entity_id,
        payload.payload,
    ));
    StatusCode::ACCEPTED
}
