// Workflow endpoints - CRUD with nested triggers and actions, manual
// execution, activation toggling, and template instantiation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use fieldops_shared::EntityKind;

use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::workflows::{
    ActionType, BusinessEvent, ConditionOperator, ExecutionSummary, TriggerType,
    WorkflowDefinition,
};
use crate::AppState;

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/templates", get(list_templates))
        .route("/from-template/:id", post(create_from_template))
        .route(
            "/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/:id/execute", post(execute_workflow))
        .route("/:id/toggle", post(toggle_workflow))
}

fn empty_config() -> serde_json::Value {
    serde_json::json!({})
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkflowPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_template: bool,
    pub template_category: Option<String>,
    /// 0 = unlimited
    #[serde(default)]
    pub max_executions_per_day: i32,
    /// 0 = no cooldown
    #[serde(default)]
    pub cooldown_minutes: i32,
    #[serde(default)]
    pub triggers: Vec<TriggerPayload>,
    #[serde(default)]
    pub actions: Vec<ActionPayload>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerPayload {
    pub trigger_type: TriggerType,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub conditions: Vec<ConditionPayload>,
}

#[derive(Debug, Deserialize)]
pub struct ConditionPayload {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ActionPayload {
    pub action_type: ActionType,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub delay_minutes: i32,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn validate_payload(payload: &WorkflowPayload) -> Result<(), AppError> {
    if let Err(errors) = payload.validate() {
        let mut details: HashMap<String, Vec<String>> = HashMap::new();
        for (field, field_errors) in errors.field_errors() {
            details.insert(
                field.to_string(),
                field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect(),
            );
        }
        return Err(AppError::ValidationError { details });
    }

    let mut builder = ValidationBuilder::new();

    if !payload.is_template && payload.triggers.is_empty() {
        builder = builder.error("triggers", "at least one trigger is required");
    }
    if payload.actions.is_empty() {
        builder = builder.error("actions", "at least one action is required");
    }
    if payload.max_executions_per_day < 0 {
        builder = builder.error("max_executions_per_day", "must be zero or positive");
    }
    if payload.cooldown_minutes < 0 {
        builder = builder.error("cooldown_minutes", "must be zero or positive");
    }
    for (index, trigger) in payload.triggers.iter().enumerate() {
        for (cindex, condition) in trigger.conditions.iter().enumerate() {
            if condition.field.trim().is_empty() {
                builder = builder.error(
                    &format!("triggers[{}].conditions[{}].field", index, cindex),
                    "field is required",
                );
            }
        }
    }
    for (index, action) in payload.actions.iter().enumerate() {
        if action.delay_minutes < 0 {
            builder = builder.error(
                &format!("actions[{}].delay_minutes", index),
                "must be zero or positive",
            );
        }
    }

    match builder.build() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn insert_workflow(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
    payload: &WorkflowPayload,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflows
            (id, name, description, is_active, is_template, template_category,
             max_executions_per_day, cooldown_minutes, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        "#,
    )
    .bind(workflow_id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.is_active)
    .bind(payload.is_template)
    .bind(&payload.template_category)
    .bind(payload.max_executions_per_day)
    .bind(payload.cooldown_minutes)
    .execute(&mut **tx)
    .await?;

    insert_children(tx, workflow_id, payload).await
}

async fn insert_children(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
    payload: &WorkflowPayload,
) -> Result<(), sqlx::Error> {
    for (index, trigger) in payload.triggers.iter().enumerate() {
        let trigger_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO workflow_triggers (id, workflow_id, trigger_type, config, sort_order)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(trigger_id)
        .bind(workflow_id)
        .bind(trigger.trigger_type)
        .bind(&trigger.config)
        .bind(index as i32)
        .execute(&mut **tx)
        .await?;

        for (cindex, condition) in trigger.conditions.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO trigger_conditions (id, trigger_id, field, operator, value, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(trigger_id)
            .bind(&condition.field)
            .bind(condition.operator)
            .bind(&condition.value)
            .bind(cindex as i32)
            .execute(&mut **tx)
            .await?;
        }
    }

    for (index, action) in payload.actions.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO workflow_actions
                (id, workflow_id, action_type, config, delay_minutes, sort_order, continue_on_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(action.action_type)
        .bind(&action.config)
        .bind(action.delay_minutes)
        .bind(index as i32)
        .bind(action.continue_on_error)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM workflows
        WHERE deleted_at IS NULL AND NOT is_template
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(&state.db_pool)
    .await?;

    let mut workflows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(workflow) = state.engine.load_workflow(id).await? {
            workflows.push(workflow);
        }
    }
    Ok(Json(workflows))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let workflow = state
        .engine
        .load_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;
    Ok(Json(workflow))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WorkflowPayload>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    validate_payload(&payload)?;

    let workflow_id = Uuid::new_v4();
    let mut tx = state.db_pool.begin().await?;
    insert_workflow(&mut tx, workflow_id, &payload).await?;
    tx.commit().await?;

    let workflow = state
        .engine
        .load_workflow(workflow_id)
        .await?
        .ok_or_else(|| AppError::InternalError("workflow vanished after insert".to_string()))?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowPayload>,
) -> ApiResult<Json<WorkflowDefinition>> {
    validate_payload(&payload)?;

    let mut tx = state.db_pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE workflows
        SET name = $2, description = $3, is_active = $4, is_template = $5,
            template_category = $6, max_executions_per_day = $7, cooldown_minutes = $8,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.is_active)
    .bind(payload.is_template)
    .bind(&payload.template_category)
    .bind(payload.max_executions_per_day)
    .bind(payload.cooldown_minutes)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Workflow".to_string()));
    }

    // triggers and actions are replaced wholesale on update
    sqlx::query("DELETE FROM workflow_triggers WHERE workflow_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM workflow_actions WHERE workflow_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    insert_children(&mut tx, id, &payload).await?;

    tx.commit().await?;

    let workflow = state
        .engine
        .load_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;
    Ok(Json(workflow))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query(
        "UPDATE workflows SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Workflow".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ManualExecutePayload {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    #[serde(default = "empty_config")]
    pub entity_data: serde_json::Value,
}

/// Manual trigger: runs the named workflow through the engine for the
/// given entity, skipping trigger matching since the caller picked the
/// workflow explicitly.
async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualExecutePayload>,
) -> ApiResult<Json<ExecutionSummary>> {
    let workflow = state
        .engine
        .load_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;

    let event = BusinessEvent::new(
        TriggerType::Manual,
        payload.entity_type,
        payload.entity_id,
        payload.entity_data,
    );

    let summary = state.engine.execute(&workflow, &event).await;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub id: Uuid,
    pub is_active: bool,
}

async fn toggle_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ToggleResponse>> {
    let is_active: Option<bool> = sqlx::query_scalar(
        r#"
        UPDATE workflows SET is_active = NOT is_active, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING is_active
        "#,
    )
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?;

    match is_active {
        Some(is_active) => Ok(Json(ToggleResponse { id, is_active })),
        None => Err(AppError::NotFound("Workflow".to_string())),
    }
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM workflows
        WHERE is_template AND deleted_at IS NULL
        ORDER BY template_category NULLS LAST, name
        "#,
    )
    .fetch_all(&state.db_pool)
    .await?;

    let mut templates = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(workflow) = state.engine.load_workflow(id).await? {
            templates.push(workflow);
        }
    }
    Ok(Json(templates))
}

#[derive(Debug, Default, Deserialize)]
pub struct FromTemplatePayload {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

/// Instantiate a template as a live workflow: same triggers,
/// conditions, and actions under fresh ids.
async fn create_from_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FromTemplatePayload>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    let template = state
        .engine
        .load_workflow(id)
        .await?
        .filter(|w| w.is_template)
        .ok_or_else(|| AppError::NotFound("Workflow template".to_string()))?;

    let clone = WorkflowPayload {
        name: payload.name.unwrap_or_else(|| template.name.clone()),
        description: template.description.clone(),
        is_active: payload.is_active.unwrap_or(true),
        is_template: false,
        template_category: None,
        max_executions_per_day: template.max_executions_per_day,
        cooldown_minutes: template.cooldown_minutes,
        triggers: template
            .triggers
            .iter()
            .map(|t| TriggerPayload {
                trigger_type: t.trigger_type,
                config: t.config.clone(),
                conditions: t
                    .conditions
                    .iter()
                    .map(|c| ConditionPayload {
                        field: c.field.clone(),
                        operator: c.operator,
                        value: c.value.clone(),
                    })
                    .collect(),
            })
            .collect(),
        actions: template
            .actions
            .iter()
            .map(|a| ActionPayload {
                action_type: a.action_type,
                config: a.config.clone(),
                delay_minutes: a.delay_minutes,
                continue_on_error: a.continue_on_error,
            })
            .collect(),
    };

    let workflow_id = Uuid::new_v4();
    let mut tx = state.db_pool.begin().await?;
    insert_workflow(&mut tx, workflow_id, &clone).await?;
    tx.commit().await?;

    let workflow = state
        .engine
        .load_workflow(workflow_id)
        .await?
        .ok_or_else(|| AppError::InternalError("workflow vanished after insert".to_string()))?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_payload() -> WorkflowPayload {
        serde_json::from_value(json!({
            "name": "Quote follow-up",
            "triggers": [{"trigger_type": "quote_sent"}],
            "actions": [{"action_type": "send_email", "config": {"to": "x@y.z", "subject": "s", "body": "b"}}]
        }))
        .unwrap()
    }

    #[test]
    fn test_payload_defaults() {
        let payload = base_payload();
        assert!(payload.is_active);
        assert!(!payload.is_template);
        assert_eq!(payload.max_executions_per_day, 0);
        assert_eq!(payload.actions[0].delay_minutes, 0);
        assert!(!payload.actions[0].continue_on_error);
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate_payload(&base_payload()).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut payload = base_payload();
        payload.name = String::new();
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn test_workflow_without_actions_rejected() {
        let mut payload = base_payload();
        payload.actions.clear();
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn test_template_may_omit_triggers() {
        let mut payload = base_payload();
        payload.is_template = true;
        payload.triggers.clear();
        assert!(validate_payload(&payload).is_ok());
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut payload = base_payload();
        payload.actions[0].delay_minutes = -5;
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn test_blank_condition_field_rejected() {
        let mut payload = base_payload();
        payload.triggers[0].conditions.push(ConditionPayload {
            field: "  ".to_string(),
            operator: ConditionOperator::Equals,
            value: json!("x"),
        });
        assert!(validate_payload(&payload).is_err());
    }
}
