// Automation engine - matches incoming business events to active
// workflows, enforces rate limits and cooldowns, and drives action
// execution.
//
// Each execution runs in its own task: actions within an execution are
// strictly ordered, executions interleave freely. Rate limiting is
// best-effort, not globally atomic; a burst of near-simultaneous events
// may transiently overshoot the daily cap.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::{ActionOutcome, AfterFailure, WorkflowAction};
use super::conditions;
use super::executor::ActionExecutor;
use super::logs::{AutomationLog, AutomationLogStore, LogStatus, NewActionLog};
use super::triggers::{BusinessEvent, WorkflowTrigger};
use crate::error::AppError;

/// A workflow with its triggers, conditions, and actions hydrated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_template: bool,
    pub template_category: Option<String>,
    pub max_executions_per_day: i32,
    pub cooldown_minutes: i32,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub triggers: Vec<WorkflowTrigger>,
    #[sqlx(skip)]
    pub actions: Vec<WorkflowAction>,
}

/// The result of one end-to-end execution, as returned by the manual
/// execute endpoint.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub status: LogStatus,
    pub logs: Vec<AutomationLog>,
}

/// Does any of the workflow's triggers subscribe to this event?
/// Conditions on a trigger are ANDed; a trigger with none always
/// matches its type.
pub fn trigger_matches(workflow: &WorkflowDefinition, event: &BusinessEvent) -> bool {
    workflow.triggers.iter().any(|t| {
        t.trigger_type == event.trigger_type
            && conditions::evaluate_all(&t.conditions, &event.payload)
    })
}

pub struct AutomationEngine {
    pool: PgPool,
    executor: ActionExecutor,
    logs: AutomationLogStore,
}

impl AutomationEngine {
    pub fn new(pool: PgPool, executor: ActionExecutor) -> Self {
        let logs = AutomationLogStore::new(pool.clone());
        Self {
            pool,
            executor,
            logs,
        }
    }

    pub fn log_store(&self) -> &AutomationLogStore {
        &self.logs
    }

    /// React to one business event: match workflows, apply limits, and
    /// spawn one execution task per qualifying workflow. Returns the
    /// execution ids that were started.
    pub async fn process_event(
        self: &Arc<Self>,
        event: BusinessEvent,
    ) -> Result<Vec<Uuid>, AppError> {
        let workflows = self.matching_workflows(&event).await?;
        info!(
            trigger = ?event.trigger_type,
            matched = workflows.len(),
            "processing business event"
        );

        let mut execution_ids = Vec::new();
        for workflow in workflows {
            if let Some(reason) = self.skip_reason(&workflow, &event).await? {
                warn!(workflow = %workflow.name, %reason, "skipping workflow");
                self.logs
                    .record_skipped(
                        Uuid::new_v4(),
                        workflow.id,
                        event.trigger_type,
                        None,
                        event.entity_type,
                        event.entity_id,
                        &reason,
                    )
                    .await?;
                continue;
            }

            let execution_id = Uuid::new_v4();
            execution_ids.push(execution_id);

            let engine = Arc::clone(self);
            let event = event.clone();
            tokio::spawn(async move {
                engine.run_execution(&workflow, &event, execution_id).await;
            });
        }

        Ok(execution_ids)
    }

    /// Run one workflow for one event and wait for the result. Used by
    /// the manual execute endpoint; bypasses matching and limits since
    /// the caller named the workflow explicitly.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        event: &BusinessEvent,
    ) -> ExecutionSummary {
        self.run_execution(workflow, event, Uuid::new_v4()).await
    }

    /// Entry point for cron-scheduled workflows: applies limits, then
    /// executes in a detached task.
    pub async fn trigger_scheduled(
        self: &Arc<Self>,
        workflow_id: Uuid,
        event: BusinessEvent,
    ) -> Result<(), AppError> {
        let Some(workflow) = self.load_workflow(workflow_id).await? else {
            warn!(%workflow_id, "scheduled workflow no longer exists");
            return Ok(());
        };
        if !workflow.is_active || workflow.is_template {
            return Ok(());
        }

        if let Some(reason) = self.skip_reason(&workflow, &event).await? {
            self.logs
                .record_skipped(
                    Uuid::new_v4(),
                    workflow.id,
                    event.trigger_type,
                    None,
                    event.entity_type,
                    event.entity_id,
                    &reason,
                )
                .await?;
            return Ok(());
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let execution_id = Uuid::new_v4();
            engine.run_execution(&workflow, &event, execution_id).await;
        });
        Ok(())
    }

    async fn run_execution(
        &self,
        workflow: &WorkflowDefinition,
        event: &BusinessEvent,
        execution_id: Uuid,
    ) -> ExecutionSummary {
        let mut actions = workflow.actions.clone();
        actions.sort_by_key(|a| a.sort_order);

        info!(
            workflow = %workflow.name,
            %execution_id,
            actions = actions.len(),
            "starting workflow execution"
        );

        let mut halted_from: Option<usize> = None;

        for (index, action) in actions.iter().enumerate() {
            let scheduled_at = (action.delay_minutes > 0)
                .then(|| Utc::now() + chrono::Duration::minutes(action.delay_minutes as i64));

            let config = ActionExecutor::render_config(action, event);

            let log_id = match self
                .logs
                .record_running(NewActionLog {
                    execution_id,
                    workflow_id: workflow.id,
                    trigger_type: event.trigger_type,
                    action,
                    entity_type: event.entity_type,
                    entity_id: event.entity_id,
                    input_data: config.clone(),
                    scheduled_at,
                })
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    error!(%execution_id, "could not record action log, aborting execution: {}", e);
                    break;
                }
            };

            // Delayed actions hold only this execution's task; once
            // scheduled they cannot be cancelled.
            if let Some(due) = scheduled_at {
                let wait = (due - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
            }

            let started = Instant::now();
            let outcome = self.executor.execute(action, &config, event).await;
            let duration_ms = started.elapsed().as_millis() as i64;

            match outcome {
                ActionOutcome::Completed { output } => {
                    if let Err(e) = self.logs.mark_completed(log_id, &output, duration_ms).await {
                        error!(%execution_id, "could not persist action result: {}", e);
                    }
                }
                ActionOutcome::Failed { error } => {
                    warn!(
                        workflow = %workflow.name,
                        action = ?action.action_type,
                        %error,
                        "action failed"
                    );
                    if let Err(e) = self.logs.mark_failed(log_id, &error, duration_ms).await {
                        error!(%execution_id, "could not persist action failure: {}", e);
                    }
                    match action.after_failure() {
                        AfterFailure::NextAction => {}
                        AfterFailure::HaltExecution => {
                            halted_from = Some(index + 1);
                            break;
                        }
                    }
                }
            }
        }

        if let Some(from) = halted_from {
            for abandoned in &actions[from..] {
                if let Err(e) = self
                    .logs
                    .record_skipped(
                        execution_id,
                        workflow.id,
                        event.trigger_type,
                        Some(abandoned),
                        event.entity_type,
                        event.entity_id,
                        "previous action failed",
                    )
                    .await
                {
                    error!(%execution_id, "could not record skipped action: {}", e);
                }
            }
        }

        let logs = self
            .logs
            .logs_for_execution(execution_id)
            .await
            .unwrap_or_default();
        let status = if logs.iter().any(|l| l.status == LogStatus::Failed) {
            LogStatus::Failed
        } else {
            LogStatus::Completed
        };

        ExecutionSummary {
            execution_id,
            status,
            logs,
        }
    }

    /// Why this workflow must not run for this event right now, if any
    /// limit applies. The daily cap uses a trailing 24h window.
    async fn skip_reason(
        &self,
        workflow: &WorkflowDefinition,
        event: &BusinessEvent,
    ) -> Result<Option<String>, sqlx::Error> {
        if workflow.max_executions_per_day > 0 {
            let since = Utc::now() - chrono::Duration::hours(24);
            let count = self.logs.executions_in_window(workflow.id, since).await?;
            if count >= workflow.max_executions_per_day as i64 {
                return Ok(Some(format!(
                    "daily execution limit of {} reached",
                    workflow.max_executions_per_day
                )));
            }
        }

        if workflow.cooldown_minutes > 0 {
            if let Some(last) = self
                .logs
                .last_completed_for_entity(workflow.id, event.entity_type, event.entity_id)
                .await?
            {
                let cutoff = Utc::now() - chrono::Duration::minutes(workflow.cooldown_minutes as i64);
                if last > cutoff {
                    return Ok(Some(format!(
                        "cooldown of {} minutes for this {} has not elapsed",
                        workflow.cooldown_minutes, event.entity_type
                    )));
                }
            }
        }

        Ok(None)
    }

    /// Active workflows with at least one matching, condition-passing
    /// trigger for this event.
    pub async fn matching_workflows(
        &self,
        event: &BusinessEvent,
    ) -> Result<Vec<WorkflowDefinition>, sqlx::Error> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT w.id
            FROM workflows w
            JOIN workflow_triggers t ON t.workflow_id = w.id
            WHERE w.is_active
              AND w.deleted_at IS NULL
              AND NOT w.is_template
              AND t.trigger_type = $1
            "#,
        )
        .bind(event.trigger_type)
        .fetch_all(&self.pool)
        .await?;

        let mut matched = Vec::new();
        for id in ids {
            if let Some(workflow) = self.load_workflow(id).await? {
                if trigger_matches(&workflow, event) {
                    matched.push(workflow);
                }
            }
        }
        Ok(matched)
    }

    /// Load one non-deleted workflow with triggers, conditions, and
    /// actions hydrated.
    pub async fn load_workflow(
        &self,
        id: Uuid,
    ) -> Result<Option<WorkflowDefinition>, sqlx::Error> {
        let workflow: Option<WorkflowDefinition> =
            sqlx::query_as("SELECT * FROM workflows WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(mut workflow) = workflow else {
            return Ok(None);
        };

        workflow.triggers = sqlx::query_as(
            "SELECT * FROM workflow_triggers WHERE workflow_id = $1 ORDER BY sort_order ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        for trigger in &mut workflow.triggers {
            trigger.conditions = sqlx::query_as(
                "SELECT * FROM trigger_conditions WHERE trigger_id = $1 ORDER BY sort_order ASC",
            )
            .bind(trigger.id)
            .fetch_all(&self.pool)
            .await?;
        }

        workflow.actions = sqlx::query_as(
            "SELECT * FROM workflow_actions WHERE workflow_id = $1 ORDER BY sort_order ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(workflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::actions::ActionType;
    use crate::workflows::conditions::{ConditionOperator, TriggerCondition};
    use crate::workflows::triggers::TriggerType;
    use fieldops_shared::EntityKind;
    use serde_json::json;

    fn workflow_with_trigger(
        trigger_type: TriggerType,
        conditions: Vec<TriggerCondition>,
    ) -> WorkflowDefinition {
        let workflow_id = Uuid::new_v4();
        WorkflowDefinition {
            id: workflow_id,
            name: "Completion follow-up".to_string(),
            description: None,
            is_active: true,
            is_template: false,
            template_category: None,
            max_executions_per_day: 0,
            cooldown_minutes: 0,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: None,
            triggers: vec![WorkflowTrigger {
                id: Uuid::new_v4(),
                workflow_id,
                trigger_type,
                config: json!({}),
                sort_order: 0,
                conditions,
            }],
            actions: vec![WorkflowAction::new(ActionType::SendEmail, json!({}))],
        }
    }

    fn job_completed_event(status: &str) -> BusinessEvent {
        BusinessEvent::new(
            TriggerType::JobCompleted,
            EntityKind::Job,
            Uuid::new_v4(),
            json!({"status": status}),
        )
    }

    #[test]
    fn test_matching_requires_trigger_type() {
        let workflow = workflow_with_trigger(TriggerType::QuoteSent, vec![]);
        assert!(!trigger_matches(&workflow, &job_completed_event("completed")));

        let workflow = workflow_with_trigger(TriggerType::JobCompleted, vec![]);
        assert!(trigger_matches(&workflow, &job_completed_event("completed")));
    }

    #[test]
    fn test_matching_applies_conditions() {
        let matching = workflow_with_trigger(
            TriggerType::JobCompleted,
            vec![TriggerCondition::new(
                "status",
                ConditionOperator::Equals,
                json!("completed"),
            )],
        );
        assert!(trigger_matches(&matching, &job_completed_event("completed")));

        let non_matching = workflow_with_trigger(
            TriggerType::JobCompleted,
            vec![TriggerCondition::new(
                "status",
                ConditionOperator::Equals,
                json!("cancelled"),
            )],
        );
        assert!(!trigger_matches(&non_matching, &job_completed_event("completed")));
    }

    #[test]
    fn test_any_trigger_may_match() {
        let workflow_id = Uuid::new_v4();
        let mut workflow = workflow_with_trigger(TriggerType::QuoteSent, vec![]);
        workflow.triggers.push(WorkflowTrigger {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_type: TriggerType::JobCompleted,
            config: json!({}),
            sort_order: 1,
            conditions: vec![],
        });

        assert!(trigger_matches(&workflow, &job_completed_event("completed")));
    }
}
