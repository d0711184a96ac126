// Workflow actions - the effects a workflow can perform, and the
// explicit outcome model driving execution control flow.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of actions a workflow can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "action_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    SendSms,
    SendNotification,
    Webhook,
    CreateTask,
    UpdateEntity,
    CreateInvoice,
    CreateJob,
    /// Removes the triggering entity; order it last, later actions
    /// referencing the entity would fail
    DeleteSource,
    /// Pure wait, no side effect
    Delay,
}

/// One configured step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowAction {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub action_type: ActionType,
    pub config: serde_json::Value,
    pub delay_minutes: i32,
    pub sort_order: i32,
    pub continue_on_error: bool,
}

impl WorkflowAction {
    pub fn new(action_type: ActionType, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            action_type,
            config,
            delay_minutes: 0,
            sort_order: 0,
            continue_on_error: false,
        }
    }

    pub fn with_delay(mut self, minutes: i32) -> Self {
        self.delay_minutes = minutes;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// What the execution does after this action fails.
    pub fn after_failure(&self) -> AfterFailure {
        if self.continue_on_error {
            AfterFailure::NextAction
        } else {
            AfterFailure::HaltExecution
        }
    }
}

/// Result of running one action: Running resolves to exactly one of
/// these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionOutcome {
    Completed { output: serde_json::Value },
    Failed { error: String },
}

impl ActionOutcome {
    pub fn completed(output: serde_json::Value) -> Self {
        Self::Completed { output }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Where control flow goes when an action has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFailure {
    NextAction,
    HaltExecution,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_builder() {
        let action = WorkflowAction::new(
            ActionType::SendEmail,
            json!({"to": "ops@example.com", "subject": "Job done", "body": "{{title}}"}),
        )
        .with_delay(15)
        .with_order(2);

        assert_eq!(action.action_type, ActionType::SendEmail);
        assert_eq!(action.delay_minutes, 15);
        assert_eq!(action.sort_order, 2);
        assert!(!action.continue_on_error);
    }

    #[test]
    fn test_failure_halts_unless_continue_on_error() {
        let strict = WorkflowAction::new(ActionType::Webhook, json!({}));
        assert_eq!(strict.after_failure(), AfterFailure::HaltExecution);

        let lenient = strict.clone().continue_on_error();
        assert_eq!(lenient.after_failure(), AfterFailure::NextAction);
    }

    #[test]
    fn test_action_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ActionType::DeleteSource).unwrap(),
            "\"delete_source\""
        );
        let parsed: ActionType = serde_json::from_str("\"send_sms\"").unwrap();
        assert_eq!(parsed, ActionType::SendSms);
    }

    #[test]
    fn test_outcome_states() {
        assert!(!ActionOutcome::completed(json!({"delivered": true})).is_failed());
        assert!(ActionOutcome::failed("timeout").is_failed());
    }
}
