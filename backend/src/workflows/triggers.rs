// Workflow triggers - the business event types workflows can subscribe to.

use chrono::{DateTime, Utc};
use fieldops_shared::EntityKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conditions::TriggerCondition;

/// Types of business events that can fire workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trigger_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Quote triggers
    QuoteSent,
    QuoteApproved,
    QuoteDeclined,
    QuoteConverted,

    // Lead triggers
    LeadCreated,
    LeadConverted,

    // Job triggers
    JobCreated,
    JobScheduled,
    JobStarted,
    JobCompleted,
    JobCancelled,

    // Invoice triggers
    InvoiceCreated,
    InvoiceSent,
    InvoiceOverdue,
    PaymentReceived,

    // Client triggers
    ClientCreated,

    // Cron-driven
    Scheduled,

    // Explicit invocation through the execute endpoint
    Manual,
}

/// A condition-gated subscription of one workflow to a trigger type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub config: serde_json::Value,
    pub sort_order: i32,
    #[sqlx(skip)]
    pub conditions: Vec<TriggerCondition>,
}

/// A transient domain event flowing from the CRUD layer (or the state
/// machine) into the automation engine. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub trigger_type: TriggerType,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl BusinessEvent {
    pub fn new(
        trigger_type: TriggerType,
        entity_type: EntityKind,
        entity_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            trigger_type,
            entity_type,
            entity_id,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Tick event for a cron-scheduled workflow.
    pub fn scheduled_tick(workflow_id: Uuid) -> Self {
        Self::new(
            TriggerType::Scheduled,
            EntityKind::Task,
            workflow_id,
            serde_json::json!({ "workflow_id": workflow_id }),
        )
    }

    /// Overdue-invoice event emitted by the daily scan.
    pub fn invoice_overdue(
        invoice_id: Uuid,
        client_id: Uuid,
        total: &str,
        days_overdue: i64,
    ) -> Self {
        Self::new(
            TriggerType::InvoiceOverdue,
            EntityKind::Invoice,
            invoice_id,
            serde_json::json!({
                "invoice_id": invoice_id,
                "client_id": client_id,
                "total": total,
                "days_overdue": days_overdue,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_type_serializes_snake_case() {
        let json = serde_json::to_string(&TriggerType::JobCompleted).unwrap();
        assert_eq!(json, "\"job_completed\"");

        let parsed: TriggerType = serde_json::from_str("\"invoice_overdue\"").unwrap();
        assert_eq!(parsed, TriggerType::InvoiceOverdue);
    }

    #[test]
    fn test_scheduled_tick_carries_workflow_id() {
        let id = Uuid::new_v4();
        let event = BusinessEvent::scheduled_tick(id);

        assert_eq!(event.trigger_type, TriggerType::Scheduled);
        assert_eq!(event.payload["workflow_id"], serde_json::json!(id));
    }
}
