// Job state machine - the only writer of jobs.status.
//
// A transition is one read-validate-write transaction: the row is
// locked, the edge and guards are checked against the locked row, and
// the status update plus its audit row commit together. Entry side
// effects (auto-invoicing, business events) run after commit and can
// never roll the transition back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use fieldops_shared::{
    ChangeSource, DepositStatus, EntityKind, Job, JobState, JobStateTransition, PermitStatus,
};

use super::guards;
use crate::error::AppError;
use crate::events::EventBus;
use crate::services::invoicing::InvoiceService;
use crate::workflows::{BusinessEvent, TriggerType};

/// Caller-supplied context for a transition attempt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionRequest {
    pub changed_by: Option<Uuid>,
    pub changed_by_role: Option<String>,
    pub change_source: Option<ChangeSource>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub job_updates: Option<JobUpdates>,
}

/// Job fields that may be patched together with a transition.
/// Status is deliberately absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobUpdates {
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub assigned_crew_id: Option<Uuid>,
    pub jha_acknowledged_at: Option<DateTime<Utc>>,
    pub deposit_status: Option<DepositStatus>,
    pub permit_status: Option<PermitStatus>,
}

impl JobUpdates {
    fn apply(&self, job: &mut Job) {
        if let Some(v) = self.scheduled_start {
            job.scheduled_start = Some(v);
        }
        if let Some(v) = self.scheduled_end {
            job.scheduled_end = Some(v);
        }
        if let Some(v) = self.assigned_crew_id {
            job.assigned_crew_id = Some(v);
        }
        if let Some(v) = self.jha_acknowledged_at {
            job.jha_acknowledged_at = Some(v);
        }
        if let Some(v) = self.deposit_status {
            job.deposit_status = v;
        }
        if let Some(v) = self.permit_status {
            job.permit_status = v;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionOutcome {
    pub job: Job,
    pub transition: JobStateTransition,
}

/// A table edge out of the job's current state, annotated with whatever
/// currently blocks it. Empty `unmet_reasons` means the edge is
/// offerable right now.
#[derive(Debug, Serialize)]
pub struct AllowedTransition {
    pub to_state: JobState,
    pub unmet_reasons: Vec<String>,
}

pub struct JobStateMachine {
    pool: PgPool,
    invoicing: InvoiceService,
    bus: Arc<EventBus>,
}

impl JobStateMachine {
    pub fn new(pool: PgPool, invoicing: InvoiceService, bus: Arc<EventBus>) -> Self {
        Self {
            pool,
            invoicing,
            bus,
        }
    }

    /// Attempt to move a job to `to`. Fails without mutation on an
    /// illegal edge or an unmet guard.
    pub async fn transition(
        &self,
        job_id: Uuid,
        to: JobState,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let job: Job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        let from = job.status;
        if !from.allowed_transitions().contains(&to) {
            return Err(AppError::InvalidTransition { from, to });
        }

        let open_time_entries: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM time_entries WHERE job_id = $1 AND ended_at IS NULL",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        // Guards see the job as it will be persisted, so an
        // acknowledgement arriving with the same request counts.
        let mut updated = job.clone();
        if let Some(updates) = &request.job_updates {
            updates.apply(&mut updated);
        }

        let unmet = guards::unmet_guards(&updated, to, open_time_entries);
        if !unmet.is_empty() {
            return Err(AppError::BusinessRule { errors: unmet });
        }

        let now = Utc::now();
        updated.status = to;
        updated.last_state_change_at = now;
        updated.updated_at = Some(now);

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                scheduled_start = $3,
                scheduled_end = $4,
                assigned_crew_id = $5,
                jha_acknowledged_at = $6,
                deposit_status = $7,
                permit_status = $8,
                last_state_change_at = $9,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(updated.status)
        .bind(updated.scheduled_start)
        .bind(updated.scheduled_end)
        .bind(updated.assigned_crew_id)
        .bind(updated.jha_acknowledged_at)
        .bind(updated.deposit_status)
        .bind(updated.permit_status)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let transition = JobStateTransition {
            id: Uuid::new_v4(),
            job_id,
            from_state: from,
            to_state: to,
            changed_by: request.changed_by,
            changed_by_role: request.changed_by_role.clone(),
            change_source: request.change_source.unwrap_or(ChangeSource::Manual),
            reason: request.reason.clone(),
            notes: request.notes.clone(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO job_state_transitions
                (id, job_id, from_state, to_state, changed_by, changed_by_role,
                 change_source, reason, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transition.id)
        .bind(transition.job_id)
        .bind(transition.from_state)
        .bind(transition.to_state)
        .bind(transition.changed_by)
        .bind(&transition.changed_by_role)
        .bind(transition.change_source)
        .bind(&transition.reason)
        .bind(&transition.notes)
        .bind(transition.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            job_id = %job_id,
            from = %from,
            to = %to,
            "job state transition committed"
        );

        self.run_entry_effects(&updated, from).await;

        Ok(TransitionOutcome {
            job: updated,
            transition,
        })
    }

    /// Side effects of entering a state. Runs after commit: a failure
    /// here is logged for remediation, the transition stands.
    async fn run_entry_effects(&self, job: &Job, previous: JobState) {
        if job.status == JobState::Completed {
            match self.invoicing.create_draft_from_job(job.id).await {
                Ok(creation) if creation.created => {
                    info!(
                        job_id = %job.id,
                        invoice_id = %creation.invoice_id,
                        "draft invoice created for completed job"
                    );
                    self.bus.emit_business_event(BusinessEvent::new(
                        TriggerType::InvoiceCreated,
                        EntityKind::Invoice,
                        creation.invoice_id,
                        serde_json::json!({
                            "invoice_id": creation.invoice_id,
                            "job_id": job.id,
                            "client_id": job.client_id,
                            "auto_generated": true,
                        }),
                    ));
                }
                Ok(creation) => {
                    info!(
                        job_id = %job.id,
                        invoice_id = %creation.invoice_id,
                        "job already invoiced, skipping auto-invoice"
                    );
                }
                Err(e) => {
                    error!(job_id = %job.id, "auto-invoicing failed: {}", e);
                }
            }
        }

        let trigger = match job.status {
            JobState::Scheduled => Some(TriggerType::JobScheduled),
            JobState::InProgress => Some(TriggerType::JobStarted),
            JobState::Completed => Some(TriggerType::JobCompleted),
            JobState::Cancelled => Some(TriggerType::JobCancelled),
            JobState::Draft | JobState::OnHold => None,
        };

        if let Some(trigger_type) = trigger {
            self.bus.emit_business_event(BusinessEvent::new(
                trigger_type,
                EntityKind::Job,
                job.id,
                serde_json::json!({
                    "job_id": job.id,
                    "client_id": job.client_id,
                    "title": job.title,
                    "status": job.status,
                    "previous_status": previous,
                }),
            ));
        }
    }

    /// Every table edge from the job's current state, annotated with
    /// its currently unmet guards. Terminal states yield nothing.
    pub async fn allowed_transitions(
        &self,
        job_id: Uuid,
    ) -> Result<(Job, Vec<AllowedTransition>), AppError> {
        let job: Job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        let open_time_entries: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM time_entries WHERE job_id = $1 AND ended_at IS NULL",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        let allowed = job
            .status
            .allowed_transitions()
            .iter()
            .map(|&to_state| AllowedTransition {
                to_state,
                unmet_reasons: guards::unmet_guards(&job, to_state, open_time_entries),
            })
            .collect();

        Ok((job, allowed))
    }

    /// The job's audit log, oldest first.
    pub async fn state_history(
        &self,
        job_id: Uuid,
    ) -> Result<(Job, Vec<JobStateTransition>), AppError> {
        let job: Job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        let history: Vec<JobStateTransition> = sqlx::query_as(
            "SELECT * FROM job_state_transitions WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok((job, history))
    }
}

#[cfg(test)]
mod tests {
    use fieldops_shared::JobState;

    #[test]
    fn test_transition_table_edges() {
        use JobState::*;

        assert_eq!(Draft.allowed_transitions(), &[Scheduled, Cancelled]);
        assert_eq!(Scheduled.allowed_transitions(), &[InProgress, OnHold, Cancelled]);
        assert_eq!(InProgress.allowed_transitions(), &[OnHold, Completed, Cancelled]);
        assert_eq!(OnHold.allowed_transitions(), &[Scheduled, Cancelled]);
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        assert!(JobState::Completed.allowed_transitions().is_empty());
        assert!(JobState::Cancelled.allowed_transitions().is_empty());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_draft_cannot_jump_to_in_progress() {
        assert!(!JobState::Draft
            .allowed_transitions()
            .contains(&JobState::InProgress));
    }

    #[test]
    fn test_on_hold_resumes_via_scheduled() {
        assert!(JobState::OnHold
            .allowed_transitions()
            .contains(&JobState::Scheduled));
        assert!(!JobState::OnHold
            .allowed_transitions()
            .contains(&JobState::InProgress));
    }
}
