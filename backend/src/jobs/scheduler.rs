// Background scheduler - registers one cron job per scheduled-trigger
// workflow and the daily overdue-invoice scan.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::workflows::{AutomationEngine, BusinessEvent};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ScheduleRunner {
    pool: PgPool,
    engine: Arc<AutomationEngine>,
    bus: Arc<EventBus>,
}

impl ScheduleRunner {
    pub fn new(pool: PgPool, engine: Arc<AutomationEngine>, bus: Arc<EventBus>) -> Self {
        Self { pool, engine, bus }
    }

    /// Register all cron jobs and start ticking. The returned scheduler
    /// handle must be kept alive for the lifetime of the process.
    pub async fn start(self) -> Result<JobScheduler, ScheduleError> {
        let scheduler = JobScheduler::new().await?;

        let scheduled: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT w.id, t.config
            FROM workflows w
            JOIN workflow_triggers t ON t.workflow_id = w.id
            WHERE t.trigger_type = 'scheduled'
              AND w.is_active
              AND w.deleted_at IS NULL
              AND NOT w.is_template
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (workflow_id, config) in scheduled {
            let Some(expr) = config.get("cron").and_then(|c| c.as_str()).map(str::to_owned)
            else {
                warn!(%workflow_id, "scheduled trigger has no cron expression, skipping");
                continue;
            };

            let engine = self.engine.clone();
            let job = Job::new_async(expr.as_str(), move |_id, _lock| {
                let engine = engine.clone();
                Box::pin(async move {
                    let event = BusinessEvent::scheduled_tick(workflow_id);
                    if let Err(e) = engine.trigger_scheduled(workflow_id, event).await {
                        error!(%workflow_id, "scheduled workflow run failed: {:?}", e);
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!(%workflow_id, cron = %expr, "scheduled workflow registered");
        }

        // Overdue invoices flip to overdue once a day, each emitting an
        // invoice_overdue event for the engine.
        let pool = self.pool.clone();
        let bus = self.bus.clone();
        let overdue_scan = Job::new_async("0 0 6 * * *", move |_id, _lock| {
            let pool = pool.clone();
            let bus = bus.clone();
            Box::pin(async move {
                if let Err(e) = scan_overdue_invoices(&pool, &bus).await {
                    error!("overdue invoice scan failed: {}", e);
                }
            })
        })?;
        scheduler.add(overdue_scan).await?;

        scheduler.start().await?;
        info!("background scheduler started");
        Ok(scheduler)
    }
}

async fn scan_overdue_invoices(pool: &PgPool, bus: &EventBus) -> Result<(), sqlx::Error> {
    let flipped: Vec<(Uuid, Uuid, Decimal, i32)> = sqlx::query_as(
        r#"
        UPDATE invoices
        SET status = 'overdue', updated_at = NOW()
        WHERE status = 'sent' AND due_date < CURRENT_DATE
        RETURNING id, client_id, total, (CURRENT_DATE - due_date)
        "#,
    )
    .fetch_all(pool)
    .await?;

    let count = flipped.len();
    for (invoice_id, client_id, total, days_overdue) in flipped {
        bus.emit_business_event(BusinessEvent::invoice_overdue(
            invoice_id,
            client_id,
            &total.to_string(),
            days_overdue as i64,
        ));
    }

    if count > 0 {
        info!(count, "invoices flipped to overdue");
    }
    Ok(())
}
