// Automation logs - one row per action execution (or per skipped
// execution), plus the read-only stats aggregation over them.

use chrono::{DateTime, NaiveDate, Utc};
use fieldops_shared::EntityKind;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::actions::{ActionType, WorkflowAction};
use super::triggers::TriggerType;
use crate::pagination::PaginationParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AutomationLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub action_type: Option<ActionType>,
    pub action_id: Option<Uuid>,
    pub triggered_by_entity_type: EntityKind,
    pub triggered_by_entity_id: Uuid,
    pub status: LogStatus,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Set when the action was delayed; records when it was due to fire
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Fields for a fresh `running` action log row
#[derive(Debug)]
pub struct NewActionLog<'a> {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub action: &'a WorkflowAction,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub input_data: serde_json::Value,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Filters accepted by the log listing endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<LogStatus>,
    pub action_type: Option<ActionType>,
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AutomationLogStore {
    pool: PgPool,
}

impl AutomationLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a `running` row before an action is invoked.
    pub async fn record_running(&self, log: NewActionLog<'_>) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO automation_logs
                (id, execution_id, workflow_id, trigger_type, action_type, action_id,
                 triggered_by_entity_type, triggered_by_entity_id, status, input_data,
                 scheduled_at, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'running', $9, $10, NOW())
            "#,
        )
        .bind(id)
        .bind(log.execution_id)
        .bind(log.workflow_id)
        .bind(log.trigger_type)
        .bind(log.action.action_type)
        .bind(log.action.id)
        .bind(log.entity_type)
        .bind(log.entity_id)
        .bind(&log.input_data)
        .bind(log.scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_completed(
        &self,
        log_id: Uuid,
        output: &serde_json::Value,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_logs
            SET status = 'completed', output_data = $2, duration_ms = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(log_id)
        .bind(output)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        log_id: Uuid,
        error: &str,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_logs
            SET status = 'failed', error_message = $2, duration_ms = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(log_id)
        .bind(error)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One `skipped` row for a whole execution that never ran (rate
    /// limit or cooldown), or for an action abandoned after a halt.
    pub async fn record_skipped(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        action: Option<&WorkflowAction>,
        entity_type: EntityKind,
        entity_id: Uuid,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO automation_logs
                (id, execution_id, workflow_id, trigger_type, action_type, action_id,
                 triggered_by_entity_type, triggered_by_entity_id, status, error_message,
                 started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'skipped', $9, NOW(), NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(execution_id)
        .bind(workflow_id)
        .bind(trigger_type)
        .bind(action.map(|a| a.action_type))
        .bind(action.map(|a| a.id))
        .bind(entity_type)
        .bind(entity_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Distinct executions that actually ran for a workflow since the
    /// window start. Skipped rows don't count: they never ran actions.
    pub async fn executions_in_window(
        &self,
        workflow_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT execution_id) FROM automation_logs
            WHERE workflow_id = $1 AND started_at >= $2 AND status <> 'skipped'
            "#,
        )
        .bind(workflow_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
    }

    /// When this workflow last completed an action for this entity.
    pub async fn last_completed_for_entity(
        &self,
        workflow_id: Uuid,
        entity_type: EntityKind,
        entity_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT MAX(completed_at) FROM automation_logs
            WHERE workflow_id = $1
              AND triggered_by_entity_type = $2
              AND triggered_by_entity_id = $3
              AND status = 'completed'
            "#,
        )
        .bind(workflow_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn logs_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<AutomationLog>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM automation_logs WHERE execution_id = $1 ORDER BY started_at ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Filtered, paginated listing, newest first.
    pub async fn query(
        &self,
        filter: &LogFilter,
        pagination: &PaginationParams,
    ) -> Result<(Vec<AutomationLog>, i64), sqlx::Error> {
        const WHERE_CLAUSE: &str = r#"
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::log_status IS NULL OR status = $2)
              AND ($3::action_type IS NULL OR action_type = $3)
              AND ($4::entity_kind IS NULL OR triggered_by_entity_type = $4)
              AND ($5::uuid IS NULL OR triggered_by_entity_id = $5)
              AND ($6::timestamptz IS NULL OR started_at >= $6)
              AND ($7::timestamptz IS NULL OR started_at <= $7)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM automation_logs {}",
            WHERE_CLAUSE
        ))
        .bind(filter.workflow_id)
        .bind(filter.status)
        .bind(filter.action_type)
        .bind(filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&self.pool)
        .await?;

        let logs: Vec<AutomationLog> = sqlx::query_as(&format!(
            "SELECT * FROM automation_logs {} ORDER BY started_at DESC LIMIT $8 OFFSET $9",
            WHERE_CLAUSE
        ))
        .bind(filter.workflow_id)
        .bind(filter.status)
        .bind(filter.action_type)
        .bind(filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((logs, total))
    }

    /// Aggregate execution statistics over the trailing `days`.
    pub async fn stats(
        &self,
        days: i64,
        workflow_id: Option<Uuid>,
    ) -> Result<AutomationStats, sqlx::Error> {
        let since = Utc::now() - chrono::Duration::days(days.max(1));

        let (successful, failed, skipped): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'skipped')
            FROM automation_logs
            WHERE started_at >= $1 AND ($2::uuid IS NULL OR workflow_id = $2)
            "#,
        )
        .bind(since)
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;

        let (avg_ms, min_ms, max_ms): (Option<f64>, Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT AVG(duration_ms)::float8, MIN(duration_ms), MAX(duration_ms)
            FROM automation_logs
            WHERE started_at >= $1
              AND ($2::uuid IS NULL OR workflow_id = $2)
              AND duration_ms IS NOT NULL
            "#,
        )
        .bind(since)
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;

        let per_day: Vec<(NaiveDate, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                started_at::date,
                COUNT(DISTINCT execution_id),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'skipped')
            FROM automation_logs
            WHERE started_at >= $1 AND ($2::uuid IS NULL OR workflow_id = $2)
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(since)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let per_action_type: Vec<(ActionType, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                action_type,
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM automation_logs
            WHERE started_at >= $1
              AND ($2::uuid IS NULL OR workflow_id = $2)
              AND action_type IS NOT NULL
            GROUP BY action_type
            ORDER BY COUNT(*) DESC
            "#,
        )
        .bind(since)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let top_workflows: Vec<(Uuid, String, i64)> = sqlx::query_as(
            r#"
            SELECT w.id, w.name, COUNT(DISTINCT l.execution_id)
            FROM automation_logs l
            JOIN workflows w ON w.id = l.workflow_id
            WHERE l.started_at >= $1 AND ($2::uuid IS NULL OR l.workflow_id = $2)
            GROUP BY w.id, w.name
            ORDER BY COUNT(DISTINCT l.execution_id) DESC
            LIMIT 10
            "#,
        )
        .bind(since)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(AutomationStats {
            period_days: days,
            totals: StatsTotals {
                total: successful + failed + skipped,
                successful,
                failed,
                skipped,
                success_rate: success_rate(successful, failed),
            },
            duration_ms: DurationStats {
                avg: avg_ms,
                min: min_ms,
                max: max_ms,
            },
            per_day: per_day
                .into_iter()
                .map(|(day, executions, successful, failed, skipped)| DayBucket {
                    day,
                    executions,
                    successful,
                    failed,
                    skipped,
                })
                .collect(),
            per_action_type: per_action_type
                .into_iter()
                .map(|(action_type, total, successful, failed)| ActionTypeBucket {
                    action_type,
                    total,
                    successful,
                    failed,
                })
                .collect(),
            top_workflows: top_workflows
                .into_iter()
                .map(|(workflow_id, workflow_name, executions)| WorkflowCount {
                    workflow_id,
                    workflow_name,
                    executions,
                })
                .collect(),
        })
    }
}

/// Share of completed rows among rows that ran to an outcome, as a
/// percentage. Skipped rows are excluded.
pub fn success_rate(successful: i64, failed: i64) -> f64 {
    let finished = successful + failed;
    if finished == 0 {
        return 0.0;
    }
    (successful as f64 / finished as f64) * 100.0
}

#[derive(Debug, Serialize)]
pub struct AutomationStats {
    pub period_days: i64,
    pub totals: StatsTotals,
    pub duration_ms: DurationStats,
    pub per_day: Vec<DayBucket>,
    pub per_action_type: Vec<ActionTypeBucket>,
    pub top_workflows: Vec<WorkflowCount>,
}

#[derive(Debug, Serialize)]
pub struct StatsTotals {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct DurationStats {
    pub avg: Option<f64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DayBucket {
    pub day: NaiveDate,
    pub executions: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[derive(Debug, Serialize)]
pub struct ActionTypeBucket {
    pub action_type: ActionType,
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
}

#[derive(Debug, Serialize)]
pub struct WorkflowCount {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub executions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(4, 0), 100.0);
        assert_eq!(success_rate(3, 1), 75.0);
        assert_eq!(success_rate(0, 5), 0.0);
    }

    #[test]
    fn test_log_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LogStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
