//! Uniform load/patch/delete surface over the business entities the
//! automation engine may touch.
//!
//! Every entity the engine can reference is a variant of
//! [`EntityKind`]; there is no table-name string routing. Patching is
//! restricted to a per-entity column whitelist, and `jobs.status` is
//! always refused: job status moves only through the state machine.

use fieldops_shared::EntityKind;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

pub trait EntityOps {
    fn table(&self) -> &'static str;
    fn patchable_columns(&self) -> &'static [&'static str];

    fn load(
        &self,
        pool: &PgPool,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, AppError>> + Send;

    fn patch(
        &self,
        pool: &PgPool,
        id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;

    fn delete(
        &self,
        pool: &PgPool,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

impl EntityOps for EntityKind {
    fn table(&self) -> &'static str {
        match self {
            EntityKind::Client => "clients",
            EntityKind::Lead => "leads",
            EntityKind::Quote => "quotes",
            EntityKind::Job => "jobs",
            EntityKind::Invoice => "invoices",
            EntityKind::Task => "follow_up_tasks",
        }
    }

    fn patchable_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Client => &["name", "contact_email", "phone", "address"],
            EntityKind::Lead => &["name", "contact_email", "phone", "source", "notes"],
            EntityKind::Quote => &["title", "notes"],
            // status intentionally absent: writes go through the state machine
            EntityKind::Job => &["title", "description", "assigned_crew_id"],
            EntityKind::Invoice => &["notes"],
            EntityKind::Task => &["title", "description", "assigned_to", "due_date"],
        }
    }

    async fn load(&self, pool: &PgPool, id: Uuid) -> Result<Option<serde_json::Value>, AppError> {
        let query = format!("SELECT row_to_json(t) FROM {} t WHERE id = $1", self.table());
        let row: Option<serde_json::Value> = sqlx::query_scalar(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    async fn patch(
        &self,
        pool: &PgPool,
        id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), AppError> {
        if !self.patchable_columns().contains(&field) {
            return Err(AppError::BadRequest(format!(
                "field '{}' is not patchable on entity '{}'",
                field, self
            )));
        }

        // field is whitelisted above, so interpolating it is safe
        let query = format!("UPDATE {} SET {} = $2 WHERE id = $1", self.table(), field);
        let text = value
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| value.to_string());

        let result = sqlx::query(&query)
            .bind(id)
            .bind(text)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{}", self)));
        }
        Ok(())
    }

    async fn delete(&self, pool: &PgPool, id: Uuid) -> Result<(), AppError> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.table());
        let result = sqlx::query(&query).bind(id).execute(pool).await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{}", self)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_is_never_patchable() {
        assert!(!EntityKind::Job.patchable_columns().contains(&"status"));
    }

    #[test]
    fn test_every_entity_maps_to_a_table() {
        for kind in [
            EntityKind::Client,
            EntityKind::Lead,
            EntityKind::Quote,
            EntityKind::Job,
            EntityKind::Invoice,
            EntityKind::Task,
        ] {
            assert!(!kind.table().is_empty());
            assert!(!kind.patchable_columns().is_empty());
        }
    }
}
