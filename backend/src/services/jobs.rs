use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("quote {0} not found")]
    QuoteNotFound(Uuid),
}

/// Quote conversion: turns an approved quote into a draft job.
#[derive(Debug, Clone)]
pub struct JobService {
    pool: PgPool,
}

impl JobService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a draft job from a quote, copying its line items and
    /// marking the quote converted. Idempotent: an already converted
    /// quote returns its existing job.
    pub async fn create_from_quote(&self, quote_id: Uuid) -> Result<Uuid, JobServiceError> {
        let mut tx = self.pool.begin().await?;

        let (client_id, title, converted_job_id): (Uuid, String, Option<Uuid>) = sqlx::query_as(
            "SELECT client_id, title, converted_job_id FROM quotes WHERE id = $1 FOR UPDATE",
        )
        .bind(quote_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(JobServiceError::QuoteNotFound(quote_id))?;

        if let Some(job_id) = converted_job_id {
            return Ok(job_id);
        }

        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, client_id, quote_id, title, status, last_state_change_at, created_at)
            VALUES ($1, $2, $3, $4, 'draft', NOW(), NOW())
            "#,
        )
        .bind(job_id)
        .bind(client_id)
        .bind(quote_id)
        .bind(&title)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO job_line_items (id, job_id, description, quantity, unit_price, line_total)
            SELECT gen_random_uuid(), $2, description, quantity, unit_price, line_total
            FROM quote_line_items
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE quotes SET status = 'converted', converted_job_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(quote_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(%quote_id, %job_id, "quote converted to job");
        Ok(job_id)
    }
}
