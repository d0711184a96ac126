use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InvoicingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {0} not found")]
    JobNotFound(Uuid),
}

/// Outcome of a draft-invoice request. `created` is false when the job
/// was already invoiced and nothing was written.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceCreation {
    pub invoice_id: Uuid,
    pub created: bool,
}

/// Builds draft invoices from a job's line items.
#[derive(Debug, Clone)]
pub struct InvoiceService {
    pool: PgPool,
}

impl InvoiceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a draft invoice for a job, idempotently: if any invoice
    /// already references the job, it is returned untouched.
    pub async fn create_draft_from_job(&self, job_id: Uuid) -> Result<InvoiceCreation, InvoicingError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM invoices WHERE job_id = $1 LIMIT 1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(invoice_id) = existing {
            return Ok(InvoiceCreation {
                invoice_id,
                created: false,
            });
        }

        let (client_id,): (Uuid,) =
            sqlx::query_as("SELECT client_id FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(InvoicingError::JobNotFound(job_id))?;

        let line_items: Vec<(String, Decimal, Decimal, Decimal)> = sqlx::query_as(
            "SELECT description, quantity, unit_price, line_total FROM job_line_items WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;

        let subtotal: Decimal = line_items.iter().map(|item| item.3).sum();
        let total = subtotal;

        let invoice_id = Uuid::new_v4();
        let number = format!(
            "INV-{}",
            invoice_id.simple().to_string()[..8].to_uppercase()
        );

        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, client_id, job_id, number, status, subtotal, tax_amount, total, balance, created_at)
            VALUES ($1, $2, $3, $4, 'draft', $5, 0, $6, $6, NOW())
            "#,
        )
        .bind(invoice_id)
        .bind(client_id)
        .bind(job_id)
        .bind(&number)
        .bind(subtotal)
        .bind(total)
        .execute(&mut *tx)
        .await?;

        for (description, quantity, unit_price, line_total) in &line_items {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items
                    (id, invoice_id, description, quantity, unit_price, line_total)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(description)
            .bind(quantity)
            .bind(unit_price)
            .bind(line_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(%job_id, %invoice_id, %number, "draft invoice created from job");
        Ok(InvoiceCreation {
            invoice_id,
            created: true,
        })
    }
}
