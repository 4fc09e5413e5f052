//! PostgreSQL invoice store.

use crate::models::{InvoiceNote, InvoiceRecord};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::store::InvoiceStore;
use async_trait::async_trait;
use billing_core::config::Config;
use billing_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

const INVOICE_COLUMNS: &str = "invoice_id, parent_id, invoice_type, status, mode, template, \
    invoice_key, invoice_number, path, description, currency, customer_id, user_ip, first_name, \
    last_name, email, phone, country, state, city, zip, company, vat_number, vat_rate, address, \
    address_confirmed, discount_code, disable_taxes, subscription_id, date_created, date_modified, \
    due_date, date_completed, subtotal, total_discount, total_tax, total_fees, items, fees, \
    discounts, taxes";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "invoicing"))]
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("database_url is not configured"))
        })?;

        info!(
            max_connections = config.database_max_connections,
            min_connections = config.database_min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    #[instrument(skip(self, record), fields(customer_id = record.customer_id))]
    async fn insert(&self, record: &InvoiceRecord) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let invoice_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO invoices (parent_id, invoice_type, status, mode, template, invoice_key,
                invoice_number, path, description, currency, customer_id, user_ip, first_name,
                last_name, email, phone, country, state, city, zip, company, vat_number, vat_rate,
                address, address_confirmed, discount_code, disable_taxes, subscription_id,
                date_created, date_modified, due_date, date_completed, subtotal, total_discount,
                total_tax, total_fees, items, fees, discounts, taxes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33,
                $34, $35, $36, $37, $38, $39, $40)
            RETURNING invoice_id
            "#,
        )
        .bind(record.parent_id)
        .bind(&record.invoice_type)
        .bind(&record.status)
        .bind(&record.mode)
        .bind(&record.template)
        .bind(&record.invoice_key)
        .bind(&record.invoice_number)
        .bind(&record.path)
        .bind(&record.description)
        .bind(&record.currency)
        .bind(record.customer_id)
        .bind(&record.user_ip)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.country)
        .bind(&record.state)
        .bind(&record.city)
        .bind(&record.zip)
        .bind(&record.company)
        .bind(&record.vat_number)
        .bind(record.vat_rate)
        .bind(&record.address)
        .bind(record.address_confirmed)
        .bind(&record.discount_code)
        .bind(record.disable_taxes)
        .bind(record.subscription_id)
        .bind(record.date_created)
        .bind(record.date_modified)
        .bind(record.due_date)
        .bind(record.date_completed)
        .bind(record.subtotal)
        .bind(record.total_discount)
        .bind(record.total_tax)
        .bind(record.total_fees)
        .bind(&record.items)
        .bind(&record.fees)
        .bind(&record.discounts)
        .bind(&record.taxes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice key '{}' already exists",
                    record.invoice_key
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", e)),
        })?;

        timer.observe_duration();

        info!(invoice_id = invoice_id, "Invoice created");

        Ok(invoice_id)
    }

    #[instrument(skip(self, record), fields(invoice_id = record.invoice_id))]
    async fn update(&self, record: &InvoiceRecord) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET parent_id = $2, invoice_type = $3, status = $4, mode = $5, template = $6,
                invoice_key = $7, invoice_number = $8, path = $9, description = $10,
                currency = $11, customer_id = $12, user_ip = $13, first_name = $14,
                last_name = $15, email = $16, phone = $17, country = $18, state = $19, city = $20,
                zip = $21, company = $22, vat_number = $23, vat_rate = $24, address = $25,
                address_confirmed = $26, discount_code = $27, disable_taxes = $28,
                subscription_id = $29, date_created = $30, date_modified = $31, due_date = $32,
                date_completed = $33, subtotal = $34, total_discount = $35, total_tax = $36,
                total_fees = $37, items = $38, fees = $39, discounts = $40, taxes = $41
            WHERE invoice_id = $1
            "#,
        )
        .bind(record.invoice_id)
        .bind(record.parent_id)
        .bind(&record.invoice_type)
        .bind(&record.status)
        .bind(&record.mode)
        .bind(&record.template)
        .bind(&record.invoice_key)
        .bind(&record.invoice_number)
        .bind(&record.path)
        .bind(&record.description)
        .bind(&record.currency)
        .bind(record.customer_id)
        .bind(&record.user_ip)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.country)
        .bind(&record.state)
        .bind(&record.city)
        .bind(&record.zip)
        .bind(&record.company)
        .bind(&record.vat_number)
        .bind(record.vat_rate)
        .bind(&record.address)
        .bind(record.address_confirmed)
        .bind(&record.discount_code)
        .bind(record.disable_taxes)
        .bind(record.subscription_id)
        .bind(record.date_created)
        .bind(record.date_modified)
        .bind(record.due_date)
        .bind(record.date_completed)
        .bind(record.subtotal)
        .bind(record.total_discount)
        .bind(record.total_tax)
        .bind(record.total_fees)
        .bind(&record.items)
        .bind(&record.fees)
        .bind(&record.discounts)
        .bind(&record.taxes)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} does not exist",
                record.invoice_id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, invoice_id: i64) -> Result<Option<InvoiceRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fetch_invoice"])
            .start_timer();

        let record = sqlx::query_as::<_, InvoiceRecord>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self, invoice_key))]
    async fn find_by_key(&self, invoice_key: &str) -> Result<Option<InvoiceRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_by_key"])
            .start_timer();

        let record = sqlx::query_as::<_, InvoiceRecord>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_key = $1 LIMIT 1"
        ))
        .bind(invoice_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find invoice: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn find_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<InvoiceRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_by_number"])
            .start_timer();

        let record = sqlx::query_as::<_, InvoiceRecord>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = $1 LIMIT 1"
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find invoice: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete(&self, invoice_id: i64) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        sqlx::query("DELETE FROM invoice_notes WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice notes: {}", e))
            })?;

        let result = sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn next_number(&self) -> Result<i64, AppError> {
        let number = sqlx::query_scalar::<_, i64>("SELECT nextval('invoice_number_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice number: {}", e))
            })?;

        Ok(number)
    }

    #[instrument(skip(self))]
    async fn set_subscription_id(
        &self,
        invoice_id: i64,
        subscription_id: Option<i64>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE invoices SET subscription_id = $2 WHERE invoice_id = $1")
            .bind(invoice_id)
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to update subscription linkage: {}",
                    e
                ))
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_renewals(&self, parent_id: i64) -> Result<u32, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invoices WHERE parent_id = $1",
        )
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count renewals: {}", e))
        })?;

        Ok(count as u32)
    }

    #[instrument(skip(self, note))]
    async fn add_note(&self, invoice_id: i64, note: &str, system: bool) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_invoice_note"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_notes (invoice_id, note, system, date_created)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(invoice_id)
        .bind(note)
        .bind(system)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add note: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_notes(&self, invoice_id: i64) -> Result<Vec<InvoiceNote>, AppError> {
        let notes = sqlx::query_as::<_, InvoiceNote>(
            r#"
            SELECT note_id, invoice_id, note, system, date_created
            FROM invoice_notes
            WHERE invoice_id = $1
            ORDER BY note_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list notes: {}", e)))?;

        Ok(notes)
    }
}
