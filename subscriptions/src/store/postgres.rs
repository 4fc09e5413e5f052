//! PostgreSQL subscription store.

use crate::models::SubscriptionRecord;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::store::SubscriptionStore;
use async_trait::async_trait;
use billing_core::config::Config;
use billing_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, customer_id, parent_invoice_id, product_id, \
    status, initial_amount, recurring_amount, period, frequency, bill_times, trial_period, \
    date_created, next_renewal_date";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "subscriptions"))]
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("database_url is not configured"))
        })?;

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
impl SubscriptionStore for PgSubscriptionStore {
    #[instrument(skip(self, record), fields(parent_invoice_id = record.parent_invoice_id))]
    async fn insert(&self, record: &SubscriptionRecord) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let subscription_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO subscriptions (customer_id, parent_invoice_id, product_id, status,
                initial_amount, recurring_amount, period, frequency, bill_times, trial_period,
                date_created, next_renewal_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING subscription_id
            "#,
        )
        .bind(record.customer_id)
        .bind(record.parent_invoice_id)
        .bind(record.product_id)
        .bind(&record.status)
        .bind(record.initial_amount)
        .bind(record.recurring_amount)
        .bind(&record.period)
        .bind(record.frequency)
        .bind(record.bill_times)
        .bind(&record.trial_period)
        .bind(record.date_created)
        .bind(record.next_renewal_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert subscription: {}", e))
        })?;

        timer.observe_duration();

        info!(subscription_id = subscription_id, "Subscription created");

        Ok(subscription_id)
    }

    #[instrument(skip(self, record), fields(subscription_id = record.subscription_id))]
    async fn update(&self, record: &SubscriptionRecord) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET customer_id = $2, parent_invoice_id = $3, product_id = $4, status = $5,
                initial_amount = $6, recurring_amount = $7, period = $8, frequency = $9,
                bill_times = $10, trial_period = $11, date_created = $12, next_renewal_date = $13
            WHERE subscription_id = $1
            "#,
        )
        .bind(record.subscription_id)
        .bind(record.customer_id)
        .bind(record.parent_invoice_id)
        .bind(record.product_id)
        .bind(&record.status)
        .bind(record.initial_amount)
        .bind(record.recurring_amount)
        .bind(&record.period)
        .bind(record.frequency)
        .bind(record.bill_times)
        .bind(&record.trial_period)
        .bind(record.date_created)
        .bind(record.next_renewal_date)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e))
        })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} does not exist",
                record.subscription_id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, subscription_id: i64) -> Result<Option<SubscriptionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fetch_subscription"])
            .start_timer();

        let record = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn find_by_parent_invoice(
        &self,
        parent_invoice_id: i64,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_subscription_by_parent"])
            .start_timer();

        let record = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE parent_invoice_id = $1 LIMIT 1"
        ))
        .bind(parent_invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete(&self, subscription_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscription_id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete subscription: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
