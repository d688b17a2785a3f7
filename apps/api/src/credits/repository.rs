//! Storage access for the pricing configuration and per-user credit ledgers.
//!
//! Both repositories sit behind traits so the service logic runs against
//! Postgres in production and the in-memory backend in tests. The Postgres
//! implementations keep every credit mutation in a single guarded UPDATE;
//! row-level locking then serializes concurrent writers on the same ledger,
//! which is what makes the deduction guard race-free.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::credits::month::MonthKey;
use crate::errors::AppError;
use crate::models::credits::{ConfigPatch, CreditLedger, PricingConfig, PurchaseRecord};

const CONFIG_COLUMNS: &str = "packages_enabled, packages, free_credits_per_month";

const LEDGER_COLUMNS: &str = "user_id, paid_credits, free_credits_used_this_month, \
     last_free_reset_month, total_credits_used, purchase_history";

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Reads the stored pricing configuration, if any.
    async fn fetch(&self) -> Result<Option<PricingConfig>, AppError>;

    /// Inserts the default configuration unless a row already exists, then
    /// returns whatever is stored. Safe under concurrent first reads.
    async fn seed_default(&self) -> Result<PricingConfig, AppError>;

    /// Merges the present fields of `patch` into the stored configuration.
    /// Omitted fields keep their value. The row must already exist.
    async fn update(&self, patch: ConfigPatch) -> Result<PricingConfig, AppError>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Inserts a zeroed ledger for `user_id` stamped with `month`; no-op if
    /// the user already has one.
    async fn create_if_absent(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError>;

    /// Zeroes the monthly free counter when the stored month differs from
    /// `month`. No-op when the ledger is already current (or absent).
    async fn refresh_month(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError>;

    /// Reads a ledger row.
    async fn fetch(&self, user_id: Uuid) -> Result<Option<CreditLedger>, AppError>;

    /// Atomically consumes one credit, free allowance before paid balance,
    /// provided the stored month equals `month` and something is available.
    /// Returns the post-deduction row, or `None` when the guard matched no
    /// row (exhausted, stale month, or missing ledger).
    async fn deduct_one(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        free_limit: i32,
    ) -> Result<Option<CreditLedger>, AppError>;

    /// Atomically adds `credits` to the paid balance and appends `record` to
    /// the purchase history. The ledger must already exist.
    async fn apply_purchase(
        &self,
        user_id: Uuid,
        credits: i32,
        record: &PurchaseRecord,
    ) -> Result<CreditLedger, AppError>;
}

pub struct PgConfigRepository {
    pool: PgPool,
}

impl PgConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigRepository for PgConfigRepository {
    async fn fetch(&self) -> Result<Option<PricingConfig>, AppError> {
        let config = sqlx::query_as::<_, PricingConfig>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM credit_config WHERE id = 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    async fn seed_default(&self) -> Result<PricingConfig, AppError> {
        let defaults = PricingConfig::default();

        sqlx::query(
            r#"
            INSERT INTO credit_config (id, packages_enabled, packages, free_credits_per_month)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(defaults.packages_enabled)
        .bind(Json(&defaults.packages))
        .bind(defaults.free_credits_per_month)
        .execute(&self.pool)
        .await?;

        // Read back whichever row won the race to seed.
        let stored = sqlx::query_as::<_, PricingConfig>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM credit_config WHERE id = 1"
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn update(&self, patch: ConfigPatch) -> Result<PricingConfig, AppError> {
        let packages = patch.packages.map(Json);

        let updated = sqlx::query_as::<_, PricingConfig>(&format!(
            r#"
            UPDATE credit_config SET
                packages_enabled       = COALESCE($1, packages_enabled),
                packages               = COALESCE($2, packages),
                free_credits_per_month = COALESCE($3, free_credits_per_month),
                updated_at             = NOW()
            WHERE id = 1
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(patch.packages_enabled)
        .bind(packages)
        .bind(patch.free_credits_per_month)
        .fetch_one(&self.pool)
        .await?;

        Ok(updated)
    }
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn create_if_absent(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credit_ledgers (user_id, last_free_reset_month)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn refresh_month(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE credit_ledgers
            SET free_credits_used_this_month = 0,
                last_free_reset_month = $2,
                updated_at = NOW()
            WHERE user_id = $1 AND last_free_reset_month <> $2
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("reset free-credit counter for user {user_id} to month {month}");
        }

        Ok(())
    }

    async fn fetch(&self, user_id: Uuid) -> Result<Option<CreditLedger>, AppError> {
        let ledger = sqlx::query_as::<_, CreditLedger>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM credit_ledgers WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ledger)
    }

    async fn deduct_one(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        free_limit: i32,
    ) -> Result<Option<CreditLedger>, AppError> {
        // Both CASE expressions see the pre-update row, so exactly one pool
        // is debited. The WHERE guard refuses exhausted ledgers and ledgers
        // stamped with a different month; the caller decides whether a miss
        // means "out of credits" or "month rolled over, refresh and retry".
        let updated = sqlx::query_as::<_, CreditLedger>(&format!(
            r#"
            UPDATE credit_ledgers SET
                free_credits_used_this_month = CASE
                    WHEN free_credits_used_this_month < $3
                        THEN free_credits_used_this_month + 1
                    ELSE free_credits_used_this_month
                END,
                paid_credits = CASE
                    WHEN free_credits_used_this_month < $3 THEN paid_credits
                    ELSE paid_credits - 1
                END,
                total_credits_used = total_credits_used + 1,
                updated_at = NOW()
            WHERE user_id = $1
              AND last_free_reset_month = $2
              AND (free_credits_used_this_month < $3 OR paid_credits > 0)
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(month.as_str())
        .bind(free_limit)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn apply_purchase(
        &self,
        user_id: Uuid,
        credits: i32,
        record: &PurchaseRecord,
    ) -> Result<CreditLedger, AppError> {
        let updated = sqlx::query_as::<_, CreditLedger>(&format!(
            r#"
            UPDATE credit_ledgers SET
                paid_credits = paid_credits + $2,
                purchase_history = purchase_history || $3::jsonb,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(credits)
        .bind(Json(record))
        .fetch_one(&self.pool)
        .await?;

        Ok(updated)
    }
}
