//! Credit accounting service: the consumption gate, free-before-paid
//! deduction, purchase crediting, and pricing-configuration access.
//!
//! `AppState` holds one `CreditService`; its repositories are trait objects,
//! swapped for the in-memory backend in tests.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credits::month::MonthSource;
use crate::credits::policy::{available_credits, AvailableCredits};
use crate::credits::repository::{ConfigRepository, LedgerRepository};
use crate::errors::AppError;
use crate::models::credits::{
    ConfigPatch, CreditLedger, NewPurchase, PricingConfig, PurchaseRecord,
};

// ────────────────────────────────────────────────────────────────────────────
// Outcome types
// ────────────────────────────────────────────────────────────────────────────

/// How a configuration read was satisfied. `Degraded` means the load failed
/// and built-in defaults are standing in; callers may proceed but must not
/// treat the value as authoritative.
#[derive(Debug, Clone)]
pub enum Loaded<T> {
    /// The stored row.
    Stored(T),
    /// No row existed yet; defaults were persisted and returned.
    Seeded(T),
    /// The load failed, either on the fetch or on the first-touch seeding;
    /// `value` is the built-in default.
    Degraded { value: T, error: String },
}

impl<T> Loaded<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Stored(value) | Self::Seeded(value) => value,
            Self::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Stored(value) | Self::Seeded(value) => value,
            Self::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Stored(_) => "stored",
            Self::Seeded(_) => "seeded",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// Why the gate denied consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Allowance exhausted and credit packages are on offer.
    PurchaseRequired,
    /// Allowance exhausted and nothing is purchasable this cycle.
    MonthlyLimitReached,
}

impl DenialReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::PurchaseRequired => {
                "You've used all your available credits. Purchase a credit package to keep analyzing."
            }
            Self::MonthlyLimitReached => {
                "You've used all your free analyses for this month. Your allowance renews next month."
            }
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of the read-only gate check.
#[derive(Debug, Clone)]
pub struct CreditCheck {
    pub allowed: bool,
    pub available: AvailableCredits,
    pub ledger: CreditLedger,
    pub reason: Option<DenialReason>,
    /// True when a failed read forced built-in defaults; the answer is then
    /// optimistic rather than authoritative.
    pub degraded: bool,
}

/// Post-deduction view handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CreditSnapshot {
    pub available: AvailableCredits,
    pub total_credits_used: i64,
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CreditService {
    config_repo: Arc<dyn ConfigRepository>,
    ledger_repo: Arc<dyn LedgerRepository>,
    clock: Arc<dyn MonthSource>,
}

impl CreditService {
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        ledger_repo: Arc<dyn LedgerRepository>,
        clock: Arc<dyn MonthSource>,
    ) -> Self {
        Self {
            config_repo,
            ledger_repo,
            clock,
        }
    }

    /// Reads the pricing configuration, persisting defaults on first touch.
    pub async fn pricing_config(&self) -> Result<Loaded<PricingConfig>, AppError> {
        if let Some(stored) = self.config_repo.fetch().await? {
            return Ok(Loaded::Stored(stored));
        }
        let seeded = self.config_repo.seed_default().await?;
        info!("seeded default pricing configuration");
        Ok(Loaded::Seeded(seeded))
    }

    /// Like [`pricing_config`](Self::pricing_config), but a storage failure
    /// degrades to built-in defaults instead of surfacing an error. Read-only
    /// paths use this so the product keeps working while the store is down.
    pub async fn pricing_config_or_default(&self) -> Loaded<PricingConfig> {
        match self.pricing_config().await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!("pricing config unavailable, using built-in defaults: {err}");
                Loaded::Degraded {
                    value: PricingConfig::default(),
                    error: err.to_string(),
                }
            }
        }
    }

    /// Merges `patch` into the stored configuration, seeding defaults first
    /// so a partial patch always has a row to merge into.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<PricingConfig, AppError> {
        self.pricing_config().await?;
        let updated = self.config_repo.update(patch).await?;
        info!(
            "pricing configuration updated: packages_enabled={}, {} packages, {} free/month",
            updated.packages_enabled,
            updated.packages.len(),
            updated.free_credits_per_month
        );
        Ok(updated)
    }

    /// Returns the user's ledger, creating a zeroed one on first touch and
    /// zeroing the free counter when the stored month is stale. Idempotent.
    pub async fn ledger(&self, user_id: Uuid) -> Result<CreditLedger, AppError> {
        let month = self.clock.current_month();
        self.ledger_repo.create_if_absent(user_id, &month).await?;
        self.ledger_repo.refresh_month(user_id, &month).await?;
        self.ledger_repo
            .fetch(user_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("ledger for {user_id} missing after creation"))
            })
    }

    /// Read-only gate: answers "may this user consume one credit right now?"
    /// without deducting anything, so callers can check before committing to
    /// an expensive operation. Storage failures degrade to defaults (fresh
    /// ledger, default config) rather than blocking the product.
    pub async fn can_consume(&self, user_id: Uuid) -> CreditCheck {
        let loaded = self.pricing_config_or_default().await;
        let mut degraded = loaded.is_degraded();
        let config = loaded.into_value();

        let ledger = match self.ledger(user_id).await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!("credit gate: ledger read failed for user {user_id}, assuming fresh: {err}");
                degraded = true;
                CreditLedger::fresh(user_id, self.clock.current_month())
            }
        };

        let available = available_credits(&ledger, config.free_credits_per_month);
        let (allowed, reason) = if available.total > 0 {
            (true, None)
        } else if config.packages_enabled {
            (false, Some(DenialReason::PurchaseRequired))
        } else {
            (false, Some(DenialReason::MonthlyLimitReached))
        };

        CreditCheck {
            allowed,
            available,
            ledger,
            reason,
            degraded,
        }
    }

    /// Consumes one credit, free allowance before paid balance. Returns
    /// `None` when nothing is available; the gate's denial reason applies.
    ///
    /// The deduction itself is one guarded UPDATE, so two concurrent calls
    /// for the last credit cannot both win. A guard miss right after a month
    /// rollover is refreshed and retried once before reporting exhaustion.
    pub async fn deduct(&self, user_id: Uuid) -> Result<Option<CreditSnapshot>, AppError> {
        let free_limit = self.pricing_config().await?.into_value().free_credits_per_month;

        let month = self.clock.current_month();
        self.ledger_repo.create_if_absent(user_id, &month).await?;
        self.ledger_repo.refresh_month(user_id, &month).await?;

        if let Some(updated) = self.ledger_repo.deduct_one(user_id, &month, free_limit).await? {
            debug!(
                "deducted one credit for user {user_id} ({} free used, {} paid left)",
                updated.free_credits_used_this_month, updated.paid_credits
            );
            return Ok(Some(self.snapshot(updated, free_limit)));
        }

        // The guard also misses when the calendar month changed after the
        // refresh above. Re-stamp with a fresh key and retry once.
        let retry_month = self.clock.current_month();
        if retry_month != month {
            self.ledger_repo.refresh_month(user_id, &retry_month).await?;
            if let Some(updated) = self
                .ledger_repo
                .deduct_one(user_id, &retry_month, free_limit)
                .await?
            {
                return Ok(Some(self.snapshot(updated, free_limit)));
            }
        }

        Ok(None)
    }

    /// Credits a settled purchase: bumps the paid balance and appends the
    /// purchase record. Payment verification happened upstream; this method
    /// only records the outcome.
    pub async fn add_purchased_credits(
        &self,
        user_id: Uuid,
        purchase: NewPurchase,
    ) -> Result<CreditLedger, AppError> {
        let month = self.clock.current_month();
        self.ledger_repo.create_if_absent(user_id, &month).await?;

        let record = PurchaseRecord {
            package_id: purchase.package_id,
            credits: purchase.credits,
            amount_usd: purchase.amount_usd,
            purchased_at: chrono::Utc::now(),
            payment_method: purchase.payment_method,
        };
        let updated = self
            .ledger_repo
            .apply_purchase(user_id, record.credits, &record)
            .await?;
        info!(
            "credited {} paid credits to user {user_id} (package {}, paid balance now {})",
            record.credits, record.package_id, updated.paid_credits
        );
        Ok(updated)
    }

    fn snapshot(&self, ledger: CreditLedger, free_limit: i32) -> CreditSnapshot {
        CreditSnapshot {
            available: available_credits(&ledger, free_limit),
            total_credits_used: ledger.total_credits_used,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
