#![allow(dead_code)]

//! In-memory repository backends.
//!
//! Back the service unit tests and local smoke runs without a database.
//! `deduct_one` evaluates its guard while holding the write lock, so the
//! outcome matches the single conditional UPDATE the Postgres backend issues.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::credits::month::MonthKey;
use crate::credits::repository::{ConfigRepository, LedgerRepository};
use crate::errors::AppError;
use crate::models::credits::{ConfigPatch, CreditLedger, PricingConfig, PurchaseRecord};

#[derive(Debug, Default)]
pub struct MemoryConfigRepository {
    config: Arc<RwLock<Option<PricingConfig>>>,
}

impl MemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigRepository for MemoryConfigRepository {
    async fn fetch(&self) -> Result<Option<PricingConfig>, AppError> {
        Ok(self.config.read().await.clone())
    }

    async fn seed_default(&self) -> Result<PricingConfig, AppError> {
        let mut guard = self.config.write().await;
        let stored = guard.get_or_insert_with(PricingConfig::default);
        Ok(stored.clone())
    }

    async fn update(&self, patch: ConfigPatch) -> Result<PricingConfig, AppError> {
        let mut guard = self.config.write().await;
        // Mirrors the Postgres backend, which has no row to update yet.
        let Some(config) = guard.as_mut() else {
            return Err(AppError::Database(sqlx::Error::RowNotFound));
        };
        if let Some(enabled) = patch.packages_enabled {
            config.packages_enabled = enabled;
        }
        if let Some(packages) = patch.packages {
            config.packages = packages;
        }
        if let Some(limit) = patch.free_credits_per_month {
            config.free_credits_per_month = limit;
        }
        Ok(config.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedgerRepository {
    ledgers: Arc<RwLock<HashMap<Uuid, CreditLedger>>>,
}

impl MemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored ledger wholesale. Test seeding only.
    pub async fn insert(&self, ledger: CreditLedger) {
        self.ledgers.write().await.insert(ledger.user_id, ledger);
    }
}

#[async_trait]
impl LedgerRepository for MemoryLedgerRepository {
    async fn create_if_absent(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError> {
        let mut ledgers = self.ledgers.write().await;
        ledgers
            .entry(user_id)
            .or_insert_with(|| CreditLedger::fresh(user_id, month.clone()));
        Ok(())
    }

    async fn refresh_month(&self, user_id: Uuid, month: &MonthKey) -> Result<(), AppError> {
        let mut ledgers = self.ledgers.write().await;
        if let Some(ledger) = ledgers.get_mut(&user_id) {
            if ledger.last_free_reset_month != *month {
                ledger.free_credits_used_this_month = 0;
                ledger.last_free_reset_month = month.clone();
            }
        }
        Ok(())
    }

    async fn fetch(&self, user_id: Uuid) -> Result<Option<CreditLedger>, AppError> {
        Ok(self.ledgers.read().await.get(&user_id).cloned())
    }

    async fn deduct_one(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        free_limit: i32,
    ) -> Result<Option<CreditLedger>, AppError> {
        let mut ledgers = self.ledgers.write().await;
        let Some(ledger) = ledgers.get_mut(&user_id) else {
            return Ok(None);
        };
        if ledger.last_free_reset_month != *month {
            return Ok(None);
        }
        if ledger.free_credits_used_this_month < free_limit {
            ledger.free_credits_used_this_month += 1;
        } else if ledger.paid_credits > 0 {
            ledger.paid_credits -= 1;
        } else {
            return Ok(None);
        }
        ledger.total_credits_used += 1;
        Ok(Some(ledger.clone()))
    }

    async fn apply_purchase(
        &self,
        user_id: Uuid,
        credits: i32,
        record: &PurchaseRecord,
    ) -> Result<CreditLedger, AppError> {
        let mut ledgers = self.ledgers.write().await;
        let Some(ledger) = ledgers.get_mut(&user_id) else {
            return Err(AppError::Database(sqlx::Error::RowNotFound));
        };
        ledger.paid_credits = ledger.paid_credits.saturating_add(credits);
        ledger.purchase_history.push(record.clone());
        Ok(ledger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn month(s: &str) -> MonthKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let repo = MemoryLedgerRepository::new();
        let user = Uuid::new_v4();
        let june = month("2025-06");

        repo.create_if_absent(user, &june).await.unwrap();
        repo.deduct_one(user, &june, 3).await.unwrap();
        repo.create_if_absent(user, &june).await.unwrap();

        let ledger = repo.fetch(user).await.unwrap().unwrap();
        // The second create must not clobber the consumed credit.
        assert_eq!(ledger.free_credits_used_this_month, 1);
    }

    #[tokio::test]
    async fn test_refresh_month_zeroes_stale_counter_only() {
        let repo = MemoryLedgerRepository::new();
        let user = Uuid::new_v4();

        let mut ledger = CreditLedger::fresh(user, month("2025-01"));
        ledger.free_credits_used_this_month = 3;
        ledger.total_credits_used = 3;
        ledger.paid_credits = 2;
        repo.insert(ledger).await;

        let february = month("2025-02");
        repo.refresh_month(user, &february).await.unwrap();

        let refreshed = repo.fetch(user).await.unwrap().unwrap();
        assert_eq!(refreshed.free_credits_used_this_month, 0);
        assert_eq!(refreshed.last_free_reset_month, february);
        // Lifetime usage and the paid balance survive the rollover.
        assert_eq!(refreshed.total_credits_used, 3);
        assert_eq!(refreshed.paid_credits, 2);

        // Same month again is a no-op.
        repo.refresh_month(user, &february).await.unwrap();
        let unchanged = repo.fetch(user).await.unwrap().unwrap();
        assert_eq!(unchanged, refreshed);
    }

    #[tokio::test]
    async fn test_deduct_refuses_stale_month() {
        let repo = MemoryLedgerRepository::new();
        let user = Uuid::new_v4();

        let mut ledger = CreditLedger::fresh(user, month("2025-01"));
        ledger.paid_credits = 5;
        repo.insert(ledger).await;

        // Guard month does not match the stored stamp: no deduction.
        let outcome = repo.deduct_one(user, &month("2025-02"), 3).await.unwrap();
        assert!(outcome.is_none());
        let stored = repo.fetch(user).await.unwrap().unwrap();
        assert_eq!(stored.paid_credits, 5);
        assert_eq!(stored.total_credits_used, 0);
    }

    #[tokio::test]
    async fn test_deduct_missing_ledger_is_none() {
        let repo = MemoryLedgerRepository::new();
        let outcome = repo
            .deduct_one(Uuid::new_v4(), &month("2025-06"), 3)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_apply_purchase_appends_history() {
        let repo = MemoryLedgerRepository::new();
        let user = Uuid::new_v4();
        let june = month("2025-06");
        repo.create_if_absent(user, &june).await.unwrap();

        let record = PurchaseRecord {
            package_id: "starter".to_string(),
            credits: 3,
            amount_usd: 3.00,
            purchased_at: Utc::now(),
            payment_method: Some("card".to_string()),
        };
        let updated = repo.apply_purchase(user, 3, &record).await.unwrap();
        assert_eq!(updated.paid_credits, 3);
        assert_eq!(updated.purchase_history, vec![record]);
    }

    #[tokio::test]
    async fn test_apply_purchase_saturates_paid_balance() {
        let repo = MemoryLedgerRepository::new();
        let user = Uuid::new_v4();
        let june = month("2025-06");
        repo.create_if_absent(user, &june).await.unwrap();

        let record = PurchaseRecord {
            package_id: "bulk".to_string(),
            credits: i32::MAX,
            amount_usd: 0.0,
            purchased_at: Utc::now(),
            payment_method: None,
        };
        repo.apply_purchase(user, i32::MAX, &record).await.unwrap();
        let updated = repo.apply_purchase(user, i32::MAX, &record).await.unwrap();
        // Pinned at the ceiling rather than wrapping negative.
        assert_eq!(updated.paid_credits, i32::MAX);
        assert_eq!(updated.purchase_history.len(), 2);
    }

    #[tokio::test]
    async fn test_config_update_without_seed_fails() {
        let repo = MemoryConfigRepository::new();
        let patch = ConfigPatch {
            packages_enabled: Some(true),
            ..Default::default()
        };
        assert!(repo.update(patch).await.is_err());
    }
}
