use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::credits::month::MonthKey;

/// Free analyses granted to every user each calendar month.
pub const DEFAULT_FREE_CREDITS_PER_MONTH: i32 = 3;

/// Largest credit amount accepted in one purchase or as the monthly free
/// limit.
pub const MAX_CREDIT_AMOUNT: i32 = 1_000_000;

/// One purchasable credit bundle, stored inside `credit_config.packages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditPackage {
    pub id: String,
    pub name: String,
    pub credits: i32,
    pub price_usd: f64,
    pub price_pen: f64,
    pub active: bool,
}

/// Global pricing configuration. Single row in `credit_config` (id = 1),
/// created lazily with `Default` values on first read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct PricingConfig {
    pub packages_enabled: bool,
    #[sqlx(json)]
    pub packages: Vec<CreditPackage>,
    pub free_credits_per_month: i32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            packages_enabled: false,
            packages: default_packages(),
            free_credits_per_month: DEFAULT_FREE_CREDITS_PER_MONTH,
        }
    }
}

/// Launch catalog used to seed the config row. Admins overwrite it through
/// the config endpoint; purchases are denied while `packages_enabled` stays
/// false, so shipping it inactive-by-default is safe.
pub fn default_packages() -> Vec<CreditPackage> {
    vec![
        CreditPackage {
            id: "starter".to_string(),
            name: "Starter".to_string(),
            credits: 3,
            price_usd: 3.00,
            price_pen: 11.00,
            active: true,
        },
        CreditPackage {
            id: "standard".to_string(),
            name: "Standard".to_string(),
            credits: 10,
            price_usd: 8.00,
            price_pen: 30.00,
            active: true,
        },
        CreditPackage {
            id: "pro".to_string(),
            name: "Pro".to_string(),
            credits: 30,
            price_usd: 20.00,
            price_pen: 75.00,
            active: true,
        },
    ]
}

/// Partial configuration update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub packages_enabled: Option<bool>,
    pub packages: Option<Vec<CreditPackage>>,
    pub free_credits_per_month: Option<i32>,
}

/// One settled purchase, appended to `credit_ledgers.purchase_history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseRecord {
    pub package_id: String,
    pub credits: i32,
    pub amount_usd: f64,
    pub purchased_at: DateTime<Utc>,
    pub payment_method: Option<String>,
}

/// A settled purchase to credit against a ledger. The caller has already
/// verified payment; this type carries what the ledger needs to record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchase {
    pub package_id: String,
    pub credits: i32,
    pub amount_usd: f64,
    pub payment_method: Option<String>,
}

/// Per-user credit state. One row in `credit_ledgers`, created lazily the
/// first time the user touches the credit system.
///
/// `free_credits_used_this_month` counts consumption against the monthly
/// allowance and is zeroed whenever `last_free_reset_month` falls behind the
/// current month. `total_credits_used` is a lifetime counter and never resets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct CreditLedger {
    pub user_id: Uuid,
    pub paid_credits: i32,
    pub free_credits_used_this_month: i32,
    pub last_free_reset_month: MonthKey,
    pub total_credits_used: i64,
    #[sqlx(json)]
    pub purchase_history: Vec<PurchaseRecord>,
}

impl CreditLedger {
    /// Zeroed ledger for a user first seen in `month`.
    pub fn fresh(user_id: Uuid, month: MonthKey) -> Self {
        Self {
            user_id,
            paid_credits: 0,
            free_credits_used_this_month: 0,
            last_free_reset_month: month,
            total_credits_used: 0,
            purchase_history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_ships_packages_disabled() {
        let config = PricingConfig::default();
        assert!(!config.packages_enabled);
        assert_eq!(config.free_credits_per_month, 3);
        assert!(!config.packages.is_empty());
        assert!(config.packages.iter().all(|p| p.credits > 0));
    }

    #[test]
    fn test_default_package_ids_are_unique() {
        let packages = default_packages();
        let mut ids: Vec<&str> = packages.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), packages.len());
    }

    #[test]
    fn test_fresh_ledger_is_zeroed() {
        let user_id = Uuid::new_v4();
        let month: MonthKey = "2025-06".parse().unwrap();
        let ledger = CreditLedger::fresh(user_id, month.clone());
        assert_eq!(ledger.user_id, user_id);
        assert_eq!(ledger.paid_credits, 0);
        assert_eq!(ledger.free_credits_used_this_month, 0);
        assert_eq!(ledger.last_free_reset_month, month);
        assert_eq!(ledger.total_credits_used, 0);
        assert!(ledger.purchase_history.is_empty());
    }
}
