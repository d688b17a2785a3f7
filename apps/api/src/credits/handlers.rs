use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credits::policy::AvailableCredits;
use crate::credits::service::DenialReason;
use crate::errors::AppError;
use crate::models::credits::{
    ConfigPatch, CreditPackage, MAX_CREDIT_AMOUNT, NewPurchase, PricingConfig, PurchaseRecord,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub allowed: bool,
    pub available: AvailableCredits,
    pub free_credits_used_this_month: i32,
    pub total_credits_used: i64,
    pub month: String,
    pub reason_code: Option<DenialReason>,
    pub reason: Option<String>,
    pub degraded: bool,
}

/// GET /api/v1/credits/balance?user_id=...
/// Read-only gate check; deducts nothing, safe to poll.
pub async fn handle_get_balance(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<BalanceResponse>, AppError> {
    let check = state.credits.can_consume(params.user_id).await;

    Ok(Json(BalanceResponse {
        allowed: check.allowed,
        available: check.available,
        free_credits_used_this_month: check.ledger.free_credits_used_this_month,
        total_credits_used: check.ledger.total_credits_used,
        month: check.ledger.last_free_reset_month.to_string(),
        reason_code: check.reason,
        reason: check.reason.map(|r| r.to_string()),
        degraded: check.degraded,
    }))
}

#[derive(Deserialize)]
pub struct ConsumeRequest {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct ConsumeResponse {
    pub deducted: bool,
    pub available: AvailableCredits,
    pub reason: Option<String>,
}

/// POST /api/v1/credits/consume
/// Deducts one credit (free allowance first, then paid). Insufficient credit
/// is a normal 200 response with `deducted: false`, not an error.
pub async fn handle_consume(
    State(state): State<AppState>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, AppError> {
    if let Some(snapshot) = state.credits.deduct(req.user_id).await? {
        return Ok(Json(ConsumeResponse {
            deducted: true,
            available: snapshot.available,
            reason: None,
        }));
    }

    // Re-run the gate so the caller gets the same denial message the balance
    // endpoint would give.
    let check = state.credits.can_consume(req.user_id).await;
    Ok(Json(ConsumeResponse {
        deducted: false,
        available: check.available,
        reason: check.reason.map(|r| r.to_string()),
    }))
}

#[derive(Serialize)]
pub struct PackagesResponse {
    pub packages_enabled: bool,
    pub free_credits_per_month: i32,
    pub packages: Vec<CreditPackage>,
}

/// GET /api/v1/credits/packages
/// Storefront listing: active packages only. Degrades to the built-in
/// catalog when the config store is unreachable.
pub async fn handle_list_packages(
    State(state): State<AppState>,
) -> Result<Json<PackagesResponse>, AppError> {
    let config = state.credits.pricing_config_or_default().await.into_value();
    let packages = config.packages.into_iter().filter(|p| p.active).collect();

    Ok(Json(PackagesResponse {
        packages_enabled: config.packages_enabled,
        free_credits_per_month: config.free_credits_per_month,
        packages,
    }))
}

/// GET /api/v1/credits/history?user_id=...
pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<PurchaseRecord>>, AppError> {
    let ledger = state.credits.ledger(params.user_id).await?;
    let mut history = ledger.purchase_history;
    // Stored oldest-first (append-only); shown newest-first.
    history.reverse();
    Ok(Json(history))
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub package_id: String,
    pub credits: i32,
    pub amount_usd: f64,
    pub payment_method: Option<String>,
}

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub paid_credits: i32,
    pub purchase: PurchaseRecord,
}

/// POST /api/v1/credits/purchase
/// Records a settled purchase. Payment verification is the caller's job;
/// this endpoint only credits the ledger.
pub async fn handle_purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, AppError> {
    if req.credits <= 0 || req.credits > MAX_CREDIT_AMOUNT {
        return Err(AppError::Validation(format!(
            "credits must be between 1 and {MAX_CREDIT_AMOUNT}"
        )));
    }
    if req.amount_usd < 0.0 {
        return Err(AppError::Validation(
            "amount_usd must not be negative".to_string(),
        ));
    }

    let updated = state
        .credits
        .add_purchased_credits(
            req.user_id,
            NewPurchase {
                package_id: req.package_id,
                credits: req.credits,
                amount_usd: req.amount_usd,
                payment_method: req.payment_method,
            },
        )
        .await?;

    let purchase = updated.purchase_history.last().cloned().ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("purchase history empty after credit"))
    })?;

    Ok(Json(PurchaseResponse {
        paid_credits: updated.paid_credits,
        purchase,
    }))
}

#[derive(Serialize)]
pub struct AdminConfigResponse {
    /// `"stored"` for a persisted row, `"seeded"` when this read created it.
    pub source: &'static str,
    pub config: PricingConfig,
}

/// GET /api/v1/admin/credits/config
/// Unlike the storefront, this does not degrade: admins get the error.
pub async fn handle_get_config(
    State(state): State<AppState>,
) -> Result<Json<AdminConfigResponse>, AppError> {
    let loaded = state.credits.pricing_config().await?;
    Ok(Json(AdminConfigResponse {
        source: loaded.source(),
        config: loaded.into_value(),
    }))
}

/// PATCH /api/v1/admin/credits/config
/// Merge-style partial update; omitted fields keep their stored value.
/// Package fields are recorded as sent; only the free limit is range-checked.
pub async fn handle_update_config(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<PricingConfig>, AppError> {
    if let Some(limit) = patch.free_credits_per_month {
        if !(0..=MAX_CREDIT_AMOUNT).contains(&limit) {
            return Err(AppError::Validation(format!(
                "free_credits_per_month must be between 0 and {MAX_CREDIT_AMOUNT}"
            )));
        }
    }

    let updated = state.credits.update_config(patch).await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::memory::{MemoryConfigRepository, MemoryLedgerRepository};
    use crate::credits::month::SystemClock;
    use crate::credits::service::CreditService;
    use std::sync::Arc;

    fn make_state() -> AppState {
        AppState {
            credits: CreditService::new(
                Arc::new(MemoryConfigRepository::new()),
                Arc::new(MemoryLedgerRepository::new()),
                Arc::new(SystemClock),
            ),
        }
    }

    #[tokio::test]
    async fn test_purchase_rejects_out_of_range_credits() {
        let state = make_state();
        for credits in [0, -5, MAX_CREDIT_AMOUNT + 1] {
            let result = handle_purchase(
                State(state.clone()),
                Json(PurchaseRequest {
                    user_id: Uuid::new_v4(),
                    package_id: "starter".to_string(),
                    credits,
                    amount_usd: 1.0,
                    payment_method: None,
                }),
            )
            .await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_purchase_accepts_largest_allowed_amount() {
        let state = make_state();
        let response = handle_purchase(
            State(state),
            Json(PurchaseRequest {
                user_id: Uuid::new_v4(),
                package_id: "bulk".to_string(),
                credits: MAX_CREDIT_AMOUNT,
                amount_usd: 0.0,
                payment_method: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.paid_credits, MAX_CREDIT_AMOUNT);
        assert_eq!(response.0.purchase.credits, MAX_CREDIT_AMOUNT);
    }

    #[tokio::test]
    async fn test_config_update_rejects_out_of_range_free_limit() {
        let state = make_state();
        for limit in [-1, MAX_CREDIT_AMOUNT + 1] {
            let result = handle_update_config(
                State(state.clone()),
                Json(ConfigPatch {
                    free_credits_per_month: Some(limit),
                    ..Default::default()
                }),
            )
            .await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }
}
