//! Availability arithmetic for the credit gate.

use serde::Serialize;

use crate::models::credits::CreditLedger;

/// What a user can still spend, split by pool. `free` is remaining monthly
/// allowance, `paid` is the purchased balance, `total` is their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailableCredits {
    pub free: i32,
    pub paid: i32,
    pub total: i32,
}

/// Computes availability from a ledger and the monthly free limit.
///
/// Pure. Callers pass the limit straight from the pricing config so a
/// mid-month limit change takes effect on the very next check. When the limit
/// was lowered below what the user already consumed, `free` clamps to zero
/// rather than going negative; `total` saturates at `i32::MAX` instead of
/// overflowing.
pub fn available_credits(ledger: &CreditLedger, free_limit: i32) -> AvailableCredits {
    let free = (free_limit - ledger.free_credits_used_this_month).max(0);
    let paid = ledger.paid_credits;
    AvailableCredits {
        free,
        paid,
        total: free.saturating_add(paid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::month::MonthKey;
    use uuid::Uuid;

    fn make_ledger(free_used: i32, paid: i32) -> CreditLedger {
        let mut ledger = CreditLedger::fresh(Uuid::new_v4(), MonthKey::current());
        ledger.free_credits_used_this_month = free_used;
        ledger.paid_credits = paid;
        ledger
    }

    #[test]
    fn test_fresh_ledger_has_full_allowance() {
        let available = available_credits(&make_ledger(0, 0), 3);
        assert_eq!(available.free, 3);
        assert_eq!(available.paid, 0);
        assert_eq!(available.total, 3);
    }

    #[test]
    fn test_partial_consumption_with_paid_balance() {
        // 3 - 1 free remaining, plus 5 purchased = 7
        let available = available_credits(&make_ledger(1, 5), 3);
        assert_eq!(available.free, 2);
        assert_eq!(available.paid, 5);
        assert_eq!(available.total, 7);
    }

    #[test]
    fn test_exhausted_allowance_leaves_paid_only() {
        let available = available_credits(&make_ledger(3, 2), 3);
        assert_eq!(available.free, 0);
        assert_eq!(available.total, 2);
    }

    #[test]
    fn test_free_clamps_to_zero_when_limit_lowered_mid_month() {
        // User consumed 5 while the limit was higher; admin dropped it to 3.
        let available = available_credits(&make_ledger(5, 1), 3);
        assert_eq!(available.free, 0);
        assert_eq!(available.total, 1);
    }

    #[test]
    fn test_zero_limit_means_paid_only() {
        let available = available_credits(&make_ledger(0, 4), 0);
        assert_eq!(available.free, 0);
        assert_eq!(available.paid, 4);
        assert_eq!(available.total, 4);
    }

    #[test]
    fn test_everything_exhausted() {
        let available = available_credits(&make_ledger(3, 0), 3);
        assert_eq!(available.total, 0);
    }

    #[test]
    fn test_total_saturates_instead_of_overflowing() {
        let available = available_credits(&make_ledger(0, i32::MAX), i32::MAX);
        assert_eq!(available.free, i32::MAX);
        assert_eq!(available.paid, i32::MAX);
        assert_eq!(available.total, i32::MAX);
    }
}
