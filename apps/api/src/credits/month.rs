//! Calendar-month bucketing for the free-credit allowance.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// A calendar month in `"YYYY-MM"` form (month zero-padded), derived from the
/// server clock in UTC. The free-credit counter is scoped to one of these;
/// unused allowance does not roll over, so equality against the current key is
/// the only comparison the ledger ever needs.
///
/// Stored as TEXT in Postgres and compared there with plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MonthKey(String);

impl MonthKey {
    /// Key for the month containing `instant` (UTC calendar).
    pub fn for_datetime(instant: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", instant.year(), instant.month()))
    }

    /// Key for the month containing now.
    pub fn current() -> Self {
        Self::for_datetime(Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current calendar month. The credit service reads the clock
/// through this trait; production wiring uses [`SystemClock`], tests swap in
/// scripted months to exercise rollover paths.
pub trait MonthSource: Send + Sync {
    fn current_month(&self) -> MonthKey;
}

/// [`MonthSource`] backed by the real UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonthSource for SystemClock {
    fn current_month(&self) -> MonthKey {
        MonthKey::current()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid month key {0:?}, expected \"YYYY-MM\"")]
pub struct InvalidMonthKey(String);

impl FromStr for MonthKey {
    type Err = InvalidMonthKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((year, month)) = s.split_once('-') else {
            return Err(InvalidMonthKey(s.to_string()));
        };
        let year_ok = year.len() == 4 && year.chars().all(|c| c.is_ascii_digit());
        let month_ok = month.len() == 2
            && month.chars().all(|c| c.is_ascii_digit())
            && matches!(month.parse::<u32>(), Ok(1..=12));
        if year_ok && month_ok {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidMonthKey(s.to_string()))
        }
    }
}
