//! Billing month periods.
//!
//! Free quotas reset monthly; every quota row is keyed by a `YYYY-MM` period.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `YYYY-MM` billing period.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

impl BillingMonth {
    /// The billing month containing the given instant.
    #[must_use]
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The current billing month (request wall-clock time).
    #[must_use]
    pub fn current() -> Self {
        Self::of(Utc::now())
    }

    /// The billing month after this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl fmt::Debug for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BillingMonth({self})")
    }
}

impl FromStr for BillingMonth {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or(MonthError::Format)?;
        let year: i32 = year.parse().map_err(|_| MonthError::Format)?;
        let month: u32 = month.parse().map_err(|_| MonthError::Format)?;
        if !(1..=12).contains(&month) || year < 1970 {
            return Err(MonthError::Format);
        }
        Ok(Self { year, month })
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = MonthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(m: BillingMonth) -> Self {
        m.to_string()
    }
}

/// Error parsing a billing month.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonthError {
    /// Not a valid `YYYY-MM` string.
    #[error("billing month must be YYYY-MM")]
    Format,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_zero_padding() {
        let m = BillingMonth::of(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap());
        assert_eq!(m.to_string(), "2025-01");
    }

    #[test]
    fn parse_roundtrip() {
        let m: BillingMonth = "2025-09".parse().unwrap();
        assert_eq!(m.to_string(), "2025-09");
        assert!("2025-13".parse::<BillingMonth>().is_err());
        assert!("202509".parse::<BillingMonth>().is_err());
    }

    #[test]
    fn next_rolls_over_december() {
        let dec: BillingMonth = "2025-12".parse().unwrap();
        assert_eq!(dec.next().to_string(), "2026-01");

        let jan: BillingMonth = "2025-01".parse().unwrap();
        assert_eq!(jan.next().to_string(), "2025-02");
    }
}
