//! Monthly ledger partitions.
//!
//! Ledger entries are range-partitioned by the month of their timestamp.
//! Partitioning is a storage concern only: the chain runs across partition
//! boundaries unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::StoreError;

/// A calendar month (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// `month` is 1-based.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (0..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The period containing `t`.
    pub fn of(t: DateTime<Utc>) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    /// The following month.
    pub fn next(self) -> Self {
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

    /// First instant of the period (inclusive).
    pub fn start(self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First instant of the next period (exclusive upper bound).
    pub fn end(self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn contains(self, t: DateTime<Utc>) -> bool {
        Self::of(t) == self
    }

    /// Backing table name, e.g. `ledger_entries_p202610`.
    ///
    /// Only digits are interpolated, so the name is safe to splice into SQL.
    pub fn table_name(self) -> String {
        format!("ledger_entries_p{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidData(format!("invalid period label: {s}"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_of_boundary_instants() {
        let last = Utc.with_ymd_and_hms(2026, 10, 31, 23, 59, 59).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(Period::of(last), Period::new(2026, 10).unwrap());
        assert_eq!(Period::of(first), Period::new(2026, 11).unwrap());
        assert_eq!(Period::of(last).end(), first);
    }

    #[test]
    fn test_year_rollover() {
        let dec = Period::new(2026, 12).unwrap();
        assert_eq!(dec.next(), Period::new(2027, 1).unwrap());
        assert!(dec < dec.next());
    }

    #[test]
    fn test_labels_and_tables() {
        let p = Period::new(2026, 3).unwrap();
        assert_eq!(p.to_string(), "2026-03");
        assert_eq!(p.table_name(), "ledger_entries_p202603");
        assert_eq!("2026-03".parse::<Period>().unwrap(), p);
        assert!("2026-13".parse::<Period>().is_err());
        assert!("26-3".parse::<Period>().is_err());
    }
}
