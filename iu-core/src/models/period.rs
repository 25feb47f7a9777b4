use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Earliest year for which reference data is published.
pub const MIN_YEAR: i32 = 2020;

/// Latest year accepted as a period.
pub const MAX_YEAR: i32 = 2030;

const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("year {0} is outside the supported range {min}..={max}", min = MIN_YEAR, max = MAX_YEAR)]
    InvalidYear(i32),

    #[error("month {0} must be between 1 and 12")]
    InvalidMonth(u32),
}

/// A calendar month to which a bracket table and unit values apply.
///
/// Ordering is chronological (year first, then month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    year: i32,
    month: u32,
}

/// Unchecked wire form of [`Period`].
#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for Period {
    type Error = PeriodError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Self::new(raw.year, raw.month)
    }
}

impl Period {
    pub fn new(
        year: i32,
        month: u32,
    ) -> Result<Self, PeriodError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PeriodError::InvalidYear(year));
        }
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        Ok(Self { year, month })
    }

    /// The period containing `date`.
    pub fn from_date(date: NaiveDate) -> Result<Self, PeriodError> {
        Self::new(date.year(), date.month())
    }

    /// Parses a `YYYY_MM` storage key.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (year, month) = key.split_once('_')?;
        Self::new(year.parse().ok()?, month.parse().ok()?).ok()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Spanish display label, e.g. `Septiembre 2025`.
    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[(self.month - 1) as usize], self.year)
    }

    /// Key used by stores and exports, e.g. `2025_09`.
    pub fn storage_key(&self) -> String {
        format!("{}_{:02}", self.year, self.month)
    }

    /// First day of the month; the date a bracket table takes effect.
    pub fn first_day(&self) -> NaiveDate {
        // Year and month are range checked on construction.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the month.
    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Period {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn new_accepts_supported_range() {
        assert!(Period::new(2025, 9).is_ok());
        assert!(Period::new(MIN_YEAR, 1).is_ok());
        assert!(Period::new(MAX_YEAR, 12).is_ok());
    }

    #[test]
    fn new_rejects_old_year() {
        assert_eq!(Period::new(2019, 12), Err(PeriodError::InvalidYear(2019)));
    }

    #[test]
    fn new_rejects_month_thirteen() {
        assert_eq!(Period::new(2025, 13), Err(PeriodError::InvalidMonth(13)));
        assert_eq!(Period::new(2025, 0), Err(PeriodError::InvalidMonth(0)));
    }

    #[test]
    fn label_uses_spanish_month_names() {
        let period = Period::new(2025, 9).unwrap();

        assert_eq!(period.label(), "Septiembre 2025");
    }

    #[test]
    fn storage_key_round_trips() {
        let period = Period::new(2025, 3).unwrap();

        assert_eq!(period.storage_key(), "2025_03");
        assert_eq!(Period::from_storage_key("2025_03"), Some(period));
        assert_eq!(Period::from_storage_key("2025-03"), None);
        assert_eq!(Period::from_storage_key("1999_03"), None);
    }

    #[test]
    fn last_day_handles_december_and_february() {
        let december = Period::new(2025, 12).unwrap();
        let february = Period::new(2024, 2).unwrap();

        assert_eq!(december.last_day(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(february.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn deserialize_checks_range() {
        let period: Period = serde_json::from_str(r#"{"year":2025,"month":9}"#).unwrap();
        let bad_month = serde_json::from_str::<Period>(r#"{"year":2025,"month":13}"#);
        let bad_year = serde_json::from_str::<Period>(r#"{"year":1990,"month":1}"#);

        assert_eq!(period, Period::new(2025, 9).unwrap());
        assert!(bad_month.unwrap_err().to_string().contains("month 13"));
        assert!(bad_year.unwrap_err().to_string().contains("year 1990"));
    }

    #[test]
    fn periods_order_chronologically() {
        let mut periods = vec![
            Period::new(2025, 1).unwrap(),
            Period::new(2024, 12).unwrap(),
            Period::new(2025, 9).unwrap(),
        ];

        periods.sort();

        assert_eq!(periods[0], Period::new(2024, 12).unwrap());
        assert_eq!(periods[2], Period::new(2025, 9).unwrap());
    }
}
