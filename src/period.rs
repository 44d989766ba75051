use std::{fmt::Display, str::FromStr};

use chrono::{Datelike, NaiveDate};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A calendar month. Periods are totally ordered by (year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum PeriodError {
    /// Not of the form `YYYY-MM`
    #[display(fmt = "invalid period `{}`, expected YYYY-MM", _0)]
    Malformed(String),
    /// A horizon bound is not one of the known periods
    #[display(fmt = "period {} is not part of the planning calendar", _0)]
    Unknown(Period),
    /// The horizon ends before it starts
    #[display(fmt = "horizon {}..={} is reversed", _0, _1)]
    Reversed(Period, Period),
}

impl std::error::Error for PeriodError {}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Period, PeriodError> {
        match NaiveDate::from_ymd_opt(year, month, 1) {
            Some(date) => Ok(Period::from_date(date)),
            None => Err(PeriodError::Malformed(format!("{year}-{month}"))),
        }
    }

    pub fn from_date(date: NaiveDate) -> Period {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Month of the year, 1-based
    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month that follows this one
    pub fn succ(&self) -> Period {
        if self.month == 12 {
            Period {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Period {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
            .map(Period::from_date)
            .map_err(|_| PeriodError::Malformed(s.to_string()))
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// A contiguous, inclusive sub-sequence of the planning calendar selected for optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Horizon {
    pub start: Period,
    pub end: Period,
}

impl Horizon {
    pub fn new(start: Period, end: Period) -> Result<Horizon, PeriodError> {
        if end < start {
            return Err(PeriodError::Reversed(start, end));
        }
        Ok(Horizon { start, end })
    }

    /// Resolves the horizon against the calendar, returning the absolute position of each
    /// horizon period. Horizon-relative offsets are positions in the returned vector.
    pub fn resolve(&self, calendar: &[Period]) -> Result<Vec<usize>, PeriodError> {
        if self.end < self.start {
            return Err(PeriodError::Reversed(self.start, self.end));
        }
        let first = calendar
            .iter()
            .position(|p| *p == self.start)
            .ok_or(PeriodError::Unknown(self.start))?;
        let last = calendar
            .iter()
            .position(|p| *p == self.end)
            .ok_or(PeriodError::Unknown(self.end))?;

        Ok((first..=last).collect())
    }
}

impl Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
