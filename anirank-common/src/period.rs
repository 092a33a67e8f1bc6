//! Analysis periods
//!
//! Titles are analyzed per broadcast season:
//! - Winter: January - March
//! - Spring: April - June
//! - Summer: July - September
//! - Fall: October - December

use crate::{Error, Result};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

    /// Quarter number, 1-4
    pub fn quarter(self) -> u32 {
        match self {
            Season::Winter => 1,
            Season::Spring => 2,
            Season::Summer => 3,
            Season::Fall => 4,
        }
    }

    pub fn from_quarter(quarter: u32) -> Option<Self> {
        match quarter {
            1 => Some(Season::Winter),
            2 => Some(Season::Spring),
            3 => Some(Season::Summer),
            4 => Some(Season::Fall),
            _ => None,
        }
    }

    pub fn from_month(month: u32) -> Option<Self> {
        match month {
            1..=12 => Self::from_quarter((month - 1) / 3 + 1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }

    fn first_month(self) -> u32 {
        (self.quarter() - 1) * 3 + 1
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Season::Winter => "Winter",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        };
        f.write_str(name)
    }
}

/// One season of one year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnalysisPeriod {
    pub year: i32,
    pub season: Season,
}

impl AnalysisPeriod {
    pub fn new(year: i32, season: Season) -> Self {
        Self { year, season }
    }

    /// Parse "2024-1" (quarter form) or "Winter 2024" (name form)
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let bad = || Error::InvalidInput(format!("invalid period '{input}', expected YYYY-Q or 'Season YYYY'"));

        if let Some((year, quarter)) = input.split_once('-') {
            let year: i32 = year.trim().parse().map_err(|_| bad())?;
            let quarter: u32 = quarter.trim().parse().map_err(|_| bad())?;
            let season = Season::from_quarter(quarter).ok_or_else(bad)?;
            return Ok(Self::new(year, season));
        }

        let mut parts = input.split_whitespace();
        let (Some(name), Some(year), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(bad());
        };
        let season = Season::ALL
            .into_iter()
            .find(|season| season.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(bad)?;
        let year: i32 = year.parse().map_err(|_| bad())?;
        Ok(Self::new(year, season))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        // month() is always 1-12
        let season = Season::from_month(date.month()).unwrap_or(Season::Winter);
        Self::new(date.year(), season)
    }

    pub fn current() -> Self {
        Self::from_date(chrono::Local::now().date_naive())
    }

    /// First and last day of the season, widened by `buffer_days` on both sides
    pub fn date_range(&self, buffer_days: i64) -> Option<(NaiveDate, NaiveDate)> {
        let first_month = self.season.first_month();
        let start = NaiveDate::from_ymd_opt(self.year, first_month, 1)?;
        let next_start = if first_month == 10 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(self.year, first_month + 3, 1)?
        };
        let end = next_start - Duration::days(1);
        let buffer = Duration::days(buffer_days);
        Some((start - buffer, end + buffer))
    }

    /// "2024-1" form, used in file names
    pub fn slug(&self) -> String {
        format!("{}-{}", self.year, self.season.quarter())
    }
}

impl fmt::Display for AnalysisPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.season, self.year)
    }
}

impl std::str::FromStr for AnalysisPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
