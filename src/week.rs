use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::Context;
use chrono::{Datelike as _, Duration, NaiveDate};

/// Label of one weekly column in the datastore, e.g. `"2016-35"`.
///
/// Rendered without zero padding so that labels written by earlier runs
/// parse back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekLabel {
    pub iso_year: i32,
    pub iso_week: u32,
}

impl WeekLabel {
    /// The ISO calendar week containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        WeekLabel { iso_year: iso.year(), iso_week: iso.week() }
    }

    /// Monday of this week.
    pub fn monday(&self) -> NaiveDate {
        week_start(self.iso_year, self.iso_week)
    }
}

impl Display for WeekLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.iso_year, self.iso_week)
    }
}

impl FromStr for WeekLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = s
            .split_once('-')
            .with_context(|| format!("week label {s:?} is not of the form \"year-week\""))?;
        let iso_year =
            year.trim().parse().with_context(|| format!("bad year in week label {s:?}"))?;
        let iso_week =
            week.trim().parse().with_context(|| format!("bad week in week label {s:?}"))?;
        Ok(WeekLabel { iso_year, iso_week })
    }
}

/// Monday of the given ISO week (ISO 8601: week 1 is the week containing
/// the year's first Thursday).
///
/// Works from January 1: a weekday after Thursday rolls forward to the
/// next Monday, anything else rolls back to its own Monday, then whole
/// weeks are added. Callers must pass week numbers that exist in the
/// given year; out-of-range weeks land in a neighboring year.
pub fn week_start(iso_year: i32, iso_week: u32) -> NaiveDate {
    let jan_first =
        NaiveDate::from_ymd_opt(iso_year, 1, 1).expect("January 1 should be valid in every year");
    let weekday = jan_first.weekday().num_days_from_monday() as i64;
    let week_one_monday = if weekday > 3 {
        jan_first + Duration::days(7 - weekday)
    } else {
        jan_first - Duration::days(weekday)
    };
    week_one_monday + Duration::days((iso_week as i64 - 1) * 7)
}
