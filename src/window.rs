//! Processing windows and the date formats used to key stored artifacts.
//!
//! A window is an inclusive `[start, end]` range processed as one unit. The
//! scheduled run uses the trailing full week; backfills use whole UTC days.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// Timestamp format of the minute-series index column.
pub const MINUTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Date format used in object keys (`2021_10_04`).
pub const KEY_DATE_FORMAT: &str = "%Y_%m_%d";
/// Month format used in daily raw key directories (`2021_10`).
pub const KEY_MONTH_FORMAT: &str = "%Y_%m";

pub const MINUTES_PER_WEEK: u32 = 7 * 24 * 60;
const MIN_SUPPORTED_YEAR: i32 = 2000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid window: start {start} is after end {end}")]
    StartAfterEnd {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid month selector '{0}': expected MM-YYYY with month 01-12 and year >= 2000")]
    InvalidMonthSelector(String),
    #[error("cannot retrieve full day data for {date}: day has not fully elapsed")]
    IncompleteDay { date: NaiveDate },
    #[error("date out of supported range: {0}")]
    DateOutOfRange(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl PriceWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// From the first moment of `now - 7 days` to the last moment of yesterday.
    pub fn trailing_week(now: DateTime<Utc>) -> Result<Self, WindowError> {
        let today = now.date_naive();
        let first_day = today
            .checked_sub_days(Days::new(7))
            .ok_or(WindowError::DateOutOfRange(today))?;
        let last_day = today
            .checked_sub_days(Days::new(1))
            .ok_or(WindowError::DateOutOfRange(today))?;
        Self::new(first_moment(first_day), last_moment(last_day))
    }

    pub fn whole_day(date: NaiveDate) -> Self {
        Self {
            start: first_moment(date),
            end: last_moment(date),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// `floor((end - start) / 1min) + 1`; 10080 for a full trailing week.
    pub fn minutes(&self) -> u32 {
        let whole = (self.end - self.start).num_minutes();
        u32::try_from(whole.saturating_add(1)).unwrap_or(u32::MAX)
    }

    /// Window start formatted for object keys, e.g. `2021_10_04`.
    pub fn key_date(&self) -> String {
        self.start.format(KEY_DATE_FORMAT).to_string()
    }
}

/// A calendar month given on the command line as `MM-YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSelector {
    year: i32,
    month: u32,
}

impl MonthSelector {
    pub fn parse(raw: &str) -> Result<Self, WindowError> {
        let invalid = || WindowError::InvalidMonthSelector(raw.to_string());
        let (month_text, year_text) = raw.split_once('-').ok_or_else(invalid)?;

        if month_text.len() != 2 || year_text.len() != 4 {
            return Err(invalid());
        }
        if !month_text.bytes().all(|b| b.is_ascii_digit())
            || !year_text.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let month: u32 = month_text.parse().map_err(|_| invalid())?;
        let year: i32 = year_text.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) || year < MIN_SUPPORTED_YEAR {
            return Err(invalid());
        }

        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        let first = self.first_day();
        first
            .iter_days()
            .take_while(|day| day.month() == self.month && day.year() == self.year)
            .collect()
    }

    /// Days of the month that ended strictly before `today`, in calendar order.
    ///
    /// Collection stops at the first day that has not fully elapsed. If even the
    /// first day of the month is incomplete the whole selection is rejected.
    pub fn elapsed_days(&self, today: NaiveDate) -> Result<Vec<NaiveDate>, WindowError> {
        let first = self.first_day();
        if first >= today {
            return Err(WindowError::IncompleteDay { date: first });
        }
        Ok(self.days().into_iter().take_while(|day| *day < today).collect())
    }
}

pub fn first_moment(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// `23:59:59.999999` of `date`, matching the provider's inclusive end bound.
pub fn last_moment(date: NaiveDate) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
    date.and_time(time).and_utc()
}
