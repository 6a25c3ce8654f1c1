use std::{fmt, str::FromStr};

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
    TimeZone, Weekday,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// days an alarm repeats on, bit 0 is monday and bit 6 is sunday
/// an empty set means the alarm doesn't repeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0b001_1111);
    pub const WEEKEND: Self = Self(0b110_0000);
    pub const EVERY_DAY: Self = Self(0b111_1111);

    /// only the 7 low bits are kept
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::EVERY_DAY.0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_repeating(self) -> bool {
        self.0 != 0
    }

    #[must_use]
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    #[must_use]
    pub fn with(self, day: Weekday) -> Self {
        Self(self.0 | Self::bit(day))
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        ALL_DAYS.into_iter().filter(move |day| self.contains(*day))
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }
}

impl From<u8> for DaysOfWeek {
    fn from(bits: u8) -> Self {
        Self::from_bits(bits)
    }
}

impl From<DaysOfWeek> for u8 {
    fn from(days: DaysOfWeek) -> Self {
        days.0
    }
}

impl FromIterator<Weekday> for DaysOfWeek {
    fn from_iter<T: IntoIterator<Item = Weekday>>(iter: T) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl fmt::Display for DaysOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "once"),
            Self::EVERY_DAY => write!(f, "daily"),
            Self::WEEKDAYS => write!(f, "weekdays"),
            Self::WEEKEND => write!(f, "weekend"),
            days => {
                let names: Vec<String> = days.iter().map(|day| day.to_string()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown day `{0}`, expected names like mon,tue or once/daily/weekdays/weekend")]
pub struct ParseDaysError(String);

impl FromStr for DaysOfWeek {
    type Err = ParseDaysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "once" | "never" => Ok(Self::NONE),
            "daily" | "everyday" => Ok(Self::EVERY_DAY),
            "weekdays" => Ok(Self::WEEKDAYS),
            "weekend" => Ok(Self::WEEKEND),
            list => list
                .split(',')
                .map(|name| {
                    name.trim()
                        .parse::<Weekday>()
                        .map_err(|_| ParseDaysError(name.trim().to_string()))
                })
                .collect(),
        }
    }
}

/// the part of an alarm that decides when it goes off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub hours: u32,
    pub minutes: u32,
    pub days: DaysOfWeek,
    /// seconds added on top of hours:minutes
    pub snooze: i64,
}

impl Schedule {
    /// Finds the first time at or after `now` that the alarm should ring.
    ///
    /// A non repeating alarm only ever rings today, once its time has passed this returns `None`.
    /// A snoozed ring that carried over midnight still belongs to the day before.
    /// A repeating alarm looks at today and the following seven days, so when today's ring
    /// already happened the same weekday next week is still found.
    #[must_use]
    pub fn next_occurrence<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let time = NaiveTime::from_hms_opt(self.hours, self.minutes, 0)?;
        let snooze = TimeDelta::try_seconds(self.snooze)?;
        let tz = now.timezone();
        let today = now.date_naive();
        let occurrence_on = |date: NaiveDate| {
            date.and_time(time)
                .checked_add_signed(snooze)
                .and_then(|local| resolve_local(&tz, local))
        };

        // a snooze can push yesterday's ring past midnight into today
        let first = if self.snooze > 0 { -1 } else { 0 };
        let last = if self.days.is_repeating() { 7 } else { 0 };
        (first..=last)
            .filter_map(|offset| today.checked_add_signed(TimeDelta::days(offset)))
            .filter(|date| !self.days.is_repeating() || self.days.contains(date.weekday()))
            .filter_map(occurrence_on)
            .find(|at| at >= now)
    }
}

// a wall clock time skipped by a dst change rings an hour later,
// a repeated one rings the first time round
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Some(at),
        LocalResult::None => local
            .checked_add_signed(TimeDelta::hours(1))
            .and_then(|shifted| tz.from_local_datetime(&shifted).earliest()),
    }
}
