//! Day-of-week gate deciding whether a source is reloaded today.
//!
//! Days are written with single-letter symbols, comma separated:
//! `U` Sunday, `M` Monday, `T` Tuesday, `W` Wednesday, `R` Thursday, `F` Friday, `S` Saturday.

use chrono::{Datelike, Local};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown weekday symbol {0:?} (expected one of U, M, T, W, R, F, S)")]
pub struct ParseWeekdayError(pub String);

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Weekday::Sunday => "U",
            Weekday::Monday => "M",
            Weekday::Tuesday => "T",
            Weekday::Wednesday => "W",
            Weekday::Thursday => "R",
            Weekday::Friday => "F",
            Weekday::Saturday => "S",
        }
    }

    /// The weekday of the local clock.
    pub fn today() -> Self {
        Local::now().weekday().into()
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Weekday {
    type Err = ParseWeekdayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Weekday::ALL
            .into_iter()
            .find(|day| day.symbol().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseWeekdayError(s.to_string()))
    }
}

/// Returns true when `today` is listed in the comma separated `days` string.
///
/// Matching ignores case and surrounding whitespace. Unknown or empty entries never match,
/// so a malformed schedule means "never due" rather than an error.
pub fn is_due(today: Weekday, days: &str) -> bool {
    days.split(',')
        .map(str::trim)
        .any(|entry| entry.eq_ignore_ascii_case(today.symbol()))
}
