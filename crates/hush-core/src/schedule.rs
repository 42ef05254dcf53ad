//! Schedules: recurring daily or weekly time windows.
//!
//! A window is resolved once into minute offsets on a ring (1440 minutes for
//! daily windows, 10080 for weekly ones). Both endpoints are inclusive at
//! minute granularity. When `from` comes after `to` the window wraps across
//! the cycle boundary, e.g. Friday evening to Monday morning.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Textual schedule definition, as written in rule files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Always active.
    #[default]
    Always,
    /// Active every day between two times of day.
    Daily {
        /// Start, `HH:MM`.
        from: String,
        /// End, `HH:MM`.
        to: String,
        /// IANA timezone name; UTC when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Active every week between two weekday times.
    Weekly {
        /// Start of the window.
        from: WeekTimeSpec,
        /// End of the window.
        to: WeekTimeSpec,
        /// IANA timezone name; UTC when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

/// A weekday and time of day, as written in rule files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekTimeSpec {
    /// Weekday name, full or abbreviated (`friday`, `Fri`).
    pub weekday: String,
    /// Time of day, `HH:MM`.
    pub time: String,
}

/// An hour and minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    /// Creates a time of day.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchedule`] if the hour or minute is out of range.
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(CoreError::schedule(format!(
                "time {hour:02}:{minute:02} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    const fn minute_of_day(self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl FromStr for TimeOfDay {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || CoreError::schedule(format!("invalid time '{s}', expected HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        let hour = h.parse().map_err(|_| bad())?;
        let minute = m.parse().map_err(|_| bad())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A weekday and time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekTime {
    /// The weekday.
    pub weekday: Weekday,
    /// The time on that weekday.
    pub time: TimeOfDay,
}

impl WeekTime {
    fn from_spec(spec: &WeekTimeSpec) -> Result<Self> {
        let weekday = spec
            .weekday
            .trim()
            .parse::<Weekday>()
            .map_err(|_| CoreError::schedule(format!("invalid weekday '{}'", spec.weekday)))?;
        Ok(Self {
            weekday,
            time: spec.time.parse()?,
        })
    }

    fn minute_of_week(self) -> u32 {
        self.weekday.num_days_from_monday() * MINUTES_PER_DAY + self.time.minute_of_day()
    }
}

impl fmt::Display for WeekTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.weekday, self.time)
    }
}

/// A compiled schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Always active.
    Always,
    /// Daily window in a timezone.
    Daily {
        /// Inclusive start.
        from: TimeOfDay,
        /// Inclusive end.
        to: TimeOfDay,
        /// Timezone the window is expressed in.
        timezone: Tz,
    },
    /// Weekly window in a timezone.
    Weekly {
        /// Inclusive start.
        from: WeekTime,
        /// Inclusive end.
        to: WeekTime,
        /// Timezone the window is expressed in.
        timezone: Tz,
    },
}

fn resolve_timezone(name: Option<&str>) -> Result<Tz> {
    match name.map(str::trim) {
        None | Some("") => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| CoreError::schedule(format!("unknown timezone '{name}'"))),
    }
}

/// Tests `x` against an inclusive window that may wrap around the ring.
const fn in_window(x: u32, from: u32, to: u32) -> bool {
    if from <= to {
        from <= x && x <= to
    } else {
        x >= from || x <= to
    }
}

impl Schedule {
    /// Resolves a textual schedule.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchedule`] for malformed times, weekdays or
    /// unknown timezones.
    pub fn compile(spec: &ScheduleSpec) -> Result<Self> {
        match spec {
            ScheduleSpec::Always => Ok(Self::Always),
            ScheduleSpec::Daily { from, to, timezone } => Ok(Self::Daily {
                from: from.parse()?,
                to: to.parse()?,
                timezone: resolve_timezone(timezone.as_deref())?,
            }),
            ScheduleSpec::Weekly { from, to, timezone } => Ok(Self::Weekly {
                from: WeekTime::from_spec(from)?,
                to: WeekTime::from_spec(to)?,
                timezone: resolve_timezone(timezone.as_deref())?,
            }),
        }
    }

    /// Returns true if `at` falls inside the window.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        match self {
            Self::Always => true,
            Self::Daily { from, to, timezone } => {
                let local = at.with_timezone(timezone);
                let now = local.hour() * 60 + local.minute();
                in_window(now, from.minute_of_day(), to.minute_of_day())
            }
            Self::Weekly { from, to, timezone } => {
                let local = at.with_timezone(timezone);
                let now = local.weekday().num_days_from_monday() * MINUTES_PER_DAY
                    + local.hour() * 60
                    + local.minute();
                in_window(now, from.minute_of_week(), to.minute_of_week())
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Daily { from, to, timezone } => write!(f, "daily {from}-{to} {timezone}"),
            Self::Weekly { from, to, timezone } => write!(f, "weekly {from} - {to} {timezone}"),
        }
    }
}
