//! Core building blocks of the hush alert pipeline.
//!
//! `hush-core` holds everything a rule needs to look at an alert:
//!
//! # Features
//!
//! - **Alert model**: [`Alert`] with source, severity, labels, attributes,
//!   body and the state the pipeline writes (group hash, mute, rate limit,
//!   routed notifications)
//! - **Field references**: [`FieldRef`] addresses `severity_number`,
//!   `severity_text`, or an entry of `labels`, `attributes`, `group_labels`
//!   or `body`
//! - **Condition language**: [`Condition`] parses expressions such as
//!   `labels[env] == 'prod' and !has labels[ack]` once and evaluates them
//!   without allocation-heavy reparsing
//! - **Schedules**: [`Schedule`] matches daily or weekly windows, including
//!   windows that wrap across midnight or the weekend, in any IANA timezone
//! - **Templates**: [`Template`] fills `{{ ... }}` placeholders from alert
//!   fields and regex captures
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use hush_core::{Alert, Condition, Schedule, ScheduleSpec, Source, WeekTimeSpec};
//!
//! let alert = Alert::new(Source::new("syslog", "edge-1"))
//!     .with_severity("critical", 21)
//!     .label("service", "checkout")
//!     .at(Utc.with_ymd_and_hms(2024, 4, 20, 3, 0, 0).unwrap());
//!
//! let condition = Condition::parse("severity_text =~ '^crit' and labels[service] == 'checkout'").unwrap();
//! assert!(condition.test(&alert));
//!
//! let weekend = Schedule::compile(&ScheduleSpec::Weekly {
//!     from: WeekTimeSpec { weekday: "fri".into(), time: "17:30".into() },
//!     to: WeekTimeSpec { weekday: "mon".into(), time: "08:30".into() },
//!     timezone: Some("Asia/Tokyo".into()),
//! })
//! .unwrap();
//! assert!(weekend.matches(alert.timestamp));
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/hush-core/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod condition;
pub mod error;
pub mod field;
pub mod schedule;
pub mod template;
pub mod types;

pub use condition::Condition;
pub use error::{CoreError, Result};
pub use field::{FieldKind, FieldRef};
pub use schedule::{Schedule, ScheduleSpec, TimeOfDay, WeekTime, WeekTimeSpec};
pub use template::{Captures, Template};
pub use types::{Alert, Mute, RateLimitStatus, Source};
