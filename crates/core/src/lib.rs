//! `siprems-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** values (no infrastructure concerns):
//! identifiers, calendar events, daily observations and product snapshots.

pub mod calendar;
pub mod error;
pub mod id;
pub mod observation;

pub use calendar::{parse_date, CalendarEvent, EventKind, RawCalendarEvent};
pub use error::{DomainError, DomainResult};
pub use id::{ProductId, RecordId, TargetId};
pub use observation::{is_weekend, DailyObservation, DayIntensities, ProductStockSnapshot};
