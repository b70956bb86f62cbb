//! Calendar events (promotions, holidays, closures) and date parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of a calendar entry.
///
/// Unrecognised labels are kept verbatim so they still show up in event
/// annotations; they contribute to the generic event intensity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Promotion,
    Holiday,
    Event,
    StoreClosed,
    Other(String),
}

impl EventKind {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "promotion" => Self::Promotion,
            "holiday" => Self::Holiday,
            "event" => Self::Event,
            "store-closed" => Self::StoreClosed,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Promotion => "promotion",
            Self::Holiday => "holiday",
            Self::Event => "event",
            Self::StoreClosed => "store-closed",
            Self::Other(label) => label,
        }
    }

    /// Impact weight used when an event does not carry an explicit one.
    pub fn default_impact(&self) -> f64 {
        match self {
            Self::Promotion => 0.4,
            Self::Holiday => 0.9,
            Self::Event => 0.5,
            Self::StoreClosed => 1.0,
            Self::Other(_) => 0.3,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        value.label().to_string()
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical calendar event. Every event source is normalised into this shape
/// before the pipeline looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub impact_weight: Option<f64>,
}

impl CalendarEvent {
    pub fn new(date: NaiveDate, kind: EventKind) -> Self {
        Self {
            date,
            kind,
            title: None,
            impact_weight: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_impact(mut self, impact: f64) -> Self {
        self.impact_weight = Some(impact);
        self
    }

    /// Explicit impact if usable, otherwise the kind's default.
    ///
    /// Never negative: accumulated intensities must stay >= 0.
    pub fn resolved_impact(&self) -> f64 {
        match self.impact_weight {
            Some(w) if w.is_finite() => w.max(0.0),
            _ => self.kind.default_impact(),
        }
    }
}

/// Calendar entry as it arrives from a catalog row or an ad-hoc request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCalendarEvent {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "impact_weight")]
    pub impact: Option<f64>,
}

impl RawCalendarEvent {
    pub fn new(date: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            kind: kind.into(),
            title: None,
            impact: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_impact(mut self, impact: f64) -> Self {
        self.impact = Some(impact);
        self
    }

    pub fn normalize(&self) -> Result<CalendarEvent, DomainError> {
        let date = parse_date(&self.date)?;
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(CalendarEvent {
            date,
            kind: EventKind::parse(&self.kind),
            title,
            impact_weight: self.impact,
        })
    }
}

/// Parse a calendar date.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and naive `YYYY-MM-DDTHH:MM:SS`
/// timestamps; only the date part is kept.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DomainError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(DomainError::invalid_date("empty date"));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(DomainError::invalid_date(format!("unparseable date {s:?}")))
}
