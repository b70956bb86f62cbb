//! Feature building: event intensities, training frames and future frames.
//!
//! The same row builder feeds training, hold-out scoring and prediction, so a
//! date always gets identical covariates no matter which path asks for it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use siprems_core::{
    is_weekend, CalendarEvent, DailyObservation, DayIntensities, EventKind, RawCalendarEvent,
};

pub const IS_WEEKEND: &str = "is_weekend";
pub const PROMO_INTENSITY: &str = "promo_intensity";
pub const HOLIDAY_INTENSITY: &str = "holiday_intensity";
pub const EVENT_INTENSITY: &str = "event_intensity";
pub const CLOSURE_INTENSITY: &str = "closure_intensity";
pub const TRANSACTION_COUNT: &str = "transaction_count";
pub const ITEMS_SOLD: &str = "items_sold";
pub const AVG_TICKET: &str = "avg_ticket";

/// Every column a frame carries, in a stable order.
pub const FRAME_COLUMNS: [&str; 8] = [
    IS_WEEKEND,
    PROMO_INTENSITY,
    HOLIDAY_INTENSITY,
    EVENT_INTENSITY,
    CLOSURE_INTENSITY,
    TRANSACTION_COUNT,
    ITEMS_SOLD,
    AVG_TICKET,
];

/// Accumulated events of one calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayEvents {
    pub intensities: DayIntensities,
    pub titles: BTreeSet<String>,
    pub kinds: BTreeSet<String>,
}

/// Per-date event intensities.
///
/// Same-type impacts add up; a closure is binary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLookup {
    days: BTreeMap<NaiveDate, DayEvents>,
}

impl EventLookup {
    pub fn build(events: &[CalendarEvent]) -> Self {
        let mut days: BTreeMap<NaiveDate, DayEvents> = BTreeMap::new();

        for ev in events {
            let impact = ev.resolved_impact();
            let day = days.entry(ev.date).or_default();
            let acc = &mut day.intensities;
            match ev.kind {
                EventKind::Promotion => acc.promo += impact,
                EventKind::Holiday => acc.holiday += impact,
                EventKind::Event | EventKind::Other(_) => acc.event += impact,
                EventKind::StoreClosed => acc.closure = 1.0,
            }
            if let Some(title) = &ev.title {
                day.titles.insert(title.clone());
            }
            day.kinds.insert(ev.kind.label().to_string());
        }

        Self { days }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayEvents> {
        self.days.get(&date)
    }

    /// Intensities for a date; all zero when nothing is scheduled.
    pub fn intensities(&self, date: NaiveDate) -> DayIntensities {
        self.days.get(&date).map(|d| d.intensities).unwrap_or_default()
    }

    pub fn is_closed(&self, date: NaiveDate) -> bool {
        self.intensities(date).closure > 0.0
    }

    /// Number of `dates` with at least one event.
    pub fn dates_touched(&self, dates: &[NaiveDate]) -> usize {
        dates.iter().filter(|d| self.days.contains_key(d)).count()
    }
}

/// Result of normalising raw calendar rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedEvents {
    pub events: Vec<CalendarEvent>,
    pub skipped: usize,
}

/// Normalise raw calendar rows, skipping (and counting) rows with bad dates.
pub fn normalize_events(raw: &[RawCalendarEvent]) -> NormalizedEvents {
    let mut out = NormalizedEvents::default();
    for row in raw {
        match row.normalize() {
            Ok(ev) => out.events.push(ev),
            Err(e) => {
                warn!(date = %row.date, kind = %row.kind, error = %e, "skipping calendar event");
                out.skipped += 1;
            }
        }
    }
    out
}

/// Dates plus named regressor columns, all of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegressorFrame {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl RegressorFrame {
    fn with_capacity(n: usize) -> Self {
        let columns = FRAME_COLUMNS
            .iter()
            .map(|c| (c.to_string(), Vec::with_capacity(n)))
            .collect();
        Self {
            dates: Vec::with_capacity(n),
            columns,
        }
    }

    fn push_row(&mut self, date: NaiveDate, covariates: Covariates, intensities: DayIntensities) {
        self.dates.push(date);
        let weekend = if is_weekend(date) { 1.0 } else { 0.0 };
        for (name, v) in [
            (IS_WEEKEND, weekend),
            (PROMO_INTENSITY, intensities.promo),
            (HOLIDAY_INTENSITY, intensities.holiday),
            (EVENT_INTENSITY, intensities.event),
            (CLOSURE_INTENSITY, intensities.closure),
            (TRANSACTION_COUNT, covariates.transaction_count),
            (ITEMS_SOLD, covariates.items_sold),
            (AVG_TICKET, covariates.avg_ticket),
        ] {
            if let Some(col) = self.columns.get_mut(name) {
                col.push(v);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.columns.get_mut(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Add an all-zero column if `name` is absent. Returns `true` when added.
    pub fn fill_missing(&mut self, name: &str) -> bool {
        if self.columns.contains_key(name) {
            return false;
        }
        self.columns.insert(name.to_string(), vec![0.0; self.dates.len()]);
        true
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            dates: self.dates[..n].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), v[..n].to_vec()))
                .collect(),
        }
    }

    /// Rows from `start` to the end.
    pub fn tail_from(&self, start: usize) -> Self {
        let start = start.min(self.len());
        Self {
            dates: self.dates[start..].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), v[start..].to_vec()))
                .collect(),
        }
    }
}

/// Regressor frame plus the observed demand it is fitted against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingFrame {
    pub frame: RegressorFrame,
    pub demand: Vec<f64>,
}

impl TrainingFrame {
    pub fn len(&self) -> usize {
        self.demand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demand.is_empty()
    }

    /// Split into the first `len - holdout` rows and the trailing `holdout` rows.
    pub fn split_tail(&self, holdout: usize) -> (TrainingFrame, TrainingFrame) {
        let cut = self.len().saturating_sub(holdout);
        (
            TrainingFrame {
                frame: self.frame.head(cut),
                demand: self.demand[..cut].to_vec(),
            },
            TrainingFrame {
                frame: self.frame.tail_from(cut),
                demand: self.demand[cut..].to_vec(),
            },
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Covariates {
    transaction_count: f64,
    items_sold: f64,
    avg_ticket: f64,
}

impl Covariates {
    fn of(obs: &DailyObservation) -> Self {
        Self {
            transaction_count: obs.transaction_count,
            items_sold: obs.items_sold,
            avg_ticket: obs.avg_ticket,
        }
    }
}

fn observed_intensities(obs: &DailyObservation, lookup: &EventLookup) -> DayIntensities {
    obs.intensities.unwrap_or_else(|| lookup.intensities(obs.date))
}

/// Sort by date and keep the last row for any duplicated date.
pub fn sorted_unique(history: &[DailyObservation]) -> Vec<DailyObservation> {
    let mut by_date: BTreeMap<NaiveDate, &DailyObservation> = BTreeMap::new();
    let mut duplicates = 0usize;
    for obs in history {
        if by_date.insert(obs.date, obs).is_some() {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!(duplicates, "daily history contains duplicated dates; keeping the last row");
    }
    by_date.into_values().cloned().collect()
}

/// One row per observation, ordered by date.
pub fn build_training_frame(history: &[DailyObservation], lookup: &EventLookup) -> TrainingFrame {
    let history = sorted_unique(history);
    let mut frame = RegressorFrame::with_capacity(history.len());
    let mut demand = Vec::with_capacity(history.len());

    for obs in &history {
        frame.push_row(obs.date, Covariates::of(obs), observed_intensities(obs, lookup));
        demand.push(obs.demand);
    }

    TrainingFrame { frame, demand }
}

/// Back-fill values for covariates on dates that have no observation.
///
/// Weekday-conditioned mean, then the global mean, then 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateProfile {
    weekday: HashMap<u32, Covariates>,
    global: Option<Covariates>,
}

impl CovariateProfile {
    pub fn from_history(history: &[DailyObservation]) -> Self {
        let mut sums: HashMap<u32, (Covariates, usize)> = HashMap::new();
        let mut total = Covariates {
            transaction_count: 0.0,
            items_sold: 0.0,
            avg_ticket: 0.0,
        };

        for obs in history {
            let wd = obs.date.weekday().num_days_from_monday();
            let entry = sums.entry(wd).or_insert((
                Covariates {
                    transaction_count: 0.0,
                    items_sold: 0.0,
                    avg_ticket: 0.0,
                },
                0,
            ));
            entry.0.transaction_count += obs.transaction_count;
            entry.0.items_sold += obs.items_sold;
            entry.0.avg_ticket += obs.avg_ticket;
            entry.1 += 1;

            total.transaction_count += obs.transaction_count;
            total.items_sold += obs.items_sold;
            total.avg_ticket += obs.avg_ticket;
        }

        let weekday = sums
            .into_iter()
            .map(|(wd, (sum, n))| (wd, scale(sum, n)))
            .collect();
        let global = (!history.is_empty()).then(|| scale(total, history.len()));

        Self { weekday, global }
    }

    fn for_date(&self, date: NaiveDate) -> Covariates {
        let wd = date.weekday().num_days_from_monday();
        self.weekday
            .get(&wd)
            .copied()
            .or(self.global)
            .unwrap_or(Covariates {
                transaction_count: 1.0,
                items_sold: 1.0,
                avg_ticket: 1.0,
            })
    }

    pub fn transaction_count(&self, date: NaiveDate) -> f64 {
        self.for_date(date).transaction_count
    }

    pub fn items_sold(&self, date: NaiveDate) -> f64 {
        self.for_date(date).items_sold
    }

    pub fn avg_ticket(&self, date: NaiveDate) -> f64 {
        self.for_date(date).avg_ticket
    }
}

fn scale(sum: Covariates, n: usize) -> Covariates {
    let n = n.max(1) as f64;
    Covariates {
        transaction_count: sum.transaction_count / n,
        items_sold: sum.items_sold / n,
        avg_ticket: sum.avg_ticket / n,
    }
}

/// Frame for `dates`: observed covariates where history has the date,
/// profile back-fill otherwise; intensities from the lookup.
pub fn build_future_frame(
    dates: &[NaiveDate],
    history: &[DailyObservation],
    lookup: &EventLookup,
) -> RegressorFrame {
    let observed: HashMap<NaiveDate, &DailyObservation> =
        history.iter().map(|o| (o.date, o)).collect();
    let profile = CovariateProfile::from_history(history);
    let mut frame = RegressorFrame::with_capacity(dates.len());

    for &date in dates {
        match observed.get(&date) {
            Some(obs) => frame.push_row(date, Covariates::of(obs), observed_intensities(obs, lookup)),
            None => frame.push_row(date, profile.for_date(date), lookup.intensities(date)),
        }
    }

    frame
}

/// `periods` consecutive days starting at `start`.
pub fn date_range(start: NaiveDate, periods: usize) -> Vec<NaiveDate> {
    start.iter_days().take(periods).collect()
}
