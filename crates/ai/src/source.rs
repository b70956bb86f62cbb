//! Read-side collaborators the pipeline pulls its inputs from.
//!
//! This crate stays storage-agnostic: infra provides the implementations
//! (in-memory for tests/dev, Postgres for production).

use std::sync::Arc;

use chrono::NaiveDate;

use siprems_core::{DailyObservation, ProductStockSnapshot, RawCalendarEvent, TargetId};

/// Failure of an upstream data source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

/// Daily aggregated sales, one row per date, ordered by date.
pub trait DailyAggregationSource: Send + Sync {
    /// History up to and including `end` (everything when `None`).
    fn history(
        &self,
        target_id: &TargetId,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyObservation>, SourceError>;

    /// Rows with `start <= date <= end`.
    fn window(
        &self,
        target_id: &TargetId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        Ok(self
            .history(target_id, Some(end))?
            .into_iter()
            .filter(|o| o.date >= start)
            .collect())
    }
}

/// Calendar of promotions, holidays, events and closures.
pub trait EventCatalog: Send + Sync {
    /// All known events, unvalidated. Rows with bad dates are dropped later.
    fn events(&self, target_id: &TargetId) -> Result<Vec<RawCalendarEvent>, SourceError>;
}

/// Current stock levels joined with recent sales.
pub trait ProductSnapshotSource: Send + Sync {
    fn snapshots(&self, target_id: &TargetId) -> Result<Vec<ProductStockSnapshot>, SourceError>;
}

impl<S> DailyAggregationSource for Arc<S>
where
    S: DailyAggregationSource + ?Sized,
{
    fn history(
        &self,
        target_id: &TargetId,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        (**self).history(target_id, end)
    }

    fn window(
        &self,
        target_id: &TargetId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        (**self).window(target_id, start, end)
    }
}

impl<S> EventCatalog for Arc<S>
where
    S: EventCatalog + ?Sized,
{
    fn events(&self, target_id: &TargetId) -> Result<Vec<RawCalendarEvent>, SourceError> {
        (**self).events(target_id)
    }
}

impl<S> ProductSnapshotSource for Arc<S>
where
    S: ProductSnapshotSource + ?Sized,
{
    fn snapshots(&self, target_id: &TargetId) -> Result<Vec<ProductStockSnapshot>, SourceError> {
        (**self).snapshots(target_id)
    }
}
