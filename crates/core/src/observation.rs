//! Daily sales observations and product stock snapshots.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::ProductId;

/// Per-day event intensities, when the aggregation source already
/// materialises them.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayIntensities {
    pub promo: f64,
    pub holiday: f64,
    pub event: f64,
    pub closure: f64,
}

/// One row of the daily aggregation: observed demand plus raw covariates.
///
/// Immutable once recorded; new days append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    pub date: NaiveDate,
    pub demand: f64,
    pub transaction_count: f64,
    pub items_sold: f64,
    pub avg_ticket: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensities: Option<DayIntensities>,
}

impl DailyObservation {
    /// Build an observation, validating that every quantity is finite and >= 0.
    pub fn new(
        date: NaiveDate,
        demand: f64,
        transaction_count: f64,
        items_sold: f64,
        avg_ticket: f64,
    ) -> Result<Self, DomainError> {
        for (name, v) in [
            ("demand", demand),
            ("transaction_count", transaction_count),
            ("items_sold", items_sold),
            ("avg_ticket", avg_ticket),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(DomainError::validation(format!(
                    "{name} must be a finite non-negative number on {date} (got {v})"
                )));
            }
        }

        Ok(Self {
            date,
            demand,
            transaction_count,
            items_sold,
            avg_ticket,
            intensities: None,
        })
    }

    /// Demand-only observation; covariates default to zero.
    pub fn demand_only(date: NaiveDate, demand: f64) -> Result<Self, DomainError> {
        Self::new(date, demand, 0.0, 0.0, 0.0)
    }

    pub fn with_intensities(mut self, intensities: DayIntensities) -> Self {
        self.intensities = Some(intensities);
        self
    }
}

/// Saturday or Sunday.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Current stock and recent sales of one product, as ranked input for restock
/// recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStockSnapshot {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub current_stock: i64,
    /// Units sold over the trailing sales window (30 days by default).
    pub recent_sold_units: f64,
}
