//! Upstream data sources for the forecasting pipeline.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::{InMemoryDailySales, InMemoryEventCatalog, InMemoryProductSnapshots};
#[cfg(feature = "postgres")]
pub use postgres::PostgresSources;
