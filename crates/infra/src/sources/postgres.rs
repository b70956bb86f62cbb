//! Postgres-backed read sources.
//!
//! Reads the store's reporting tables:
//!
//! - `daily_sales_summary`: one row per day (`ds`, `y`, transaction and
//!   basket aggregates, optional per-day event intensities)
//! - `calendar_events`: promotions, holidays, events and closures
//! - `products` joined with recent `transaction_items` for stock snapshots
//!
//! The schema holds a single store, so `target_id` scopes logging only.
//!
//! The pipeline is synchronous; each call runs its query to completion on a
//! private current-thread runtime.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::runtime::{Builder, Runtime};
use tracing::instrument;

use siprems_ai::{DailyAggregationSource, EventCatalog, ProductSnapshotSource, SourceError};
use siprems_core::{
    DailyObservation, DayIntensities, ProductId, ProductStockSnapshot, RawCalendarEvent, TargetId,
};

#[derive(Debug, Clone)]
pub struct PostgresSources {
    pool: Arc<PgPool>,
    runtime: Arc<Runtime>,
    recent_sales_days: i32,
}

impl PostgresSources {
    /// Connect a pool of at most `max_connections`.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, SourceError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SourceError::Unavailable(format!("runtime: {e}")))?;
        let pool = runtime
            .block_on(PgPoolOptions::new().max_connections(max_connections).connect(url))
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self {
            pool: Arc::new(pool),
            runtime: Arc::new(runtime),
            recent_sales_days: 30,
        })
    }

    /// Sales window (days) behind `recent_sold_units`.
    pub fn with_recent_sales_days(mut self, days: i32) -> Self {
        self.recent_sales_days = days.max(1);
        self
    }

    fn observations(&self, rows: Vec<PgRow>) -> Result<Vec<DailyObservation>, SourceError> {
        rows.iter().map(observation_from_row).collect()
    }
}

fn observation_from_row(row: &PgRow) -> Result<DailyObservation, SourceError> {
    let get = |col: &str| -> Result<Option<f64>, SourceError> {
        row.try_get::<Option<f64>, _>(col)
            .map_err(|e| SourceError::Malformed(format!("{col}: {e}")))
    };
    let date: NaiveDate = row
        .try_get("ds")
        .map_err(|e| SourceError::Malformed(format!("ds: {e}")))?;

    let obs = DailyObservation::new(
        date,
        get("y")?.unwrap_or(0.0),
        get("transactions_count")?.unwrap_or(0.0),
        get("items_sold")?.unwrap_or(0.0),
        get("avg_ticket")?.unwrap_or(0.0),
    )
    .map_err(|e| SourceError::Malformed(format!("{date}: {e}")))?;

    let intensities = [
        get("promo_intensity")?,
        get("holiday_intensity")?,
        get("event_intensity")?,
        get("closure_intensity")?,
    ];
    if intensities.iter().all(Option::is_none) {
        return Ok(obs);
    }
    let [promo, holiday, event, closure] = intensities.map(|v| v.unwrap_or(0.0));
    Ok(obs.with_intensities(DayIntensities {
        promo,
        holiday,
        event,
        closure,
    }))
}

const DAILY_COLUMNS: &str = r#"
    ds,
    y::float8 AS y,
    transactions_count::float8 AS transactions_count,
    items_sold::float8 AS items_sold,
    avg_ticket::float8 AS avg_ticket,
    promo_intensity::float8 AS promo_intensity,
    holiday_intensity::float8 AS holiday_intensity,
    event_intensity::float8 AS event_intensity,
    closure_intensity::float8 AS closure_intensity
"#;

impl DailyAggregationSource for PostgresSources {
    #[instrument(skip(self), fields(target_id = %target_id), err)]
    fn history(
        &self,
        target_id: &TargetId,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_sales_summary \
             WHERE ($1::date IS NULL OR ds <= $1) ORDER BY ds"
        );
        let rows = self
            .runtime
            .block_on(sqlx::query(&sql).bind(end).fetch_all(&*self.pool))
            .map_err(|e| map_sqlx_error("history", e))?;
        self.observations(rows)
    }

    #[instrument(skip(self), fields(target_id = %target_id), err)]
    fn window(
        &self,
        target_id: &TargetId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_sales_summary \
             WHERE ds BETWEEN $1 AND $2 ORDER BY ds"
        );
        let rows = self
            .runtime
            .block_on(sqlx::query(&sql).bind(start).bind(end).fetch_all(&*self.pool))
            .map_err(|e| map_sqlx_error("window", e))?;
        self.observations(rows)
    }
}

impl EventCatalog for PostgresSources {
    #[instrument(skip(self), fields(target_id = %target_id), err)]
    fn events(&self, target_id: &TargetId) -> Result<Vec<RawCalendarEvent>, SourceError> {
        let rows = self
            .runtime
            .block_on(
                sqlx::query(
                    r#"
                    SELECT
                        COALESCE(to_char(date, 'YYYY-MM-DD'), '') AS date,
                        COALESCE(type, '') AS type,
                        title,
                        impact_weight::float8 AS impact_weight
                    FROM calendar_events
                    ORDER BY date
                    "#,
                )
                .fetch_all(&*self.pool),
            )
            .map_err(|e| map_sqlx_error("events", e))?;

        rows.iter()
            .map(|row| {
                let malformed = |e: sqlx::Error| SourceError::Malformed(format!("calendar_events: {e}"));
                let date: String = row.try_get("date").map_err(malformed)?;
                let kind: String = row.try_get("type").map_err(malformed)?;
                let mut event = RawCalendarEvent::new(date, kind);
                if let Some(title) = row.try_get::<Option<String>, _>("title").map_err(malformed)? {
                    event = event.with_title(title);
                }
                if let Some(w) = row.try_get::<Option<f64>, _>("impact_weight").map_err(malformed)? {
                    event = event.with_impact(w);
                }
                Ok(event)
            })
            .collect()
    }
}

impl ProductSnapshotSource for PostgresSources {
    #[instrument(skip(self), fields(target_id = %target_id), err)]
    fn snapshots(&self, target_id: &TargetId) -> Result<Vec<ProductStockSnapshot>, SourceError> {
        let rows = self
            .runtime
            .block_on(
                sqlx::query(
                    r#"
                    WITH recent AS (
                        SELECT ti.product_id, SUM(ti.quantity) AS sold_units
                        FROM transaction_items ti
                        JOIN transactions t ON t.id = ti.transaction_id
                        WHERE t.date >= NOW() - make_interval(days => $1)
                        GROUP BY ti.product_id
                    )
                    SELECT
                        p.id::text AS id,
                        p.name,
                        p.category,
                        COALESCE(p.stock, 0)::int8 AS stock,
                        COALESCE(recent.sold_units, 0)::float8 AS sold_units
                    FROM products p
                    LEFT JOIN recent ON recent.product_id = p.id
                    ORDER BY sold_units DESC, p.name
                    "#,
                )
                .bind(self.recent_sales_days)
                .fetch_all(&*self.pool),
            )
            .map_err(|e| map_sqlx_error("snapshots", e))?;

        rows.iter()
            .map(|row| {
                let malformed = |e: sqlx::Error| SourceError::Malformed(format!("products: {e}"));
                let id: String = row.try_get("id").map_err(malformed)?;
                Ok(ProductStockSnapshot {
                    product_id: ProductId::new(id)
                        .map_err(|e| SourceError::Malformed(e.to_string()))?,
                    name: row.try_get("name").map_err(malformed)?,
                    category: row.try_get("category").map_err(malformed)?,
                    current_stock: row.try_get("stock").map_err(malformed)?,
                    recent_sold_units: row.try_get("sold_units").map_err(malformed)?,
                })
            })
            .collect()
    }
}

/// Map SQLx errors to source errors. Everything the database or the network
/// rejects is an outage; decoding problems are malformed rows.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SourceError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            SourceError::Malformed(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            SourceError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        other => SourceError::Unavailable(format!("{operation}: {other}")),
    }
}
