//! `ForecastService`: the operation surface callers (HTTP handlers, workers)
//! drive.
//!
//! Collaborator failure policy: demand history is required and its failures
//! propagate as `UpstreamDataUnavailable`; the event catalog and product
//! snapshots are optional inputs and degrade to empty; drift logging never
//! fails a check.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use siprems_core::{
    CalendarEvent, DailyObservation, ProductStockSnapshot, RawCalendarEvent, TargetId,
};

use crate::artifact::{ArtifactMetadata, ArtifactStore, ModelArtifact};
use crate::clock::{Clock, SystemClock};
use crate::config::ForecastConfig;
use crate::error::ForecastError;
use crate::features::{normalize_events, EventLookup};
use crate::monitor::{
    forecast_accuracy, DriftLog, DriftLogError, DriftMonitor, DriftOutcome, DriftRecord,
    TrainingMetrics,
};
use crate::predictor::{default_start, ForecastPoint, Prediction, Predictor};
use crate::recommend::{annotations, growth_factor, recommend, EventAnnotation, RestockRecommendation};
use crate::source::{DailyAggregationSource, EventCatalog, ProductSnapshotSource, SourceError};
use crate::trainer::{TrainStatus, Trainer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub target_id: TargetId,
    /// Train on history up to and including this date.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub force_retrain: bool,
}

impl TrainRequest {
    pub fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            end_date: None,
            force_retrain: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force_retrain = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: TrainStatus,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub target_id: TargetId,
    #[serde(default)]
    pub periods: Option<usize>,
    /// Extra events for the forecast window, merged with the catalog.
    #[serde(default)]
    pub events: Vec<RawCalendarEvent>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

impl PredictRequest {
    pub fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            periods: None,
            events: Vec::new(),
            start_date: None,
        }
    }

    pub fn with_periods(mut self, periods: usize) -> Self {
        self.periods = Some(periods);
        self
    }

    pub fn with_event(mut self, event: RawCalendarEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn starting(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictMetadata {
    pub model_age_days: i64,
    pub model_accuracy: f64,
    pub periods: usize,
    pub events_applied: usize,
    #[serde(default)]
    pub adjustment_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub status: String,
    pub predictions: Vec<ForecastPoint>,
    pub metadata: PredictMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub exists: bool,
    pub age_days: Option<i64>,
    pub accuracy: Option<f64>,
    pub train_mape: Option<f64>,
    pub validation_mape: Option<f64>,
    pub last_trained: Option<DateTime<Utc>>,
    pub data_points: Option<usize>,
    pub regressors: Vec<String>,
}

impl ModelStatus {
    fn missing() -> Self {
        Self {
            exists: false,
            age_days: None,
            accuracy: None,
            train_mape: None,
            validation_mape: None,
            last_trained: None,
            data_points: None,
            regressors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub target_id: TargetId,
    #[serde(default)]
    pub periods: Option<usize>,
    #[serde(default)]
    pub events: Vec<RawCalendarEvent>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl RecommendRequest {
    pub fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            periods: None,
            events: Vec::new(),
            top_n: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub growth_factor: f64,
    pub recommendations: Vec<RestockRecommendation>,
    pub forecast: Vec<ForecastPoint>,
    pub annotations: Vec<EventAnnotation>,
    /// Hold-out accuracy of the current model (0-100).
    pub accuracy: f64,
    pub history_days: usize,
    pub last_history_date: Option<NaiveDate>,
}

pub struct ForecastService {
    history: Arc<dyn DailyAggregationSource>,
    events: Arc<dyn EventCatalog>,
    products: Arc<dyn ProductSnapshotSource>,
    trainer: Trainer<Arc<dyn ArtifactStore>>,
    predictor: Predictor,
    monitor: DriftMonitor<Arc<dyn DriftLog>>,
    clock: Arc<dyn Clock>,
    config: ForecastConfig,
}

impl std::fmt::Debug for ForecastService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wires a [`ForecastService`]. Only demand history and artifact storage are
/// required.
pub struct ForecastServiceBuilder {
    history: Arc<dyn DailyAggregationSource>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventCatalog>,
    products: Arc<dyn ProductSnapshotSource>,
    drift_log: Arc<dyn DriftLog>,
    clock: Arc<dyn Clock>,
    config: ForecastConfig,
}

impl ForecastServiceBuilder {
    pub fn with_events(mut self, events: Arc<dyn EventCatalog>) -> Self {
        self.events = events;
        self
    }

    pub fn with_products(mut self, products: Arc<dyn ProductSnapshotSource>) -> Self {
        self.products = products;
        self
    }

    pub fn with_drift_log(mut self, drift_log: Arc<dyn DriftLog>) -> Self {
        self.drift_log = drift_log;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ForecastConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ForecastService, ForecastError> {
        self.config.validate()?;
        Ok(ForecastService {
            history: self.history,
            events: self.events,
            products: self.products,
            trainer: Trainer::new(self.store, self.config.clone()),
            predictor: Predictor::new(self.config.prediction.clone()),
            monitor: DriftMonitor::new(self.drift_log, self.config.monitor.clone()),
            clock: self.clock,
            config: self.config,
        })
    }
}

struct NoEvents;

impl EventCatalog for NoEvents {
    fn events(&self, _: &TargetId) -> Result<Vec<RawCalendarEvent>, SourceError> {
        Ok(Vec::new())
    }
}

struct NoProducts;

impl ProductSnapshotSource for NoProducts {
    fn snapshots(&self, _: &TargetId) -> Result<Vec<ProductStockSnapshot>, SourceError> {
        Ok(Vec::new())
    }
}

struct DiscardDriftLog;

impl DriftLog for DiscardDriftLog {
    fn append(&self, _: &DriftRecord) -> Result<(), DriftLogError> {
        Ok(())
    }

    fn recent(&self, _: &TargetId, _: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
        Ok(Vec::new())
    }
}

/// Forecast plus the inputs it was computed from.
struct ForecastRun {
    artifact: ModelArtifact,
    history: Vec<DailyObservation>,
    lookup: EventLookup,
    prediction: Prediction,
    periods: usize,
}

impl ForecastService {
    pub fn builder(
        history: Arc<dyn DailyAggregationSource>,
        store: Arc<dyn ArtifactStore>,
    ) -> ForecastServiceBuilder {
        ForecastServiceBuilder {
            history,
            store,
            events: Arc::new(NoEvents),
            products: Arc::new(NoProducts),
            drift_log: Arc::new(DiscardDriftLog),
            clock: Arc::new(SystemClock::utc()),
            config: ForecastConfig::default(),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn train(&self, req: TrainRequest) -> Result<TrainResponse, ForecastError> {
        let history = self.history.history(&req.target_id, req.end_date)?;
        let events = self.catalog_events(&req.target_id);
        let outcome = self.trainer.train(
            &req.target_id,
            &history,
            &events,
            req.force_retrain,
            self.clock.now(),
        )?;
        Ok(TrainResponse {
            status: outcome.status,
            metadata: outcome.artifact.metadata,
        })
    }

    pub fn predict(&self, req: PredictRequest) -> Result<PredictResponse, ForecastError> {
        let run = self.forecast(&req.target_id, req.periods, &req.events, req.start_date)?;
        let now = self.clock.now();

        info!(
            target_id = %req.target_id,
            periods = run.periods,
            events_applied = run.prediction.events_applied,
            adjustment = ?run.prediction.adjustment,
            "forecast generated"
        );

        Ok(PredictResponse {
            status: "success".to_string(),
            metadata: PredictMetadata {
                model_age_days: run.artifact.metadata.age_days(now),
                model_accuracy: run.artifact.metadata.accuracy,
                periods: run.periods,
                events_applied: run.prediction.events_applied,
                adjustment_factor: run.prediction.adjustment,
            },
            predictions: run.prediction.points,
        })
    }

    pub fn model_status(&self, target_id: &TargetId) -> Result<ModelStatus, ForecastError> {
        let Some(meta) = self.trainer.store().metadata(target_id)? else {
            return Ok(ModelStatus::missing());
        };
        Ok(ModelStatus {
            exists: true,
            age_days: Some(meta.age_days(self.clock.now())),
            accuracy: Some(meta.accuracy),
            train_mape: meta.train_mape,
            validation_mape: meta.validation_mape,
            last_trained: Some(meta.saved_at),
            data_points: Some(meta.data_points),
            regressors: meta.regressors,
        })
    }

    pub fn check_drift(&self, target_id: &TargetId) -> Result<DriftOutcome, ForecastError> {
        let today = self.clock.today();
        let start = self.monitor.window_start(today);
        let actuals = self.history.window(target_id, start, today)?;

        let training = self
            .trainer
            .store()
            .metadata(target_id)?
            .and_then(|m| m.train_mape.map(|mape| TrainingMetrics { accuracy: m.accuracy, mape }));

        Ok(self
            .monitor
            .check(target_id, &actuals, training, today, self.clock.now()))
    }

    /// Recent drift records, newest first. Log failures degrade to empty.
    pub fn drift_history(&self, target_id: &TargetId, limit: usize) -> Vec<DriftRecord> {
        self.monitor
            .log()
            .recent(target_id, limit)
            .unwrap_or_else(|e| {
                warn!(target_id = %target_id, error = %e, "drift log unavailable");
                Vec::new()
            })
    }

    pub fn recommend(&self, req: RecommendRequest) -> Result<RecommendationReport, ForecastError> {
        let run = self.forecast(&req.target_id, req.periods, &req.events, None)?;
        let cfg = &self.config.recommendation;

        let products = self.products.snapshots(&req.target_id).unwrap_or_else(|e| {
            warn!(target_id = %req.target_id, error = %e, "product snapshots unavailable");
            Vec::new()
        });

        let growth = growth_factor(&run.prediction.points, &run.history, cfg);
        let top_n = req.top_n.unwrap_or(cfg.top_n);
        let recommendations = recommend(&products, growth, top_n, cfg);
        let accuracy = forecast_accuracy(
            &run.artifact,
            &run.history,
            &run.lookup,
            &self.config.monitor,
            &self.config.prediction,
        );

        info!(
            target_id = %req.target_id,
            growth_factor = growth,
            products = recommendations.len(),
            accuracy,
            "restock recommendations generated"
        );

        Ok(RecommendationReport {
            growth_factor: (growth * 100.0).round() / 100.0,
            annotations: annotations(&run.prediction.points, &run.lookup),
            recommendations,
            forecast: run.prediction.points,
            accuracy,
            history_days: run.history.len(),
            last_history_date: run.history.iter().map(|o| o.date).max(),
        })
    }

    /// Train when the artifact is missing or older than the configured
    /// maximum age; otherwise report the current one as fresh.
    pub fn ensure_fresh_model(&self, target_id: &TargetId) -> Result<TrainResponse, ForecastError> {
        let now = self.clock.now();
        if let Some(meta) = self.trainer.store().metadata(target_id)? {
            if meta.is_fresh(now, self.config.training.max_model_age_days) {
                return Ok(TrainResponse {
                    status: TrainStatus::Fresh,
                    metadata: meta,
                });
            }
            info!(target_id = %target_id, age_days = meta.age_days(now), "model is stale; retraining");
        } else {
            info!(target_id = %target_id, "no model found; training");
        }
        self.train(TrainRequest::new(target_id.clone()).forced())
    }

    fn forecast(
        &self,
        target_id: &TargetId,
        periods: Option<usize>,
        extra_events: &[RawCalendarEvent],
        start_date: Option<NaiveDate>,
    ) -> Result<ForecastRun, ForecastError> {
        let artifact = self
            .trainer
            .store()
            .load(target_id)?
            .ok_or_else(|| ForecastError::ModelNotFound(target_id.clone()))?;
        let history = self.history.history(target_id, None)?;

        // Request events add to the catalog; same-day impacts stack.
        let mut events = self.catalog_events(target_id);
        events.extend(normalize_events(extra_events).events);
        let lookup = EventLookup::build(&events);

        let periods = periods.unwrap_or(self.config.prediction.default_periods);
        let start = start_date
            .unwrap_or_else(|| default_start(&history, Some(&artifact.metadata), self.clock.today()));
        let prediction = self
            .predictor
            .predict(&artifact, &history, &lookup, periods, start)?;

        Ok(ForecastRun {
            artifact,
            history,
            lookup,
            prediction,
            periods,
        })
    }

    fn catalog_events(&self, target_id: &TargetId) -> Vec<CalendarEvent> {
        match self.events.events(target_id) {
            Ok(raw) => {
                let normalized = normalize_events(&raw);
                if normalized.skipped > 0 {
                    warn!(target_id = %target_id, skipped = normalized.skipped, "catalog events skipped");
                }
                normalized.events
            }
            Err(e) => {
                warn!(target_id = %target_id, error = %e, "event catalog unavailable; continuing without events");
                Vec::new()
            }
        }
    }
}
