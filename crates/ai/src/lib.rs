//! `siprems-ai`
//!
//! **Responsibility:** the demand-forecasting pipeline.
//!
//! - Builds regressor frames from daily sales and the event calendar.
//! - Fits and persists one seasonal regression model per target.
//! - Produces event-aware forecasts, accuracy scores, drift checks and
//!   restock recommendations.
//!
//! This crate stays storage-agnostic: sources, artifact stores and drift logs
//! are traits implemented by `siprems-infra`.

pub mod artifact;
pub mod clock;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod monitor;
pub mod predictor;
pub mod recommend;
pub mod service;
pub mod source;
pub mod stats;
pub mod trainer;

pub use artifact::{ArtifactMetadata, ArtifactStore, ModelArtifact, ScalerParams, FORMAT_VERSION};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ForecastConfig;
pub use error::ForecastError;
pub use features::EventLookup;
pub use monitor::{
    forecast_accuracy, DriftLog, DriftLogError, DriftMonitor, DriftOutcome, DriftRecord,
    TrainingMetrics,
};
pub use predictor::{ForecastPoint, Prediction, Predictor};
pub use recommend::{EventAnnotation, RestockRecommendation, Urgency};
pub use service::{
    ForecastService, ForecastServiceBuilder, ModelStatus, PredictMetadata, PredictRequest,
    PredictResponse, RecommendRequest, RecommendationReport, TrainRequest, TrainResponse,
};
pub use source::{DailyAggregationSource, EventCatalog, ProductSnapshotSource, SourceError};
pub use trainer::{TrainOutcome, TrainStatus, Trainer};
