//! Persisted model artifacts and the store abstraction.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use siprems_core::TargetId;

use crate::error::ForecastError;
use crate::features::RegressorFrame;
use crate::model::SeasonalModel;
use crate::stats::{mean, stddev_population};

/// Bumped whenever the serialised layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Column standardisation captured at training time and replayed at prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerParams {
    /// Population mean/std of every listed column the frame carries.
    ///
    /// `None` when none of the columns are present.
    pub fn fit(frame: &RegressorFrame, columns: &[String]) -> Option<Self> {
        let mut params = Self {
            columns: Vec::new(),
            mean: Vec::new(),
            scale: Vec::new(),
        };
        for name in columns {
            if let Some(values) = frame.column(name) {
                params.columns.push(name.clone());
                params.mean.push(mean(values));
                params.scale.push(stddev_population(values));
            }
        }
        (!params.columns.is_empty()).then_some(params)
    }

    /// Standardise in place. Zero-scale columns are left untouched.
    pub fn apply(&self, frame: &mut RegressorFrame) {
        for ((name, m), s) in self.columns.iter().zip(&self.mean).zip(&self.scale) {
            if *s <= 0.0 {
                continue;
            }
            if let Some(col) = frame.column_mut(name) {
                for v in col.iter_mut() {
                    *v = (*v - m) / s;
                }
            }
        }
    }
}

/// Everything recorded about a fitted model besides its coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub target_id: TargetId,
    /// Regressors the model was fitted with, in order.
    pub regressors: Vec<String>,
    #[serde(default)]
    pub scaler_params: Option<ScalerParams>,
    pub y_mean: f64,
    pub y_std: f64,
    pub y_recent_mean: f64,
    pub y_recent_std: f64,
    pub data_points: usize,
    #[serde(default)]
    pub train_mape: Option<f64>,
    #[serde(default)]
    pub validation_mape: Option<f64>,
    /// 0-100.
    pub accuracy: f64,
    pub saved_at: DateTime<Utc>,
    pub log_transform: bool,
    #[serde(default)]
    pub last_observed_date: Option<NaiveDate>,
    pub changepoint_prior_scale: f64,
    pub format_version: u32,
}

impl ArtifactMetadata {
    /// Whole days since the artifact was saved (never negative).
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.saved_at).num_days().max(0)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_days: i64) -> bool {
        self.age_days(now) < max_age_days
    }
}

/// Model body plus metadata; exactly one per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: SeasonalModel,
    pub metadata: ArtifactMetadata,
}

impl ModelArtifact {
    pub fn target_id(&self) -> &TargetId {
        &self.metadata.target_id
    }
}

/// Durable, per-target artifact storage.
///
/// Implementations must make `save` atomic: a concurrent `load` sees either
/// the previous artifact or the new one, never a mix.
pub trait ArtifactStore: Send + Sync {
    fn load(&self, target_id: &TargetId) -> Result<Option<ModelArtifact>, ForecastError>;

    /// Persist, replacing any prior artifact for the same target.
    fn save(&self, artifact: &ModelArtifact) -> Result<(), ForecastError>;

    /// Metadata only; stores with a cheaper path should override.
    fn metadata(&self, target_id: &TargetId) -> Result<Option<ArtifactMetadata>, ForecastError> {
        Ok(self.load(target_id)?.map(|a| a.metadata))
    }
}

impl<S> ArtifactStore for Arc<S>
where
    S: ArtifactStore + ?Sized,
{
    fn load(&self, target_id: &TargetId) -> Result<Option<ModelArtifact>, ForecastError> {
        (**self).load(target_id)
    }

    fn save(&self, artifact: &ModelArtifact) -> Result<(), ForecastError> {
        (**self).save(artifact)
    }

    fn metadata(&self, target_id: &TargetId) -> Result<Option<ArtifactMetadata>, ForecastError> {
        (**self).metadata(target_id)
    }
}
