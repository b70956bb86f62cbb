//! Model training: fitting, validation scoring and artifact persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use siprems_core::{CalendarEvent, DailyObservation, TargetId};

use crate::artifact::{ArtifactMetadata, ArtifactStore, ModelArtifact, ScalerParams, FORMAT_VERSION};
use crate::config::ForecastConfig;
use crate::error::ForecastError;
use crate::features::{build_training_frame, sorted_unique, EventLookup, TrainingFrame};
use crate::model::{ModelSpec, SeasonalModel};
use crate::predictor::forecast_frame;
use crate::stats::{accuracy_from_mape, mape, mean, stddev_sample};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStatus {
    /// A new artifact was fitted and persisted.
    Trained,
    /// The existing artifact is recent enough and was kept.
    Fresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub status: TrainStatus,
    pub artifact: ModelArtifact,
}

/// Fits per-target models and writes them to an [`ArtifactStore`].
///
/// At most one train runs per target id at a time; different targets train
/// concurrently.
#[derive(Debug)]
pub struct Trainer<S> {
    store: S,
    config: ForecastConfig,
    locks: Mutex<HashMap<TargetId, Arc<Mutex<()>>>>,
}

impl<S: ArtifactStore> Trainer<S> {
    pub fn new(store: S, config: ForecastConfig) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fit and persist a model for `target_id`.
    ///
    /// Unless forced, a fresh stored artifact is returned as is, whatever
    /// the history holds. Otherwise the history needs `min_history_days`
    /// distinct dates and nothing is written when it falls short.
    pub fn train(
        &self,
        target_id: &TargetId,
        history: &[DailyObservation],
        events: &[CalendarEvent],
        force_retrain: bool,
        now: DateTime<Utc>,
    ) -> Result<TrainOutcome, ForecastError> {
        let lock = self.lock_for(target_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| ForecastError::artifact("train lock poisoned"))?;

        if !force_retrain {
            if let Some(existing) = self.store.load(target_id)? {
                if existing.metadata.is_fresh(now, self.config.training.max_model_age_days) {
                    info!(
                        target_id = %target_id,
                        age_days = existing.metadata.age_days(now),
                        "model is fresh; skipping retrain"
                    );
                    return Ok(TrainOutcome {
                        status: TrainStatus::Fresh,
                        artifact: existing,
                    });
                }
            }
        }

        let history = sorted_unique(history);
        let needed = self.config.training.min_history_days;
        if history.len() < needed {
            return Err(ForecastError::InsufficientData {
                needed,
                got: history.len(),
            });
        }

        let lookup = EventLookup::build(events);
        let artifact = self.fit_artifact(target_id, &history, &lookup, now)?;
        self.store.save(&artifact)?;

        info!(
            target_id = %target_id,
            rows = artifact.metadata.data_points,
            regressors = artifact.metadata.regressors.len(),
            accuracy = artifact.metadata.accuracy,
            train_mape = ?artifact.metadata.train_mape,
            validation_mape = ?artifact.metadata.validation_mape,
            "model trained"
        );

        Ok(TrainOutcome {
            status: TrainStatus::Trained,
            artifact,
        })
    }

    /// Fit and score without touching the store.
    pub fn fit_artifact(
        &self,
        target_id: &TargetId,
        history: &[DailyObservation],
        lookup: &EventLookup,
        now: DateTime<Utc>,
    ) -> Result<ModelArtifact, ForecastError> {
        let cfg = &self.config.training;
        let tf = build_training_frame(history, lookup);
        if tf.len() < cfg.min_history_days {
            return Err(ForecastError::InsufficientData {
                needed: cfg.min_history_days,
                got: tf.len(),
            });
        }

        let regressors: Vec<String> = cfg
            .regressors
            .iter()
            .filter(|name| tf.frame.has_column(name))
            .cloned()
            .collect();

        let (model, scaler_params) = self.fit_once(&tf, &regressors)?;

        let mut metadata = ArtifactMetadata {
            target_id: target_id.clone(),
            regressors,
            scaler_params,
            y_mean: mean(&tf.demand),
            y_std: stddev_sample(&tf.demand),
            y_recent_mean: 0.0,
            y_recent_std: 0.0,
            data_points: tf.len(),
            train_mape: None,
            validation_mape: None,
            accuracy: 0.0,
            saved_at: now,
            log_transform: cfg.log_transform,
            last_observed_date: tf.frame.dates().last().copied(),
            changepoint_prior_scale: cfg.changepoint_prior_scale,
            format_version: FORMAT_VERSION,
        };

        let recent = &tf.demand[tf.len().saturating_sub(cfg.recent_window_days)..];
        metadata.y_recent_mean = mean(recent);
        metadata.y_recent_std = stddev_sample(recent);

        let fitted = forecast_frame(&model, &metadata, &tf.frame, &self.config.prediction)?;
        let in_sample: Vec<f64> = fitted.yhat.iter().map(|v| v.max(0.0)).collect();
        metadata.train_mape = mape(&tf.demand, &in_sample);

        metadata.validation_mape = match self.validate(&tf, &metadata) {
            Ok(v) => v,
            Err(e) => {
                warn!(target_id = %target_id, error = %e, "validation refit failed");
                None
            }
        };
        metadata.accuracy = accuracy_from_mape(metadata.validation_mape);

        Ok(ModelArtifact { model, metadata })
    }

    fn fit_once(
        &self,
        tf: &TrainingFrame,
        regressors: &[String],
    ) -> Result<(SeasonalModel, Option<ScalerParams>), ForecastError> {
        let cfg = &self.config.training;
        let mut frame = tf.frame.clone();

        let scaler = if cfg.scale_regressors {
            ScalerParams::fit(&frame, &cfg.scaled_columns)
        } else {
            None
        };
        if let Some(s) = &scaler {
            s.apply(&mut frame);
        }

        let y: Vec<f64> = if cfg.log_transform {
            tf.demand.iter().map(|v| v.ln_1p()).collect()
        } else {
            tf.demand.clone()
        };

        let model = SeasonalModel::fit(&ModelSpec::from(cfg), &frame, &y, regressors)?;
        Ok((model, scaler))
    }

    /// Refit without the trailing window and score that window with its
    /// observed covariates.
    fn validate(
        &self,
        tf: &TrainingFrame,
        metadata: &ArtifactMetadata,
    ) -> Result<Option<f64>, ForecastError> {
        let (head, tail) = tf.split_tail(self.config.training.validation_days);
        if head.len() < 2 || tail.is_empty() {
            return Ok(None);
        }

        let (model, scaler_params) = self.fit_once(&head, &metadata.regressors)?;
        let holdout_meta = ArtifactMetadata {
            scaler_params,
            ..metadata.clone()
        };
        let out = forecast_frame(&model, &holdout_meta, &tail.frame, &self.config.prediction)?;
        let predicted: Vec<f64> = out.yhat.iter().map(|v| v.max(0.0)).collect();
        Ok(mape(&tail.demand, &predicted))
    }

    fn lock_for(&self, target_id: &TargetId) -> Result<Arc<Mutex<()>>, ForecastError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ForecastError::artifact("train lock table poisoned"))?;
        // Entries only the table still references are idle.
        locks.retain(|id, lock| id == target_id || Arc::strong_count(lock) > 1);
        Ok(locks.entry(target_id.clone()).or_default().clone())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
