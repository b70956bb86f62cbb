//! Event-aware future predictions with baseline recalibration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use siprems_core::DailyObservation;

use crate::artifact::{ArtifactMetadata, ModelArtifact};
use crate::config::PredictionConfig;
use crate::error::ForecastError;
use crate::features::{build_future_frame, date_range, EventLookup, RegressorFrame};
use crate::model::{ModelOutput, SeasonalModel};
use crate::stats::mean;

/// One forecast day. All values are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    #[serde(rename = "ds")]
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    /// A store-closed event covers this date.
    #[serde(default)]
    pub store_closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub points: Vec<ForecastPoint>,
    /// Mean of `yhat` before recalibration and clipping.
    pub raw_mean: f64,
    /// Recalibration factor, when one was applied.
    pub adjustment: Option<f64>,
    /// Forecast dates touched by at least one event.
    pub events_applied: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Predictor {
    config: PredictionConfig,
}

impl Predictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Forecast `periods` consecutive days from `start`.
    pub fn predict(
        &self,
        artifact: &ModelArtifact,
        history: &[DailyObservation],
        lookup: &EventLookup,
        periods: usize,
        start: NaiveDate,
    ) -> Result<Prediction, ForecastError> {
        if periods == 0 || periods > self.config.max_periods {
            return Err(ForecastError::InvalidInput(format!(
                "periods must be between 1 and {} (got {periods})",
                self.config.max_periods
            )));
        }

        let dates = date_range(start, periods);
        if dates.len() != periods {
            return Err(ForecastError::InvalidDate(format!(
                "forecast window starting {start} runs past the supported calendar"
            )));
        }

        let frame = build_future_frame(&dates, history, lookup);
        let out = forecast_frame(&artifact.model, &artifact.metadata, &frame, &self.config)?;

        let raw_mean = mean(&out.yhat);
        let adjustment = recalibration(raw_mean, artifact.metadata.y_recent_mean, &self.config);
        let out = match adjustment {
            Some(factor) => {
                debug!(
                    target_id = %artifact.metadata.target_id,
                    raw_mean,
                    recent_mean = artifact.metadata.y_recent_mean,
                    factor,
                    "recalibrating forecast baseline"
                );
                out.map(|v| v * factor)
            }
            None => out,
        };
        let out = out.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });

        let points = dates
            .iter()
            .enumerate()
            .map(|(i, date)| ForecastPoint {
                date: *date,
                yhat: out.yhat[i],
                yhat_lower: out.yhat_lower[i],
                yhat_upper: out.yhat_upper[i],
                store_closed: lookup.is_closed(*date),
            })
            .collect();

        Ok(Prediction {
            points,
            raw_mean,
            adjustment,
            events_applied: lookup.dates_touched(&dates),
        })
    }
}

/// Run the model over a frame of unscaled covariates.
///
/// Applies the recorded scaler, zero-fills regressors the frame lacks and
/// inverts the log transform. No recalibration and no clipping.
pub fn forecast_frame(
    model: &SeasonalModel,
    metadata: &ArtifactMetadata,
    frame: &RegressorFrame,
    config: &PredictionConfig,
) -> Result<ModelOutput, ForecastError> {
    let mut frame = frame.clone();
    if let Some(scaler) = &metadata.scaler_params {
        scaler.apply(&mut frame);
    }
    for name in &metadata.regressors {
        if frame.fill_missing(name) {
            warn!(target_id = %metadata.target_id, column = %name, "regressor missing from frame; filled with 0");
        }
    }

    let out = model.predict(&frame)?;
    if metadata.log_transform {
        let (lo, hi) = (config.log_clip_min, config.log_clip_max);
        return Ok(out.map(|v| v.clamp(lo, hi).exp_m1()));
    }
    Ok(out)
}

/// Factor pulling the forecast mean toward the recent observed mean.
///
/// `None` when either mean is not positive or the clamped factor sits inside
/// the deadband around 1.0.
pub fn recalibration(forecast_mean: f64, recent_mean: f64, config: &PredictionConfig) -> Option<f64> {
    if !(forecast_mean > 0.0 && recent_mean > 0.0) {
        return None;
    }
    let factor = (recent_mean / forecast_mean).clamp(config.recalibration_min, config.recalibration_max);
    ((factor - 1.0).abs() > config.recalibration_deadband).then_some(factor)
}

/// Day after the latest history date, else after the artifact's last
/// observed date, else `today + 1`.
pub fn default_start(
    history: &[DailyObservation],
    metadata: Option<&ArtifactMetadata>,
    today: NaiveDate,
) -> NaiveDate {
    let last = history
        .iter()
        .map(|o| o.date)
        .max()
        .or_else(|| metadata.and_then(|m| m.last_observed_date))
        .unwrap_or(today);
    last.succ_opt().unwrap_or(last)
}
