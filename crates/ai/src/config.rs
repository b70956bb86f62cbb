//! Tunable thresholds of the forecasting pipeline.
//!
//! Every heuristic constant (recalibration deadband, drift threshold, growth
//! clamp, ...) lives here so deployments can tune it without code changes.

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Regressor columns fed to the model, in fitting order.
pub const DEFAULT_REGRESSORS: [&str; 7] = [
    "is_weekend",
    "promo_intensity",
    "holiday_intensity",
    "event_intensity",
    "closure_intensity",
    "transaction_count",
    "avg_ticket",
];

/// Columns standardised before fitting (continuous covariates).
pub const DEFAULT_SCALED_COLUMNS: [&str; 3] = ["transaction_count", "items_sold", "avg_ticket"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub training: TrainingConfig,
    pub prediction: PredictionConfig,
    pub monitor: MonitorConfig,
    pub recommendation: RecommendationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum number of daily rows required to train.
    pub min_history_days: usize,
    /// Trailing window used for `y_recent_mean` / `y_recent_std`.
    pub recent_window_days: usize,
    /// Held-out tail used for validation accuracy.
    pub validation_days: usize,
    /// Artifacts younger than this are reused unless a retrain is forced.
    pub max_model_age_days: i64,
    pub changepoint_prior_scale: f64,
    pub n_changepoints: usize,
    /// Fraction of the history in which changepoints may be placed.
    pub changepoint_range: f64,
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub yearly_fourier_order: usize,
    pub weekly_fourier_order: usize,
    pub seasonality_prior_scale: f64,
    pub regressor_prior_scale: f64,
    pub regressors: Vec<String>,
    pub scale_regressors: bool,
    pub scaled_columns: Vec<String>,
    pub log_transform: bool,
    /// Width of the `yhat_lower..yhat_upper` band.
    pub interval_width: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_history_days: 30,
            recent_window_days: 14,
            validation_days: 14,
            max_model_age_days: 7,
            changepoint_prior_scale: 0.07,
            n_changepoints: 25,
            changepoint_range: 0.8,
            yearly_seasonality: true,
            weekly_seasonality: true,
            yearly_fourier_order: 10,
            weekly_fourier_order: 3,
            seasonality_prior_scale: 10.0,
            regressor_prior_scale: 10.0,
            regressors: DEFAULT_REGRESSORS.iter().map(|s| s.to_string()).collect(),
            scale_regressors: true,
            scaled_columns: DEFAULT_SCALED_COLUMNS.iter().map(|s| s.to_string()).collect(),
            log_transform: false,
            interval_width: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub default_periods: usize,
    pub max_periods: usize,
    /// Recalibration only fires when `|adjustment - 1|` exceeds this.
    pub recalibration_deadband: f64,
    pub recalibration_min: f64,
    pub recalibration_max: f64,
    /// Inputs to `expm1` are clipped to this range when inverting a log fit.
    pub log_clip_min: f64,
    pub log_clip_max: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            default_periods: 30,
            max_periods: 366,
            recalibration_deadband: 0.1,
            recalibration_min: 0.5,
            recalibration_max: 3.0,
            log_clip_min: -10.0,
            log_clip_max: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum history rows before accuracy is scored (0.0 below).
    pub min_accuracy_rows: usize,
    pub accuracy_holdout_days: usize,
    pub drift_window_days: i64,
    pub drift_min_rows: usize,
    /// Coefficient-of-variation threshold above which drift is flagged.
    pub drift_cv_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_accuracy_rows: 30,
            accuracy_holdout_days: 14,
            drift_window_days: 14,
            drift_min_rows: 7,
            drift_cv_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub top_n: usize,
    /// Trailing history window compared against the forecast mean.
    pub history_window_days: usize,
    pub growth_min: f64,
    pub growth_max: f64,
    /// Growth used when there is no usable historical demand.
    pub growth_fallback: f64,
    pub high_urgency_ratio: f64,
    pub medium_urgency_ratio: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            history_window_days: 30,
            growth_min: 0.6,
            growth_max: 1.9,
            growth_fallback: 1.1,
            high_urgency_ratio: 0.6,
            medium_urgency_ratio: 0.3,
        }
    }
}

impl ForecastConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ForecastError> {
        let t = &self.training;
        if t.min_history_days < 2 {
            return Err(invalid("training.min_history_days must be >= 2"));
        }
        if t.validation_days == 0 || t.validation_days >= t.min_history_days {
            return Err(invalid(
                "training.validation_days must be > 0 and below training.min_history_days",
            ));
        }
        if t.recent_window_days == 0 {
            return Err(invalid("training.recent_window_days must be > 0"));
        }
        if t.max_model_age_days < 0 {
            return Err(invalid("training.max_model_age_days must be >= 0"));
        }
        for (field, v) in [
            ("training.changepoint_prior_scale", t.changepoint_prior_scale),
            ("training.seasonality_prior_scale", t.seasonality_prior_scale),
            ("training.regressor_prior_scale", t.regressor_prior_scale),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(invalid(format!("{field} must be a finite positive number")));
            }
        }
        if !(0.0..=1.0).contains(&t.changepoint_range) {
            return Err(invalid("training.changepoint_range must be between 0.0 and 1.0"));
        }
        if !(t.interval_width > 0.0 && t.interval_width < 1.0) {
            return Err(invalid("training.interval_width must be in (0, 1)"));
        }

        let p = &self.prediction;
        if p.default_periods == 0 || p.default_periods > p.max_periods {
            return Err(invalid("prediction.default_periods must be in 1..=max_periods"));
        }
        if !(p.recalibration_min > 0.0 && p.recalibration_min <= 1.0 && p.recalibration_max >= 1.0) {
            return Err(invalid(
                "prediction.recalibration_min must be in (0, 1] and recalibration_max >= 1",
            ));
        }
        if p.recalibration_deadband < 0.0 {
            return Err(invalid("prediction.recalibration_deadband must be >= 0"));
        }
        if p.log_clip_min >= p.log_clip_max {
            return Err(invalid("prediction.log_clip_min must be below log_clip_max"));
        }

        let m = &self.monitor;
        if m.accuracy_holdout_days == 0 || m.accuracy_holdout_days >= m.min_accuracy_rows {
            return Err(invalid(
                "monitor.accuracy_holdout_days must be > 0 and below monitor.min_accuracy_rows",
            ));
        }
        if m.drift_min_rows < 2 || m.drift_window_days < m.drift_min_rows as i64 {
            return Err(invalid(
                "monitor.drift_min_rows must be >= 2 and fit inside drift_window_days",
            ));
        }

        let r = &self.recommendation;
        if !(r.growth_min > 0.0 && r.growth_min <= r.growth_max) {
            return Err(invalid("recommendation.growth_min must be > 0 and <= growth_max"));
        }
        if r.medium_urgency_ratio > r.high_urgency_ratio {
            return Err(invalid(
                "recommendation.medium_urgency_ratio must not exceed high_urgency_ratio",
            ));
        }
        if r.history_window_days == 0 {
            return Err(invalid("recommendation.history_window_days must be > 0"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ForecastError {
    ForecastError::InvalidInput(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ForecastConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_growth_clamp() {
        let mut cfg = ForecastConfig::default();
        cfg.recommendation.growth_min = 2.0;
        assert!(matches!(cfg.validate(), Err(ForecastError::InvalidInput(_))));
    }

    #[test]
    fn rejects_validation_window_larger_than_history_minimum() {
        let mut cfg = ForecastConfig::default();
        cfg.training.validation_days = 30;
        assert!(cfg.validate().is_err());
    }
}
