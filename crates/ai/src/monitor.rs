//! Forecast accuracy scoring and demand-volatility drift checks.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use siprems_core::{DailyObservation, RecordId, TargetId};

use crate::artifact::ModelArtifact;
use crate::config::{MonitorConfig, PredictionConfig};
use crate::error::ForecastError;
use crate::features::{build_training_frame, EventLookup};
use crate::predictor::forecast_frame;
use crate::stats::{accuracy_from_mape, coefficient_of_variation, mape};

/// Accuracy (0-100) of `artifact` over the trailing hold-out of `history`.
///
/// Scored with the true covariates of the held-out days. Returns 0.0 when
/// there is too little history or scoring fails.
pub fn forecast_accuracy(
    artifact: &ModelArtifact,
    history: &[DailyObservation],
    lookup: &EventLookup,
    monitor: &MonitorConfig,
    prediction: &PredictionConfig,
) -> f64 {
    match score_holdout(artifact, history, lookup, monitor, prediction) {
        Ok(acc) => acc,
        Err(e) => {
            warn!(target_id = %artifact.metadata.target_id, error = %e, "accuracy scoring failed");
            0.0
        }
    }
}

fn score_holdout(
    artifact: &ModelArtifact,
    history: &[DailyObservation],
    lookup: &EventLookup,
    monitor: &MonitorConfig,
    prediction: &PredictionConfig,
) -> Result<f64, ForecastError> {
    let tf = build_training_frame(history, lookup);
    if tf.len() < monitor.min_accuracy_rows {
        return Ok(0.0);
    }
    let (_, holdout) = tf.split_tail(monitor.accuracy_holdout_days);
    let out = forecast_frame(&artifact.model, &artifact.metadata, &holdout.frame, prediction)?;
    let predicted: Vec<f64> = out.yhat.iter().map(|v| v.max(0.0)).collect();
    Ok(accuracy_from_mape(mape(&holdout.demand, &predicted)))
}

/// Append-only drift measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub record_id: RecordId,
    pub target_id: TargetId,
    /// Coefficient of variation of recent demand, 3 decimals.
    pub drift_score: f64,
    /// Training MAPE at check time; no stored forecasts exist to score
    /// against the realised window yet.
    pub actual_mape: Option<f64>,
    pub drift_detected: bool,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub checked_at: DateTime<Utc>,
}

/// Training-time metrics a drift check compares against.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub mape: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftOutcome {
    InsufficientActualData { rows: usize, needed: usize },
    NoTrainingMetrics,
    Checked {
        record: DriftRecord,
        training: TrainingMetrics,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriftLogError {
    #[error("drift log unavailable: {0}")]
    Unavailable(String),
}

/// Sink for drift records.
pub trait DriftLog: Send + Sync {
    fn append(&self, record: &DriftRecord) -> Result<(), DriftLogError>;

    /// Most recent records for a target, newest first.
    fn recent(&self, target_id: &TargetId, limit: usize) -> Result<Vec<DriftRecord>, DriftLogError>;
}

impl<L> DriftLog for Arc<L>
where
    L: DriftLog + ?Sized,
{
    fn append(&self, record: &DriftRecord) -> Result<(), DriftLogError> {
        (**self).append(record)
    }

    fn recent(&self, target_id: &TargetId, limit: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
        (**self).recent(target_id, limit)
    }
}

#[derive(Debug)]
pub struct DriftMonitor<L> {
    log: L,
    config: MonitorConfig,
}

impl<L: DriftLog> DriftMonitor<L> {
    pub fn new(log: L, config: MonitorConfig) -> Self {
        Self { log, config }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// First day of the window ending at `window_end`.
    pub fn window_start(&self, window_end: NaiveDate) -> NaiveDate {
        window_end - Duration::days(self.config.drift_window_days - 1)
    }

    /// Check volatility of the actuals inside the window ending at `window_end`.
    ///
    /// Rows outside the window are ignored. Logging failures never fail the
    /// check.
    pub fn check(
        &self,
        target_id: &TargetId,
        actuals: &[DailyObservation],
        training: Option<TrainingMetrics>,
        window_end: NaiveDate,
        checked_at: DateTime<Utc>,
    ) -> DriftOutcome {
        let period_start = self.window_start(window_end);
        let demand: Vec<f64> = actuals
            .iter()
            .filter(|o| o.date >= period_start && o.date <= window_end)
            .map(|o| o.demand)
            .collect();

        if demand.len() < self.config.drift_min_rows {
            return DriftOutcome::InsufficientActualData {
                rows: demand.len(),
                needed: self.config.drift_min_rows,
            };
        }
        let Some(training) = training else {
            return DriftOutcome::NoTrainingMetrics;
        };

        let cv = coefficient_of_variation(&demand);
        let record = DriftRecord {
            record_id: RecordId::new(),
            target_id: target_id.clone(),
            drift_score: (cv * 1000.0).round() / 1000.0,
            actual_mape: Some(training.mape),
            drift_detected: cv > self.config.drift_cv_threshold,
            period_start,
            period_end: window_end,
            checked_at,
        };

        info!(
            target_id = %target_id,
            drift_score = record.drift_score,
            drift_detected = record.drift_detected,
            rows = demand.len(),
            "drift check complete"
        );

        if let Err(e) = self.log.append(&record) {
            warn!(target_id = %target_id, error = %e, "failed to record drift check");
        }

        DriftOutcome::Checked { record, training }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::date_range;
    use crate::test_support::{demand_series, fitted};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecLog(Mutex<Vec<DriftRecord>>);

    impl DriftLog for VecLog {
        fn append(&self, record: &DriftRecord) -> Result<(), DriftLogError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn recent(&self, target_id: &TargetId, limit: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|r| &r.target_id == target_id)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    struct BrokenLog;

    impl DriftLog for BrokenLog {
        fn append(&self, _: &DriftRecord) -> Result<(), DriftLogError> {
            Err(DriftLogError::Unavailable("disk full".into()))
        }

        fn recent(&self, _: &TargetId, _: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
            Ok(Vec::new())
        }
    }

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
    }

    fn actuals(values: &[f64]) -> Vec<DailyObservation> {
        let start = end() - Duration::days(values.len() as i64 - 1);
        date_range(start, values.len())
            .into_iter()
            .zip(values)
            .map(|(d, v)| DailyObservation::demand_only(d, *v).unwrap())
            .collect()
    }

    fn metrics() -> Option<TrainingMetrics> {
        Some(TrainingMetrics {
            accuracy: 88.0,
            mape: 12.0,
        })
    }

    fn target() -> TargetId {
        TargetId::new("store_1").unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap()
    }

    #[test]
    fn too_few_rows_is_reported() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let out = monitor.check(&target(), &actuals(&[10.0; 6]), metrics(), end(), at());
        assert_eq!(out, DriftOutcome::InsufficientActualData { rows: 6, needed: 7 });
        assert!(monitor.log().0.lock().unwrap().is_empty());
    }

    #[test]
    fn rows_outside_window_do_not_count() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let mut rows = actuals(&[10.0; 20]);
        rows.truncate(10); // all before the 14-day window except the last 4
        let out = monitor.check(&target(), &rows, metrics(), end(), at());
        assert!(matches!(out, DriftOutcome::InsufficientActualData { rows: 4, .. }));
    }

    #[test]
    fn missing_metrics_is_reported() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let out = monitor.check(&target(), &actuals(&[10.0; 14]), None, end(), at());
        assert_eq!(out, DriftOutcome::NoTrainingMetrics);
    }

    #[test]
    fn stable_demand_is_not_drift() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let out = monitor.check(&target(), &actuals(&[100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 100.0]), metrics(), end(), at());
        let DriftOutcome::Checked { record, .. } = out else {
            panic!("expected a checked outcome");
        };
        assert!(!record.drift_detected);
        assert_eq!(record.period_start, NaiveDate::from_ymd_opt(2024, 3, 18).unwrap());
        assert_eq!(record.actual_mape, Some(12.0));
        assert_eq!(monitor.log().recent(&target(), 10).unwrap(), vec![record]);
    }

    #[test]
    fn volatile_demand_is_flagged() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let values = [10.0, 200.0, 5.0, 180.0, 0.0, 150.0, 20.0, 300.0];
        let out = monitor.check(&target(), &actuals(&values), metrics(), end(), at());
        let DriftOutcome::Checked { record, .. } = out else {
            panic!("expected a checked outcome");
        };
        assert!(record.drift_detected);
        assert!(record.drift_score > 0.5);
    }

    #[test]
    fn all_zero_demand_scores_zero() {
        let monitor = DriftMonitor::new(VecLog::default(), MonitorConfig::default());
        let out = monitor.check(&target(), &actuals(&[0.0; 10]), metrics(), end(), at());
        let DriftOutcome::Checked { record, .. } = out else {
            panic!("expected a checked outcome");
        };
        assert_eq!(record.drift_score, 0.0);
        assert!(!record.drift_detected);
    }

    #[test]
    fn log_failures_are_swallowed() {
        let monitor = DriftMonitor::new(BrokenLog, MonitorConfig::default());
        let out = monitor.check(&target(), &actuals(&[10.0; 7]), metrics(), end(), at());
        assert!(matches!(out, DriftOutcome::Checked { .. }));
    }

    #[test]
    fn outcome_serialises_with_status_tag() {
        let json = serde_json::to_value(DriftOutcome::NoTrainingMetrics).unwrap();
        assert_eq!(json["status"], "no_training_metrics");
    }

    fn weekly(days: usize) -> Vec<f64> {
        (0..days)
            .map(|i| {
                let base = if i % 7 >= 5 { 140.0 } else { 100.0 };
                base + (i % 3) as f64
            })
            .collect()
    }

    fn accuracy(artifact: &ModelArtifact, history: &[DailyObservation]) -> f64 {
        forecast_accuracy(
            artifact,
            history,
            &EventLookup::default(),
            &MonitorConfig::default(),
            &PredictionConfig::default(),
        )
    }

    #[test]
    fn accuracy_needs_thirty_rows() {
        let history = demand_series(end() - Duration::days(59), &weekly(60));
        let artifact = fitted(&history);
        assert_eq!(accuracy(&artifact, &history[history.len() - 29..]), 0.0);
        assert_eq!(accuracy(&artifact, &[]), 0.0);
    }

    #[test]
    fn accuracy_of_a_fitted_model_is_a_percentage() {
        let history = demand_series(end() - Duration::days(59), &weekly(60));
        let artifact = fitted(&history);
        let acc = accuracy(&artifact, &history);
        assert!((0.0..=100.0).contains(&acc));
        assert!(acc > 50.0, "regular weekly demand scored {acc}");
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn accuracy_stays_within_bounds(
            values in proptest::collection::vec(
                prop_oneof![Just(0.0f64), 0.0f64..500.0, 1_000.0f64..20_000.0],
                30..70,
            ),
        ) {
            let history = demand_series(end() - Duration::days(values.len() as i64 - 1), &values);
            let artifact = fitted(&history);
            let acc = accuracy(&artifact, &history);
            prop_assert!(acc.is_finite());
            prop_assert!((0.0..=100.0).contains(&acc));
        }
    }
}
