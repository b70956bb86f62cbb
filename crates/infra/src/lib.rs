//! `siprems-infra`
//!
//! Storage adapters, configuration and background maintenance for the
//! forecasting pipeline in `siprems-ai`.

pub mod artifact_store;
pub mod config;
pub mod drift_log;
pub mod maintenance;
pub mod sources;

pub use artifact_store::{FsArtifactStore, InMemoryArtifactStore};
pub use config::{AppConfig, ConfigError};
pub use drift_log::{InMemoryDriftLog, JsonLinesDriftLog};
pub use maintenance::{MaintenanceHandle, MaintenanceRunner, MaintenanceStats};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use siprems_ai::{EventLookup, FixedClock, ForecastConfig, ModelArtifact, Trainer};
    use siprems_core::{is_weekend, DailyObservation, TargetId};

    use crate::artifact_store::InMemoryArtifactStore;

    pub fn target(id: &str) -> TargetId {
        TargetId::new(id).unwrap()
    }

    /// 2024-03-01 09:00 UTC, the day after `trending_history` ends.
    pub fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()))
    }

    /// `days` rows ending 2024-02-29 with a mild trend and weekend lift.
    pub fn trending_history(days: usize) -> Vec<DailyObservation> {
        let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        (0..days)
            .map(|i| {
                let date = end - Duration::days((days - 1 - i) as i64);
                let lift = if is_weekend(date) { 25.0 } else { 0.0 };
                let demand = 100.0 + i as f64 * 0.5 + lift + (i % 3) as f64;
                DailyObservation::new(date, demand, 20.0 + (i % 5) as f64, demand, 5.0).unwrap()
            })
            .collect()
    }

    /// Fitted artifact whose `saved_at` is shifted by `age_shift_days`.
    pub fn sample_artifact(target_id: &TargetId, age_shift_days: i64) -> ModelArtifact {
        let trainer = Trainer::new(InMemoryArtifactStore::new(), ForecastConfig::default());
        let now = clock().0 + Duration::days(age_shift_days);
        trainer
            .fit_artifact(target_id, &trending_history(45), &EventLookup::build(&[]), now)
            .unwrap()
    }
}
