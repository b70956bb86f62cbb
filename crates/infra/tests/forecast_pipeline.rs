//! End-to-end runs of the forecast service over the infra adapters.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use siprems_ai::{
    DriftOutcome, FixedClock, ForecastError, ForecastService, PredictRequest, RecommendRequest,
    TrainRequest, TrainStatus, Urgency,
};
use siprems_core::{
    is_weekend, DailyObservation, ProductId, ProductStockSnapshot, RawCalendarEvent, TargetId,
};
use siprems_infra::sources::{InMemoryDailySales, InMemoryEventCatalog, InMemoryProductSnapshots};
use siprems_infra::{AppConfig, FsArtifactStore, JsonLinesDriftLog};

fn target() -> TargetId {
    TargetId::new("main_store").unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn at(date: &str) -> DateTime<Utc> {
    let d = day(date);
    Utc.from_utc_datetime(&d.and_hms_opt(9, 0, 0).unwrap())
}

/// Ninety days ending 2024-02-29: weekday base ~120, weekends ~160.
fn history() -> Vec<DailyObservation> {
    let end = day("2024-02-29");
    (0..90)
        .map(|i| {
            let date = end - Duration::days(89 - i);
            let base = if is_weekend(date) { 160.0 } else { 120.0 };
            let demand = base + ((i * 7) % 11) as f64;
            DailyObservation::new(date, demand, 30.0 + (i % 4) as f64, demand * 1.1, 4.5).unwrap()
        })
        .collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    artifact_dir: std::path::PathBuf,
    drift_path: std::path::PathBuf,
    sales: Arc<InMemoryDailySales>,
    catalog: Arc<InMemoryEventCatalog>,
    products: Arc<InMemoryProductSnapshots>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sales = Arc::new(InMemoryDailySales::new());
        sales.extend(&target(), history());

        let catalog = Arc::new(InMemoryEventCatalog::new());
        catalog.add(&target(), RawCalendarEvent::new("2024-02-14", "promotion").with_title("Valentine"));
        catalog.add(&target(), RawCalendarEvent::new("2024-03-03", "store-closed").with_title("Renovation"));
        catalog.add(&target(), RawCalendarEvent::new("not-a-date", "holiday"));

        let products = Arc::new(InMemoryProductSnapshots::new());
        products.set(
            &target(),
            vec![
                snapshot("coffee", "Coffee beans", 40.0, 10),
                snapshot("milk", "Milk", 90.0, 200),
                snapshot("tea", "Tea", 5.0, 0),
            ],
        );

        Self {
            artifact_dir: dir.path().join("models"),
            drift_path: dir.path().join("logs/drift.jsonl"),
            _dir: dir,
            sales,
            catalog,
            products,
        }
    }

    fn service(&self, now: DateTime<Utc>) -> ForecastService {
        ForecastService::builder(
            self.sales.clone(),
            Arc::new(FsArtifactStore::open(&self.artifact_dir).unwrap()),
        )
        .with_events(self.catalog.clone())
        .with_products(self.products.clone())
        .with_drift_log(Arc::new(JsonLinesDriftLog::open(&self.drift_path).unwrap()))
        .with_clock(Arc::new(FixedClock(now)))
        .build()
        .unwrap()
    }
}

fn snapshot(id: &str, name: &str, sold: f64, stock: i64) -> ProductStockSnapshot {
    ProductStockSnapshot {
        product_id: ProductId::new(id).unwrap(),
        name: name.to_string(),
        category: Some("grocery".to_string()),
        current_stock: stock,
        recent_sold_units: sold,
    }
}

fn generation_dirs(target_dir: &Path) -> Vec<String> {
    fs::read_dir(target_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn train_predict_recommend_and_drift_end_to_end() {
    let fx = Fixture::new();
    let service = fx.service(at("2024-03-01"));

    let trained = service.train(TrainRequest::new(target())).unwrap();
    assert_eq!(trained.status, TrainStatus::Trained);
    assert_eq!(trained.metadata.data_points, 90);
    assert_eq!(trained.metadata.last_observed_date, Some(day("2024-02-29")));
    assert!((0.0..=100.0).contains(&trained.metadata.accuracy));

    let target_dir = fx.artifact_dir.join("main_store");
    let gens = generation_dirs(&target_dir);
    assert_eq!(gens.len(), 1);
    assert!(target_dir.join(&gens[0]).join("model.json").is_file());
    assert!(target_dir.join(&gens[0]).join("metadata.json").is_file());
    assert_eq!(fs::read_to_string(target_dir.join("CURRENT")).unwrap().trim(), gens[0]);

    let predicted = service
        .predict(
            PredictRequest::new(target())
                .with_periods(7)
                .with_event(RawCalendarEvent::new("2024-03-05", "promotion").with_title("Spring sale"))
                .with_event(RawCalendarEvent::new("2024-13-01", "holiday")),
        )
        .unwrap();
    assert_eq!(predicted.status, "success");
    assert_eq!(predicted.predictions.len(), 7);
    assert_eq!(predicted.predictions[0].date, day("2024-03-01"));
    assert_eq!(predicted.metadata.events_applied, 2);
    assert_eq!(predicted.metadata.model_age_days, 0);
    for p in &predicted.predictions {
        assert!(p.yhat >= 0.0 && p.yhat_lower >= 0.0 && p.yhat_upper >= 0.0);
        assert!(p.yhat_lower <= p.yhat + 1e-9 && p.yhat <= p.yhat_upper + 1e-9);
    }
    let closed: Vec<NaiveDate> = predicted
        .predictions
        .iter()
        .filter(|p| p.store_closed)
        .map(|p| p.date)
        .collect();
    assert_eq!(closed, vec![day("2024-03-03")]);

    let report = service.recommend(RecommendRequest::new(target())).unwrap();
    assert!((0.6..=1.9).contains(&report.growth_factor));
    let names: Vec<&str> = report.recommendations.iter().map(|r| r.product_name.as_str()).collect();
    assert_eq!(names, vec!["Milk", "Coffee beans", "Tea"]);
    let tea = &report.recommendations[2];
    assert!(tea.recommended_restock > 0);
    assert_eq!(tea.urgency, Urgency::High);
    assert_eq!(report.history_days, 90);
    assert!(report.annotations.iter().any(|a| a.date == day("2024-03-03")));

    let DriftOutcome::Checked { record, training } = service.check_drift(&target()).unwrap() else {
        panic!("expected a drift record");
    };
    assert_eq!(record.period_end, day("2024-03-01"));
    assert_eq!(record.period_start, day("2024-02-17"));
    assert!(!record.drift_detected);
    assert_eq!(record.actual_mape, Some(training.mape));

    let lines = fs::read_to_string(&fx.drift_path).unwrap();
    assert_eq!(lines.lines().count(), 1);
    assert_eq!(service.drift_history(&target(), 10), vec![record]);
}

#[test]
fn insufficient_history_writes_nothing() {
    let fx = Fixture::new();
    let short = TargetId::new("new_store").unwrap();
    fx.sales.extend(&short, history().into_iter().take(20));
    let service = fx.service(at("2024-03-01"));

    let err = service.train(TrainRequest::new(short.clone())).unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData { needed: 30, got: 20 }));
    assert!(!fx.artifact_dir.join("new_store").exists());
    assert!(!service.model_status(&short).unwrap().exists);
    assert!(matches!(
        service.predict(PredictRequest::new(short)),
        Err(ForecastError::ModelNotFound(_))
    ));
}

#[test]
fn restarted_service_reuses_persisted_model() {
    let fx = Fixture::new();
    let first = fx.service(at("2024-03-01"));
    first.train(TrainRequest::new(target())).unwrap();
    let before = first.predict(PredictRequest::new(target()).with_periods(14)).unwrap();

    let second = fx.service(at("2024-03-03"));
    let status = second.model_status(&target()).unwrap();
    assert!(status.exists);
    assert_eq!(status.age_days, Some(2));
    assert_eq!(status.data_points, Some(90));

    let fresh = second.ensure_fresh_model(&target()).unwrap();
    assert_eq!(fresh.status, TrainStatus::Fresh);

    let after = second.predict(PredictRequest::new(target()).with_periods(14)).unwrap();
    assert_eq!(before.predictions, after.predictions);
}

#[test]
fn stale_model_is_retrained_in_place() {
    let fx = Fixture::new();
    fx.service(at("2024-03-01")).train(TrainRequest::new(target())).unwrap();
    let target_dir = fx.artifact_dir.join("main_store");
    let old_generation = generation_dirs(&target_dir);

    let later = fx.service(at("2024-03-09"));
    let refreshed = later.ensure_fresh_model(&target()).unwrap();
    assert_eq!(refreshed.status, TrainStatus::Trained);
    assert_eq!(refreshed.metadata.saved_at, at("2024-03-09"));

    let gens = generation_dirs(&target_dir);
    assert_eq!(gens.len(), 1);
    assert_ne!(gens, old_generation);
    assert_eq!(later.model_status(&target()).unwrap().age_days, Some(0));
}

#[test]
fn unforced_train_of_fresh_model_keeps_generation() {
    let fx = Fixture::new();
    let service = fx.service(at("2024-03-01"));
    service.train(TrainRequest::new(target())).unwrap();
    let target_dir = fx.artifact_dir.join("main_store");
    let gens = generation_dirs(&target_dir);

    let again = service.train(TrainRequest::new(target())).unwrap();
    assert_eq!(again.status, TrainStatus::Fresh);
    assert_eq!(generation_dirs(&target_dir), gens);

    let forced = service.train(TrainRequest::new(target()).forced()).unwrap();
    assert_eq!(forced.status, TrainStatus::Trained);
    assert_ne!(generation_dirs(&target_dir), gens);
}

#[test]
fn adapters_can_be_wired_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::from_toml(
        r#"
        [forecast.prediction]
        default_periods = 10

        [maintenance]
        targets = ["main_store"]
        "#,
    )
    .unwrap();
    let root = dir.path().to_path_buf();
    config
        .apply_env_overrides(|key| match key {
            "SIPREMS_ARTIFACT_DIR" => Some(root.join("artifacts").display().to_string()),
            "SIPREMS_DRIFT_LOG_PATH" => Some(root.join("drift.jsonl").display().to_string()),
            _ => None,
        })
        .unwrap();
    config.validate().unwrap();

    let sales = Arc::new(InMemoryDailySales::new());
    sales.extend(&target(), history());
    let service = ForecastService::builder(
        sales,
        Arc::new(FsArtifactStore::open(&config.storage.artifact_dir).unwrap()),
    )
    .with_drift_log(Arc::new(JsonLinesDriftLog::open(&config.storage.drift_log_path).unwrap()))
    .with_clock(Arc::new(FixedClock(at("2024-03-01"))))
    .with_config(config.forecast.clone())
    .build()
    .unwrap();

    for t in config.maintenance.target_ids().unwrap() {
        service.ensure_fresh_model(&t).unwrap();
        service.check_drift(&t).unwrap();
    }
    let predicted = service.predict(PredictRequest::new(target())).unwrap();
    assert_eq!(predicted.predictions.len(), 10);
    assert!(root.join("artifacts/main_store/CURRENT").is_file());
    assert_eq!(fs::read_to_string(root.join("drift.jsonl")).unwrap().lines().count(), 1);
}
