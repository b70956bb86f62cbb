use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{NaiveDate, TimeZone, Utc};
use siprems_ai::features::{build_training_frame, date_range, EventLookup};
use siprems_ai::{ForecastConfig, Predictor, Trainer};
use siprems_ai::{ArtifactStore, ForecastError, ModelArtifact};
use siprems_core::{CalendarEvent, DailyObservation, EventKind, TargetId};

/// Store that keeps nothing; benchmarks measure fitting only.
struct NullStore;

impl ArtifactStore for NullStore {
    fn load(&self, _: &TargetId) -> Result<Option<ModelArtifact>, ForecastError> {
        Ok(None)
    }

    fn save(&self, _: &ModelArtifact) -> Result<(), ForecastError> {
        Ok(())
    }
}

fn history(days: usize) -> Vec<DailyObservation> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    date_range(start, days)
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let weekly = if siprems_core::is_weekend(d) { 40.0 } else { 0.0 };
            let demand = 100.0 + weekly + (i % 11) as f64;
            DailyObservation::new(d, demand, 20.0 + (i % 7) as f64, demand, 6.0).unwrap()
        })
        .collect()
}

fn events(days: usize) -> Vec<CalendarEvent> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    date_range(start, days)
        .into_iter()
        .step_by(17)
        .map(|d| CalendarEvent::new(d, EventKind::Promotion).with_title("Flash sale"))
        .collect()
}

fn bench_feature_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_building");

    for days in [90usize, 365, 730].iter() {
        let hist = history(*days);
        let lookup = EventLookup::build(&events(*days));
        group.throughput(Throughput::Elements(*days as u64));
        group.bench_with_input(BenchmarkId::new("training_frame", days), days, |b, _| {
            b.iter(|| black_box(build_training_frame(&hist, &lookup)));
        });
    }

    group.finish();
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(20);

    let target = TargetId::new("bench_store").unwrap();
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let trainer = Trainer::new(NullStore, ForecastConfig::default());

    for days in [60usize, 365, 730].iter() {
        let hist = history(*days);
        let evs = events(*days);
        group.bench_with_input(BenchmarkId::new("train", days), days, |b, _| {
            b.iter(|| black_box(trainer.train(&target, &hist, &evs, true, now).unwrap()));
        });
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    let target = TargetId::new("bench_store").unwrap();
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let hist = history(365);
    let lookup = EventLookup::build(&events(400));
    let trainer = Trainer::new(NullStore, ForecastConfig::default());
    let artifact = trainer
        .fit_artifact(&target, &hist, &lookup, now)
        .unwrap();
    let predictor = Predictor::default();
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    for periods in [7usize, 30, 90].iter() {
        group.throughput(Throughput::Elements(*periods as u64));
        group.bench_with_input(BenchmarkId::new("predict", periods), periods, |b, &p| {
            b.iter(|| black_box(predictor.predict(&artifact, &hist, &lookup, p, start).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_feature_building, bench_training, bench_prediction);
criterion_main!(benches);
