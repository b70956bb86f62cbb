//! Background model maintenance.
//!
//! On start and every `interval`, each configured target gets
//! `ensure_fresh_model` followed by `check_drift`. Transient failures are
//! retried with bounded exponential backoff and never propagate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use siprems_ai::{DriftOutcome, ForecastError, ForecastService, TrainStatus};
use siprems_core::TargetId;

use crate::config::{ConfigError, MaintenanceConfig};

/// Config for the maintenance runner.
#[derive(Debug, Clone)]
pub struct MaintenanceRunner {
    interval: Duration,
    max_retries: u32,
    base_backoff: Duration,
}

impl Default for MaintenanceRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl MaintenanceRunner {
    /// `interval` must be non-zero.
    pub fn new(interval: Duration, max_retries: u32, base_backoff: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Validation {
                field: "maintenance.interval_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(Self {
            interval,
            max_retries,
            base_backoff,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }
}

impl TryFrom<&MaintenanceConfig> for MaintenanceRunner {
    type Error = ConfigError;

    fn try_from(cfg: &MaintenanceConfig) -> Result<Self, Self::Error> {
        Self::new(cfg.interval(), cfg.max_retries, cfg.base_backoff())
    }
}

/// Counters published by the runner thread.
#[derive(Debug, Default)]
pub struct MaintenanceStats {
    passes: AtomicU64,
    trained: AtomicU64,
    drift_checks: AtomicU64,
    failures: AtomicU64,
}

impl MaintenanceStats {
    /// Completed passes (including retry passes).
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    pub fn trained(&self) -> u64 {
        self.trained.load(Ordering::Acquire)
    }

    pub fn drift_checks(&self) -> u64 {
        self.drift_checks.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }
}

/// Handle for the running maintenance thread (shutdown + trigger hook).
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    stats: Arc<MaintenanceStats>,
    join: Option<thread::JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Request an immediate pass over all targets.
    ///
    /// Triggers are coalesced (bounded queue); if a pass is already pending
    /// this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub fn stats(&self) -> Arc<MaintenanceStats> {
        self.stats.clone()
    }

    /// Stop the runner thread and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl MaintenanceRunner {
    /// Spawn the runner thread for `targets`.
    pub fn spawn(
        &self,
        name: &'static str,
        targets: Vec<TargetId>,
        service: Arc<ForecastService>,
    ) -> std::io::Result<MaintenanceHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);
        let stats = Arc::new(MaintenanceStats::default());

        let cfg = self.clone();
        let thread_stats = stats.clone();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            runner_loop(name, cfg, targets, shutdown_rx, trigger_rx, service, thread_stats)
        })?;

        Ok(MaintenanceHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            stats,
            join: Some(join),
        })
    }
}

fn runner_loop(
    name: &'static str,
    cfg: MaintenanceRunner,
    targets: Vec<TargetId>,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    service: Arc<ForecastService>,
    stats: Arc<MaintenanceStats>,
) {
    info!(runner = name, targets = targets.len(), "maintenance runner started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut queue: Vec<TargetId> = targets.clone(); // run once on startup
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            queue = targets.clone();
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            queue = targets.clone();
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if queue.is_empty() {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        let batch = std::mem::take(&mut queue);
        let failed: Vec<TargetId> = batch
            .into_iter()
            .filter(|target| !maintain(name, target, &service, &stats))
            .collect();
        stats.passes.fetch_add(1, Ordering::AcqRel);

        if failed.is_empty() {
            failures = 0;
            continue;
        }
        stats.failures.fetch_add(failed.len() as u64, Ordering::AcqRel);
        failures += 1;
        if failures <= cfg.max_retries {
            queue = failed;
            backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
        } else {
            warn!(runner = name, targets = failed.len(), "retries exhausted; waiting for next tick");
            failures = 0;
        }
    }

    info!(runner = name, "maintenance runner stopped");
}

/// One target: refresh the model if stale, then check drift. `false` when a
/// transient failure should be retried.
fn maintain(
    name: &'static str,
    target: &TargetId,
    service: &ForecastService,
    stats: &MaintenanceStats,
) -> bool {
    match service.ensure_fresh_model(target) {
        Ok(resp) => {
            if resp.status == TrainStatus::Trained {
                stats.trained.fetch_add(1, Ordering::AcqRel);
                info!(runner = name, target_id = %target, accuracy = resp.metadata.accuracy, "model retrained");
            }
        }
        Err(e) if is_transient(&e) => {
            warn!(runner = name, target_id = %target, error = ?e, "model refresh failed");
            return false;
        }
        Err(e) => {
            warn!(runner = name, target_id = %target, error = %e, "model refresh skipped");
        }
    }

    match service.check_drift(target) {
        Ok(outcome) => {
            stats.drift_checks.fetch_add(1, Ordering::AcqRel);
            if let DriftOutcome::Checked { record, .. } = &outcome {
                if record.drift_detected {
                    warn!(runner = name, target_id = %target, drift_score = record.drift_score, "demand drift detected");
                }
            }
            true
        }
        Err(e) if is_transient(&e) => {
            warn!(runner = name, target_id = %target, error = ?e, "drift check failed");
            false
        }
        Err(e) => {
            warn!(runner = name, target_id = %target, error = %e, "drift check skipped");
            true
        }
    }
}

fn is_transient(err: &ForecastError) -> bool {
    matches!(
        err,
        ForecastError::UpstreamDataUnavailable(_) | ForecastError::Artifact(_)
    )
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
