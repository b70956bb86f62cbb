//! Drift log sinks.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use siprems_ai::{DriftLog, DriftLogError, DriftRecord};
use siprems_core::TargetId;

/// In-memory drift log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDriftLog {
    inner: Mutex<Vec<DriftRecord>>,
}

impl InMemoryDriftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in append order.
    pub fn all(&self) -> Vec<DriftRecord> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl DriftLog for InMemoryDriftLog {
    fn append(&self, record: &DriftRecord) -> Result<(), DriftLogError> {
        self.inner
            .lock()
            .map_err(|_| DriftLogError::Unavailable("drift log lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    fn recent(&self, target_id: &TargetId, limit: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| DriftLogError::Unavailable("drift log lock poisoned".into()))?;
        Ok(newest_first(guard.iter().cloned(), target_id, limit))
    }
}

/// Append-only JSON-lines file, one record per line.
#[derive(Debug)]
pub struct JsonLinesDriftLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesDriftLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DriftLogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| unavailable(&path, e))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DriftLog for JsonLinesDriftLog {
    fn append(&self, record: &DriftRecord) -> Result<(), DriftLogError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| DriftLogError::Unavailable(format!("serialize drift record: {e}")))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| DriftLogError::Unavailable("drift log lock poisoned".into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| unavailable(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| unavailable(&self.path, e))
    }

    fn recent(&self, target_id: &TargetId, limit: usize) -> Result<Vec<DriftRecord>, DriftLogError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&self.path, e)),
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| unavailable(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DriftRecord>(&line) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!(path = %self.path.display(), line = n + 1, error = %e, "skipping malformed drift record")
                }
            }
        }
        Ok(newest_first(records.into_iter(), target_id, limit))
    }
}

fn newest_first(
    records: impl DoubleEndedIterator<Item = DriftRecord>,
    target_id: &TargetId,
    limit: usize,
) -> Vec<DriftRecord> {
    records
        .rev()
        .filter(|r| &r.target_id == target_id)
        .take(limit)
        .collect()
}

fn unavailable(path: &Path, err: io::Error) -> DriftLogError {
    DriftLogError::Unavailable(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use siprems_core::RecordId;

    fn record(target: &str, score: f64) -> DriftRecord {
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        DriftRecord {
            record_id: RecordId::new(),
            target_id: TargetId::new(target).unwrap(),
            drift_score: score,
            actual_mape: Some(10.0),
            drift_detected: score > 0.5,
            period_start: NaiveDate::from_ymd_opt(2024, 3, 18).unwrap(),
            period_end: end,
            checked_at: Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn in_memory_recent_is_newest_first_per_target() {
        let log = InMemoryDriftLog::new();
        log.append(&record("a", 0.1)).unwrap();
        log.append(&record("b", 0.2)).unwrap();
        log.append(&record("a", 0.3)).unwrap();

        let recent = log.recent(&TargetId::new("a").unwrap(), 10).unwrap();
        let scores: Vec<f64> = recent.iter().map(|r| r.drift_score).collect();
        assert_eq!(scores, vec![0.3, 0.1]);
        assert_eq!(log.all().len(), 3);
    }

    #[test]
    fn json_lines_appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesDriftLog::open(dir.path().join("logs/drift.jsonl")).unwrap();
        let first = record("a", 0.1);
        log.append(&first).unwrap();
        log.append(&record("a", 0.7)).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["target_id"], "a");
        assert_eq!(parsed["drift_detected"], false);

        let recent = log.recent(&TargetId::new("a").unwrap(), 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].drift_detected);
        assert_eq!(log.recent(&TargetId::new("a").unwrap(), 5).unwrap()[1], first);
    }

    #[test]
    fn missing_file_reads_empty_and_bad_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesDriftLog::open(dir.path().join("drift.jsonl")).unwrap();
        assert!(log.recent(&TargetId::new("a").unwrap(), 5).unwrap().is_empty());

        log.append(&record("a", 0.2)).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{ truncated").unwrap();
        log.append(&record("a", 0.4)).unwrap();

        assert_eq!(log.recent(&TargetId::new("a").unwrap(), 5).unwrap().len(), 2);
    }
}
