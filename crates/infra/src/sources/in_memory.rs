use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;

use siprems_ai::{DailyAggregationSource, EventCatalog, ProductSnapshotSource, SourceError};
use siprems_core::{DailyObservation, ProductStockSnapshot, RawCalendarEvent, TargetId};

// Each write leaves the maps consistent, so poisoned locks are recovered.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Daily sales keyed by target and date; inserting a date twice replaces it.
#[derive(Debug, Default)]
pub struct InMemoryDailySales {
    inner: RwLock<HashMap<TargetId, BTreeMap<NaiveDate, DailyObservation>>>,
}

impl InMemoryDailySales {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target_id: &TargetId, observation: DailyObservation) {
        write(&self.inner)
            .entry(target_id.clone())
            .or_default()
            .insert(observation.date, observation);
    }

    pub fn extend(&self, target_id: &TargetId, observations: impl IntoIterator<Item = DailyObservation>) {
        let mut guard = write(&self.inner);
        let rows = guard.entry(target_id.clone()).or_default();
        for o in observations {
            rows.insert(o.date, o);
        }
    }
}

impl DailyAggregationSource for InMemoryDailySales {
    fn history(
        &self,
        target_id: &TargetId,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        let guard = read(&self.inner);
        Ok(guard
            .get(target_id)
            .map(|rows| {
                rows.values()
                    .filter(|o| end.is_none_or(|end| o.date <= end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn window(
        &self,
        target_id: &TargetId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, SourceError> {
        if start > end {
            return Ok(Vec::new());
        }
        let guard = read(&self.inner);
        Ok(guard
            .get(target_id)
            .map(|rows| rows.range(start..=end).map(|(_, o)| o.clone()).collect())
            .unwrap_or_default())
    }
}

/// Calendar events per target, kept unvalidated as they would arrive from
/// a catalog table.
#[derive(Debug, Default)]
pub struct InMemoryEventCatalog {
    inner: RwLock<HashMap<TargetId, Vec<RawCalendarEvent>>>,
}

impl InMemoryEventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, target_id: &TargetId, event: RawCalendarEvent) {
        write(&self.inner).entry(target_id.clone()).or_default().push(event);
    }
}

impl EventCatalog for InMemoryEventCatalog {
    fn events(&self, target_id: &TargetId) -> Result<Vec<RawCalendarEvent>, SourceError> {
        let guard = read(&self.inner);
        Ok(guard.get(target_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProductSnapshots {
    inner: RwLock<HashMap<TargetId, Vec<ProductStockSnapshot>>>,
}

impl InMemoryProductSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot set for a target.
    pub fn set(&self, target_id: &TargetId, snapshots: Vec<ProductStockSnapshot>) {
        write(&self.inner).insert(target_id.clone(), snapshots);
    }
}

impl ProductSnapshotSource for InMemoryProductSnapshots {
    fn snapshots(&self, target_id: &TargetId) -> Result<Vec<ProductStockSnapshot>, SourceError> {
        let guard = read(&self.inner);
        Ok(guard.get(target_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn die_holding<T>(lock: &RwLock<T>) {
        let _guard = lock.write().unwrap();
        panic!("writer died holding the lock");
    }

    fn poison<T: Send + Sync>(lock: &RwLock<T>) {
        std::thread::scope(|s| {
            let writer = s.spawn(|| die_holding(lock));
            assert!(writer.join().is_err());
        });
        assert!(lock.is_poisoned());
    }

    #[test]
    fn history_is_date_ordered_and_replaces_duplicates() {
        let sales = InMemoryDailySales::new();
        let t = TargetId::new("main").unwrap();
        sales.insert(&t, DailyObservation::demand_only(day(3), 30.0).unwrap());
        sales.insert(&t, DailyObservation::demand_only(day(1), 10.0).unwrap());
        sales.insert(&t, DailyObservation::demand_only(day(3), 33.0).unwrap());

        let rows = sales.history(&t, None).unwrap();
        assert_eq!(rows.iter().map(|o| o.date).collect::<Vec<_>>(), vec![day(1), day(3)]);
        assert_eq!(rows[1].demand, 33.0);
        assert_eq!(sales.history(&t, Some(day(2))).unwrap().len(), 1);
    }

    #[test]
    fn window_is_inclusive() {
        let sales = InMemoryDailySales::new();
        let t = TargetId::new("main").unwrap();
        sales.extend(&t, (1..=10).map(|d| DailyObservation::demand_only(day(d), 1.0).unwrap()));
        assert_eq!(sales.window(&t, day(3), day(5)).unwrap().len(), 3);
        assert!(sales.window(&t, day(5), day(3)).unwrap().is_empty());
        assert!(sales.window(&TargetId::new("other").unwrap(), day(1), day(9)).unwrap().is_empty());
    }

    #[test]
    fn catalog_and_snapshots_are_per_target() {
        let t = TargetId::new("main").unwrap();
        let catalog = InMemoryEventCatalog::new();
        catalog.add(&t, RawCalendarEvent::new("2024-01-01", "holiday"));
        assert_eq!(catalog.events(&t).unwrap().len(), 1);
        assert!(catalog.events(&TargetId::new("x").unwrap()).unwrap().is_empty());

        let snaps = InMemoryProductSnapshots::new();
        assert!(snaps.snapshots(&t).unwrap().is_empty());
    }

    #[test]
    fn writes_survive_a_panicked_writer() {
        let t = TargetId::new("main").unwrap();

        let sales = InMemoryDailySales::new();
        sales.insert(&t, DailyObservation::demand_only(day(1), 10.0).unwrap());
        poison(&sales.inner);
        sales.insert(&t, DailyObservation::demand_only(day(2), 20.0).unwrap());
        sales.extend(&t, [DailyObservation::demand_only(day(3), 30.0).unwrap()]);
        assert_eq!(sales.history(&t, None).unwrap().len(), 3);

        let catalog = InMemoryEventCatalog::new();
        poison(&catalog.inner);
        catalog.add(&t, RawCalendarEvent::new("2024-01-01", "holiday"));
        assert_eq!(catalog.events(&t).unwrap().len(), 1);

        let snaps = InMemoryProductSnapshots::new();
        poison(&snaps.inner);
        snaps.set(&t, Vec::new());
        assert!(snaps.snapshots(&t).unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn window_matches_filtered_history(
            days in proptest::collection::btree_set(1u32..=31, 0..31),
            a in 1u32..=31,
            b in 1u32..=31,
        ) {
            let sales = InMemoryDailySales::new();
            let t = TargetId::new("main").unwrap();
            sales.extend(&t, days.iter().map(|d| DailyObservation::demand_only(day(*d), *d as f64).unwrap()));
            let (start, end) = (day(a.min(b)), day(a.max(b)));

            let window: Vec<NaiveDate> = sales.window(&t, start, end).unwrap().iter().map(|o| o.date).collect();
            let expected: Vec<NaiveDate> = sales
                .history(&t, Some(end))
                .unwrap()
                .iter()
                .map(|o| o.date)
                .filter(|d| *d >= start)
                .collect();
            prop_assert_eq!(window, expected);
        }
    }
}
