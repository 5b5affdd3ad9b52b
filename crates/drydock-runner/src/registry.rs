//! The run registry: the only state shared between runs.
//!
//! A mutex-guarded map of run id to [`RunRecord`]. The lock is held only
//! for the duration of an insert, lookup, or update closure -- never across
//! blocking calls or await points. Reads hand out point-in-time snapshots
//! (clones) rather than holding the lock across I/O.
//!
//! Constructed once at process start and passed by handle into every
//! component that needs it; there is no ambient/static registry.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use drydock_types::{DrydockError, RunRecord, RunState};

/// Registry of all runs known to this process.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<Uuid, RunRecord>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, RunRecord>> {
        // A poisoned registry still holds valid records; recover the guard.
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a freshly created record.
    pub fn insert(&self, record: RunRecord) {
        self.lock().insert(record.id, record);
    }

    /// Point-in-time copy of a record.
    pub fn snapshot(&self, id: Uuid) -> Option<RunRecord> {
        self.lock().get(&id).cloned()
    }

    /// Mutate a record under the lock. The closure must not block.
    pub fn update<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut RunRecord) -> T,
    ) -> Result<T, DrydockError> {
        let mut runs = self.lock();
        let record = runs
            .get_mut(&id)
            .ok_or_else(|| DrydockError::ConfigError(format!("unknown run {id}")))?;
        Ok(f(record))
    }

    /// Ids and states of all known runs, newest first.
    pub fn list(&self) -> Vec<(Uuid, RunState)> {
        let runs = self.lock();
        let mut out: Vec<(Uuid, RunState, chrono::DateTime<chrono::Utc>)> = runs
            .values()
            .map(|r| (r.id, r.state, r.created_at))
            .collect();
        out.sort_by(|a, b| b.2.cmp(&a.2));
        out.into_iter().map(|(id, state, _)| (id, state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let registry = RunRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(RunRecord::new(id));

        let before = registry.snapshot(id).unwrap();
        registry
            .update(id, |r| r.transition(RunState::Starting))
            .unwrap()
            .unwrap();

        // The earlier snapshot is unaffected by the update.
        assert_eq!(before.state, RunState::Queued);
        assert_eq!(registry.snapshot(id).unwrap().state, RunState::Starting);
    }

    #[test]
    fn update_on_unknown_run_errors() {
        let registry = RunRegistry::new();
        let err = registry.update(Uuid::new_v4(), |_| ()).unwrap_err();
        assert!(matches!(err, DrydockError::ConfigError(_)));
    }

    #[test]
    fn list_orders_newest_first() {
        let registry = RunRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut a = RunRecord::new(first);
        a.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        registry.insert(a);
        registry.insert(RunRecord::new(second));

        let ids: Vec<Uuid> = registry.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![second, first]);
    }
}
