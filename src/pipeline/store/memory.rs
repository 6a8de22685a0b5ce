use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;

use super::{lease_deadline, RunStateStore, RunSummary, StoreError};
use crate::pipeline::workflow::RunState;

struct Entry {
    state: RunState,
    updated_at: String,
}

struct Lease {
    owner: String,
    expires_at: i64,
}

/// Process-local store. Records vanish with the process.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Entry>>,
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateStore for InMemoryRunStore {
    fn get_or_create(&self, key: &str) -> Result<RunState, StoreError> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        let entry = runs.entry(key.to_string()).or_insert_with(|| Entry {
            state: RunState::default(),
            updated_at: Utc::now().to_rfc3339(),
        });
        Ok(entry.state.clone())
    }

    fn save(&self, key: &str, state: &RunState) -> Result<(), StoreError> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        runs.insert(
            key.to_string(),
            Entry {
                state: state.clone(),
                updated_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<RunState>, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.get(key).map(|e| e.state.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut summaries: Vec<RunSummary> = runs
            .iter()
            .map(|(key, entry)| RunSummary {
                run_key: key.clone(),
                status: entry.state.status.label(),
                question: entry.state.question.clone(),
                updated_at: entry.updated_at.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Utc::now().timestamp_millis();
        if let Some(held) = leases.get(key) {
            if held.owner != owner && held.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at: lease_deadline(ttl),
            },
        );
        Ok(true)
    }

    fn release_lease(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        if leases.get(key).is_some_and(|held| held.owner == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workflow::{Outcome, RunStatus};

    #[test]
    fn get_or_create_returns_idle_record() {
        let store = InMemoryRunStore::new();
        let state = store.get_or_create("thread-1").unwrap();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.iterations, 0);
        assert!(store.load("thread-1").unwrap().is_some());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let store = InMemoryRunStore::new();
        let mut state = RunState::new("q");
        state.iterations = 2;
        let state = state.finish(Outcome::Useful);
        store.save("k", &state).unwrap();
        assert_eq!(store.load("k").unwrap(), Some(state));
    }

    #[test]
    fn keys_are_isolated() {
        let store = InMemoryRunStore::new();
        store.save("a", &RunState::new("question a")).unwrap();
        let b = store.get_or_create("b").unwrap();
        assert_eq!(b.question, "");
        assert_eq!(store.load("a").unwrap().unwrap().question, "question a");
    }

    #[test]
    fn delete_clears_record() {
        let store = InMemoryRunStore::new();
        store.save("k", &RunState::new("q")).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn list_reports_status_labels() {
        let store = InMemoryRunStore::new();
        store.save("k", &RunState::new("q")).unwrap();
        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "pending:route_question");
    }
}
