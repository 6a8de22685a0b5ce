use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{lease_deadline, RunStateStore, RunSummary, StoreError};
use crate::db;
use crate::pipeline::workflow::RunState;

/// SQLite-backed run state store.
///
/// The state is kept as one JSON document per run key; a denormalized
/// `status` column allows listing runs without decoding it. Leases live in
/// `run_leases` and are taken under `BEGIN IMMEDIATE`, so every connection
/// to the same file agrees on the owner.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open_database(path)?;
        tracing::info!(path = %path.display(), "Opened run state store");
        Ok(Self::from_connection(conn))
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn encode(state: &RunState) -> Result<String, StoreError> {
    serde_json::to_string(state).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(json: &str) -> Result<RunState, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load_from(conn: &Connection, key: &str) -> Result<Option<RunState>, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT state_json FROM run_states WHERE run_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    json.as_deref().map(decode).transpose()
}

fn upsert(conn: &Connection, key: &str, state: &RunState) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO run_states (run_key, state_json, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(run_key) DO UPDATE SET
             state_json = excluded.state_json,
             status = excluded.status,
             updated_at = excluded.updated_at",
        params![key, encode(state)?, state.status.label(), now],
    )?;
    Ok(())
}

impl RunStateStore for SqliteRunStore {
    fn get_or_create(&self, key: &str) -> Result<RunState, StoreError> {
        let conn = self.lock()?;
        if let Some(state) = load_from(&conn, key)? {
            return Ok(state);
        }
        let state = RunState::default();
        upsert(&conn, key, &state)?;
        tracing::debug!(run_key = key, "Created run state record");
        Ok(state)
    }

    fn save(&self, key: &str, state: &RunState) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert(&conn, key, state)
    }

    fn load(&self, key: &str) -> Result<Option<RunState>, StoreError> {
        let conn = self.lock()?;
        load_from(&conn, key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM run_states WHERE run_key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_key, status, state_json, updated_at
             FROM run_states
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (run_key, status, json, updated_at) = row?;
            summaries.push(RunSummary {
                run_key,
                status,
                question: decode(&json)?.question,
                updated_at,
            });
        }
        Ok(summaries)
    }

    fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "INSERT INTO run_leases (run_key, owner, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(run_key) DO UPDATE SET
                 owner = excluded.owner,
                 expires_at = excluded.expires_at
             WHERE run_leases.owner = excluded.owner
                OR run_leases.expires_at <= ?4",
            params![key, owner, lease_deadline(ttl), Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(changed == 1)
    }

    fn release_lease(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM run_leases WHERE run_key = ?1 AND owner = ?2",
            params![key, owner],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::collaborators::Passage;
    use crate::pipeline::workflow::{Outcome, RunStatus, Step};

    #[test]
    fn get_or_create_persists_idle_record() {
        let store = SqliteRunStore::in_memory().unwrap();
        let state = store.get_or_create("thread-1").unwrap();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(store.load("thread-1").unwrap(), Some(state));
    }

    #[test]
    fn save_overwrites_and_updates_status() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.get_or_create("k").unwrap();

        let mut state = RunState::new("What is token manipulation?").advance(Step::Generate);
        state.documents = vec![Passage::new("evidence").with_metadata("source", "kb")];
        state.confidence_score = Some(0.6667);
        store.save("k", &state).unwrap();

        assert_eq!(store.load("k").unwrap(), Some(state));
        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "pending:generate");
        assert_eq!(runs[0].question, "What is token manipulation?");
    }

    #[test]
    fn delete_removes_only_that_key() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.save("a", &RunState::new("qa")).unwrap();
        store.save("b", &RunState::new("qb")).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(store.load("a").unwrap().is_none());
        assert!(store.load("b").unwrap().is_some());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let finished = RunState::new("q").finish(Outcome::Stopped);
        {
            let store = SqliteRunStore::open(&path).unwrap();
            store.save("thread", &finished).unwrap();
        }
        let reopened = SqliteRunStore::open(&path).unwrap();
        assert_eq!(reopened.load("thread").unwrap(), Some(finished));
    }

    #[test]
    fn lease_held_by_one_owner_at_a_time() {
        let store = SqliteRunStore::in_memory().unwrap();
        let ttl = Duration::from_secs(60);
        assert!(store.try_lease("k", "a", ttl).unwrap());
        assert!(!store.try_lease("k", "b", ttl).unwrap());
        // Renewal by the holder succeeds.
        assert!(store.try_lease("k", "a", ttl).unwrap());

        store.release_lease("k", "b").unwrap();
        assert!(!store.try_lease("k", "b", ttl).unwrap());
        store.release_lease("k", "a").unwrap();
        assert!(store.try_lease("k", "b", ttl).unwrap());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let store = SqliteRunStore::in_memory().unwrap();
        assert!(store.try_lease("k", "crashed", Duration::ZERO).unwrap());
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.try_lease("k", "next", Duration::from_secs(60)).unwrap());
        assert!(!store.try_lease("k", "crashed", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn deleting_run_keeps_lease() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.save("k", &RunState::new("q")).unwrap();
        assert!(store.try_lease("k", "a", Duration::from_secs(60)).unwrap());
        assert!(store.delete("k").unwrap());
        assert!(!store.try_lease("k", "b", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn corrupt_json_is_serialization_error() {
        let conn = db::open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO run_states (run_key, state_json, created_at, updated_at)
             VALUES ('bad', 'not json', 'now', 'now')",
            [],
        )
        .unwrap();
        let store = SqliteRunStore::from_connection(conn);
        assert!(matches!(
            store.load("bad"),
            Err(StoreError::Serialization(_))
        ));
    }
}
