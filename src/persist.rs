//! Durable snapshot of the session table.
//!
//! A single JSON file at `StorePath`, rewritten atomically (temp file plus
//! rename) by the sweeper after each pass and once more on `stop()`. On
//! load, entries past their TTL are dropped so a restart never resurrects
//! an expired session.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::StoreError;
use crate::state::Session;

#[derive(Debug)]
pub(crate) struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub(crate) fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::unavailable(parent, e))?;
        }
        Ok(Self { path })
    }

    pub(crate) fn save(&self, sessions: &[Session]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(sessions)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &encoded).map_err(|e| StoreError::unavailable(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::unavailable(&self.path, e))?;
        Ok(())
    }

    /// Load the snapshot, partitioned into live sessions and the ids of
    /// entries that expired while the process was down.
    pub(crate) fn load(&self) -> Result<(Vec<Session>, Vec<Session>), StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), Vec::new()))
            }
            Err(e) => return Err(StoreError::unavailable(&self.path, e)),
        };
        let sessions: Vec<Session> = match serde_json::from_slice(&bytes) {
            Ok(sessions) => sessions,
            Err(e) => {
                // A torn or corrupt snapshot loses persisted sessions but
                // must not brick the store.
                warn!(path = %self.path.display(), error = %e, "discarding unreadable snapshot");
                return Ok((Vec::new(), Vec::new()));
            }
        };
        let (expired, live): (Vec<_>, Vec<_>) =
            sessions.into_iter().partition(|s| s.is_expired());
        info!(
            loaded = live.len(),
            expired = expired.len(),
            "loaded session snapshot"
        );
        Ok((live, expired))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session(id: &str, ttl: Duration) -> Session {
        Session::new(id.into(), format!("/tmp/ws/{id}").into(), ttl, 0)
    }

    #[test]
    fn round_trips_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("sessions.json")).unwrap();

        let mut s = session("s1", Duration::from_secs(60));
        s.add_label("prod");
        store.save(&[s]).unwrap();

        let (live, expired) = store.load().unwrap();
        assert_eq!(live.len(), 1);
        assert!(expired.is_empty());
        assert_eq!(live[0].id, "s1");
        assert!(live[0].has_label("prod"));
    }

    #[test]
    fn expired_entries_are_partitioned_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("sessions.json")).unwrap();

        store
            .save(&[
                session("fresh", Duration::from_secs(60)),
                session("stale", Duration::ZERO),
            ])
            .unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let (live, expired) = store.load().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "fresh");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "stale");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("sessions.json")).unwrap();
        let (live, expired) = store.load().unwrap();
        assert!(live.is_empty());
        assert!(expired.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, b"{not json").unwrap();
        let store = SnapshotStore::new(path).unwrap();
        let (live, expired) = store.load().unwrap();
        assert!(live.is_empty());
        assert!(expired.is_empty());
    }
}
