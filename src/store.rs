//! Session table, atomic update protocol, and the store facade.
//!
//! The table is sharded: a fixed set of shards, each guarding its slice of
//! the id space with its own `RwLock`, so operations on different sessions
//! never contend on a single global lock. Each session sits behind its own
//! `Mutex`, which serializes updates per id and lets eviction wait out an
//! in-flight mutation before removing anything.
//!
//! Lock ordering: a shard lock may be held while acquiring a session lock,
//! and a session lock while acquiring the label-index lock, never the
//! reverse. No disk I/O happens under any of these locks on the
//! get/create/update fast paths. Eviction is the exception: it keeps the
//! shard lock (downgraded to read) through the workspace removal, so a
//! directory is never deleted while its id can be concurrently re-created.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::info;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::labels::LabelIndex;
use crate::persist::SnapshotStore;
use crate::state::{Session, SessionFilter, SessionSummary};
use crate::sweeper::SweeperHandle;
use crate::workspace::WorkspaceAllocator;

const SHARD_COUNT: usize = 16;

type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
struct Shard {
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

/// Concurrent, bounded session store for workflow-stage callers.
///
/// Constructed once with [`SessionStore::open`] and passed by `Arc` to every
/// collaborator; there is no process-wide singleton. Call [`stop`] before
/// process exit to halt the sweeper and flush the durable snapshot.
///
/// [`stop`]: SessionStore::stop
pub struct SessionStore {
    config: StoreConfig,
    shards: Vec<Shard>,
    labels: LabelIndex,
    workspaces: WorkspaceAllocator,
    snapshots: Option<SnapshotStore>,
    live_count: AtomicUsize,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl SessionStore {
    /// Open the store: create the workspace root, load the durable snapshot
    /// (dropping entries whose TTL elapsed while the process was down), and
    /// spawn the eviction sweeper.
    ///
    /// Must be called from within a tokio runtime unless
    /// `config.sweep_interval` is zero, which disables the background
    /// sweeper entirely (sweeps can still be forced with [`sweep`]).
    ///
    /// [`sweep`]: SessionStore::sweep
    pub fn open(config: StoreConfig) -> Result<Arc<Self>, StoreError> {
        let workspaces = WorkspaceAllocator::new(config.workspace_root.clone())?;
        let snapshots = config
            .store_path
            .clone()
            .map(SnapshotStore::new)
            .transpose()?;

        let store = Arc::new(Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::default()).collect(),
            labels: LabelIndex::new(),
            workspaces,
            snapshots,
            live_count: AtomicUsize::new(0),
            sweeper: Mutex::new(None),
            config,
        });

        if let Some(snapshots) = &store.snapshots {
            let (live, expired) = snapshots.load()?;
            for session in expired {
                store.workspaces.remove(&session.workspace_path);
            }
            for session in live {
                store.labels.insert_session(&session.id, &session.labels);
                store
                    .shard(&session.id)
                    .sessions
                    .write()
                    .insert(session.id.clone(), Arc::new(Mutex::new(session)));
                store.live_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !store.config.sweep_interval.is_zero() {
            let handle = SweeperHandle::spawn(Arc::downgrade(&store), store.config.sweep_interval);
            *store.sweeper.lock() = Some(handle);
        }

        Ok(store)
    }

    /// Returns the existing live session for `id`, or atomically creates a
    /// new one with a fresh workspace subtree. An empty or whitespace id
    /// gets a generated one. Concurrent creators of the same new id observe
    /// a single winner.
    pub fn get_or_create_session(&self, id: &str) -> Result<Session, StoreError> {
        let id = if id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };

        if let Some(slot) = self.slot(&id) {
            let mut session = slot.lock();
            if !session.is_expired() {
                session.touch(self.config.session_ttl);
                return Ok(session.clone());
            }
            drop(session);
            // A TTL-expired entry the sweeper has not reached yet must not
            // be resurrected; evict it and start fresh.
            self.evict_if(&id, "expired", |s| s.is_expired());
        }

        let created = Session::new(
            id.clone(),
            self.workspaces.path_for(&id),
            self.config.session_ttl,
            self.config.max_disk_per_session,
        );

        let adopted = loop {
            {
                let shard = self.shard(&id);
                let mut map = shard.sessions.write();
                if let Some(existing) = map.get(&id) {
                    // Lost the creation race; adopt the winner. Checked
                    // before any eviction so racing on an id that already
                    // has a slot never costs another session its slot.
                    break Some(existing.clone());
                }
                let max = self.config.max_sessions;
                if max == 0 || self.session_count() < max {
                    map.insert(id.clone(), Arc::new(Mutex::new(created.clone())));
                    self.live_count.fetch_add(1, Ordering::Relaxed);
                    break None;
                }
            }
            // At capacity and the id has no slot: free one, then retry.
            if !self.evict_lru_one() {
                return Err(StoreError::MaxSessionsExceeded(self.config.max_sessions));
            }
        };

        // The table entry goes in before its directory exists, so the
        // orphan sweep can never observe the directory without an owner.
        // Adopters also ensure the directory: the winner may not have
        // reached its create call yet.
        if let Err(e) = self.workspaces.create(&id) {
            if adopted.is_none() {
                self.evict_if(&id, "workspace unavailable", |_| true);
            }
            return Err(e);
        }

        if let Some(slot) = adopted {
            let mut session = slot.lock();
            session.touch(self.config.session_ttl);
            return Ok(session.clone());
        }

        info!(session_id = %id, "created session");
        Ok(created)
    }

    /// Fetch a session, refreshing `last_accessed` and `expires_at`. A
    /// TTL-expired or evicted id reads as not found.
    pub fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        let mut session = slot.lock();
        if session.is_expired() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        session.touch(self.config.session_ttl);
        Ok(session.clone())
    }

    /// Apply a read-modify-write against one session. `mutate` runs with
    /// exclusive access to the record; updates to the same id are strictly
    /// serialized, updates to different ids proceed in parallel.
    ///
    /// The session lock releases on every exit path, including a panic
    /// inside `mutate`. `mutate` must not perform blocking I/O: it stalls
    /// every other update to the same session for its duration.
    ///
    /// If the mutation records a workspace size past the per-session cap,
    /// the whole update is rejected with `WorkspaceQuotaExceeded` and the
    /// record reverts to its prior state; files the caller already wrote
    /// are the caller's to roll back.
    pub fn update_session(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Session),
    ) -> Result<(), StoreError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        let mut session = slot.lock();
        if session.is_expired() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }

        let before = session.clone();
        mutate(&mut session);

        // Identity and config-owned fields are immutable for the session's
        // lifetime regardless of what the callback did.
        session.id = before.id.clone();
        session.workspace_path = before.workspace_path.clone();
        session.created_at = before.created_at;
        session.max_disk_bytes = before.max_disk_bytes;

        if session.max_disk_bytes > 0 && session.disk_usage_bytes > session.max_disk_bytes {
            let used = session.disk_usage_bytes;
            let limit = session.max_disk_bytes;
            *session = before;
            return Err(StoreError::WorkspaceQuotaExceeded {
                id: id.to_string(),
                used,
                limit,
            });
        }

        self.labels.sync(id, &before.labels, &session.labels);
        session.touch(self.config.session_ttl);
        Ok(())
    }

    /// Explicit removal: table entry, label-index contributions, then the
    /// workspace subtree. Idempotent; removing an absent id does nothing.
    pub fn delete_session(&self, id: &str) {
        self.evict_if(id, "deleted", |_| true);
    }

    /// Adds a label to a session. Whitespace is trimmed; empty labels are
    /// rejected. No-op if the session already carries it.
    pub fn add_label(&self, id: &str, label: &str) -> Result<(), StoreError> {
        let label = normalize_label(label)?;
        self.update_session(id, |s| s.add_label(&label))
    }

    /// Removes a label from a session. No-op if absent.
    pub fn remove_label(&self, id: &str, label: &str) -> Result<(), StoreError> {
        let label = normalize_label(label)?;
        self.update_session(id, |s| s.remove_label(&label))
    }

    /// Replaces a session's full label set. Only the symmetric difference
    /// against the previous set touches the index.
    pub fn set_labels(&self, id: &str, labels: &[String]) -> Result<(), StoreError> {
        let normalized: BTreeSet<String> = labels
            .iter()
            .map(|l| normalize_label(l))
            .collect::<Result<_, _>>()?;
        self.update_session(id, |s| s.labels = normalized)
    }

    /// Every distinct label across all live sessions, sorted.
    pub fn all_labels(&self) -> Vec<String> {
        self.labels.all_labels()
    }

    /// Label usage counts, served from the index cardinalities.
    pub fn label_counts(&self) -> HashMap<String, usize> {
        self.labels.counts()
    }

    /// Ids of the sessions carrying `label`, without a table scan.
    pub fn sessions_with_label(&self, label: &str) -> Vec<String> {
        self.labels.sessions_with(label.trim())
    }

    /// Snapshot enumeration of session summaries. Never blocks concurrent
    /// mutation of individual sessions; the result may be slightly stale.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Vec<SessionSummary> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.sessions.read();
            for slot in map.values() {
                let session = slot.lock();
                if filter.matches(&session) {
                    out.push(session.summary());
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Record a session's workspace size through the quota-checked update
    /// path. Rejected sizes leave `disk_usage_bytes` untouched.
    pub fn set_disk_usage(&self, id: &str, bytes: u64) -> Result<(), StoreError> {
        self.update_session(id, |s| s.disk_usage_bytes = bytes)
    }

    /// Re-scan a session's workspace subtree and record the measured size.
    /// The scan runs outside all locks; only the recording is serialized.
    pub fn refresh_disk_usage(&self, id: &str) -> Result<u64, StoreError> {
        let path = {
            let slot = self
                .slot(id)
                .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
            let session = slot.lock();
            if session.is_expired() {
                return Err(StoreError::SessionNotFound(id.to_string()));
            }
            session.workspace_path.clone()
        };
        let bytes = self.workspaces.scan_usage(&path);
        self.set_disk_usage(id, bytes)?;
        Ok(bytes)
    }

    /// Number of live (unevicted) table entries, including any whose TTL
    /// has lapsed but which the sweeper has not removed yet.
    pub fn session_count(&self) -> usize {
        self.live_count.load(Ordering::Relaxed)
    }

    /// Run one eviction pass immediately: TTL expiry, aggregate-disk LRU
    /// eviction, session-count LRU eviction, orphaned-workspace cleanup,
    /// then a snapshot checkpoint. The background sweeper calls this on its
    /// interval; tests and administrative callers may force it.
    pub fn sweep(&self) {
        let expired: Vec<String> = self
            .collect(|s| if s.is_expired() { Some(s.id.clone()) } else { None })
            .into_iter()
            .flatten()
            .collect();
        for id in expired {
            self.evict_if(&id, "expired", |s| s.is_expired());
        }

        let limit = self.config.total_disk_limit;
        if limit > 0 {
            let mut entries = self.collect(|s| (s.id.clone(), s.last_accessed, s.disk_usage_bytes));
            let mut total: u64 = entries.iter().map(|(_, _, bytes)| bytes).sum();
            if total > limit {
                entries.sort_by_key(|(_, last_accessed, _)| *last_accessed);
                for (id, seen_access, bytes) in entries {
                    if total <= limit {
                        break;
                    }
                    // Skip sessions touched since we picked the victim set.
                    if self.evict_if(&id, "disk pressure", |s| s.last_accessed <= seen_access) {
                        total = total.saturating_sub(bytes);
                    }
                }
            }
        }

        if self.config.max_sessions > 0 {
            while self.session_count() > self.config.max_sessions {
                if !self.evict_lru_one() {
                    break;
                }
            }
        }

        for dir_id in self.workspaces.list_ids() {
            // The shard lock stays held through the removal; a creator of
            // this id cannot insert a slot until the directory is gone, and
            // creators make the slot visible before the directory, so a
            // present slot always wins here.
            let shard = self.shard(&dir_id);
            let map = shard.sessions.read();
            if !map.contains_key(&dir_id) {
                self.workspaces.remove(&self.workspaces.path_for(&dir_id));
            }
        }

        self.checkpoint();
    }

    /// Halt the eviction sweeper and flush the durable snapshot. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.checkpoint();
        info!("session store stopped");
    }

    pub(crate) fn checkpoint(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let sessions = self.collect(|s| s.clone());
        if let Err(e) = snapshots.save(&sessions) {
            tracing::warn!(error = %e, "failed to checkpoint session snapshot");
        }
    }

    fn shard(&self, id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn slot(&self, id: &str) -> Option<SessionSlot> {
        self.shard(id).sessions.read().get(id).cloned()
    }

    /// Remove a session if `check` still holds once its lock is acquired.
    /// Acquiring the session lock under the shard write lock waits out any
    /// in-flight update first; an update that won the race and refreshed
    /// the session makes `check` fail, and the entry survives this pass.
    ///
    /// The shard lock is downgraded, not dropped, for the directory
    /// removal: re-creation of this id stays blocked until the directory
    /// is gone, while reads elsewhere in the shard proceed.
    fn evict_if(&self, id: &str, reason: &str, check: impl FnOnce(&Session) -> bool) -> bool {
        let shard = self.shard(id);
        let mut map = shard.sessions.write();
        let Some(slot) = map.get(id).cloned() else {
            return false;
        };
        let session = slot.lock();
        if !check(&session) {
            return false;
        }
        map.remove(id);
        let labels = session.labels.clone();
        let path = session.workspace_path.clone();
        drop(session);

        let map = RwLockWriteGuard::downgrade(map);
        self.live_count.fetch_sub(1, Ordering::Relaxed);
        self.labels.remove_session(id, &labels);
        self.workspaces.remove(&path);
        drop(map);

        info!(session_id = %id, reason, "evicted session");
        true
    }

    /// Evict the least-recently-accessed session. A candidate touched since
    /// the list was taken, or whose lock is held by an in-flight update, is
    /// in use and gets skipped. Returns false when nothing could be
    /// evicted.
    fn evict_lru_one(&self) -> bool {
        let mut entries = Vec::new();
        for shard in &self.shards {
            let map = shard.sessions.read();
            for slot in map.values() {
                // A held lock is an in-flight update; that session is in
                // use and is no candidate.
                if let Some(session) = slot.try_lock() {
                    entries.push((session.id.clone(), session.last_accessed));
                }
            }
        }
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);
        for (id, seen_access) in entries {
            let shard = self.shard(&id);
            let mut map = shard.sessions.write();
            let Some(slot) = map.get(&id).cloned() else {
                continue;
            };
            let Some(session) = slot.try_lock() else {
                continue;
            };
            if session.last_accessed > seen_access {
                continue;
            }
            map.remove(&id);
            let labels = session.labels.clone();
            let path = session.workspace_path.clone();
            drop(session);

            let map = RwLockWriteGuard::downgrade(map);
            self.live_count.fetch_sub(1, Ordering::Relaxed);
            self.labels.remove_session(&id, &labels);
            self.workspaces.remove(&path);
            drop(map);

            info!(session_id = %id, reason = "lru", "evicted session");
            return true;
        }
        false
    }

    /// Project every live session through `f`, one shard at a time. Session
    /// locks are held only per element, so this never blocks the table
    /// globally.
    fn collect<T>(&self, f: impl Fn(&Session) -> T) -> Vec<T> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.sessions.read();
            for slot in map.values() {
                out.push(f(&slot.lock()));
            }
        }
        out
    }
}

fn normalize_label(label: &str) -> Result<String, StoreError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidLabel);
    }
    Ok(trimmed.to_string())
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.session_count())
            .field("workspace_root", &self.config.workspace_root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_send_and_sync() {
        fn check<T: Send + Sync>() {}
        check::<SessionStore>();
    }

    #[test]
    fn normalize_label_trims_and_rejects_empty() {
        assert_eq!(normalize_label("  prod ").unwrap(), "prod");
        assert!(matches!(normalize_label("   "), Err(StoreError::InvalidLabel)));
    }
}
