//! Session record and listing types.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Per-workflow state, keyed by an opaque session id.
///
/// The store owns the lifecycle fields (timestamps, workspace, disk usage,
/// labels); `metadata` and `stages` are payload for workflow-stage callers
/// and are never validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_path: PathBuf,
    pub created_at: SystemTime,
    pub last_accessed: SystemTime,
    pub expires_at: SystemTime,
    /// Cached size of the workspace subtree, maintained through the
    /// quota-checked update path.
    pub disk_usage_bytes: u64,
    /// Per-session disk cap copied from the store config at creation.
    /// Zero means unlimited.
    pub max_disk_bytes: u64,
    pub labels: BTreeSet<String>,
    /// Opaque key/value bag for stage-specific facts (last image pushed,
    /// analysis results, counters). No schema is enforced.
    pub metadata: HashMap<String, serde_json::Value>,
    pub stages: StageProgress,
}

/// Workflow progress flags recorded by stage callers.
///
/// Opaque payload from the store's perspective; it exists so atomic updates
/// have a typed place to record "image built", "deployed" and the like.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageProgress {
    pub repo_analyzed: bool,
    pub image_built: bool,
    pub image_pushed: bool,
    pub manifests_generated: bool,
    pub deployed: bool,
    pub image_ref: Option<String>,
    pub dockerfile_path: Option<PathBuf>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        workspace_path: PathBuf,
        ttl: Duration,
        max_disk_bytes: u64,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            workspace_path,
            created_at: now,
            last_accessed: now,
            expires_at: now + ttl,
            disk_usage_bytes: 0,
            max_disk_bytes,
            labels: BTreeSet::new(),
            metadata: HashMap::new(),
            stages: StageProgress::default(),
        }
    }

    /// Refresh `last_accessed` and push `expires_at` out by the TTL.
    pub(crate) fn touch(&mut self, ttl: Duration) {
        let now = SystemTime::now();
        self.last_accessed = now;
        self.expires_at = now + ttl;
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }

    pub fn has_exceeded_disk_quota(&self) -> bool {
        self.max_disk_bytes > 0 && self.disk_usage_bytes > self.max_disk_bytes
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Adds a label to the session set. No-op if already present.
    pub fn add_label(&mut self, label: &str) {
        self.labels.insert(label.to_string());
    }

    /// Removes a label from the session set. No-op if absent.
    pub fn remove_label(&mut self, label: &str) {
        self.labels.remove(label);
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_expired() {
            SessionStatus::Expired
        } else if self.has_exceeded_disk_quota() {
            SessionStatus::QuotaExceeded
        } else {
            SessionStatus::Active
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            expires_at: self.expires_at,
            disk_usage_bytes: self.disk_usage_bytes,
            status: self.status(),
            labels: self.labels.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    QuotaExceeded,
}

/// Lightweight view of a session for enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: SystemTime,
    pub last_accessed: SystemTime,
    pub expires_at: SystemTime,
    pub disk_usage_bytes: u64,
    pub status: SessionStatus,
    pub labels: Vec<String>,
}

/// Criteria for `SessionStore::list_sessions`. Default matches everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Sessions must carry all of these labels.
    pub labels: Vec<String>,
    /// Sessions must carry at least one of these labels.
    pub any_label: Vec<String>,
    pub status: Option<SessionStatus>,
    pub created_after: Option<SystemTime>,
    pub created_before: Option<SystemTime>,
}

impl SessionFilter {
    pub(crate) fn matches(&self, session: &Session) -> bool {
        if self.labels.iter().any(|l| !session.has_label(l)) {
            return false;
        }
        if !self.any_label.is_empty() && !self.any_label.iter().any(|l| session.has_label(l)) {
            return false;
        }
        if let Some(status) = self.status {
            if session.status() != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if session.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if session.created_at > before {
                return false;
            }
        }
        true
    }
}
