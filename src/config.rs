//! Store construction parameters.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration recognized at store construction.
///
/// A limit of zero means unlimited for `max_sessions`,
/// `max_disk_per_session` and `total_disk_limit`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory under which every session gets its own subtree,
    /// named by session id.
    pub workspace_root: PathBuf,
    /// Location of the durable table snapshot. `None` disables persistence;
    /// sessions then live only as long as the process.
    pub store_path: Option<PathBuf>,
    /// Maximum number of live sessions before LRU eviction kicks in.
    pub max_sessions: usize,
    /// Duration after which an untouched session becomes eligible for
    /// eviction. Refreshed on every get/update.
    pub session_ttl: Duration,
    /// Per-session cap on workspace bytes, enforced at update time.
    pub max_disk_per_session: u64,
    /// Aggregate cap across all sessions, enforced by the sweeper.
    pub total_disk_limit: u64,
    /// How often the eviction sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/tmp/workstate"),
            store_path: None,
            max_sessions: 100,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            max_disk_per_session: 1024 * 1024 * 1024,
            total_disk_limit: 0,
            sweep_interval: Duration::from_secs(60),
        }
    }
}
