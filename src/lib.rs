//! Bounded, concurrent session store for multi-stage containerization
//! workflows.
//!
//! Every workflow stage (analyze, build, push, generate manifests, deploy,
//! health-check) reads and mutates per-workflow state — a session — keyed by
//! an opaque id. This crate holds that state safely under concurrent
//! access, bounds its disk footprint with per-session and aggregate quotas,
//! evicts stale sessions on a TTL, and indexes sessions by label for fast
//! reverse lookup. Sessions persist across restarts via a snapshot at the
//! configured store path.
//!
//! ```no_run
//! use workstate::{SessionStore, StoreConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), workstate::StoreError> {
//! let store = SessionStore::open(StoreConfig::default())?;
//!
//! let session = store.get_or_create_session("workflow-42")?;
//! store.update_session(&session.id, |s| {
//!     s.stages.image_built = true;
//!     s.stages.image_ref = Some("registry.example.com/app:v1".into());
//! })?;
//! store.add_label(&session.id, "prod")?;
//!
//! store.stop().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod labels;
mod persist;
mod state;
mod store;
mod sweeper;
mod workspace;

pub use config::StoreConfig;
pub use error::StoreError;
pub use state::{Session, SessionFilter, SessionStatus, SessionSummary, StageProgress};
pub use store::SessionStore;
