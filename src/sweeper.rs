//! Background eviction sweeper.
//!
//! A spawned tokio task that runs one eviction pass per interval, off every
//! caller's request path. Directory deletions inside a pass may block, so
//! each pass runs on the blocking thread pool. The task holds only a weak
//! reference to the store: dropping the last strong handle ends the loop
//! without an explicit `stop()`.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::SessionStore;

pub(crate) struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub(crate) fn spawn(store: Weak<SessionStore>, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately;
            // consume it so the first sweep lands one interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || store.sweep()).await
                        {
                            warn!(error = %e, "eviction sweep panicked");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            debug!("eviction sweeper stopped");
        });
        Self { shutdown, task }
    }

    /// Signal the sweep loop and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
