//! Background task that keeps the local session and the remote copy in step.
//!
//! Runs as a `tokio::spawn`ed task. Each tick performs a full reconcile, so
//! changes made by another replica are picked up even when nothing changed
//! locally. Failures are logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::manager::SessionManager;
use super::reconcile::SyncAction;

/// Start the periodic sync task.
///
/// The task stops when `shutdown` flips to `true` (or its sender is
/// dropped) and runs a final sync-if-dirty before returning.
pub fn start_sync_scheduler(
    manager: Arc<SessionManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; init() has just synced.
        ticker.tick().await;

        log::info!("Session sync scheduler started (interval: {}s)", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => run_sync_cycle(&manager).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match manager.sync_if_dirty().await {
            Ok(Some(outcome)) => log::info!("Final session sync: {}", outcome.action),
            Ok(None) => log::debug!("Session clean at shutdown, nothing to sync"),
            Err(e) => log::error!("Final session sync failed: {}", e),
        }
        log::info!("Session sync scheduler stopped");
    })
}

async fn run_sync_cycle(manager: &SessionManager) {
    match manager.sync().await {
        Ok(outcome) => match outcome.action {
            SyncAction::Push | SyncAction::Pull => {
                log::info!("Periodic session sync: {} (rev {:?})", outcome.action, outcome.rev)
            }
            SyncAction::InSync | SyncAction::Nothing => log::debug!("Periodic session sync: {}", outcome.action),
        },
        Err(e) => log::warn!("Periodic session sync failed: {}", e),
    }
}
