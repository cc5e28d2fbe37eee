use storage::StorageChange;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::event::{Flow, HostEvent};
use crate::keeper::TabKeeper;

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Next storage change from the gateway. Pends forever once the gateway
/// has gone away.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
) -> StorageChange {
    loop {
        let Some(receiver) = changes.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(change) => return change,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "storage change notifications lagged");
            }
            Err(RecvError::Closed) => {
                debug!("storage change stream closed");
                *changes = None;
            }
        }
    }
}

impl TabKeeper {
    /// Drives the engine until the host sends [`HostEvent::Shutdown`] or drops
    /// its sender, then captures a final snapshot.
    ///
    /// Events, gateway change notifications, idle timers and the periodic
    /// snapshot and sync ticks are all handled on this one task, so handlers
    /// never interleave.
    pub async fn run(mut self, mut events: mpsc::Receiver<HostEvent>) {
        let mut changes = Some(self.gateway.subscribe());
        let start = Instant::now();
        let mut snapshots = time::interval_at(
            start + self.config.snapshot_interval(),
            self.config.snapshot_interval(),
        );
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut syncs = time::interval_at(
            start + self.config.sync_interval(),
            self.config.sync_interval(),
        );
        syncs.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("tab keeper running");
        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("host event channel closed");
                        break;
                    };
                    if self.handle_event(event).await == Flow::Shutdown {
                        break;
                    }
                }
                change = next_change(&mut changes) => {
                    self.handle_event(HostEvent::StorageChanged(change)).await;
                }
                _ = sleep_until_deadline(deadline) => {
                    self.fire_due_timers(Instant::now()).await;
                }
                _ = snapshots.tick() => {
                    self.capture_session().await;
                }
                _ = syncs.tick() => {
                    self.sync_cycle().await;
                }
            }
        }
        self.teardown().await;
    }
}
