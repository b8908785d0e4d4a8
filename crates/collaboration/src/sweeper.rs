//! Periodic eviction of connections whose transport has gone away.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::SyncEngine;

/// Shortest period the sweeper will tick at; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to the running sweeper task. Stop it with [`LivenessSweeper::shutdown`];
/// dropping the handle aborts the task.
pub struct LivenessSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LivenessSweeper {
    /// Start sweeping on the engine's configured interval. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        let period = engine.config().sweep_interval;
        Self::spawn_with_interval(engine, period)
    }

    pub fn spawn_with_interval(engine: Arc<SyncEngine>, period: Duration) -> Self {
        let period = if period < MIN_SWEEP_INTERVAL {
            warn!("Sweep interval {:?} too short, using {:?}", period, MIN_SWEEP_INTERVAL);
            MIN_SWEEP_INTERVAL
        } else {
            period
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = engine.sweep();
                        if removed > 0 {
                            info!("Liveness sweep removed {} connections", removed);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Liveness sweeper stopped");
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LivenessSweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
