use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use taskgrid_common::config::WorkerConfig;

/// Handle on the spawned heartbeat loop.
pub struct HeartbeatHandle {
    dead_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// True once the heartbeat has given up on the coordinator.
    pub fn is_dead(&self) -> bool {
        *self.dead_rx.borrow()
    }

    /// A receiver the task cycle can watch for heartbeat death.
    pub fn dead_signal(&self) -> watch::Receiver<bool> {
        self.dead_rx.clone()
    }

    /// Stop beating. Used on JOB_END and on cancellation.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Spawn the heartbeat loop: one GET per interval with a short timeout.
/// After `heartbeat_retry_attempts` consecutive failures the loop declares
/// the coordinator unreachable and flips the dead signal.
pub fn spawn(client: reqwest::Client, url: String, config: &WorkerConfig) -> HeartbeatHandle {
    let (dead_tx, dead_rx) = watch::channel(false);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let interval = Duration::from_secs_f64(config.heartbeat_interval_secs);
    let timeout = Duration::from_secs_f64(config.heartbeat_timeout_secs);
    let retry_attempts = config.heartbeat_retry_attempts;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut fails = 0u32;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    tracing::debug!("Heartbeat stopped");
                    return;
                }
            }

            match client.get(&url).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => {
                    fails = 0;
                    tracing::trace!("Heartbeat sent");
                }
                Ok(resp) => {
                    fails += 1;
                    tracing::warn!(status = %resp.status(), fails, "Unhealthy heartbeat response");
                }
                Err(e) => {
                    fails += 1;
                    tracing::warn!(error = %e, fails, "Coordinator cannot be reached");
                }
            }

            if fails >= retry_attempts {
                tracing::error!(fails, "Heartbeat giving up on coordinator");
                let _ = dead_tx.send(true);
                return;
            }
        }
    });

    HeartbeatHandle {
        dead_rx,
        shutdown_tx,
        handle,
    }
}
