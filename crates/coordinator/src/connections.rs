use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use taskgrid_common::ConnectionId;

use crate::status::StatusManager;
use crate::tasks::TaskManager;

#[derive(Debug, thiserror::Error)]
#[error("connection {0} is dead")]
pub struct ConnectionDead(pub ConnectionId);

/// Liveness record for one worker. The deadline is renewed by heartbeats;
/// `dead` is a one-way latch set the first time the deadline is observed
/// expired.
#[derive(Debug)]
struct Connection {
    id: ConnectionId,
    timeout: Duration,
    deadline: Instant,
    dead: bool,
}

impl Connection {
    fn new(id: ConnectionId, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            deadline: Instant::now() + timeout,
            dead: false,
        }
    }

    fn renew(&mut self) -> Result<(), ConnectionDead> {
        if self.is_expired() {
            self.dead = true;
            return Err(ConnectionDead(self.id));
        }
        self.deadline = Instant::now() + self.timeout;
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.dead || self.deadline <= Instant::now()
    }
}

/// Tracks live worker connections and evicts the dead ones.
///
/// Eviction notifies the Task Manager (orphaned tasks go back to available)
/// and the Status Manager, in that order. Calls never flow back into this
/// manager from either of them.
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    tasks: Arc<TaskManager>,
    status: Arc<StatusManager>,
    timeout: Duration,
    cleanup_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(
        tasks: Arc<TaskManager>,
        status: Arc<StatusManager>,
        timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connections: RwLock::new(HashMap::new()),
            tasks,
            status,
            timeout,
            cleanup_interval,
            shutdown_tx,
        }
    }

    /// Register a connection on its first JOB request.
    ///
    /// A repeat registration from a live connection just renews it. A repeat
    /// from an expired-but-unswept one replaces the record without touching
    /// the slave count: the old connection is gone, the new one takes its
    /// place.
    pub async fn register(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get_mut(&id) {
            if existing.renew().is_err() {
                *existing = Connection::new(id, self.timeout);
                tracing::debug!(connection_id = %id, "Expired connection re-registered");
            }
            return;
        }
        connections.insert(id, Connection::new(id, self.timeout));
        drop(connections);
        self.status.new_slave_connected().await;
        tracing::info!(connection_id = %id, "New connection registered");
    }

    /// Renew a connection's deadline on heartbeat. Unknown or dead
    /// connections are logged and dropped, never created.
    pub async fn heartbeat(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            None => {
                tracing::warn!(connection_id = %id, "Heartbeat for unknown connection");
                false
            }
            Some(connection) => match connection.renew() {
                Ok(()) => true,
                Err(ConnectionDead(_)) => {
                    tracing::warn!(connection_id = %id, "Heartbeat for dead connection");
                    false
                }
            },
        }
    }

    pub async fn live_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// One pass of the cleanup sweep: latch expired connections dead, remove
    /// them, and re-queue whatever they were working on.
    pub async fn sweep_once(&self) {
        let evicted: Vec<ConnectionId> = {
            let mut connections = self.connections.write().await;
            let dead: Vec<ConnectionId> = connections
                .values_mut()
                .filter_map(|connection| {
                    if connection.is_expired() {
                        connection.dead = true;
                        Some(connection.id)
                    } else {
                        None
                    }
                })
                .collect();
            for id in &dead {
                connections.remove(id);
            }
            dead
        };

        for id in evicted {
            let orphaned = self.tasks.connection_dropped(id).await;
            self.status.slave_disconnected().await;
            metrics::counter!("taskgrid.connections.evicted").increment(1);
            tracing::warn!(
                connection_id = %id,
                orphaned_tasks = orphaned,
                "Connection timed out, evicted"
            );
        }
    }

    /// Run the periodic sweep until `shutdown` is called.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.cleanup_interval);
            // the immediate first tick would sweep an empty map
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.sweep_once().await,
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Connection sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
