//! Connection hub: tracks client sockets and fans out broadcasts.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use log::{debug, info};
use tokio::sync::mpsc;

use voxbridge_protocol::client::ServerEvent;

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// A sender for events to a specific client.
pub type WsSender = mpsc::Sender<ServerEvent>;

/// Registry of live client connections.
///
/// Broadcasts fan an event out to every member, skipping and pruning
/// connections that are no longer writable. There is no per-connection
/// state beyond the sender: a client joining mid-turn receives history only
/// by asking for it.
#[derive(Default)]
pub struct WsHub {
    connections: DashMap<usize, WsSender>,
    next_id: AtomicUsize,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns its event receiver and id.
    pub fn register(&self) -> (mpsc::Receiver<ServerEvent>, usize) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, tx);
        info!("registered client connection {id}");
        (rx, id)
    }

    pub fn unregister(&self, id: usize) {
        if self.connections.remove(&id).is_some() {
            info!("unregistered client connection {id}");
        }
    }

    /// Send to one client. A failed send means the client is gone; the
    /// entry is pruned.
    pub async fn send_to(&self, id: usize, event: ServerEvent) {
        let Some(tx) = self.connections.get(&id).map(|entry| entry.value().clone()) else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!("pruning dead client connection {id}");
            self.connections.remove(&id);
        }
    }

    /// Fan one event out to every connection.
    pub async fn broadcast(&self, event: ServerEvent) {
        // Snapshot the senders first: sending can await, and pruning while
        // iterating the map would deadlock.
        let targets: Vec<(usize, WsSender)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                debug!("pruning dead client connection {id}");
                self.connections.remove(&id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
