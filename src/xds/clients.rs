//! Reference-counted registry of connected proxy instances.

use crate::ir::UniquelyConnectedClient;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

#[derive(Debug)]
struct ClientEntry {
    client: UniquelyConnectedClient,
    streams: usize,
}

/// Several streams of the same proxy identity share one client entry. The
/// first stream adds the client, the last close removes it.
#[derive(Debug, Default)]
pub struct ConnectedClients {
    clients: DashMap<String, ClientEntry>,
}

impl ConnectedClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new stream. Returns true when `client` was not connected before.
    pub fn connect(&self, client: UniquelyConnectedClient) -> bool {
        let key = client.resource_name().to_string();
        match self.clients.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().streams += 1;
                debug!(client = %occupied.key(), streams = occupied.get().streams, "Additional stream");
                false
            }
            Entry::Vacant(vacant) => {
                info!(client = %vacant.key(), "Client connected");
                vacant.insert(ClientEntry { client, streams: 1 });
                true
            }
        }
    }

    /// Release one stream. Returns the client when it was the last one.
    pub fn disconnect(&self, client_key: &str) -> Option<UniquelyConnectedClient> {
        let remaining = {
            let mut entry = self.clients.get_mut(client_key)?;
            entry.streams = entry.streams.saturating_sub(1);
            entry.streams
        };
        if remaining > 0 {
            debug!(client = %client_key, streams = remaining, "Stream closed");
            return None;
        }
        let (_, entry) = self.clients.remove_if(client_key, |_, e| e.streams == 0)?;
        info!(client = %client_key, "Client disconnected");
        Some(entry.client)
    }

    pub fn get(&self, client_key: &str) -> Option<UniquelyConnectedClient> {
        self.clients.get(client_key).map(|e| e.client.clone())
    }

    /// Connected clients in key order.
    pub fn list(&self) -> Vec<UniquelyConnectedClient> {
        let mut clients: Vec<UniquelyConnectedClient> =
            self.clients.iter().map(|e| e.client.clone()).collect();
        clients.sort_by(|a, b| a.resource_name().cmp(b.resource_name()));
        clients
    }

    pub fn streams(&self, client_key: &str) -> usize {
        self.clients.get(client_key).map(|e| e.streams).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
