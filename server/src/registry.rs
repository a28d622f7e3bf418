//! Connected-client table and balanced color assignment.

use crate::client::Client;
use crate::zones::ClientId;
use std::collections::HashMap;
use std::sync::Arc;

/// All currently registered clients. Owned by the orchestrator's
/// registration loop; readers go through [`ServerHandle`] snapshots or the
/// move-apply worker which shares the same task group.
///
/// [`ServerHandle`]: crate::server::ServerHandle
pub struct ClientRegistry {
    clients: HashMap<ClientId, Arc<Client>>,
    next_client_id: ClientId,
    white_players: usize,
    black_players: usize,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            clients: HashMap::new(),
            next_client_id: 1,
            white_players: 0,
            black_players: 0,
        }
    }

    pub fn mint_id(&mut self) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    /// New clients join the minority color; ties go to white.
    pub fn next_color(&self) -> bool {
        self.white_players <= self.black_players
    }

    pub fn add(&mut self, client: Arc<Client>) {
        if client.plays_white {
            self.white_players += 1;
        } else {
            self.black_players += 1;
        }
        self.clients.insert(client.id, client);
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Arc<Client>> {
        let client = self.clients.remove(&id)?;
        if client.plays_white {
            self.white_players -= 1;
        } else {
            self.black_players -= 1;
        }
        Some(client)
    }

    pub fn get(&self, id: ClientId) -> Option<&Arc<Client>> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn color_counts(&self) -> (usize, usize) {
        (self.white_players, self.black_players)
    }
}

impl Default for ClientRegistry {
    fn default() -> ClientRegistry {
        ClientRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn client(id: ClientId, plays_white: bool) -> Arc<Client> {
        let (tx, _rx) = mpsc::channel(1);
        // Keep the receiver alive long enough for the test body.
        std::mem::forget(_rx);
        Arc::new(Client::new(id, plays_white, (100, 100), tx))
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let mut registry = ClientRegistry::new();
        let a = registry.mint_id();
        let b = registry.mint_id();
        assert!(b > a);
    }

    #[test]
    fn test_colors_stay_balanced() {
        let mut registry = ClientRegistry::new();
        for _ in 0..10 {
            let color = registry.next_color();
            let id = registry.mint_id();
            registry.add(client(id, color));
        }
        assert_eq!(registry.color_counts(), (5, 5));
    }

    #[test]
    fn test_tie_goes_to_white() {
        let registry = ClientRegistry::new();
        assert!(registry.next_color());
    }

    #[test]
    fn test_remove_rebalances() {
        let mut registry = ClientRegistry::new();
        registry.add(client(1, true));
        registry.add(client(2, false));
        assert!(registry.remove(1).is_some());
        assert_eq!(registry.color_counts(), (0, 1));
        // The next joiner fills the white deficit.
        assert!(registry.next_color());
        // Removing an unknown id is a no-op.
        assert!(registry.remove(99).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_id() {
        let mut registry = ClientRegistry::new();
        registry.add(client(5, true));
        assert!(registry.get(5).is_some());
        assert!(registry.get(6).is_none());
    }
}
