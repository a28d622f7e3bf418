//! Zone interest map: which clients see which 50x50 tile of the world.
//!
//! A single worker task owns both directions of the mapping and serializes
//! every mutation and query, so lookups always reflect the state at the
//! moment the command was dequeued. Clients register the 3x3 block of
//! zones around their viewport center; a move touches at most two zones,
//! so fan-out unions at most two client sets.

use log::error;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use shared::{ZONE_COUNT, ZONE_SIZE};

/// Server-assigned connection identity.
pub type ClientId = u64;

/// Zone coordinate of a world position, clamped into the grid.
pub fn zone_of(x: u16, y: u16) -> (u8, u8) {
    let zx = ((x / ZONE_SIZE) as usize).min(ZONE_COUNT - 1);
    let zy = ((y / ZONE_SIZE) as usize).min(ZONE_COUNT - 1);
    (zx as u8, zy as u8)
}

/// The 3x3 block of zones around a position, deduplicated at the world
/// edges (at most nine entries).
pub fn zone_block(x: u16, y: u16) -> Vec<(u8, u8)> {
    let (zx, zy) = zone_of(x, y);
    let mut block = Vec::with_capacity(9);
    for dy in -1i16..=1 {
        for dx in -1i16..=1 {
            let bx = zx as i16 + dx;
            let by = zy as i16 + dy;
            if bx < 0 || by < 0 || bx >= ZONE_COUNT as i16 || by >= ZONE_COUNT as i16 {
                continue;
            }
            block.push((bx as u8, by as u8));
        }
    }
    block
}

/// The zones affected by a mutation spanning two positions: one or two
/// entries.
pub fn zones_for_span(a: (u16, u16), b: (u16, u16)) -> Vec<(u8, u8)> {
    let za = zone_of(a.0, a.1);
    let zb = zone_of(b.0, b.1);
    if za == zb {
        vec![za]
    } else {
        vec![za, zb]
    }
}

/// Commands accepted by the zone worker.
#[derive(Debug)]
pub enum ZoneCommand {
    /// Replace the client's zone set with the 3x3 block around a position.
    Update { client: ClientId, x: u16, y: u16 },
    /// Drop the client from all of its zones.
    Remove { client: ClientId },
    /// Union of the clients subscribed to any of the given zones.
    Query {
        zones: Vec<(u8, u8)>,
        reply: oneshot::Sender<Vec<ClientId>>,
    },
}

/// Dense zone grid plus the reverse map. Owned by the worker; tests drive
/// it directly.
pub struct ZoneMap {
    clients_by_zone: Vec<HashSet<ClientId>>,
    zones_by_client: HashMap<ClientId, Vec<(u8, u8)>>,
}

impl ZoneMap {
    pub fn new() -> ZoneMap {
        ZoneMap {
            clients_by_zone: (0..ZONE_COUNT * ZONE_COUNT).map(|_| HashSet::new()).collect(),
            zones_by_client: HashMap::new(),
        }
    }

    fn slot(zone: (u8, u8)) -> usize {
        zone.1 as usize * ZONE_COUNT + zone.0 as usize
    }

    pub fn update(&mut self, client: ClientId, x: u16, y: u16) {
        self.remove(client);
        let block = zone_block(x, y);
        for &zone in &block {
            self.clients_by_zone[Self::slot(zone)].insert(client);
        }
        self.zones_by_client.insert(client, block);
    }

    pub fn remove(&mut self, client: ClientId) {
        if let Some(zones) = self.zones_by_client.remove(&client) {
            for zone in zones {
                self.clients_by_zone[Self::slot(zone)].remove(&client);
            }
        }
    }

    /// Deduplicated union of the client sets for the given zones.
    pub fn query(&self, zones: &[(u8, u8)]) -> Vec<ClientId> {
        let mut union = HashSet::new();
        for &zone in zones {
            union.extend(self.clients_by_zone[Self::slot(zone)].iter().copied());
        }
        union.into_iter().collect()
    }

    pub fn zone_count_of(&self, client: ClientId) -> usize {
        self.zones_by_client.get(&client).map_or(0, Vec::len)
    }
}

impl Default for ZoneMap {
    fn default() -> ZoneMap {
        ZoneMap::new()
    }
}

/// Spawns the worker that owns the zone map.
pub fn spawn(mut commands: mpsc::UnboundedReceiver<ZoneCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut map = ZoneMap::new();
        while let Some(command) = commands.recv().await {
            match command {
                ZoneCommand::Update { client, x, y } => map.update(client, x, y),
                ZoneCommand::Remove { client } => map.remove(client),
                ZoneCommand::Query { zones, reply } => {
                    if reply.send(map.query(&zones)).is_err() {
                        error!("zone query reply receiver dropped");
                    }
                }
            }
        }
    })
}
