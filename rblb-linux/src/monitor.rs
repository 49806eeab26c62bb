//! Host-side packet handler: logs every delivered packet and keeps a table of nodes heard from.

use std::collections::HashMap;
use std::time::Instant;

use rblb_core::{Header, PacketHandler, Uid};
use tracing::info;

pub struct NodeState {
    pub packets: u64,
    pub last_seen: Instant,
}

/// Nodes answer the host with their own uid in the address field.
#[derive(Default)]
pub struct NodeTable {
    nodes: HashMap<Uid, NodeState>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uid, &NodeState)> {
        self.nodes.iter()
    }
}

impl PacketHandler for NodeTable {
    fn on_packet(&mut self, header: &Header, payload: &[u8]) {
        info!(
            command = format_args!("{:#04x}", header.command),
            address = %header.address,
            len = header.length,
            payload = %hex::encode(payload),
            "packet"
        );
        if header.address.is_broadcast() || header.address.is_host() {
            return;
        }
        let now = Instant::now();
        let state = self.nodes.entry(header.address).or_insert_with(|| {
            info!(uid = %header.address, "new node on bus");
            NodeState {
                packets: 0,
                last_seen: now,
            }
        });
        state.packets += 1;
        state.last_seen = now;
    }
}
