//! Bus identity: 64-bit unique ids, reserved addresses and the role derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::ADDRESS_SIZE;

/// Unique id of a bus participant, also used as the destination address of a packet.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u64);

impl Uid {
    /// Reserved id of the host. The host has no address inside the node address space.
    pub const HOST: Uid = Uid(0);
    /// Reserved destination meaning "all nodes".
    pub const BROADCAST: Uid = Uid(u64::MAX);

    pub fn to_le_bytes(self) -> [u8; ADDRESS_SIZE] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Uid(u64::from_le_bytes(bytes))
    }

    pub fn is_host(self) -> bool {
        self == Uid::HOST
    }

    pub fn is_broadcast(self) -> bool {
        self == Uid::BROADCAST
    }
}

impl From<u64> for Uid {
    fn from(v: u64) -> Self {
        Uid(v)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Uid::HOST => f.write_str("host"),
            Uid::BROADCAST => f.write_str("broadcast"),
            Uid(v) => write!(f, "{:016x}", v),
        }
    }
}

/// Role of this participant. Fixed at construction from its own uid.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Ordinary bus node: filters by address and handles discovery commands itself.
    Node,
    /// The host: sees every addressed frame.
    Host,
}

impl Role {
    pub fn for_uid(uid: Uid) -> Self {
        if uid.is_host() {
            Role::Host
        } else {
            Role::Node
        }
    }
}
