//! RBLB wire protocol: command values, header layout, sizes and timing.

use serde::{Deserialize, Serialize};

use crate::identity::Uid;

/// Current protocol version. Exported through the C ABI.
pub const PROTOCOL_VERSION: u8 = 1;

/// Width of the address field. Must match across all bus participants.
pub const ADDRESS_SIZE: usize = 8;
/// command(1) + address(8) + length(2)
pub const HEADER_SIZE: usize = 1 + ADDRESS_SIZE + 2;
pub const CHECKSUM_SIZE: usize = 2;

/// Default payload capacity of a reader (and largest payload a sender will emit).
pub const DEFAULT_MAX_PAYLOAD: usize = 256;

/// Silence on the line for this long discards a partially received frame.
pub const PACKET_TIMEOUT_MS: u32 = 5;

/// First value of the addressed-command range. Lower command bytes are raw stream data.
pub const DISCOVERY_INIT: u8 = 0x80;
pub const DISCOVERY_BURST: u8 = 0x81;
pub const DISCOVERY_SILENCE: u8 = 0x82;

/// True if a byte seen at frame start opens an addressed frame.
pub fn is_addressed_command(byte: u8) -> bool {
    byte >= DISCOVERY_INIT
}

/// Command byte, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// A new discovery round begins; nodes must re-announce.
    DiscoveryInit,
    /// Nodes reply in their timeslot.
    DiscoveryBurst,
    /// Discovery round is over; addressed nodes are confirmed present.
    DiscoverySilence,
    /// Application command in the addressed range, above the discovery commands.
    App(u8),
    /// Raw data-stream value. Never carried in an addressed frame.
    Raw(u8),
}

impl Command {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            DISCOVERY_INIT => Command::DiscoveryInit,
            DISCOVERY_BURST => Command::DiscoveryBurst,
            DISCOVERY_SILENCE => Command::DiscoverySilence,
            b if is_addressed_command(b) => Command::App(b),
            b => Command::Raw(b),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::DiscoveryInit => DISCOVERY_INIT,
            Command::DiscoveryBurst => DISCOVERY_BURST,
            Command::DiscoverySilence => DISCOVERY_SILENCE,
            Command::App(b) | Command::Raw(b) => b,
        }
    }

    pub fn is_discovery(self) -> bool {
        matches!(
            self,
            Command::DiscoveryInit | Command::DiscoveryBurst | Command::DiscoverySilence
        )
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c.as_byte()
    }
}

/// Fixed-size packet header, transmitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub command: u8,
    /// Destination (or, for replies to the host, the sender's own uid).
    pub address: Uid,
    /// Payload byte count following the header.
    pub length: u16,
}

impl Header {
    pub fn kind(&self) -> Command {
        Command::from_byte(self.command)
    }

    /// Header + payload + checksum.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize + CHECKSUM_SIZE
    }
}

/// A checksum-valid frame: parsed header plus an owned copy of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}
