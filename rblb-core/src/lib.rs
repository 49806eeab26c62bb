//! RBLB bus protocol core: framing, checksum validation, discovery and dispatch for a
//! multi-drop addressed bus shared by one host and several nodes.
//! Host-driven: no I/O; host injects transport, clock and packet handler and feeds bytes.

pub mod config;
pub mod core;
pub mod ffi;
pub mod identity;
pub mod integrity;
pub mod protocol;
pub mod reader;
pub mod router;
pub mod wire;

pub use crate::config::{Config, ConfigError};
pub use crate::core::{
    BusCore, BusEvent, Clock, MonotonicClock, PacketHandler, SendError, Transport,
};
pub use identity::{Role, Uid};
pub use integrity::{Checksum, Crc16};
pub use protocol::{Command, Header, Packet, PROTOCOL_VERSION};
pub use reader::{DropReason, FrameReader, ReadOutcome, ReaderStats};
pub use router::{BurstScheduler, DiscoveryEvent, NoBurstReply, Route, Router};
pub use wire::{decode_packet, encode_packet, PacketDecodeError, PacketEncodeError};
