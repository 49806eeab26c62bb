//! Core tunables shared by the reader and the sender.

use serde::Deserialize;

use crate::protocol::{CHECKSUM_SIZE, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, PACKET_TIMEOUT_MS};

/// Bus core configuration. Embedded as the `[bus]` table of the daemon config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Inter-byte silence (ms) after which a partial frame is discarded.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    /// Largest payload accepted or sent.
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

fn default_timeout_ms() -> u32 {
    PACKET_TIMEOUT_MS
}
fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_payload: default_max_payload(),
        }
    }
}

impl Config {
    /// Receive buffer size: the largest frame this configuration can hold.
    pub fn frame_capacity(&self) -> usize {
        HEADER_SIZE + self.max_payload + CHECKSUM_SIZE
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_payload > u16::MAX as usize {
            return Err(ConfigError::MaxPayloadTooLarge(self.max_payload));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("timeout_ms must be non-zero")]
    ZeroTimeout,
    #[error("max_payload {0} does not fit the 16-bit length field")]
    MaxPayloadTooLarge(usize),
}
