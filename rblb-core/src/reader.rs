//! Frame reader: turns a noisy byte stream into checksum-valid packets, one byte at a time.
//!
//! A frame starts when a byte in the addressed-command range arrives while no frame is in
//! progress. Bytes are accumulated until `header + length + checksum` bytes have been seen,
//! then the frame is evaluated and the reader resets, whatever the result. A gap of at
//! least `timeout_ms` between two bytes discards a partial frame.

use tracing::{debug, trace};

use crate::config::{Config, ConfigError};
use crate::integrity::{Checksum, Crc16};
use crate::protocol::{is_addressed_command, Header, Packet, HEADER_SIZE};
use crate::wire::decode_header;

/// Result of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw data-stream byte outside any frame. Counted, not framed.
    Raw,
    /// Byte accepted into the current frame; frame not complete yet.
    Pending,
    /// Frame complete and checksum valid.
    Packet(Packet),
    /// Frame complete but discarded.
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ChecksumMismatch { expected: u16, received: u16 },
    /// Declared payload length exceeds reader capacity.
    Oversized { declared: u16 },
}

/// Counters for diagnostics. Never surfaced to the packet handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub frames: u64,
    pub checksum_errors: u64,
    pub oversized: u64,
    pub timeouts: u64,
    pub raw_bytes: u64,
}

pub struct FrameReader<C = Crc16> {
    /// Sized once to the largest frame; never grows.
    buf: Vec<u8>,
    /// Bytes seen in the current frame attempt. May run past `buf.len()` for oversized frames.
    cursor: usize,
    last_byte_ms: u32,
    /// Parsed once the header bytes are in.
    header: Option<Header>,
    timeout_ms: u32,
    max_payload: usize,
    checksum: C,
    stats: ReaderStats,
}

impl FrameReader<Crc16> {
    pub fn new() -> Self {
        Self::build(Config::default(), Crc16)
    }

    pub fn with_config(config: Config) -> Result<Self, ConfigError> {
        Self::with_checksum(config, Crc16)
    }
}

impl Default for FrameReader<Crc16> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Checksum> FrameReader<C> {
    pub fn with_checksum(config: Config, checksum: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, checksum))
    }

    fn build(config: Config, checksum: C) -> Self {
        Self {
            buf: vec![0u8; config.frame_capacity()],
            cursor: 0,
            last_byte_ms: 0,
            header: None,
            timeout_ms: config.timeout_ms,
            max_payload: config.max_payload,
            checksum,
            stats: ReaderStats::default(),
        }
    }

    /// Feed one received byte, in arrival order. `now_ms` is a wrapping millisecond clock.
    pub fn handle_byte(&mut self, byte: u8, now_ms: u32) -> ReadOutcome {
        if self.cursor > 0 && now_ms.wrapping_sub(self.last_byte_ms) >= self.timeout_ms {
            debug!(discarded = self.cursor, "inter-byte timeout, discarding partial frame");
            self.stats.timeouts += 1;
            self.reset();
        }

        if self.cursor == 0 {
            if !is_addressed_command(byte) {
                self.stats.raw_bytes += 1;
                return ReadOutcome::Raw;
            }
            // Stale bytes of a longer previous frame must not leak into this one.
            self.buf.fill(0);
        }

        if self.cursor < self.buf.len() {
            self.buf[self.cursor] = byte;
        }
        self.cursor += 1;
        self.last_byte_ms = now_ms;

        if self.cursor == HEADER_SIZE {
            let mut raw = [0u8; HEADER_SIZE];
            raw.copy_from_slice(&self.buf[..HEADER_SIZE]);
            let header = decode_header(&raw);
            if header.length as usize > self.max_payload {
                debug!(declared = header.length, "oversized frame, skipping its declared extent");
            }
            self.header = Some(header);
        }

        match self.header {
            Some(header) if self.cursor >= header.frame_len() => {
                let outcome = self.finish_frame(header);
                self.reset();
                outcome
            }
            _ => ReadOutcome::Pending,
        }
    }

    fn finish_frame(&mut self, header: Header) -> ReadOutcome {
        let len = header.length as usize;
        if len > self.max_payload {
            self.stats.oversized += 1;
            return ReadOutcome::Dropped(DropReason::Oversized {
                declared: header.length,
            });
        }
        let body = HEADER_SIZE + len;
        let received = u16::from_le_bytes([self.buf[body], self.buf[body + 1]]);
        let expected = self.checksum.checksum16(&self.buf[..body]);
        if expected != received {
            debug!(
                command = header.command,
                expected, received, "checksum mismatch, dropping frame"
            );
            self.stats.checksum_errors += 1;
            return ReadOutcome::Dropped(DropReason::ChecksumMismatch { expected, received });
        }
        trace!(command = header.command, address = %header.address, len, "frame complete");
        self.stats.frames += 1;
        ReadOutcome::Packet(Packet {
            header,
            payload: self.buf[HEADER_SIZE..body].to_vec(),
        })
    }

    /// Abandon any partial frame.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.header = None;
    }

    /// Bytes accumulated into the current frame attempt (0 when idle).
    pub fn in_progress(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn checksum(&self) -> &C {
        &self.checksum
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }
}
