//! Framing: [command:1][address:8 LE][length:2 LE][payload][crc16:2 LE].

use crate::identity::Uid;
use crate::integrity::{self, Checksum};
use crate::protocol::{Header, ADDRESS_SIZE, CHECKSUM_SIZE, HEADER_SIZE};

/// Write `header` into the first `HEADER_SIZE` bytes of `out`.
pub fn encode_header(header: &Header, out: &mut [u8; HEADER_SIZE]) {
    out[0] = header.command;
    out[1..1 + ADDRESS_SIZE].copy_from_slice(&header.address.to_le_bytes());
    out[1 + ADDRESS_SIZE..].copy_from_slice(&header.length.to_le_bytes());
}

/// Parse a header from its raw bytes. Any byte pattern is a structurally valid header.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> Header {
    let mut addr = [0u8; ADDRESS_SIZE];
    addr.copy_from_slice(&bytes[1..1 + ADDRESS_SIZE]);
    Header {
        command: bytes[0],
        address: Uid::from_le_bytes(addr),
        length: u16::from_le_bytes([bytes[1 + ADDRESS_SIZE], bytes[2 + ADDRESS_SIZE]]),
    }
}

/// Total frame size for a payload of `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + CHECKSUM_SIZE
}

/// Build a complete frame into `out`. Returns bytes written.
pub fn encode_packet_into<C: Checksum + ?Sized>(
    checksum: &C,
    command: u8,
    dst: Uid,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, PacketEncodeError> {
    let length: u16 = payload
        .len()
        .try_into()
        .map_err(|_| PacketEncodeError::PayloadTooLarge(payload.len()))?;
    let total = frame_len(payload.len());
    if out.len() < total {
        return Err(PacketEncodeError::BufferTooSmall {
            need: total,
            have: out.len(),
        });
    }
    let header = Header {
        command,
        address: dst,
        length,
    };
    let mut head = [0u8; HEADER_SIZE];
    encode_header(&header, &mut head);
    out[..HEADER_SIZE].copy_from_slice(&head);
    out[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    let body_len = HEADER_SIZE + payload.len();
    let crc = checksum.checksum16(&out[..body_len]);
    out[body_len..total].copy_from_slice(&crc.to_le_bytes());
    Ok(total)
}

/// Build a complete frame in a buffer sized exactly to it.
pub fn encode_packet<C: Checksum + ?Sized>(
    checksum: &C,
    command: u8,
    dst: Uid,
    payload: &[u8],
) -> Result<Vec<u8>, PacketEncodeError> {
    if payload.len() > u16::MAX as usize {
        return Err(PacketEncodeError::PayloadTooLarge(payload.len()));
    }
    let mut out = vec![0u8; frame_len(payload.len())];
    let n = encode_packet_into(checksum, command, dst, payload, &mut out)?;
    debug_assert_eq!(n, out.len());
    Ok(out)
}

/// Error building a frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketEncodeError {
    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLarge(usize),
    #[error("output buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },
}

/// Decode exactly one complete frame. Returns the header and a view of the payload.
/// Unlike the byte-wise reader this does not classify commands; raw-range bytes decode too.
pub fn decode_packet<'a, C: Checksum + ?Sized>(
    checksum: &C,
    bytes: &'a [u8],
) -> Result<(Header, &'a [u8]), PacketDecodeError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(PacketDecodeError::NeedMore);
    }
    let mut head = [0u8; HEADER_SIZE];
    head.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = decode_header(&head);
    let total = header.frame_len();
    if bytes.len() < total {
        return Err(PacketDecodeError::NeedMore);
    }
    if bytes.len() > total {
        return Err(PacketDecodeError::TrailingBytes(bytes.len() - total));
    }
    let body_len = HEADER_SIZE + header.length as usize;
    let trailer = [bytes[body_len], bytes[body_len + 1]];
    if !integrity::verify(checksum, &bytes[..body_len], trailer) {
        return Err(PacketDecodeError::ChecksumMismatch);
    }
    Ok((header, &bytes[HEADER_SIZE..body_len]))
}

/// Error decoding a frame (need more bytes, extra bytes, or checksum failure).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("{0} bytes after end of frame")]
    TrailingBytes(usize),
    #[error("checksum mismatch")]
    ChecksumMismatch,
}
