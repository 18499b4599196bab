//! Wire-format definitions for RCMP datagrams.
//!
//! Two packet kinds travel on the wire:
//! - [`DataPacket`] — sender → receiver, one chunk of the file.
//! - [`AckPacket`]  — receiver → sender, confirms one sequence number.
//!
//! Both start with the 4-byte connection id so either kind is
//! self-describing.  No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//! Data packet (13-byte header + 0..=1450 payload bytes)
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Connection Id                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Total File Size                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Ack Request  |                 Payload ...                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! Ack packet (fixed 8 bytes)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Connection Id                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Acknowledged Sequence Number                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload carries no length field: it is whatever follows the header,
//! so decoders must be handed exactly the received datagram.

use thiserror::Error;

/// Largest payload a single data packet may carry.
pub const MAX_PAYLOAD: usize = 1450;

/// Byte length of the data-packet header.
pub const DATA_HEADER_LEN: usize = 13;

/// Largest data packet on the wire.
pub const MAX_DATAGRAM: usize = DATA_HEADER_LEN + MAX_PAYLOAD;

/// Byte length of an ack packet.
pub const ACK_LEN: usize = 8;

// Byte offsets within the data-packet header.
const OFF_CONN_ID: usize = 0;
const OFF_FILE_SIZE: usize = 4;
const OFF_SEQ: usize = 8;
const OFF_ACK_REQUESTED: usize = 12;

// Byte offsets within the ack packet.
const OFF_ACK_CONN_ID: usize = 0;
const OFF_ACK_SEQ: usize = 4;

/// One chunk of the file being transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Session id chosen by the sender at transfer start.
    pub connection_id: u32,
    /// Size of the whole file in bytes, repeated on every packet.
    pub file_size: u32,
    /// Zero-based packet index (not a byte offset).
    pub seq: u32,
    /// The receiver must answer this packet with an [`AckPacket`].
    pub ack_requested: bool,
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut buf = vec![0u8; DATA_HEADER_LEN + self.payload.len()];
        buf[OFF_CONN_ID..OFF_CONN_ID + 4].copy_from_slice(&self.connection_id.to_be_bytes());
        buf[OFF_FILE_SIZE..OFF_FILE_SIZE + 4].copy_from_slice(&self.file_size.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK_REQUESTED] = u8::from(self.ack_requested);
        buf[DATA_HEADER_LEN..].copy_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a [`DataPacket`] from exactly one received datagram.
    ///
    /// The payload length is `buf.len() - DATA_HEADER_LEN`.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`DATA_HEADER_LEN`],
    /// - the payload would exceed [`MAX_PAYLOAD`], or
    /// - the ack-request byte is neither 0 nor 1.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < DATA_HEADER_LEN {
            return Err(PacketError::BufferTooShort {
                expected: DATA_HEADER_LEN,
                actual: buf.len(),
            });
        }
        let payload_len = buf.len() - DATA_HEADER_LEN;
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD,
            });
        }
        let ack_requested = match buf[OFF_ACK_REQUESTED] {
            0 => false,
            1 => true,
            other => return Err(PacketError::InvalidAckFlag(other)),
        };

        Ok(Self {
            connection_id: read_u32(buf, OFF_CONN_ID),
            file_size: read_u32(buf, OFF_FILE_SIZE),
            seq: read_u32(buf, OFF_SEQ),
            ack_requested,
            payload: buf[DATA_HEADER_LEN..].to_vec(),
        })
    }
}

/// Confirmation that the receiver holds one specific sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub connection_id: u32,
    pub seq: u32,
}

impl AckPacket {
    pub fn encode(&self) -> [u8; ACK_LEN] {
        let mut buf = [0u8; ACK_LEN];
        buf[OFF_ACK_CONN_ID..OFF_ACK_CONN_ID + 4]
            .copy_from_slice(&self.connection_id.to_be_bytes());
        buf[OFF_ACK_SEQ..OFF_ACK_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }

    /// Parse an [`AckPacket`]; `buf` must be exactly [`ACK_LEN`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ACK_LEN {
            return Err(PacketError::BufferTooShort {
                expected: ACK_LEN,
                actual: buf.len(),
            });
        }
        if buf.len() != ACK_LEN {
            return Err(PacketError::LengthMismatch {
                expected: ACK_LEN,
                actual: buf.len(),
            });
        }
        Ok(Self {
            connection_id: read_u32(buf, OFF_ACK_CONN_ID),
            seq: read_u32(buf, OFF_ACK_SEQ),
        })
    }
}

/// Errors that can arise when parsing or building a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
    #[error("invalid packet length: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("ack-request byte must be 0 or 1, got {0:#04x}")]
    InvalidAckFlag(u8),
}

/// Big-endian u32 at `off`. Callers check the length first.
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
