//! Receive-side state machine with cumulative in-order delivery.
//!
//! [`ReceiverState`] implements the receiver side of RCMP:
//!
//! - Only the packet with `seq == next_expected` is delivered.
//! - Anything older is a **duplicate**: acked again if asked, never re-written.
//! - Anything newer is **discarded** without buffering; the sender's rewind
//!   fills the gap.
//! - The transfer is complete once a packet shorter than a full payload is
//!   delivered and the bytes delivered equal the file size declared by the
//!   most recent packet.  A file that is an exact multiple of the payload
//!   size therefore completes on its zero-length final packet, which is the
//!   one the sender waits on.
//!
//! This module only manages state; all socket and file I/O is the caller's
//! responsibility (see [`crate::transfer::receive_file`]).

use std::net::SocketAddr;

use crate::config::{ReceiverConfig, SessionPolicy};
use crate::packet::DataPacket;

/// What the caller should do with one inbound data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// In order: write the payload.  `complete` is set when this is the
    /// short final packet and the delivered byte count matches the declared
    /// file size.
    Deliver { send_ack: bool, complete: bool },
    /// Already delivered earlier; only re-ack if asked.
    Duplicate { send_ack: bool },
    /// Ahead of a gap; drop it.
    Discard,
    /// Belongs to a different session than the pinned one; drop it.
    Foreign,
}

impl Disposition {
    pub fn send_ack(&self) -> bool {
        matches!(
            self,
            Self::Deliver { send_ack: true, .. } | Self::Duplicate { send_ack: true }
        )
    }
}

/// The session a pinned receiver is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey {
    pub connection_id: u32,
    pub peer: SocketAddr,
}

/// Per-transfer receiver state.
#[derive(Debug)]
pub struct ReceiverState {
    /// Sequence number of the next packet to deliver.  Never decreases.
    pub next_expected: u32,

    /// Payload bytes delivered so far.  Moves in lockstep with `next_expected`.
    pub bytes_written: u64,

    /// File size announced by the most recent packet, if any arrived.
    pub declared_size: Option<u32>,

    /// Session bound by the first packet under [`SessionPolicy::Pinned`].
    pub session: Option<SessionKey>,

    pub packets_accepted: u64,
    pub duplicates: u64,
    pub discarded: u64,
    pub foreign: u64,

    /// Set once the final packet has been delivered.
    complete: bool,
    max_payload: usize,
    policy: SessionPolicy,
}

impl ReceiverState {
    pub fn new(config: &ReceiverConfig) -> Self {
        Self {
            next_expected: 0,
            bytes_written: 0,
            declared_size: None,
            session: None,
            packets_accepted: 0,
            duplicates: 0,
            discarded: 0,
            foreign: 0,
            complete: false,
            max_payload: config.max_payload,
            policy: config.session_policy,
        }
    }

    /// Process one inbound packet from `from`.
    ///
    /// On [`Disposition::Deliver`] the counters already account for the
    /// payload; the caller must write it before reading the next datagram.
    pub fn on_packet(&mut self, pkt: &DataPacket, from: SocketAddr) -> Disposition {
        if !self.admits(pkt, from) {
            self.foreign += 1;
            return Disposition::Foreign;
        }

        self.declared_size = Some(pkt.file_size);

        if pkt.seq > self.next_expected {
            self.discarded += 1;
            return Disposition::Discard;
        }
        if pkt.seq < self.next_expected {
            self.duplicates += 1;
            return Disposition::Duplicate {
                send_ack: pkt.ack_requested,
            };
        }

        self.next_expected = self.next_expected.wrapping_add(1);
        self.bytes_written += pkt.payload.len() as u64;
        self.packets_accepted += 1;
        self.complete = pkt.payload.len() < self.max_payload
            && self.bytes_written == u64::from(pkt.file_size);
        Disposition::Deliver {
            send_ack: pkt.ack_requested,
            complete: self.complete,
        }
    }

    /// `true` once the final packet of the file has been delivered.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn admits(&mut self, pkt: &DataPacket, from: SocketAddr) -> bool {
        if self.policy == SessionPolicy::Permissive {
            return true;
        }
        let key = SessionKey {
            connection_id: pkt.connection_id,
            peer: from,
        };
        match self.session {
            Some(pinned) => pinned == key,
            None => {
                self.session = Some(key);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
