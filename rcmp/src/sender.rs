//! Send-side state machine with an adaptive acknowledgement gap.
//!
//! [`SenderState`] decides, packet by packet, whether the receiver must
//! acknowledge, and how to recover when an acknowledgement does not arrive.
//! It does **not** touch the socket or the file; [`crate::transfer::send_file`]
//! owns the loop and calls into it.
//!
//! # Ack schedule
//!
//! The number of packets allowed between forced acks (the *gap*) grows by one
//! after every clean ack round and collapses to zero on any timeout:
//!
//! ```text
//!  gap=0   A                      ack every packet
//!  gap=1   A A                    (first ack bumps gap to 1)
//!  gap=2   A . A
//!  gap=3   A . . A
//!          ─── timeout ───▶ rewind to last acked, gap=0
//! ```
//!
//! A chunk shorter than `max_payload` marks end of file and is always acked.
//!
//! Once the final packet has gone unanswered, `final_ack_attempts`
//! consecutive timeouts end the transfer with an unknown outcome, even when
//! the rewind lands on an earlier packet.  The receiver may already hold the
//! whole file and have stopped listening.
//!
//! # Rewind arithmetic
//!
//! On timeout the read cursor goes back to `(last_acked + 1) * max_payload`.
//! This relies on every non-final packet carrying exactly `max_payload`
//! bytes, which holds because the same `max_payload` frames the chunks.

use crate::config::SenderConfig;
use crate::packet::DataPacket;

/// What the caller should do after an ack arrived for the current packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckProgress {
    /// Keep sending.
    Continue,
    /// The final packet is confirmed; the whole file has been delivered.
    Complete,
}

/// What the caller should do after an ack wait timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Seek the source to `offset` and resume sending at `seq`.
    Rewind { seq: u32, offset: u64 },
    /// Too many consecutive timeouts since the final packet went
    /// unanswered.
    GiveUp,
}

/// Per-transfer sender state.  Lives for one transfer only.
#[derive(Debug)]
pub struct SenderState {
    /// Session id stamped on every outgoing packet.
    pub connection_id: u32,

    /// Sequence number of the packet currently being sent.
    pub seq: u32,

    /// Consecutive ack rounds that completed without a timeout.
    pub gap_counter: u32,

    /// Packets sent since the last forced ack.
    pub non_acked: u32,

    /// Highest sequence number confirmed by an ack, `None` before the first.
    pub last_acked: Option<u32>,

    /// Whether the current packet asks the receiver for an ack.
    pub ack_requested: bool,

    /// Consecutive ack timeouts; reset by any ack.
    pub terminal_timeouts: u32,

    /// The final packet's ack wait expired and no ack arrived since.
    pub final_unanswered: bool,

    /// Byte offset in the source where the next chunk is read.
    pub cursor: u64,

    /// Total datagrams handed to the socket, retransmissions included.
    pub packets_sent: u64,

    /// Ack waits that timed out over the whole transfer.
    pub timeouts: u64,

    /// Payload length of the current packet.
    chunk_len: usize,
    max_payload: usize,
    final_ack_attempts: u32,
}

impl SenderState {
    /// Fresh state for a transfer identified by `connection_id`.
    ///
    /// The very first packet always requests an ack.
    pub fn new(connection_id: u32, config: &SenderConfig) -> Self {
        Self {
            connection_id,
            seq: 0,
            gap_counter: 0,
            non_acked: 0,
            last_acked: None,
            ack_requested: true,
            terminal_timeouts: 0,
            final_unanswered: false,
            cursor: 0,
            packets_sent: 0,
            timeouts: 0,
            chunk_len: 0,
            max_payload: config.max_payload,
            final_ack_attempts: config.final_ack_attempts,
        }
    }

    /// Register that `len` bytes were read for the current packet.
    ///
    /// A short chunk is the last one and forces an ack request regardless of
    /// the schedule.
    pub fn begin_packet(&mut self, len: usize) {
        debug_assert!(len <= self.max_payload);
        self.chunk_len = len;
        self.cursor += len as u64;
        if self.is_final() {
            self.ack_requested = true;
        }
    }

    /// `true` when the current chunk is shorter than a full payload.
    pub fn is_final(&self) -> bool {
        self.chunk_len < self.max_payload
    }

    /// Wrap `payload` into the packet for the current sequence number.
    ///
    /// Call [`begin_packet`](Self::begin_packet) with `payload.len()` first.
    pub fn build_packet(&mut self, file_size: u32, payload: Vec<u8>) -> DataPacket {
        debug_assert_eq!(payload.len(), self.chunk_len);
        self.packets_sent += 1;
        DataPacket {
            connection_id: self.connection_id,
            file_size,
            seq: self.seq,
            ack_requested: self.ack_requested,
            payload,
        }
    }

    /// The receiver acknowledged the current packet.
    pub fn on_ack(&mut self) -> AckProgress {
        self.terminal_timeouts = 0;
        self.final_unanswered = false;
        self.gap_counter += 1;
        self.non_acked = 0;
        self.ack_requested = false;
        self.last_acked = Some(self.seq);
        if self.is_final() {
            AckProgress::Complete
        } else {
            AckProgress::Continue
        }
    }

    /// The current packet was sent without requesting an ack.
    pub fn on_unacked_send(&mut self) {
        self.non_acked += 1;
    }

    /// The ack wait for the current packet expired.
    ///
    /// Unless `final_ack_attempts` waits in a row have now expired with the
    /// final packet unanswered, the gap collapses to zero and the caller must
    /// rewind to the packet after the last acknowledged one.  The returned
    /// sequence number is already current; do not call
    /// [`advance`](Self::advance).
    pub fn on_timeout(&mut self) -> TimeoutAction {
        self.terminal_timeouts += 1;
        self.timeouts += 1;
        if self.is_final() {
            self.final_unanswered = true;
        }
        if self.final_unanswered && self.terminal_timeouts >= self.final_ack_attempts {
            return TimeoutAction::GiveUp;
        }

        self.gap_counter = 0;
        self.non_acked = 0;
        self.ack_requested = true;
        self.seq = self.last_acked.map_or(0, |s| s.wrapping_add(1));
        self.cursor = u64::from(self.seq) * self.max_payload as u64;
        TimeoutAction::Rewind {
            seq: self.seq,
            offset: self.cursor,
        }
    }

    /// Move on to the next sequence number, scheduling an ack once the run of
    /// unacknowledged packets reaches `gap_counter - 1`.
    pub fn advance(&mut self) {
        if self.gap_counter > 0 && self.non_acked == self.gap_counter - 1 {
            self.ack_requested = true;
        }
        self.seq = self.seq.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1450;

    fn fresh() -> SenderState {
        SenderState::new(0xABCD, &SenderConfig::default())
    }

    /// Send one full chunk and answer it the way a lossless receiver would.
    /// Returns whether the packet requested an ack.
    fn lossless_round(s: &mut SenderState, len: usize) -> bool {
        s.begin_packet(len);
        let requested = s.ack_requested;
        if requested {
            s.on_ack();
        } else {
            s.on_unacked_send();
        }
        s.advance();
        requested
    }

    #[test]
    fn initial_state() {
        let s = fresh();
        assert_eq!(s.seq, 0);
        assert_eq!(s.gap_counter, 0);
        assert_eq!(s.non_acked, 0);
        assert_eq!(s.last_acked, None);
        assert_eq!(s.terminal_timeouts, 0);
        assert!(s.ack_requested);
    }

    #[test]
    fn ack_schedule_gap_grows_linearly() {
        let mut s = fresh();
        let pattern: Vec<bool> = (0..10).map(|_| lossless_round(&mut s, MAX)).collect();
        // A A . A . . A . . .
        assert_eq!(
            pattern,
            vec![true, true, false, true, false, false, true, false, false, false]
        );
        assert_eq!(s.gap_counter, 4);
    }

    #[test]
    fn gap_counter_increments_by_one_per_ack() {
        let mut s = fresh();
        for expected in 1..=5 {
            while !s.ack_requested {
                s.begin_packet(MAX);
                s.on_unacked_send();
                s.advance();
            }
            s.begin_packet(MAX);
            s.on_ack();
            assert_eq!(s.gap_counter, expected);
            s.advance();
        }
    }

    #[test]
    fn short_chunk_forces_ack_even_off_schedule() {
        let mut s = fresh();
        lossless_round(&mut s, MAX); // gap=1
        lossless_round(&mut s, MAX); // gap=2, next packet off schedule
        assert!(!s.ack_requested);

        s.begin_packet(100);
        assert!(s.is_final());
        assert!(s.ack_requested);
        assert_eq!(s.on_ack(), AckProgress::Complete);
    }

    #[test]
    fn three_thousand_byte_file_frames_as_two_full_and_one_short() {
        let mut s = fresh();
        let mut lens = Vec::new();
        let mut remaining = 3000usize;
        loop {
            let n = remaining.min(MAX);
            remaining -= n;
            s.begin_packet(n);
            let pkt = s.build_packet(3000, vec![0u8; n]);
            lens.push((pkt.seq, pkt.payload.len()));
            if pkt.ack_requested && s.on_ack() == AckProgress::Complete {
                break;
            }
            if !pkt.ack_requested {
                s.on_unacked_send();
            }
            s.advance();
        }
        assert_eq!(lens, vec![(0, 1450), (1, 1450), (2, 100)]);
        assert_eq!(s.cursor, 3000);
    }

    #[test]
    fn empty_file_is_a_single_final_packet() {
        let mut s = fresh();
        s.begin_packet(0);
        assert!(s.is_final());
        let pkt = s.build_packet(0, Vec::new());
        assert_eq!(pkt.seq, 0);
        assert!(pkt.ack_requested);
        assert_eq!(pkt.file_size, 0);
        assert_eq!(s.on_ack(), AckProgress::Complete);
    }

    #[test]
    fn timeout_rewinds_to_packet_after_last_ack() {
        let mut s = fresh();
        for _ in 0..7 {
            lossless_round(&mut s, MAX);
        }
        // Acked so far: 0, 1, 3, 6.
        assert_eq!(s.last_acked, Some(6));
        assert_eq!(s.gap_counter, 4);

        // Three unacked packets, then the forced one times out.
        for _ in 0..3 {
            s.begin_packet(MAX);
            assert!(!s.ack_requested);
            s.on_unacked_send();
            s.advance();
        }
        s.begin_packet(MAX);
        assert!(s.ack_requested);
        assert_eq!(s.seq, 10);

        let action = s.on_timeout();
        assert_eq!(
            action,
            TimeoutAction::Rewind {
                seq: 7,
                offset: 7 * MAX as u64
            }
        );
        assert_eq!(s.seq, 7);
        assert_eq!(s.cursor, 7 * 1450);
        assert_eq!(s.gap_counter, 0);
        assert_eq!(s.non_acked, 0);
        assert!(s.ack_requested);
    }

    #[test]
    fn timeout_before_any_ack_rewinds_to_start() {
        let mut s = fresh();
        s.begin_packet(MAX);
        assert_eq!(
            s.on_timeout(),
            TimeoutAction::Rewind { seq: 0, offset: 0 }
        );
        assert_eq!(s.cursor, 0);
    }

    #[test]
    fn gap_resets_to_zero_then_regrows() {
        let mut s = fresh();
        for _ in 0..4 {
            lossless_round(&mut s, MAX);
        }
        assert_eq!(s.gap_counter, 3);
        while !s.ack_requested {
            s.begin_packet(MAX);
            s.on_unacked_send();
            s.advance();
        }
        s.begin_packet(MAX);
        s.on_timeout();
        assert_eq!(s.gap_counter, 0);

        // Resumed packet is acked, and the next one too.
        assert!(lossless_round(&mut s, MAX));
        assert_eq!(s.gap_counter, 1);
        assert!(lossless_round(&mut s, MAX));
    }

    #[test]
    fn final_packet_gives_up_after_ten_timeouts() {
        let mut s = fresh();
        for _ in 0..9 {
            s.begin_packet(10);
            assert!(matches!(s.on_timeout(), TimeoutAction::Rewind { .. }));
        }
        s.begin_packet(10);
        assert_eq!(s.on_timeout(), TimeoutAction::GiveUp);
        assert_eq!(s.terminal_timeouts, 10);
        assert!(s.final_unanswered);
    }

    #[test]
    fn lost_final_ack_with_earlier_rewind_still_gives_up() {
        let mut s = fresh();
        lossless_round(&mut s, MAX); // seq 0 acked, gap=1
        lossless_round(&mut s, MAX); // seq 1 acked, gap=2
        assert!(!lossless_round(&mut s, MAX)); // seq 2 unacked

        // Final packet seq 3 goes out and its ack never arrives.
        s.begin_packet(0);
        assert_eq!(s.seq, 3);
        assert!(s.ack_requested);
        assert_eq!(
            s.on_timeout(),
            TimeoutAction::Rewind {
                seq: 2,
                offset: 2 * MAX as u64
            }
        );
        assert!(s.final_unanswered);

        // The rewound packet is full-size, yet the limit still applies.
        for _ in 0..8 {
            s.begin_packet(MAX);
            assert!(!s.is_final());
            assert_eq!(
                s.on_timeout(),
                TimeoutAction::Rewind {
                    seq: 2,
                    offset: 2 * MAX as u64
                }
            );
        }
        s.begin_packet(MAX);
        assert_eq!(s.on_timeout(), TimeoutAction::GiveUp);
        assert_eq!(s.terminal_timeouts, 10);
    }

    #[test]
    fn ack_clears_unanswered_final() {
        let mut s = fresh();
        s.begin_packet(0);
        s.on_timeout();
        assert!(s.final_unanswered);
        s.begin_packet(0);
        assert_eq!(s.on_ack(), AckProgress::Complete);
        assert!(!s.final_unanswered);
    }

    #[test]
    fn non_final_timeouts_never_give_up() {
        let mut s = fresh();
        for _ in 0..50 {
            s.begin_packet(MAX);
            assert!(matches!(s.on_timeout(), TimeoutAction::Rewind { .. }));
        }
        assert!(!s.final_unanswered);
    }

    #[test]
    fn ack_resets_terminal_timeout_count() {
        let mut s = fresh();
        for _ in 0..5 {
            s.begin_packet(MAX);
            s.on_timeout();
        }
        s.begin_packet(MAX);
        s.on_ack();
        assert_eq!(s.terminal_timeouts, 0);
        assert_eq!(s.timeouts, 5);
    }

    #[test]
    fn configured_attempts_are_honoured() {
        let config = SenderConfig {
            final_ack_attempts: 2,
            ..SenderConfig::default()
        };
        let mut s = SenderState::new(1, &config);
        s.begin_packet(0);
        assert!(matches!(s.on_timeout(), TimeoutAction::Rewind { .. }));
        s.begin_packet(0);
        assert_eq!(s.on_timeout(), TimeoutAction::GiveUp);
    }
}
