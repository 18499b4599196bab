//! The two RCMP engines: file sender and file receiver.
//!
//! # Architecture
//!
//! ```text
//!  send_file                                  receive_file
//!    ├── SenderState (ack gap, rewind)          ├── ReceiverState (in-order)
//!    ├── AsyncRead + AsyncSeek source           ├── AsyncWrite sink
//!    └── Socket (connected) ──── DATA ────────▶ └── Socket (bound)
//!                             ◀─── ACK ─────────
//! ```
//!
//! Each engine is one sequential loop.  The sender blocks on every send and,
//! only when the packet asked for an ack, on one ack receive bounded by
//! [`SenderConfig::ack_timeout`].  The receiver blocks on receive with no
//! deadline until the declared file size has been written.
//!
//! The engines never call each other; they share only the wire format.

use std::net::SocketAddr;
use std::path::Path;

use rand::Rng;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom,
};
use tokio::time::{timeout_at, Instant};

use crate::config::{AckPolicy, ConfigError, ReceiverConfig, SenderConfig};
use crate::packet::{AckPacket, PacketError};
use crate::receiver::{Disposition, ReceiverState};
use crate::sender::{AckProgress, SenderState, TimeoutAction};
use crate::socket::{Socket, SocketError};
use crate::state::SendOutcome;

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

/// Fatal conditions.  Every variant halts the engine that raised it.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Unusable parameters, detected before any packet is sent.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// File or socket failure, including an unreachable destination.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A datagram that does not decode as the expected packet kind.
    #[error("malformed datagram: {0}")]
    Malformed(#[from] PacketError),
    /// An ack for a different session arrived while waiting for ours.
    #[error("ack for connection {received:#010x} while session is {expected:#010x}")]
    ProtocolMismatch { expected: u32, received: u32 },
}

impl From<SocketError> for TransferError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Io(e) => Self::Io(e),
            SocketError::Packet(e) => Self::Malformed(e),
        }
    }
}

/// Summary of a send that ran to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub outcome: SendOutcome,
    pub connection_id: u32,
    pub file_size: u32,
    /// Datagrams sent, retransmissions included.
    pub packets_sent: u64,
    /// Ack waits that expired.
    pub timeouts: u64,
}

/// Summary of a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Connection id carried by the packet that completed the file.
    pub connection_id: u32,
    pub bytes_written: u64,
    pub packets_accepted: u64,
    pub duplicates: u64,
    pub discarded: u64,
    pub foreign: u64,
}

/// A fresh pseudorandom session id.
pub fn new_connection_id() -> u32 {
    rand::rng().random()
}

/// Resolve `host:port` to the first matching socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransferError> {
    let target = format!("{host}:{port}");
    let mut addrs = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ConfigError::Unresolvable(format!("{target}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| ConfigError::Unresolvable(target.clone()).into())
}

// ---------------------------------------------------------------------------
// Sender engine
// ---------------------------------------------------------------------------

/// Open `path`, bind an ephemeral socket towards `dest`, and send the file.
pub async fn send_path(
    dest: SocketAddr,
    path: &Path,
    config: &SenderConfig,
) -> Result<SendReport, TransferError> {
    let mut file = File::open(path).await?;
    let local: SocketAddr = if dest.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = Socket::bind(local).await?;
    socket.connect(dest).await?;
    send_file(&socket, &mut file, new_connection_id(), config).await
}

/// Send everything in `source` over `socket`, which must already be
/// connected to the receiver.
///
/// Returns `Ok` with [`SendOutcome::Delivered`] once the final packet is
/// acknowledged, or [`SendOutcome::Unknown`] when, after the final packet
/// went unanswered, `final_ack_attempts` consecutive waits expire or the
/// receiver stops listening.  Lost acks before that are retried without
/// bound.
pub async fn send_file<R>(
    socket: &Socket,
    source: &mut R,
    connection_id: u32,
    config: &SenderConfig,
) -> Result<SendReport, TransferError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    config.validate()?;

    let len = source.seek(SeekFrom::End(0)).await?;
    let file_size = u32::try_from(len).map_err(|_| ConfigError::SourceTooLarge(len))?;
    source.seek(SeekFrom::Start(0)).await?;

    let mut state = SenderState::new(connection_id, config);
    log::info!(
        "[rcmp:send] connection {connection_id:#010x}: {file_size} bytes in chunks of {}",
        config.max_payload
    );

    let outcome = loop {
        let mut chunk = vec![0u8; config.max_payload];
        let n = read_chunk(source, &mut chunk).await?;
        chunk.truncate(n);
        state.begin_packet(n);

        let pkt = state.build_packet(file_size, chunk);
        match socket.send_data(&pkt).await.map_err(TransferError::from) {
            Ok(()) => {}
            Err(e) if receiver_left(&state, &e) => {
                log::warn!("[rcmp:send] receiver stopped listening after the final packet");
                break SendOutcome::Unknown;
            }
            Err(e) => return Err(e),
        }
        log::debug!(
            "[rcmp:send] → DATA seq={} len={} ack={} gap={}",
            pkt.seq,
            n,
            pkt.ack_requested,
            state.gap_counter
        );

        if !pkt.ack_requested {
            state.on_unacked_send();
            state.advance();
            continue;
        }

        let wait = match await_ack(socket, &state, config).await {
            Ok(wait) => wait,
            Err(e) if receiver_left(&state, &e) => {
                log::warn!("[rcmp:send] receiver stopped listening after the final packet");
                break SendOutcome::Unknown;
            }
            Err(e) => return Err(e),
        };
        match wait {
            AckWait::Acked => {
                log::debug!("[rcmp:send] ← ACK seq={}", state.seq);
                if state.on_ack() == AckProgress::Complete {
                    break SendOutcome::Delivered;
                }
            }
            AckWait::TimedOut => match state.on_timeout() {
                TimeoutAction::GiveUp => {
                    log::warn!(
                        "[rcmp:send] final packet unacknowledged after {} attempts",
                        state.terminal_timeouts
                    );
                    break SendOutcome::Unknown;
                }
                TimeoutAction::Rewind { seq, offset } => {
                    log::info!("[rcmp:send] ack timeout; rewinding to seq={seq} offset={offset}");
                    source.seek(SeekFrom::Start(offset)).await?;
                    continue;
                }
            },
        }
        state.advance();
    };

    log::info!(
        "[rcmp:send] connection {connection_id:#010x}: {outcome} ({} packets, {} timeouts)",
        state.packets_sent,
        state.timeouts
    );
    Ok(SendReport {
        outcome,
        connection_id,
        file_size,
        packets_sent: state.packets_sent,
        timeouts: state.timeouts,
    })
}

/// A refused datagram once the final packet has gone unanswered means the
/// receiver stopped listening, possibly after writing the whole file.
/// Before that point the receiver cannot be done, so a refusal stays fatal.
fn receiver_left(state: &SenderState, err: &TransferError) -> bool {
    state.final_unanswered
        && matches!(
            err,
            TransferError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused
        )
}

enum AckWait {
    Acked,
    TimedOut,
}

/// Wait for the ack of the current packet until one `ack_timeout` elapses.
///
/// Under [`AckPolicy::Discard`] unrelated or undecodable acks are dropped and
/// the wait continues against the same deadline.
async fn await_ack(
    socket: &Socket,
    state: &SenderState,
    config: &SenderConfig,
) -> Result<AckWait, TransferError> {
    let deadline = Instant::now() + config.ack_timeout;
    loop {
        let ack = match timeout_at(deadline, socket.recv_ack()).await {
            Err(_) => return Ok(AckWait::TimedOut),
            Ok(Ok(ack)) => ack,
            Ok(Err(SocketError::Packet(e))) if config.ack_policy == AckPolicy::Discard => {
                log::warn!("[rcmp:send] dropping undecodable ack: {e}");
                continue;
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        if ack.connection_id != state.connection_id {
            match config.ack_policy {
                AckPolicy::Abort => {
                    return Err(TransferError::ProtocolMismatch {
                        expected: state.connection_id,
                        received: ack.connection_id,
                    })
                }
                AckPolicy::Discard => {
                    log::warn!(
                        "[rcmp:send] dropping ack for foreign connection {:#010x}",
                        ack.connection_id
                    );
                    continue;
                }
            }
        }
        if config.ack_policy == AckPolicy::Discard && ack.seq != state.seq {
            log::debug!(
                "[rcmp:send] dropping stale ack seq={} (waiting for {})",
                ack.seq,
                state.seq
            );
            continue;
        }
        return Ok(AckWait::Acked);
    }
}

/// Fill `buf` from `source`, stopping early only at end of input.
///
/// A short result therefore always means EOF, which keeps every non-final
/// chunk exactly `buf.len()` bytes long.
async fn read_chunk<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Receiver engine
// ---------------------------------------------------------------------------

/// Bind `local`, create or truncate `path`, and receive one file into it.
pub async fn receive_path(
    local: SocketAddr,
    path: &Path,
    config: &ReceiverConfig,
) -> Result<ReceiveReport, TransferError> {
    let socket = Socket::bind(local).await?;
    let mut file = File::create(path).await?;
    log::info!(
        "[rcmp:recv] listening on {} → {}",
        socket.local_addr,
        path.display()
    );
    receive_file(&socket, &mut file, config).await
}

/// Receive one file from `socket` into `sink`.
///
/// Returns once the short final packet is delivered and the payload byte
/// count matches the file size declared by the sender; the sink is flushed
/// first.
pub async fn receive_file<W>(
    socket: &Socket,
    sink: &mut W,
    config: &ReceiverConfig,
) -> Result<ReceiveReport, TransferError>
where
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    let mut state = ReceiverState::new(config);

    loop {
        let (pkt, from) = socket.recv_data().await?;
        let disposition = state.on_packet(&pkt, from);

        if disposition.send_ack() {
            let ack = AckPacket {
                connection_id: pkt.connection_id,
                seq: pkt.seq,
            };
            socket.send_ack_to(&ack, from).await?;
        }

        match disposition {
            Disposition::Deliver { send_ack, complete } => {
                sink.write_all(&pkt.payload).await?;
                log::debug!(
                    "[rcmp:recv] ← DATA seq={} len={} written={}{}",
                    pkt.seq,
                    pkt.payload.len(),
                    state.bytes_written,
                    if send_ack { "; → ACK" } else { "" }
                );
                if complete {
                    sink.flush().await?;
                    log::info!(
                        "[rcmp:recv] connection {:#010x}: {} bytes received",
                        pkt.connection_id,
                        state.bytes_written
                    );
                    return Ok(ReceiveReport {
                        connection_id: pkt.connection_id,
                        bytes_written: state.bytes_written,
                        packets_accepted: state.packets_accepted,
                        duplicates: state.duplicates,
                        discarded: state.discarded,
                        foreign: state.foreign,
                    });
                }
            }
            Disposition::Duplicate { send_ack } => {
                log::debug!(
                    "[rcmp:recv] ← DATA seq={} duplicate (expecting {}){}",
                    pkt.seq,
                    state.next_expected,
                    if send_ack { "; → ACK" } else { "" }
                );
            }
            Disposition::Discard => {
                log::debug!(
                    "[rcmp:recv] ← DATA seq={} ahead of gap (expecting {}); dropped",
                    pkt.seq,
                    state.next_expected
                );
            }
            Disposition::Foreign => {
                log::warn!(
                    "[rcmp:recv] dropping packet from {from} for connection {:#010x}",
                    pkt.connection_id
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
