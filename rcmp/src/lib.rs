//! `rcmp` — reliable bulk file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   DATA (seq, ack?)   ┌────────────────┐
//!  │ send_file    │─────────────────────▶│ receive_file   │
//!  │  SenderState │                      │  ReceiverState │
//!  └──────┬───────┘         ACK          └───────┬────────┘
//!         │◀─────────────────────────────────────┘
//!  ┌──────▼───────────────────────────────────────────────┐
//!  │  Socket  (thin async wrapper around tokio UdpSocket) │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! The sender asks for acknowledgements at a growing interval and, when one
//! does not arrive in time, rewinds to the last acknowledged packet and
//! resends everything after it.  The receiver delivers strictly in order and
//! drops anything ahead of a gap.
//!
//! Each module has a single responsibility:
//! - [`packet`]    — wire format (serialise / deserialise)
//! - [`socket`]    — async UDP socket abstraction
//! - [`sender`]    — ack schedule and rewind state machine
//! - [`receiver`]  — cumulative in-order delivery state machine
//! - [`transfer`]  — the sender and receiver control loops
//! - [`config`]    — tunables and policy switches
//! - [`state`]     — terminal outcome of a send
//! - [`simulator`] — lossy relay for testing recovery

pub mod config;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod transfer;

pub use config::{AckPolicy, ReceiverConfig, SenderConfig, SessionPolicy};
pub use packet::{AckPacket, DataPacket, PacketError, MAX_PAYLOAD};
pub use state::SendOutcome;
pub use transfer::{
    receive_file, receive_path, send_file, send_path, ReceiveReport, SendReport, TransferError,
};
