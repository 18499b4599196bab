//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`DataPacket`] and [`AckPacket`] instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{AckPacket, DataPacket, PacketError, ACK_LEN, MAX_DATAGRAM};

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
}

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Fix the remote peer.  Afterwards only datagrams from `peer` are
    /// delivered and an ICMP port-unreachable surfaces as an I/O error.
    pub async fn connect(&self, peer: SocketAddr) -> Result<(), SocketError> {
        self.inner.connect(peer).await?;
        Ok(())
    }

    /// Encode `packet` and send it to the connected peer.
    pub async fn send_data(&self, packet: &DataPacket) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send(&bytes).await?;
        Ok(())
    }

    /// Receive the next datagram from the connected peer as an ack.
    pub async fn recv_ack(&self) -> Result<AckPacket, SocketError> {
        // One spare byte so an oversized datagram is detected, not truncated.
        let mut buf = [0u8; ACK_LEN + 1];
        let n = self.inner.recv(&mut buf).await?;
        Ok(AckPacket::decode(&buf[..n])?)
    }

    /// Receive the next datagram from anyone and decode it as a data packet.
    ///
    /// Returns `(packet, sender_address)`.
    pub async fn recv_data(&self) -> Result<(DataPacket, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = DataPacket::decode(&buf[..n])?;
        Ok((packet, addr))
    }

    /// Send an ack as a single datagram to `dest`.
    pub async fn send_ack_to(&self, ack: &AckPacket, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&ack.encode(), dest).await?;
        Ok(())
    }

    /// Send raw bytes to `dest`, bypassing the codec.
    pub async fn send_raw_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive one raw datagram into `buf`.
    pub async fn recv_raw(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf).await?)
    }
}
