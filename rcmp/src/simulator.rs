//! Fault-injecting UDP relay for exercising loss recovery.
//!
//! Real networks drop and duplicate packets.  To exercise the recovery path
//! without depending on actual network conditions, [`Simulator`] sits between
//! a sender and a receiver and forwards datagrams in both directions while
//! applying a configurable fault model:
//!
//! | Fault         | Description                                            |
//! |---------------|--------------------------------------------------------|
//! | Packet loss   | Drop any datagram with probability `loss_rate`.        |
//! | Duplication   | Deliver a datagram twice with probability `duplicate_rate`. |
//! | Targeted drop | Drop the first copy of each data sequence in `drop_once`. |
//! | Targeted ack drop | Drop the first ack for each sequence in `drop_ack_once`. |
//! | Ack blackhole | Drop every datagram travelling back to the sender.     |
//!
//! ```text
//!  sender ──▶ relay ──▶ receiver (upstream)
//!  sender ◀── relay ◀── receiver
//! ```
//!
//! The relay learns the sender's address from the first datagram that does
//! not come from upstream.  Random faults draw from a seeded RNG so runs are
//! reproducible.

use std::collections::HashSet;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::packet::{AckPacket, DataPacket, MAX_DATAGRAM};
use crate::socket::{Socket, SocketError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a forwarded datagram is sent twice.
    pub duplicate_rate: f64,
    /// Data sequence numbers whose first transmission is dropped.
    pub drop_once: Vec<u32>,
    /// Sequence numbers whose first acknowledgement is dropped.
    pub drop_ack_once: Vec<u32>,
    /// Drop everything travelling from the receiver back to the sender.
    pub drop_acks: bool,
    pub seed: u64,
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        for (name, p) in [("loss", self.loss_rate), ("duplicate", self.duplicate_rate)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimulatorError::Probability(name, p));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("{0} probability must be within [0, 1], got {1}")]
    Probability(&'static str, f64),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Datagram counts, by fate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

/// A lossy relay between one sender and one upstream receiver.
pub struct Simulator {
    socket: Socket,
    upstream: SocketAddr,
    client: Option<SocketAddr>,
    config: SimulatorConfig,
    pending_drops: HashSet<u32>,
    pending_ack_drops: HashSet<u32>,
    rng: StdRng,
    stats: RelayStats,
}

impl Simulator {
    /// Bind the relay on `listen`, forwarding to `upstream`.
    pub async fn bind(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> Result<Self, SimulatorError> {
        config.validate()?;
        let socket = Socket::bind(listen).await?;
        Ok(Self {
            socket,
            upstream,
            client: None,
            pending_drops: config.drop_once.iter().copied().collect(),
            pending_ack_drops: config.drop_ack_once.iter().copied().collect(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            stats: RelayStats::default(),
        })
    }

    /// Address senders should target.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Relay datagrams until an I/O error occurs.
    pub async fn run(mut self) -> Result<(), SimulatorError> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        loop {
            let (n, from) = self.socket.recv_raw(&mut buf).await?;
            self.relay(&buf[..n], from).await?;
        }
    }

    /// Run the relay on a background task.
    pub fn spawn(self) -> JoinHandle<Result<(), SimulatorError>> {
        tokio::spawn(self.run())
    }

    async fn relay(&mut self, datagram: &[u8], from: SocketAddr) -> Result<(), SimulatorError> {
        let (dest, towards_sender) = if from == self.upstream {
            match self.client {
                Some(client) => (client, true),
                None => {
                    log::debug!("[rcmp:relay] no sender known yet; dropping upstream datagram");
                    self.stats.dropped += 1;
                    return Ok(());
                }
            }
        } else {
            self.client = Some(from);
            (self.upstream, false)
        };

        if self.should_drop(datagram, towards_sender) {
            self.stats.dropped += 1;
            log::debug!(
                "[rcmp:relay] dropped {} bytes {}",
                datagram.len(),
                if towards_sender { "←" } else { "→" }
            );
            return Ok(());
        }

        self.socket.send_raw_to(datagram, dest).await?;
        self.stats.forwarded += 1;
        if self.config.duplicate_rate > 0.0 && self.rng.random_bool(self.config.duplicate_rate) {
            self.socket.send_raw_to(datagram, dest).await?;
            self.stats.duplicated += 1;
        }
        Ok(())
    }

    fn should_drop(&mut self, datagram: &[u8], towards_sender: bool) -> bool {
        if towards_sender && self.config.drop_acks {
            return true;
        }
        if towards_sender && !self.pending_ack_drops.is_empty() {
            if let Ok(ack) = AckPacket::decode(datagram) {
                if self.pending_ack_drops.remove(&ack.seq) {
                    return true;
                }
            }
        }
        if !towards_sender && !self.pending_drops.is_empty() {
            if let Ok(pkt) = DataPacket::decode(datagram) {
                if self.pending_drops.remove(&pkt.seq) {
                    return true;
                }
            }
        }
        self.config.loss_rate > 0.0 && self.rng.random_bool(self.config.loss_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[test]
    fn probabilities_are_validated() {
        let config = SimulatorConfig {
            loss_rate: 1.5,
            ..SimulatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimulatorError::Probability("loss", _))
        ));
        assert!(SimulatorConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn forwards_both_directions() {
        let upstream = loopback().await;
        let client = loopback().await;
        let relay = Simulator::bind(
            "127.0.0.1:0".parse().unwrap(),
            upstream.local_addr,
            SimulatorConfig::default(),
        )
        .await
        .unwrap();
        let relay_addr = relay.local_addr();
        let handle = relay.spawn();

        client.send_raw_to(b"ping", relay_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = upstream.recv_raw(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, relay_addr);

        upstream.send_raw_to(b"pong", relay_addr).await.unwrap();
        let (n, from) = client.recv_raw(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(from, relay_addr);

        handle.abort();
    }

    #[tokio::test]
    async fn drop_once_skips_first_copy_only() {
        let upstream = loopback().await;
        let client = loopback().await;
        let mut relay = Simulator::bind(
            "127.0.0.1:0".parse().unwrap(),
            upstream.local_addr,
            SimulatorConfig {
                drop_once: vec![1],
                ..SimulatorConfig::default()
            },
        )
        .await
        .unwrap();

        let pkt = DataPacket {
            connection_id: 1,
            file_size: 10,
            seq: 1,
            ack_requested: false,
            payload: vec![0; 5],
        };
        let bytes = pkt.encode().unwrap();
        relay.relay(&bytes, client.local_addr).await.unwrap();
        relay.relay(&bytes, client.local_addr).await.unwrap();
        assert_eq!(
            relay.stats(),
            RelayStats {
                forwarded: 1,
                dropped: 1,
                duplicated: 0
            }
        );
    }

    #[tokio::test]
    async fn drop_ack_once_skips_first_matching_ack_only() {
        let upstream = loopback().await;
        let client = loopback().await;
        let mut relay = Simulator::bind(
            "127.0.0.1:0".parse().unwrap(),
            upstream.local_addr,
            SimulatorConfig {
                drop_ack_once: vec![3],
                ..SimulatorConfig::default()
            },
        )
        .await
        .unwrap();

        // Learn the sender first.
        relay.relay(b"data", client.local_addr).await.unwrap();
        let other = AckPacket {
            connection_id: 1,
            seq: 2,
        }
        .encode();
        let target = AckPacket {
            connection_id: 1,
            seq: 3,
        }
        .encode();
        relay.relay(&other, upstream.local_addr).await.unwrap();
        relay.relay(&target, upstream.local_addr).await.unwrap();
        relay.relay(&target, upstream.local_addr).await.unwrap();
        assert_eq!(relay.stats().forwarded, 3);
        assert_eq!(relay.stats().dropped, 1);
    }

    #[tokio::test]
    async fn blackholed_acks_never_reach_sender() {
        let upstream = loopback().await;
        let client = loopback().await;
        let mut relay = Simulator::bind(
            "127.0.0.1:0".parse().unwrap(),
            upstream.local_addr,
            SimulatorConfig {
                drop_acks: true,
                ..SimulatorConfig::default()
            },
        )
        .await
        .unwrap();

        relay.relay(b"data", client.local_addr).await.unwrap();
        relay.relay(b"ack!", upstream.local_addr).await.unwrap();
        assert_eq!(relay.stats().forwarded, 1);
        assert_eq!(relay.stats().dropped, 1);
    }
}
