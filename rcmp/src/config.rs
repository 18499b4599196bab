//! Tunable parameters for both engines.
//!
//! Defaults reproduce the reference wire behavior; the CLI overrides
//! individual fields from flags.

use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

/// How the sender treats an ack that does not belong to the packet it is
/// waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// An ack carrying a foreign connection id aborts the transfer.
    /// The acknowledged sequence number is not inspected.
    #[default]
    Abort,
    /// Acks with a foreign connection id, or naming any sequence number other
    /// than the awaited one, are dropped and the wait continues until the
    /// original deadline.
    Discard,
}

/// How the receiver treats datagrams from more than one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// Every datagram is processed regardless of connection id or source.
    #[default]
    Permissive,
    /// The first data packet pins the connection id and source address;
    /// datagrams from anything else are dropped.
    Pinned,
}

/// Sender-side parameters.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Deadline for one ack wait.
    pub ack_timeout: Duration,
    /// Consecutive ack timeouts on the final packet before giving up with
    /// an unknown outcome.
    pub final_ack_attempts: u32,
    /// Chunk size used for framing *and* for rewind offset arithmetic.
    pub max_payload: usize,
    pub ack_policy: AckPolicy,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(200),
            final_ack_attempts: 10,
            max_payload: MAX_PAYLOAD,
            ack_policy: AckPolicy::Abort,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::MaxPayload(self.max_payload));
        }
        if self.final_ack_attempts == 0 {
            return Err(ConfigError::FinalAckAttempts);
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::AckTimeout);
        }
        Ok(())
    }
}

/// Receiver-side parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub session_policy: SessionPolicy,
    /// Full chunk size the sender frames with.  Only a delivered packet
    /// shorter than this can complete the file.
    pub max_payload: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            session_policy: SessionPolicy::Permissive,
            max_payload: MAX_PAYLOAD,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::MaxPayload(self.max_payload));
        }
        Ok(())
    }
}

/// An unusable parameter, rejected before any packet is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max payload must be between 1 and {max} bytes, got {0}", max = MAX_PAYLOAD)]
    MaxPayload(usize),
    #[error("final ack attempts must be at least 1")]
    FinalAckAttempts,
    #[error("ack timeout must be non-zero")]
    AckTimeout,
    #[error("source is {0} bytes; a transfer carries at most {max} bytes", max = u32::MAX)]
    SourceTooLarge(u64),
    #[error("cannot resolve destination {0}")]
    Unresolvable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let c = SenderConfig::default();
        assert_eq!(c.ack_timeout, Duration::from_millis(200));
        assert_eq!(c.final_ack_attempts, 10);
        assert_eq!(c.max_payload, 1450);
        assert_eq!(c.ack_policy, AckPolicy::Abort);
        assert!(c.validate().is_ok());

        let r = ReceiverConfig::default();
        assert_eq!(r.session_policy, SessionPolicy::Permissive);
        assert_eq!(r.max_payload, 1450);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn payload_above_wire_maximum_rejected() {
        let c = SenderConfig {
            max_payload: MAX_PAYLOAD + 1,
            ..SenderConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::MaxPayload(MAX_PAYLOAD + 1)));

        let r = ReceiverConfig {
            max_payload: 0,
            ..ReceiverConfig::default()
        };
        assert_eq!(r.validate(), Err(ConfigError::MaxPayload(0)));
    }

    #[test]
    fn zero_attempts_rejected() {
        let c = SenderConfig {
            final_ack_attempts: 0,
            ..SenderConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::FinalAckAttempts));
    }
}
