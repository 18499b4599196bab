//! Terminal outcome of a send.
//!
//! A send that does not fail ends in one of two states.  Fatal conditions
//! are not represented here; they come back as
//! [`crate::transfer::TransferError`].
//!
//! ```text
//!  SENDING ──ack of final packet───────────────────▶ DELIVERED
//!     │
//!     └──final packet unanswered, then N timeouts──▶ UNKNOWN
//!        in a row or the receiver stops listening
//! ```

/// How a send that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The receiver acknowledged the final packet, so it holds every byte.
    Delivered,
    /// The final packet was never acknowledged.  The receiver may or may not
    /// have the whole file.
    Unknown,
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Unknown => write!(f, "transfer completion unknown"),
        }
    }
}
