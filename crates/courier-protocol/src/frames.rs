//! Frame types for the Courier relay protocol.
//!
//! A connection speaks in frames: the client announces an identity, then
//! sends point-to-point messages; the relay delivers payloads to whichever
//! connection currently holds the recipient identity. Payloads are opaque
//! bytes end to end — the relay never inspects them.

use serde::{Deserialize, Serialize};

/// A protocol frame.
///
/// There is deliberately no error or acknowledgment frame: delivery is
/// best-effort and an absent recipient is indistinguishable from a dropped
/// forward on the sender's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Claim an identity for this connection (client to relay).
    ///
    /// A repeated announce re-registers; the most recent announce for a
    /// given identity wins, across all connections.
    #[serde(rename = "announce")]
    Announce {
        /// Opaque user identifier, authenticated out of band.
        user_id: String,
    },

    /// Relay a payload to another identity (client to relay).
    #[serde(rename = "send")]
    Send {
        /// Recipient identity.
        to: String,
        /// Opaque message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// A payload forwarded to this connection (relay to recipient).
    #[serde(rename = "deliver")]
    Deliver {
        /// Opaque message payload, exactly as sent.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Greeting sent by the relay after the transport handshake.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp, echoed back in the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Short name of the frame variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Announce { .. } => "announce",
            Frame::Send { .. } => "send",
            Frame::Deliver { .. } => "deliver",
            Frame::Connected { .. } => "connected",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }

    /// Create an Announce frame.
    #[must_use]
    pub fn announce(user_id: impl Into<String>) -> Self {
        Frame::Announce {
            user_id: user_id.into(),
        }
    }

    /// Create a Send frame.
    #[must_use]
    pub fn send(to: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Send {
            to: to.into(),
            payload: payload.into(),
        }
    }

    /// Create a Deliver frame.
    #[must_use]
    pub fn deliver(payload: impl Into<Vec<u8>>) -> Self {
        Frame::Deliver {
            payload: payload.into(),
        }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            heartbeat,
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a Pong frame echoing a ping's timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
