//! Connection identifiers and handles.
//!
//! A [`ConnectionHandle`] is an opaque capability to write to one specific
//! live transport session. The transport layer owns the receiving half; the
//! handle can be cloned freely and stored in the registry.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Disambiguates connections opened within the same nanosecond.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{seq:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A cloneable write capability for one live connection.
///
/// Forwarding is fire-and-forget: [`ConnectionHandle::forward`] queues the
/// payload on the connection's outbound channel and never blocks waiting
/// for the recipient's transport. A handle whose receiving half is gone
/// behaves like an absent recipient.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving half of its outbound queue.
    ///
    /// The transport task drains the receiver and writes each payload to
    /// the wire as a delivery event.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { id, outbound }, rx)
    }

    /// The connection this handle writes to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a payload for delivery on this connection.
    ///
    /// Returns `false` if the connection's outbound queue is gone, which
    /// callers treat exactly like an unregistered recipient.
    pub fn forward(&self, payload: Bytes) -> bool {
        self.outbound.send(payload).is_ok()
    }

    /// Whether the receiving half of this handle still exists.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}
