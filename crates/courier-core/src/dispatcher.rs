//! Per-connection relay dispatcher.
//!
//! Each connection task owns one [`Dispatcher`]. It walks the session
//! through its lifecycle (anonymous, identified, closed), records the
//! announced identity in the shared registry, and makes the
//! lookup-then-forward-or-drop decision for every outgoing message.

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::registry::{PresenceRegistry, UserId};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is open but no identity has been announced yet.
    Anonymous,
    /// The connection announced an identity and it was registered.
    Identified(UserId),
    /// Terminal state after disconnect or transport error.
    Closed,
}

/// An event received on a connection, parsed at the transport boundary.
///
/// Disconnect is not an event: the transport signals it by calling
/// [`Dispatcher::close`] when the connection ends, however it ends.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The client claims an identity for this connection.
    Announce {
        /// Identity to register, authenticated out of band.
        user_id: UserId,
    },
    /// The client asks the relay to forward a payload.
    Send {
        /// Recipient identity.
        to: UserId,
        /// Opaque payload, forwarded unmodified.
        payload: Bytes,
    },
}

/// What happened to a dispatched event.
///
/// Outcomes exist for logging and metering only; the relay protocol never
/// reports them to either party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An identity was registered (or re-registered) for this connection.
    Registered,
    /// The payload was queued on the recipient's connection.
    Delivered,
    /// The recipient was absent or its transport already gone.
    Dropped,
    /// The event was not valid in the current session state.
    Ignored,
}

/// The relay state machine for a single connection.
pub struct Dispatcher {
    registry: Arc<PresenceRegistry>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl Dispatcher {
    /// Create a dispatcher for a freshly opened connection.
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>, handle: ConnectionHandle) -> Self {
        Self {
            registry,
            handle,
            state: SessionState::Anonymous,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The connection this dispatcher serves.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// Process one event from this connection.
    pub fn dispatch(&mut self, event: SessionEvent) -> DispatchOutcome {
        if self.state == SessionState::Closed {
            return DispatchOutcome::Ignored;
        }

        match event {
            SessionEvent::Announce { user_id } => self.announce(user_id),
            SessionEvent::Send { to, payload } => self.relay(&to, payload),
        }
    }

    /// Register an identity for this connection.
    ///
    /// A duplicate announce re-registers the same identity; announcing a
    /// different identity first releases the old claim, so this connection
    /// never leaves a stale entry behind.
    fn announce(&mut self, user_id: UserId) -> DispatchOutcome {
        if let SessionState::Identified(previous) = &self.state {
            if previous != &user_id {
                self.registry.remove_if_owner(previous, self.handle.id());
            }
        }

        self.registry.register(user_id.clone(), self.handle.clone());
        debug!(connection = %self.handle.id(), user = %user_id, "Session identified");
        self.state = SessionState::Identified(user_id);

        DispatchOutcome::Registered
    }

    /// Look up the recipient and forward the payload, or drop it.
    ///
    /// A send from an anonymous connection is ignored (not rejected): the
    /// sender gets no reply either way, and an unidentified connection has
    /// no business relaying. A recipient whose transport died but whose
    /// entry has not been removed yet counts as a drop, indistinguishable
    /// from absence on the sender's side.
    fn relay(&self, to: &str, payload: Bytes) -> DispatchOutcome {
        if !matches!(self.state, SessionState::Identified(_)) {
            trace!(connection = %self.handle.id(), "Send before announce, ignoring");
            return DispatchOutcome::Ignored;
        }

        match self.registry.lookup(to) {
            Some(recipient) if recipient.forward(payload) => {
                trace!(connection = %self.handle.id(), to = %to, "Forwarded payload");
                DispatchOutcome::Delivered
            }
            Some(_) => {
                trace!(connection = %self.handle.id(), to = %to, "Recipient transport gone, dropped");
                DispatchOutcome::Dropped
            }
            None => {
                trace!(connection = %self.handle.id(), to = %to, "Recipient absent, dropped");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Tear down the session when its transport closes.
    ///
    /// Removes the announced identity, but only while this connection
    /// still owns the registration — a newer connection that re-announced
    /// the same identity keeps its entry. Idempotent.
    pub fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Identified(user_id) = state {
            self.registry.remove_if_owner(&user_id, self.handle.id());
            debug!(connection = %self.handle.id(), user = %user_id, "Session closed");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct TestConn {
        dispatcher: Dispatcher,
        rx: mpsc::UnboundedReceiver<Bytes>,
    }

    fn connect(registry: &Arc<PresenceRegistry>, conn_id: &str) -> TestConn {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::from(conn_id));
        TestConn {
            dispatcher: Dispatcher::new(Arc::clone(registry), handle),
            rx,
        }
    }

    fn announce(user_id: &str) -> SessionEvent {
        SessionEvent::Announce {
            user_id: user_id.to_string(),
        }
    }

    fn send(to: &str, payload: &'static [u8]) -> SessionEvent {
        SessionEvent::Send {
            to: to.to_string(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_announce_identifies_session() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut conn = connect(&registry, "c1");

        assert_eq!(conn.dispatcher.state(), &SessionState::Anonymous);
        assert_eq!(
            conn.dispatcher.dispatch(announce("alice")),
            DispatchOutcome::Registered
        );
        assert_eq!(
            conn.dispatcher.state(),
            &SessionState::Identified("alice".to_string())
        );
        assert!(registry.lookup("alice").is_some());
    }

    #[test]
    fn test_send_while_anonymous_is_ignored() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        alice.dispatcher.dispatch(announce("alice"));

        let mut anon = connect(&registry, "c2");
        assert_eq!(
            anon.dispatcher.dispatch(send("alice", b"hi")),
            DispatchOutcome::Ignored
        );
        assert!(alice.rx.try_recv().is_err());
    }

    #[test]
    fn test_send_delivers_exact_payload() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        let mut bob = connect(&registry, "c2");

        alice.dispatcher.dispatch(announce("alice"));
        bob.dispatcher.dispatch(announce("bob"));

        assert_eq!(
            alice.dispatcher.dispatch(send("bob", b"hi")),
            DispatchOutcome::Delivered
        );
        assert_eq!(bob.rx.try_recv().unwrap(), Bytes::from_static(b"hi"));
        // Nothing echoed back to the sender
        assert!(alice.rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_unregistered_recipient_is_dropped() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        alice.dispatcher.dispatch(announce("alice"));

        assert_eq!(
            alice.dispatcher.dispatch(send("carol", b"hi")),
            DispatchOutcome::Dropped
        );
        assert!(alice.rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_dead_transport_is_dropped() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        let mut bob = connect(&registry, "c2");

        alice.dispatcher.dispatch(announce("alice"));
        bob.dispatcher.dispatch(announce("bob"));

        // Bob's transport dies without the disconnect handler running yet.
        drop(bob.rx);

        assert_eq!(
            alice.dispatcher.dispatch(send("bob", b"hi")),
            DispatchOutcome::Dropped
        );
    }

    #[test]
    fn test_reannounce_same_identity_is_a_no_op_overwrite() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");

        alice.dispatcher.dispatch(announce("alice"));
        assert_eq!(
            alice.dispatcher.dispatch(announce("alice")),
            DispatchOutcome::Registered
        );

        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reannounce_different_identity_releases_old_claim() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut conn = connect(&registry, "c1");

        conn.dispatcher.dispatch(announce("alice"));
        conn.dispatcher.dispatch(announce("alice2"));

        assert!(registry.lookup("alice").is_none());
        assert_eq!(registry.lookup("alice2").unwrap().id().as_str(), "c1");
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_registration() {
        let registry = Arc::new(PresenceRegistry::new());

        // Two connections announce the same identity; the second wins.
        let mut old = connect(&registry, "c1");
        let mut new = connect(&registry, "c2");
        old.dispatcher.dispatch(announce("alice"));
        new.dispatcher.dispatch(announce("alice"));
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c2");

        // The first connection's late disconnect must not unseat it.
        old.dispatcher.close();
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c2");

        // Messages still reach the newer connection.
        let mut bob = connect(&registry, "c3");
        bob.dispatcher.dispatch(announce("bob"));
        bob.dispatcher.dispatch(send("alice", b"still here"));
        assert_eq!(new.rx.try_recv().unwrap(), Bytes::from_static(b"still here"));
    }

    #[test]
    fn test_close_removes_identity_and_is_idempotent() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        alice.dispatcher.dispatch(announce("alice"));

        alice.dispatcher.close();
        assert!(registry.lookup("alice").is_none());
        assert_eq!(alice.dispatcher.state(), &SessionState::Closed);

        alice.dispatcher.close();
        assert_eq!(alice.dispatcher.state(), &SessionState::Closed);
    }

    #[test]
    fn test_close_without_announce_removes_nothing() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut alice = connect(&registry, "c1");
        alice.dispatcher.dispatch(announce("alice"));

        let mut anon = connect(&registry, "c2");
        anon.dispatcher.close();

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_events_after_close_are_ignored() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut conn = connect(&registry, "c1");
        conn.dispatcher.close();

        assert_eq!(
            conn.dispatcher.dispatch(announce("alice")),
            DispatchOutcome::Ignored
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_end_to_end_relay_scenario() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut a = connect(&registry, "c1");
        let mut b = connect(&registry, "c2");

        a.dispatcher.dispatch(announce("alice"));
        b.dispatcher.dispatch(announce("bob"));

        // alice -> bob delivers
        assert_eq!(
            a.dispatcher.dispatch(send("bob", b"hi")),
            DispatchOutcome::Delivered
        );
        assert_eq!(b.rx.try_recv().unwrap(), Bytes::from_static(b"hi"));

        // alice -> carol (unregistered) drops silently
        assert_eq!(
            a.dispatcher.dispatch(send("carol", b"hi")),
            DispatchOutcome::Dropped
        );
        assert!(a.rx.try_recv().is_err());
        assert!(b.rx.try_recv().is_err());

        // alice disconnects; sends to her now drop
        a.dispatcher.close();
        assert!(registry.lookup("alice").is_none());
        assert_eq!(
            b.dispatcher.dispatch(send("alice", b"gone")),
            DispatchOutcome::Dropped
        );
    }
}
