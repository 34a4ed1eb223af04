//! The presence registry.
//!
//! Maps each announced user identity to the connection handle that most
//! recently claimed it. This is the single piece of shared mutable state
//! in the relay; every operation is individually atomic and safe to call
//! from any number of concurrent connection tasks.

use crate::handle::{ConnectionHandle, ConnectionId};
use dashmap::DashMap;
use tracing::debug;

/// An opaque, stable user identity supplied after the transport handshake.
pub type UserId = String;

/// Concurrent map from user identity to its live connection handle.
///
/// An entry is assumed live; the registry performs no liveness checks of
/// its own, so accuracy depends on prompt removal when a connection
/// closes. The registry is constructor-injected into each connection task
/// rather than held as process-global state.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle for a user identity, replacing any previous one.
    ///
    /// Last write wins: a superseded handle is returned to the caller but
    /// not closed. At most one entry exists per identity at any time.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        debug!(user = %user_id, connection = %handle.id(), "Presence: registered");
        self.entries.insert(user_id, handle)
    }

    /// Look up the current handle for a user identity.
    ///
    /// Never blocks waiting for an entry to appear; absence is a normal,
    /// non-error outcome.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.get(user_id).map(|entry| entry.value().clone())
    }

    /// Remove the entry for a user identity unconditionally.
    ///
    /// Removing an unknown identity is a no-op.
    pub fn remove(&self, user_id: &str) -> Option<ConnectionHandle> {
        let removed = self.entries.remove(user_id).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(user = %user_id, "Presence: removed");
        }
        removed
    }

    /// Remove the entry for a user identity only while it still belongs to
    /// the given connection.
    ///
    /// This is the disconnect path: a closing connection must not unseat a
    /// newer connection that has already re-registered the same identity.
    /// The check and the removal are a single atomic operation.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if_owner(&self, user_id: &str, connection_id: &ConnectionId) -> bool {
        let removed = self
            .entries
            .remove_if(user_id, |_, handle| handle.id() == connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = %connection_id, "Presence: removed by owner");
        }
        removed
    }

    /// Number of identities currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(id: &str) -> ConnectionHandle {
        ConnectionHandle::new(ConnectionId::from(id)).0
    }

    #[test]
    fn test_register_lookup_remove() {
        let registry = PresenceRegistry::new();
        assert!(registry.lookup("alice").is_none());

        registry.register("alice".into(), handle("c1"));
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c1");

        registry.remove("alice");
        assert!(registry.lookup("alice").is_none());

        // Removing an unknown identity is a no-op
        assert!(registry.remove("alice").is_none());
    }

    #[test]
    fn test_register_last_write_wins() {
        let registry = PresenceRegistry::new();

        assert!(registry.register("alice".into(), handle("c1")).is_none());
        let superseded = registry.register("alice".into(), handle("c2")).unwrap();

        assert_eq!(superseded.id().as_str(), "c1");
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_if_owner_matches() {
        let registry = PresenceRegistry::new();
        registry.register("alice".into(), handle("c1"));

        assert!(registry.remove_if_owner("alice", &ConnectionId::from("c1")));
        assert!(registry.lookup("alice").is_none());
    }

    #[test]
    fn test_remove_if_owner_stale_connection() {
        let registry = PresenceRegistry::new();

        // A newer connection re-registered the identity before the old
        // one's disconnect handler ran.
        registry.register("alice".into(), handle("c1"));
        registry.register("alice".into(), handle("c2"));

        assert!(!registry.remove_if_owner("alice", &ConnectionId::from("c1")));
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c2");
    }

    #[test]
    fn test_concurrent_churn_preserves_unrelated_keys() {
        let registry = Arc::new(PresenceRegistry::new());
        registry.register("stable".into(), handle("c0"));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(std::thread::spawn(move || {
                let user = format!("user-{worker}");
                for round in 0..500 {
                    let conn = format!("conn-{worker}-{round}");
                    registry.register(user.clone(), handle(&conn));
                    assert!(registry.lookup(&user).is_some());
                    registry.remove(&user);
                }
            }));
        }
        for task in tasks {
            task.join().unwrap();
        }

        assert_eq!(registry.lookup("stable").unwrap().id().as_str(), "c0");
        assert_eq!(registry.len(), 1);
    }
}
