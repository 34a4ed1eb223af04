//! # courier-core
//!
//! Presence registry and relay dispatcher for the Courier message relay.
//!
//! This crate provides the relay's moving parts:
//!
//! - **ConnectionHandle** - write capability for one live connection
//! - **PresenceRegistry** - concurrent identity-to-connection mapping
//! - **Dispatcher** - per-connection session state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Connection │────▶│  Dispatcher │────▶│ PresenceRegistry │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            │
//!                            ▼
//!                  recipient ConnectionHandle
//! ```
//!
//! Delivery is best-effort and at most one hop: the dispatcher looks the
//! recipient up in the registry and forwards the payload to its handle, or
//! silently drops it. Nothing is queued, retried, or acknowledged.

pub mod dispatcher;
pub mod handle;
pub mod registry;

pub use dispatcher::{DispatchOutcome, Dispatcher, SessionEvent, SessionState};
pub use handle::{ConnectionHandle, ConnectionId};
pub use registry::{PresenceRegistry, UserId};
