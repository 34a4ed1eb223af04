//! # courier-protocol
//!
//! Wire protocol definitions for the Courier presence-aware message relay.
//!
//! This crate defines the binary frames exchanged between clients and the
//! relay, and the length-prefixed MessagePack codec used to carry them.
//!
//! ## Frame types
//!
//! - `Announce` - claim an identity for this connection
//! - `Send` - relay an opaque payload to another identity
//! - `Deliver` - payload forwarded to the recipient's connection
//! - `Connected` - server greeting after the transport handshake
//! - `Ping` / `Pong` - keepalive
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Frame};
//!
//! let frame = Frame::send("bob", b"hello".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::Frame;
