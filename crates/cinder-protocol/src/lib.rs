//! cinder-protocol: RESP reply frames.
//!
//! The command layer produces [`Frame`] values; this crate owns their
//! wire serialization. Request parsing lives in the network front-end,
//! which is not part of this workspace — only the reply direction is
//! needed by the keyspace core and its tests.

mod serialize;
mod types;

pub use types::Frame;
