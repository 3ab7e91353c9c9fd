//! cinder-core: the keyspace engine.
//!
//! Owns the hash-indexed primary store with incremental rehash and
//! cursor-stable scans, the polymorphic Set datatype, refcounted value
//! headers with LRU/LFU access metadata, lazy and active expiration,
//! and the database array with its select/swap/flush operations.
//! Replication and the append-only log are reached only through the
//! injected [`propagate::PropagationSink`].
//!
//! Single-threaded cooperative by design: a command runs to completion
//! against the keyspace, background work happens either between
//! commands (cron ticks) or on the drop thread, which only ever owns
//! memory already detached from the keyspace.

pub mod db;
pub mod dict;
pub mod dropper;
pub mod error;
pub mod expire;
pub mod intset;
pub mod keyspace;
pub mod object;
pub mod propagate;
pub mod scan;
pub mod server;
pub mod set;
pub mod time;
pub mod watch;

pub use db::Database;
pub use dict::{Dict, DuplicateKey};
pub use dropper::DropHandle;
pub use error::KeyspaceError;
pub use intset::IntSet;
pub use keyspace::{FlushMode, Keyspace};
pub use object::{AccessPolicy, Kind, Object, SharedObject, Value};
pub use propagate::{NullSink, PropagationSink, RecordingSink};
pub use scan::{scan_keyspace, scan_set, GlobPattern, ScanPage};
pub use server::{Caller, EventClass, KeyspaceEvent, ServerContext, Stats};
pub use set::{sdiff, sinter, sunion, SetValue, MAX_INTSET_ENTRIES};
pub use watch::{ClientId, ReadyKeys, Watchers};
