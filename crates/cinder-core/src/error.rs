//! Error types for the keyspace core.
//!
//! Every variant renders the exact single-line message sent to clients.
//! Broken internal invariants (duplicate add when the caller promised
//! absence, an expires entry without a main-dict entry) are not errors —
//! they abort via `panic!`/`assert!` instead of limping along.

use thiserror::Error;

/// Client-visible errors raised by keyspace operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyspaceError {
    /// The operation was attempted on a key holding a value of the wrong
    /// type, e.g. a set command against a string key.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Malformed optional arguments, e.g. an unknown token after FLUSHDB.
    #[error("ERR syntax error")]
    Syntax,

    /// A numeric argument (DB index, count) is outside the valid range.
    #[error("ERR index out of range")]
    OutOfRange,

    /// A command that requires its source key to exist was given a
    /// missing key (e.g. RENAME).
    #[error("ERR no such key")]
    NoKey,

    /// MOVE where source and destination databases are the same.
    #[error("ERR source and destination objects are the same")]
    SameObject,

    /// The operation does not make sense with cluster mode enabled.
    #[error("ERR {0} is not allowed in cluster mode")]
    NotAllowedInCluster(&'static str),
}
