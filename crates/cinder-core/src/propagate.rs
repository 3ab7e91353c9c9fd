//! The propagation sink: where keyspace effects are replayed to.
//!
//! The core never writes replication or append-only-log bytes itself;
//! it emits command vectors to an injected sink in the same order the
//! effects were applied locally, so a consumer replaying them reaches
//! the same state. Synthetic deletes from lazy expiration come through
//! here too.

use bytes::Bytes;

/// Destination bitmask for a propagated command.
pub mod target {
    /// Append-only log.
    pub const AOF: u8 = 1;
    /// Replication stream.
    pub const REPL: u8 = 2;
    /// Both destinations, the common case.
    pub const ALL: u8 = AOF | REPL;
}

/// Consumer of command replays for replication and the append-only log.
pub trait PropagationSink {
    /// Emits one command vector for the given database.
    fn feed(&mut self, db: u32, argv: &[Bytes], targets: u8);
}

/// Sink that discards everything. Stands in where replication and AOF
/// are both disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PropagationSink for NullSink {
    fn feed(&mut self, _db: u32, _argv: &[Bytes], _targets: u8) {}
}

/// Sink that records every emission, for tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub commands: Vec<(u32, Vec<Bytes>, u8)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command verbs emitted so far, in order.
    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|(_, argv, _)| String::from_utf8_lossy(&argv[0]).into_owned())
            .collect()
    }
}

impl PropagationSink for RecordingSink {
    fn feed(&mut self, db: u32, argv: &[Bytes], targets: u8) {
        self.commands.push((db, argv.to_vec(), targets));
    }
}
