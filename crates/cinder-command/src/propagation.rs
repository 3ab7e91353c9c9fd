//! Per-command propagation buffer.
//!
//! Commands propagate verbatim by default once they dirty the keyspace.
//! A handler that rewrites its own effects (SPOP becoming a run of
//! SREMs, EXPIRE with a past deadline becoming a DEL) suppresses the
//! default and queues replacements here; the dispatcher flushes them
//! after the handler returns, preserving emission order.

use bytes::Bytes;

/// Buffered propagation decisions for one command execution.
#[derive(Debug, Default)]
pub struct Propagation {
    suppress_original: bool,
    extra: Vec<(u32, Vec<Bytes>, u8)>,
}

impl Propagation {
    /// Suppresses the default propagation of the command being
    /// executed. Queued extras still go out.
    pub fn prevent_self_propagation(&mut self) {
        self.suppress_original = true;
    }

    /// Queues an additional command vector to emit after this command.
    pub fn also_propagate(&mut self, db: u32, argv: Vec<Bytes>, targets: u8) {
        self.extra.push((db, argv, targets));
    }

    pub fn suppressed(&self) -> bool {
        self.suppress_original
    }

    pub fn drain(&mut self) -> Vec<(u32, Vec<Bytes>, u8)> {
        std::mem::take(&mut self.extra)
    }
}
