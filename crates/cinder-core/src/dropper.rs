//! Background value dropper for lazy free.
//!
//! Expensive destructor work (large sets, whole flushed databases) is
//! offloaded to a dedicated OS thread so the command loop stays
//! responsive. The thread owns nothing until a value has been detached
//! from the keyspace, so no synchronization with the single-threaded
//! core is needed beyond the channel itself.

use std::sync::mpsc::{self, SyncSender, TrySendError};

use crate::dict::Dict;
use crate::object::{SharedObject, Value};

/// Bounded channel capacity. Large enough to absorb bursts without
/// meaningful memory overhead (~4096 pointers).
const DROP_CHANNEL_CAPACITY: usize = 4096;

/// Collections below this cardinality are dropped inline; the channel
/// round-trip costs more than the free itself.
const LARGE_COLLECTION_LEN: usize = 64;

/// Items that can be sent to the background drop thread.
///
/// The fields are never read — the whole point is that the drop thread
/// receives them and lets their destructors run.
#[allow(dead_code)]
enum Droppable {
    /// A single detached value (UNLINK, async expire, async delete).
    Value(SharedObject),
    /// A database's detached tables from FLUSHDB/FLUSHALL ASYNC.
    Tables(Dict<SharedObject>, Dict<u64>),
}

/// A cloneable handle for deferring expensive drops to the background
/// thread. When all handles are dropped the channel closes and the
/// thread exits cleanly.
#[derive(Debug, Clone)]
pub struct DropHandle {
    tx: SyncSender<Droppable>,
}

impl DropHandle {
    /// Spawns the background drop thread and returns a handle.
    ///
    /// If the thread fails to spawn, logs a warning and returns a
    /// handle whose sends fall back to inline dropping (the channel is
    /// disconnected since the receiver never started).
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::sync_channel::<Droppable>(DROP_CHANNEL_CAPACITY);

        if let Err(e) = std::thread::Builder::new()
            .name("cinder-drop".into())
            .spawn(move || {
                // just drain the channel; dropping each item frees it
                while rx.recv().is_ok() {}
            })
        {
            tracing::warn!("failed to spawn drop thread, large values will be freed inline: {e}");
        }

        Self { tx }
    }

    /// Defers dropping a detached value if it is large enough to be
    /// worth the channel overhead. Never blocks: a full channel means
    /// the value drops inline.
    pub fn defer_value(&self, value: SharedObject) {
        if !is_large(&value) {
            return;
        }
        match self.tx.try_send(Droppable::Value(value)) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => drop(item),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Defers dropping a flushed database's tables. Always deferred; a
    /// whole keyspace is always worth offloading.
    pub fn defer_tables(&self, dict: Dict<SharedObject>, expires: Dict<u64>) {
        if dict.is_empty() && expires.is_empty() {
            return;
        }
        match self.tx.try_send(Droppable::Tables(dict, expires)) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => drop(item),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

fn is_large(value: &SharedObject) -> bool {
    match value.value() {
        Value::Str(_) => false,
        Value::Set(set) => set.len() >= LARGE_COLLECTION_LEN,
    }
}
