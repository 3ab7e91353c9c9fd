//! Explicit server context threaded through the keyspace API.
//!
//! Configuration flags, stats counters, and the keyspace-notification
//! queue live here instead of in process-wide state, so every keyspace
//! operation declares what it reads and mutates. The only state that
//! legitimately lives outside the context is the background drop
//! thread's channel.

use std::sync::Arc;

use bytes::Bytes;

use crate::object::{AccessPolicy, Object, SharedObject, Value};
use crate::time;

/// Cumulative counters reported in INFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub expired_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

/// Keyspace-notification class, matching the notification config flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Generic,
    String,
    Set,
    Expired,
}

/// One keyspace-notification event, e.g. `("set", "sadd", key, 0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    pub class: EventClass,
    pub event: &'static str,
    pub key: Bytes,
    pub db: u32,
}

/// Who issued the command currently executing. Replica expiration
/// masking depends on both fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller {
    /// The command arrived over the replication link from our master.
    pub from_master: bool,
    /// The command is read-only (does not mutate the keyspace).
    pub readonly_command: bool,
}

/// Server-wide flags, counters, and event queue.
#[derive(Debug, Default)]
pub struct ServerContext {
    /// LRU or LFU access accounting, fixed at configuration time.
    pub policy: AccessPolicy,
    /// Cluster mode: db 0 only, slot index maintained.
    pub cluster_enabled: bool,
    /// This process replicates from a master; expiration is advisory.
    pub is_replica: bool,
    /// Persisted state is being loaded; nothing expires yet.
    pub loading: bool,
    /// A snapshot/rewrite child is alive: skip access stamping and
    /// table resizes to keep copy-on-write pages shared.
    pub child_active: bool,
    /// Expired keys are deleted through the async-free queue.
    pub lazy_expire: bool,
    /// DEL behaves like UNLINK.
    pub lazy_server_del: bool,
    /// While a script runs, time stands still at this value so the
    /// script's expirations replicate consistently.
    pub pinned_clock_ms: Option<u64>,
    /// Caller identity for the command currently executing.
    pub caller: Caller,
    /// Count of keyspace-changing operations, driving propagation.
    pub dirty: u64,
    pub stats: Stats,
    /// Pending keyspace-notification events, drained by the embedder.
    pub events: Vec<KeyspaceEvent>,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current millisecond clock, honoring a pinned script clock.
    pub fn now_ms(&self) -> u64 {
        self.pinned_clock_ms.unwrap_or_else(time::now_ms)
    }

    /// Creates a refcounted object stamped for the configured policy.
    pub fn new_object(&self, value: Value) -> SharedObject {
        Arc::new(Object::new(value, self.policy, self.now_ms()))
    }

    /// Queues a keyspace-notification event.
    pub fn notify(&mut self, class: EventClass, event: &'static str, key: &Bytes, db: u32) {
        self.events.push(KeyspaceEvent {
            class,
            event,
            key: key.clone(),
            db,
        });
    }

    /// Drains the pending notification events.
    pub fn take_events(&mut self) -> Vec<KeyspaceEvent> {
        std::mem::take(&mut self.events)
    }
}
