//! Watched-key and ready-key trackers.
//!
//! The keyspace signals into these on every modification; the command
//! front-end (out of scope here) consumes them to fail optimistic
//! transactions and to wake clients blocked on list pops. Subscriptions
//! follow database *identity*: SWAPDB exchanges data between two
//! databases but leaves both trackers where they are.

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;

/// Opaque client identifier assigned by the front-end.
pub type ClientId = u64;

/// Keys watched for optimistic locking, per database.
///
/// Touching a key marks every watcher dirty; a dirty client's next
/// transaction aborts. The tracker never removes keys on touch — a
/// client stays subscribed until it unwatches.
#[derive(Debug, Default)]
pub struct Watchers {
    map: AHashMap<Bytes, Vec<ClientId>>,
    dirty: AHashSet<ClientId>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `client` to modifications of `key`.
    pub fn watch(&mut self, key: Bytes, client: ClientId) {
        let watchers = self.map.entry(key).or_default();
        if !watchers.contains(&client) {
            watchers.push(client);
        }
    }

    /// Drops every subscription held by `client`.
    pub fn unwatch_all(&mut self, client: ClientId) {
        self.map.retain(|_, watchers| {
            watchers.retain(|&c| c != client);
            !watchers.is_empty()
        });
    }

    /// Marks every watcher of `key` dirty. Returns how many there were.
    pub fn touch(&mut self, key: &[u8]) -> usize {
        match self.map.get(key) {
            Some(watchers) => {
                self.dirty.extend(watchers.iter().copied());
                watchers.len()
            }
            None => 0,
        }
    }

    /// Marks every watcher of every key dirty (FLUSHDB/FLUSHALL path).
    pub fn touch_all(&mut self) {
        for watchers in self.map.values() {
            self.dirty.extend(watchers.iter().copied());
        }
    }

    /// Whether `client` saw one of its watched keys change.
    pub fn is_dirty(&self, client: ClientId) -> bool {
        self.dirty.contains(&client)
    }

    /// Clears and returns the dirty set.
    pub fn take_dirty(&mut self) -> AHashSet<ClientId> {
        std::mem::take(&mut self.dirty)
    }

    /// Number of distinct watched keys.
    pub fn watched_keys(&self) -> usize {
        self.map.len()
    }
}

/// Queue of keys that became ready for blocked clients.
///
/// De-duplicated: signaling the same key twice before the drain is one
/// entry. The embedder drains the queue after each command.
#[derive(Debug, Default)]
pub struct ReadyKeys {
    queue: Vec<Bytes>,
    queued: AHashSet<Bytes>,
}

impl ReadyKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `key` as ready. Returns `false` if it was already queued.
    pub fn signal(&mut self, key: &Bytes) -> bool {
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.queue.push(key.clone());
        true
    }

    /// Returns the queued keys in signal order and resets the tracker.
    pub fn drain(&mut self) -> Vec<Bytes> {
        self.queued.clear();
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
