//! A single logical database: the main index, the expire index, and the
//! per-database client trackers.
//!
//! The expire index never owns key storage: its entries are `Bytes`
//! clones of the keys held by the main dict, so the bytes live exactly
//! once. The invariant that every expires entry has a main-dict entry
//! is enforced with hard assertions — if it breaks, the key could never
//! be reclaimed, and continuing would corrupt the keyspace.

use bytes::Bytes;

use cinder_cluster::{key_slot, SlotIndex};

use crate::dict::Dict;
use crate::object::{AccessPolicy, Kind, SharedObject};
use crate::watch::{ClientId, ReadyKeys, Watchers};

/// One keyspace database.
#[derive(Debug)]
pub struct Database {
    pub id: u32,
    pub(crate) dict: Dict<SharedObject>,
    pub(crate) expires: Dict<u64>,
    /// Keys watched by clients for optimistic locking.
    pub watchers: Watchers,
    /// Keys that became ready for blocked clients since the last drain.
    pub ready_keys: ReadyKeys,
    /// Keys with clients blocked on them (list pops). The blocking
    /// machinery itself lives in the front-end; the core only records
    /// registrations and signals readiness.
    pub(crate) blocking_keys: Dict<Vec<ClientId>>,
    /// Exponential moving average of sampled TTLs, maintained by the
    /// active expire cycle. Reported in INFO.
    pub avg_ttl_ms: f64,
    /// Slot-to-key index; present only on database 0 in cluster mode.
    pub(crate) slot_index: Option<SlotIndex>,
}

impl Database {
    pub fn new(id: u32) -> Self {
        Database {
            id,
            dict: Dict::new(),
            expires: Dict::new(),
            watchers: Watchers::new(),
            ready_keys: ReadyKeys::new(),
            blocking_keys: Dict::new(),
            avg_ttl_ms: 0.0,
            slot_index: None,
        }
    }

    /// Turns on slot-to-key maintenance (cluster mode, database 0).
    pub fn enable_slot_index(&mut self) {
        self.slot_index = Some(SlotIndex::new());
    }

    /// Number of live keys (expired-but-unreclaimed included).
    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Number of keys carrying an expiration.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    /// Raw lookup with no expiration or stats side effects.
    pub fn lookup(&self, key: &[u8]) -> Option<&SharedObject> {
        self.dict.get(key)
    }

    /// Mutable handle to a stored value. In-place payload mutation goes
    /// through `Arc::make_mut` on the returned handle, which clones
    /// exactly when the object is shared (refcount above one).
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut SharedObject> {
        self.dict.get_mut(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.dict.contains(key)
    }

    /// Adds a key that the caller has verified absent.
    ///
    /// # Panics
    ///
    /// Panics if the key exists — the callers of this API promise
    /// absence, and a duplicate means that promise (and the keyspace)
    /// is broken.
    pub fn add(&mut self, key: Bytes, value: SharedObject) {
        let kind = value.kind();
        self.dict
            .add(key.clone(), value)
            .expect("add requires an absent key");
        if kind == Kind::List {
            self.signal_key_ready(&key);
        }
        if let Some(index) = &mut self.slot_index {
            index.insert(key_slot(&key), &key);
        }
    }

    /// Replaces the value of an existing key, preserving its expiry.
    ///
    /// In LFU mode the new value inherits the old access field and then
    /// takes one increment, so the counter survives the overwrite.
    ///
    /// # Panics
    ///
    /// Panics if the key is absent.
    pub fn overwrite(
        &mut self,
        key: &[u8],
        value: SharedObject,
        policy: AccessPolicy,
        now_ms: u64,
    ) {
        let slot = self
            .dict
            .get_mut(key)
            .expect("overwrite requires an existing key");
        if let AccessPolicy::Lfu { .. } = policy {
            value.inherit_access(slot);
            value.touch(policy, now_ms);
        }
        *slot = value;
    }

    /// Random entry straight off the dict sampler.
    pub fn random_entry(&self) -> Option<(&Bytes, &SharedObject)> {
        self.dict.random_entry()
    }

    /// Deletes a key, its value handle, and its expire entry.
    ///
    /// The expire entry goes first: it borrows the key storage owned by
    /// the main entry. Returns the detached value so the caller decides
    /// between inline and deferred dropping.
    pub fn delete(&mut self, key: &[u8]) -> Option<SharedObject> {
        if !self.expires.is_empty() {
            self.expires.remove(key);
        }
        let value = self.dict.remove(key)?;
        if let Some(index) = &mut self.slot_index {
            index.remove(key_slot(key), key);
        }
        Some(value)
    }

    /// Absolute expiration time of `key`, if one is set.
    pub fn get_expire(&self, key: &[u8]) -> Option<u64> {
        if self.expires.is_empty() {
            return None;
        }
        let when = self.expires.get(key)?;
        assert!(
            self.dict.contains(key),
            "expires entry without a main dict entry"
        );
        Some(*when)
    }

    /// Sets the absolute expiration of an existing key.
    ///
    /// The expire entry reuses the key storage of the main entry (a
    /// `Bytes` clone is a refcount bump on the same buffer).
    ///
    /// # Panics
    ///
    /// Panics if the key is not in the main dict.
    pub fn set_expire(&mut self, key: &[u8], when_ms: u64) {
        let (stored_key, _) = self
            .dict
            .get_entry(key)
            .expect("set_expire requires an existing key");
        let shared = stored_key.clone();
        self.expires.replace(shared, when_ms);
    }

    /// Removes the expiration of `key`. Returns whether one existed.
    ///
    /// # Panics
    ///
    /// Panics if the key is not in the main dict.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        assert!(
            self.dict.contains(key),
            "remove_expire on a key missing from the main dict"
        );
        self.expires.remove(key).is_some()
    }

    /// Registers `client` as blocked on `key`.
    pub fn block_on_key(&mut self, key: Bytes, client: ClientId) {
        match self.blocking_keys.get_mut(&key) {
            Some(clients) => {
                if !clients.contains(&client) {
                    clients.push(client);
                }
            }
            None => {
                self.blocking_keys
                    .add(key, vec![client])
                    .expect("absence checked");
            }
        }
    }

    /// Queues `key` on the ready list for the front-end to inspect.
    pub fn signal_key_ready(&mut self, key: &Bytes) {
        if self.blocking_keys.contains(key) {
            self.ready_keys.signal(key);
        }
    }

    /// Detaches the data tables, leaving the database empty. Client
    /// trackers stay: they follow database identity, not contents.
    pub fn detach_tables(&mut self) -> (Dict<SharedObject>, Dict<u64>) {
        self.avg_ttl_ms = 0.0;
        if let Some(index) = &mut self.slot_index {
            index.clear();
        }
        (self.dict.take(), self.expires.take())
    }

    /// Allows or forbids dict resizing (forbidden while a persistence
    /// child is alive, to keep copy-on-write pages shared).
    pub fn set_resize_allowed(&mut self, allowed: bool) {
        self.dict.set_resize_allowed(allowed);
        self.expires.set_resize_allowed(allowed);
    }

    /// Runs incremental rehash steps on both tables. Returns `true`
    /// while any migration is still in flight.
    pub fn rehash_step(&mut self, steps: usize) -> bool {
        let more_dict = self.dict.rehash(steps);
        let more_expires = self.expires.rehash(steps);
        more_dict || more_expires
    }
}
