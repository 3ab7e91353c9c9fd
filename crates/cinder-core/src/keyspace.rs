//! The keyspace: an array of databases and the operations commands are
//! built from.
//!
//! Every operation that can observe an expired key routes through
//! [`crate::expire::expire_if_needed`] first, so callers never see a
//! dead key on a master. All server-wide flags and counters come in
//! through the explicit [`ServerContext`]; the only other collaborators
//! are the injected propagation sink and the background drop handle.

use bytes::Bytes;

use tracing::warn;

use crate::db::Database;
use crate::dropper::DropHandle;
use crate::error::KeyspaceError;
use crate::expire;
use crate::object::{Kind, SharedObject};
use crate::propagate::PropagationSink;
use crate::scan::GlobPattern;
use crate::server::{EventClass, ServerContext};

/// Keys whose KEYS invocation triggers the large-keyspace warning.
const KEYS_WARN_THRESHOLD: usize = 10_000;

/// Bucket batches migrated per database per cron tick.
const CRON_REHASH_STEPS: usize = 8;

/// Wall-clock budget of one active-expire run inside the cron tick.
const CRON_EXPIRE_BUDGET_MS: u64 = 25;

/// Sync or async reclamation for FLUSHDB/FLUSHALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    Sync,
    Async,
}

/// The array of logical databases plus the async-free handle.
#[derive(Debug)]
pub struct Keyspace {
    dbs: Vec<Database>,
    drop_handle: Option<DropHandle>,
}

impl Keyspace {
    /// Creates `dbnum` empty databases. In cluster mode only database 0
    /// is usable and it carries the slot index.
    pub fn new(dbnum: usize, cluster_enabled: bool) -> Self {
        assert!(dbnum > 0, "at least one database is required");
        let mut dbs: Vec<Database> = (0..dbnum as u32).map(Database::new).collect();
        if cluster_enabled {
            dbs[0].enable_slot_index();
        }
        Keyspace {
            dbs,
            drop_handle: None,
        }
    }

    /// Attaches the background drop handle used by async deletes and
    /// async flushes.
    pub fn set_drop_handle(&mut self, handle: DropHandle) {
        self.drop_handle = Some(handle);
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn db(&self, idx: usize) -> &Database {
        &self.dbs[idx]
    }

    pub fn db_mut(&mut self, idx: usize) -> &mut Database {
        &mut self.dbs[idx]
    }

    /// Validates a SELECT target and returns it as an index.
    pub fn select(&self, id: i64, ctx: &ServerContext) -> Result<usize, KeyspaceError> {
        if ctx.cluster_enabled && id != 0 {
            return Err(KeyspaceError::NotAllowedInCluster("SELECT"));
        }
        if id < 0 || id as usize >= self.dbs.len() {
            return Err(KeyspaceError::OutOfRange);
        }
        Ok(id as usize)
    }

    /// Read-path lookup: lazy expiration, hit/miss stats, and access
    /// stamping (suppressed by `no_touch` and while a persistence child
    /// is active).
    ///
    /// On a replica a logically-expired key reads as absent when the
    /// caller is not the master link and the command is read-only, even
    /// though the key physically remains until the master's DEL.
    pub fn lookup_read(
        &mut self,
        db: usize,
        key: &Bytes,
        no_touch: bool,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Option<SharedObject> {
        if expire::expire_if_needed(&mut self.dbs[db], key, ctx, sink, self.drop_handle.as_ref()) {
            let masked = !ctx.is_replica
                || (!ctx.caller.from_master && ctx.caller.readonly_command);
            if masked {
                ctx.stats.keyspace_misses += 1;
                return None;
            }
        }
        match self.dbs[db].lookup(key) {
            Some(value) => {
                if !ctx.child_active && !no_touch {
                    value.touch(ctx.policy, ctx.now_ms());
                }
                ctx.stats.keyspace_hits += 1;
                Some(value.clone())
            }
            None => {
                ctx.stats.keyspace_misses += 1;
                None
            }
        }
    }

    /// Write-path lookup: lazy expiration only — no stats, no access
    /// stamping.
    pub fn lookup_write(
        &mut self,
        db: usize,
        key: &Bytes,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Option<SharedObject> {
        expire::expire_if_needed(&mut self.dbs[db], key, ctx, sink, self.drop_handle.as_ref());
        self.dbs[db].lookup(key).cloned()
    }

    /// Adds a key the caller has verified absent. Panics on duplicates.
    pub fn add(&mut self, db: usize, key: Bytes, value: SharedObject) {
        self.dbs[db].add(key, value);
    }

    /// Replaces an existing key's value, preserving its expiry (and, in
    /// LFU mode, its access counter). Panics if absent.
    pub fn overwrite(&mut self, db: usize, key: &Bytes, value: SharedObject, ctx: &ServerContext) {
        self.dbs[db].overwrite(key, value, ctx.policy, ctx.now_ms());
    }

    /// High-level SET: add or overwrite, drop any expiry, and signal
    /// watchers of the key.
    pub fn set(
        &mut self,
        db: usize,
        key: &Bytes,
        value: SharedObject,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) {
        if self.lookup_write(db, key, ctx, sink).is_none() {
            self.dbs[db].add(key.clone(), value);
        } else {
            self.dbs[db].overwrite(key, value, ctx.policy, ctx.now_ms());
            self.dbs[db].remove_expire(key);
        }
        self.signal_modified(db, key);
    }

    /// Synchronous delete. Returns whether the key existed.
    pub fn delete_sync(&mut self, db: usize, key: &[u8]) -> bool {
        self.dbs[db].delete(key).is_some()
    }

    /// Delete with the value's destructor deferred to the drop thread.
    /// The key is gone immediately either way.
    pub fn delete_async(&mut self, db: usize, key: &[u8]) -> bool {
        match self.dbs[db].delete(key) {
            Some(value) => {
                if let Some(handle) = &self.drop_handle {
                    handle.defer_value(value);
                }
                true
            }
            None => false,
        }
    }

    /// Delete honoring the server-wide lazy-free configuration.
    pub fn delete(&mut self, db: usize, key: &[u8], ctx: &ServerContext) -> bool {
        if ctx.lazy_server_del {
            self.delete_async(db, key)
        } else {
            self.delete_sync(db, key)
        }
    }

    /// Existence check with lazy expiration applied first.
    pub fn exists(
        &mut self,
        db: usize,
        key: &Bytes,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> bool {
        expire::expire_if_needed(&mut self.dbs[db], key, ctx, sink, self.drop_handle.as_ref());
        self.dbs[db].contains(key)
    }

    /// A random live key. Keys found expired are reclaimed and the draw
    /// repeats; on a replica (where reclamation is the master's job)
    /// the retry count is bounded and a logically-expired key may be
    /// returned rather than spinning.
    pub fn random_key(
        &mut self,
        db: usize,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Option<Bytes> {
        let mut advisory_hits = 0;
        loop {
            let key = self.dbs[db].random_entry().map(|(k, _)| k.clone())?;
            if self.dbs[db].get_expire(&key).is_none() {
                return Some(key);
            }
            if !expire::expire_if_needed(
                &mut self.dbs[db],
                &key,
                ctx,
                sink,
                self.drop_handle.as_ref(),
            ) {
                return Some(key);
            }
            if ctx.is_replica {
                advisory_hits += 1;
                if advisory_hits >= 100 {
                    return Some(key);
                }
            }
        }
    }

    /// Number of keys in a database, expired-but-unreclaimed included.
    pub fn dbsize(&self, db: usize) -> usize {
        self.dbs[db].len()
    }

    /// Empties one database (`Some(idx)`) or all of them (`None`).
    /// Returns the number of keys removed. The watched-key flush hook
    /// fires before anything is freed.
    pub fn empty_db(
        &mut self,
        which: Option<usize>,
        mode: FlushMode,
        _ctx: &mut ServerContext,
    ) -> Result<u64, KeyspaceError> {
        if let Some(idx) = which {
            if idx >= self.dbs.len() {
                return Err(KeyspaceError::OutOfRange);
            }
        }
        let mut removed = 0u64;
        for idx in 0..self.dbs.len() {
            if which.is_some_and(|w| w != idx) {
                continue;
            }
            let db = &mut self.dbs[idx];
            db.watchers.touch_all();
            removed += db.len() as u64;
            let (dict, expires) = db.detach_tables();
            match (mode, &self.drop_handle) {
                (FlushMode::Async, Some(handle)) => handle.defer_tables(dict, expires),
                _ => drop((dict, expires)),
            }
        }
        Ok(removed)
    }

    /// Atomically exchanges the data of two databases.
    ///
    /// The `(dict, expires, avg_ttl)` triples move; watchers, blocked
    /// clients, and ready keys stay with their database identity. After
    /// the swap, both databases rescan their blocked keys and signal
    /// any that now hold a list.
    pub fn swap_databases(
        &mut self,
        a: i64,
        b: i64,
        ctx: &ServerContext,
    ) -> Result<(), KeyspaceError> {
        if ctx.cluster_enabled {
            return Err(KeyspaceError::NotAllowedInCluster("SWAPDB"));
        }
        let len = self.dbs.len() as i64;
        if a < 0 || a >= len || b < 0 || b >= len {
            return Err(KeyspaceError::OutOfRange);
        }
        let (a, b) = (a as usize, b as usize);
        if a == b {
            return Ok(());
        }

        let (low, high) = (a.min(b), a.max(b));
        let (left, right) = self.dbs.split_at_mut(high);
        let (x, y) = (&mut left[low], &mut right[0]);
        std::mem::swap(&mut x.dict, &mut y.dict);
        std::mem::swap(&mut x.expires, &mut y.expires);
        std::mem::swap(&mut x.avg_ttl_ms, &mut y.avg_ttl_ms);

        scan_blocked_keys_for_ready(x);
        scan_blocked_keys_for_ready(y);
        Ok(())
    }

    /// Transfers a key (value and expiry) between databases. `Ok(false)`
    /// when the source key is missing or the destination already has it.
    pub fn move_key(
        &mut self,
        src: usize,
        dst: i64,
        key: &Bytes,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Result<bool, KeyspaceError> {
        if ctx.cluster_enabled {
            return Err(KeyspaceError::NotAllowedInCluster("MOVE"));
        }
        if dst < 0 || dst as usize >= self.dbs.len() {
            return Err(KeyspaceError::OutOfRange);
        }
        let dst = dst as usize;
        if src == dst {
            return Err(KeyspaceError::SameObject);
        }

        let Some(value) = self.lookup_write(src, key, ctx, sink) else {
            return Ok(false);
        };
        let expire = self.dbs[src].get_expire(key);
        if self.lookup_write(dst, key, ctx, sink).is_some() {
            return Ok(false);
        }

        self.dbs[dst].add(key.clone(), value);
        if let Some(when) = expire {
            self.dbs[dst].set_expire(key, when);
        }
        self.delete(src, key, ctx);
        ctx.dirty += 1;
        Ok(true)
    }

    /// Renames `src` to `dst`, carrying the expiry. With `nx`, an
    /// existing destination makes this return `Ok(false)`. Renaming a
    /// key onto itself succeeds if the key exists.
    pub fn rename(
        &mut self,
        db: usize,
        src: &Bytes,
        dst: &Bytes,
        nx: bool,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Result<bool, KeyspaceError> {
        let same_key = src == dst;
        let Some(value) = self.lookup_write(db, src, ctx, sink) else {
            return Err(KeyspaceError::NoKey);
        };
        if same_key {
            return Ok(!nx);
        }

        let expire = self.dbs[db].get_expire(src);
        if self.lookup_write(db, dst, ctx, sink).is_some() {
            if nx {
                return Ok(false);
            }
            self.delete(db, dst, ctx);
        }
        self.dbs[db].add(dst.clone(), value);
        if let Some(when) = expire {
            self.dbs[db].set_expire(dst, when);
        }
        self.delete(db, src, ctx);

        self.signal_modified(db, src);
        self.signal_modified(db, dst);
        ctx.notify(EventClass::Generic, "rename_from", src, self.dbs[db].id);
        ctx.notify(EventClass::Generic, "rename_to", dst, self.dbs[db].id);
        ctx.dirty += 1;
        Ok(true)
    }

    /// All live keys matching a glob pattern. O(n) over the database;
    /// expired keys found along the way are reclaimed and excluded.
    pub fn keys(
        &mut self,
        db: usize,
        pattern: &[u8],
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> Vec<Bytes> {
        let len = self.dbs[db].len();
        if len > KEYS_WARN_THRESHOLD {
            warn!(key_count = len, "KEYS on large keyspace, consider SCAN instead");
        }
        let all_keys = pattern == b"*";
        let matcher = GlobPattern::new(pattern);
        let mut matched: Vec<Bytes> = self.dbs[db]
            .dict
            .iter()
            .filter(|(k, _)| all_keys || matcher.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        matched.retain(|key| {
            !expire::expire_if_needed(&mut self.dbs[db], key, ctx, sink, self.drop_handle.as_ref())
        });
        matched
    }

    /// Marks the key's watchers dirty (every successful modification
    /// calls this).
    pub fn signal_modified(&mut self, db: usize, key: &Bytes) {
        self.dbs[db].watchers.touch(key);
    }

    /// Lazy-expiration check with the keyspace's drop handle wired in.
    pub fn expire_if_needed(
        &mut self,
        db: usize,
        key: &Bytes,
        ctx: &mut ServerContext,
        sink: &mut dyn PropagationSink,
    ) -> bool {
        expire::expire_if_needed(&mut self.dbs[db], key, ctx, sink, self.drop_handle.as_ref())
    }

    /// Expiry accessors, delegating to the database.
    pub fn get_expire(&self, db: usize, key: &[u8]) -> Option<u64> {
        self.dbs[db].get_expire(key)
    }

    pub fn set_expire(&mut self, db: usize, key: &[u8], when_ms: u64) {
        self.dbs[db].set_expire(key, when_ms);
    }

    pub fn remove_expire(&mut self, db: usize, key: &[u8]) -> bool {
        self.dbs[db].remove_expire(key)
    }

    /// Keys in a cluster slot, up to `count`. Empty when not clustered.
    pub fn get_keys_in_slot(&self, slot: u16, count: usize) -> Vec<Bytes> {
        match &self.dbs[0].slot_index {
            Some(index) => index.keys_in_slot(slot, count),
            None => Vec::new(),
        }
    }

    /// Number of keys in a cluster slot. Zero when not clustered.
    pub fn count_keys_in_slot(&self, slot: u16) -> u64 {
        match &self.dbs[0].slot_index {
            Some(index) => index.slot_count(slot) as u64,
            None => 0,
        }
    }

    /// Deletes every key of a slot (database 0), seek-and-delete until
    /// the slot counter hits zero. Returns the number removed.
    pub fn delete_keys_in_slot(&mut self, slot: u16) -> u64 {
        let mut removed = 0u64;
        loop {
            let Some(key) = self
                .dbs[0]
                .slot_index
                .as_ref()
                .and_then(|index| index.first_key_in_slot(slot))
            else {
                break;
            };
            assert!(
                self.delete_sync(0, &key),
                "slot index entry without a main dict entry"
            );
            removed += 1;
        }
        removed
    }

    /// The periodic background tick: toggles resize permission off
    /// while a persistence child is active, advances incremental
    /// rehash, and runs one active expiration cycle. Returns the number
    /// of keys the expire cycle reclaimed.
    pub fn cron(&mut self, ctx: &mut ServerContext, sink: &mut dyn PropagationSink) -> u64 {
        let resize_allowed = !ctx.child_active;
        for db in &mut self.dbs {
            db.set_resize_allowed(resize_allowed);
        }
        if resize_allowed {
            for db in &mut self.dbs {
                db.rehash_step(CRON_REHASH_STEPS);
            }
        }
        expire::active_expire_cycle(
            &mut self.dbs,
            ctx,
            sink,
            self.drop_handle.as_ref(),
            CRON_EXPIRE_BUDGET_MS,
        )
    }
}

/// After a SWAPDB, a client blocked on key X may suddenly have a list
/// at X: rescan the registrations and signal readiness. Uses the raw
/// dict cursor since nothing mutates the registration table here.
fn scan_blocked_keys_for_ready(db: &mut Database) {
    if db.blocking_keys.is_empty() {
        return;
    }
    let mut pending = Vec::new();
    let mut it = db.blocking_keys.raw_iter();
    while let Some((key, _)) = it.next(&db.blocking_keys) {
        pending.push(key.clone());
    }
    it.finish(&db.blocking_keys);
    for key in pending {
        if db.lookup(&key).is_some_and(|v| v.kind() == Kind::List) {
            db.signal_key_ready(&key);
        }
    }
}
