//! The primary hash table: chained buckets, incremental rehash, random
//! sampling, and a scan cursor that stays valid across resizes.
//!
//! A `Dict` owns two tables. Outside of rehash only `ht[0]` is live.
//! When the load factor crosses the threshold a second table is
//! allocated at the next power of two and `rehash_idx` starts walking
//! `ht[0]`: every mutating operation migrates one bucket, and the cron
//! tick migrates batches, so the cost of a resize is spread across many
//! operations instead of stalling one of them. Lookups probe both
//! tables while the migration is in flight.
//!
//! Keys are `Bytes`: cloning one is a refcount bump on shared storage,
//! which is what lets the expire index hold the same key bytes as the
//! main dict without owning them.

use ahash::RandomState;
use bytes::Bytes;
use rand::Rng;

/// Initial table size. Must be a power of two.
const INITIAL_SIZE: usize = 4;

/// When resizing is disabled (a persistence child is active), still
/// force an expand once the load factor reaches this ratio.
const FORCE_RESIZE_RATIO: usize = 5;

/// Empty buckets visited per requested migration step before giving the
/// caller control back, to bound the latency of a single step.
const EMPTY_VISITS_PER_STEP: usize = 10;

/// Error returned by [`Dict::add`] when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateKey;

#[derive(Debug, Clone)]
struct Table<V> {
    buckets: Vec<Vec<(Bytes, V)>>,
    used: usize,
}

impl<V> Table<V> {
    fn unallocated() -> Self {
        Table {
            buckets: Vec::new(),
            used: 0,
        }
    }

    fn with_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        Table {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            used: 0,
        }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> u64 {
        debug_assert!(!self.buckets.is_empty());
        self.buckets.len() as u64 - 1
    }
}

/// Hash-indexed map from `Bytes` keys to `V`, with incremental rehash.
#[derive(Debug, Clone)]
pub struct Dict<V> {
    ht: [Table<V>; 2],
    /// `-1` when idle; otherwise the next `ht[0]` bucket to migrate.
    rehash_idx: i64,
    hasher: RandomState,
    /// Cleared while a persistence child is alive so buckets stay put
    /// and copy-on-write pages stay shared.
    resize_allowed: bool,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    /// Creates an empty dict. No buckets are allocated until first use.
    pub fn new() -> Self {
        Dict {
            ht: [Table::unallocated(), Table::unallocated()],
            rehash_idx: -1,
            hasher: RandomState::new(),
            resize_allowed: true,
        }
    }

    /// Number of live entries across both tables.
    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    /// Returns `true` if the dict holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while a bucket migration is in flight.
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    /// Enables or disables automatic expansion. While disabled, an
    /// expand still happens once the load factor reaches
    /// [`FORCE_RESIZE_RATIO`].
    pub fn set_resize_allowed(&mut self, allowed: bool) {
        self.resize_allowed = allowed;
    }

    fn hash(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Looks up a key, probing both tables during rehash.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let (t, b, c) = self.position_of(key)?;
        Some(&self.ht[t].buckets[b][c].1)
    }

    /// Mutable lookup. Performs one migration step like all mutating ops.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.rehash_step();
        let (t, b, c) = self.position_of(key)?;
        Some(&mut self.ht[t].buckets[b][c].1)
    }

    /// Returns the stored key and value. The returned key is the
    /// owning `Bytes` handle, which callers clone when they need a
    /// non-owning view of the same storage (the expire index does).
    pub fn get_entry(&self, key: &[u8]) -> Option<(&Bytes, &V)> {
        let (t, b, c) = self.position_of(key)?;
        let (k, v) = &self.ht[t].buckets[b][c];
        Some((k, v))
    }

    /// Returns `true` if the key is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.position_of(key).is_some()
    }

    /// Inserts a new key. Fails with [`DuplicateKey`] if it is present.
    pub fn add(&mut self, key: Bytes, value: V) -> Result<(), DuplicateKey> {
        self.rehash_step();
        self.expand_if_needed();
        if self.contains(&key) {
            return Err(DuplicateKey);
        }
        self.insert_new(key, value);
        Ok(())
    }

    /// Add-or-overwrite. Returns `true` if the key was new.
    pub fn replace(&mut self, key: Bytes, value: V) -> bool {
        self.rehash_step();
        self.expand_if_needed();
        if let Some((t, b, c)) = self.position_of(&key) {
            self.ht[t].buckets[b][c].1 = value;
            return false;
        }
        self.insert_new(key, value);
        true
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.rehash_step();
        let (t, b, c) = self.position_of(key)?;
        let (_, value) = self.ht[t].buckets[b].swap_remove(c);
        self.ht[t].used -= 1;
        Some(value)
    }

    /// Drops every entry and resets to the unallocated state.
    pub fn clear(&mut self) {
        self.ht = [Table::unallocated(), Table::unallocated()];
        self.rehash_idx = -1;
    }

    /// Detaches the whole dict, leaving an empty one behind. The caller
    /// owns the returned dict — typically to ship it to the background
    /// drop thread.
    pub fn take(&mut self) -> Dict<V> {
        std::mem::take(self)
    }

    /// Preallocates for `size` entries and, if the dict is already
    /// populated, kicks off an incremental migration into the larger
    /// table. No-op while a rehash is running or if `size` can't hold
    /// the current entries.
    pub fn expand(&mut self, size: usize) -> bool {
        if self.is_rehashing() || self.len() > size {
            return false;
        }
        let target = size.max(INITIAL_SIZE).next_power_of_two();
        if target == self.ht[0].size() {
            return false;
        }
        if self.ht[0].size() == 0 {
            self.ht[0] = Table::with_size(target);
        } else {
            self.ht[1] = Table::with_size(target);
            self.rehash_idx = 0;
        }
        true
    }

    /// Shrinks the table towards the live entry count when it has
    /// become mostly empty. Used by callers that bulk-delete.
    pub fn shrink_if_sparse(&mut self) {
        if self.is_rehashing() || !self.resize_allowed {
            return;
        }
        let size = self.ht[0].size();
        if size > INITIAL_SIZE && self.len() * 100 / size < 10 {
            self.expand(self.len());
        }
    }

    /// Migrates up to `steps` non-empty buckets from `ht[0]` to `ht[1]`,
    /// skipping a bounded number of empty buckets. Returns `true` while
    /// more migration work remains.
    pub fn rehash(&mut self, steps: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = steps * EMPTY_VISITS_PER_STEP;

        let (front, back) = self.ht.split_at_mut(1);
        let (t0, t1) = (&mut front[0], &mut back[0]);

        for _ in 0..steps {
            if t0.used == 0 {
                break;
            }
            debug_assert!((self.rehash_idx as usize) < t0.size());
            while t0.buckets[self.rehash_idx as usize].is_empty() {
                self.rehash_idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
            }
            let chain = std::mem::take(&mut t0.buckets[self.rehash_idx as usize]);
            t0.used -= chain.len();
            for (key, value) in chain {
                let idx = (self.hasher.hash_one(&key) & t1.mask()) as usize;
                t1.buckets[idx].push((key, value));
                t1.used += 1;
            }
            self.rehash_idx += 1;
        }

        if t0.used == 0 {
            self.ht[0] = std::mem::replace(&mut self.ht[1], Table::unallocated());
            self.rehash_idx = -1;
            return false;
        }
        true
    }

    /// Picks a random entry, or `None` if empty.
    ///
    /// The draw is uniform over buckets (skewed towards the live range
    /// during rehash) and then uniform within the chosen chain, so
    /// entries on short chains are slightly favored. Callers needing
    /// fairness sample several times; the eviction and SRANDMEMBER
    /// samplers do exactly that.
    pub fn random_entry(&self) -> Option<(&Bytes, &V)> {
        if self.is_empty() {
            return None;
        }
        let mut rng = rand::rng();
        let chain = loop {
            let candidate = if self.is_rehashing() {
                // Buckets below rehash_idx have already been emptied.
                let s0 = self.ht[0].size();
                let s1 = self.ht[1].size();
                let base = self.rehash_idx as usize;
                let h = base + rng.random_range(0..s0 + s1 - base);
                if h >= s0 {
                    &self.ht[1].buckets[h - s0]
                } else {
                    &self.ht[0].buckets[h]
                }
            } else {
                let idx = rng.random_range(0..self.ht[0].size());
                &self.ht[0].buckets[idx]
            };
            if !candidate.is_empty() {
                break candidate;
            }
        };
        let (k, v) = &chain[rng.random_range(0..chain.len())];
        Some((k, v))
    }

    /// One step of cursor-based iteration.
    ///
    /// Emits every entry of the bucket(s) selected by `cursor` and
    /// returns the next cursor, `0` when the table has been covered.
    /// The cursor advances by reversed-bit increment, and during rehash
    /// the bucket is visited in both tables using the larger table's
    /// mask, so entries present for the whole scan are emitted at least
    /// once no matter how the table grows or shrinks in between calls.
    /// Entries may be emitted more than once; callers deduplicate.
    pub fn scan(&self, cursor: u64, mut emit: impl FnMut(&Bytes, &V)) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let mut v = cursor;

        if !self.is_rehashing() {
            let t0 = &self.ht[0];
            let m0 = t0.mask();
            for (k, val) in &t0.buckets[(v & m0) as usize] {
                emit(k, val);
            }
            v |= !m0;
            v = v.reverse_bits().wrapping_add(1).reverse_bits();
            return v;
        }

        // Iterate the smaller table first, then every expansion of the
        // same cursor in the larger table.
        let (small, large) = if self.ht[0].size() <= self.ht[1].size() {
            (&self.ht[0], &self.ht[1])
        } else {
            (&self.ht[1], &self.ht[0])
        };
        let m0 = small.mask();
        let m1 = large.mask();

        for (k, val) in &small.buckets[(v & m0) as usize] {
            emit(k, val);
        }
        loop {
            for (k, val) in &large.buckets[(v & m1) as usize] {
                emit(k, val);
            }
            v |= !m1;
            v = v.reverse_bits().wrapping_add(1).reverse_bits();
            if v & (m0 ^ m1) == 0 {
                break;
            }
        }
        v
    }

    /// Iterates every entry. The shared borrow is the read latch: no
    /// mutation — rehash steps included — can happen while the iterator
    /// is alive, which is the "safe" iteration mode.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            dict: self,
            table: 0,
            bucket: 0,
            chain: 0,
        }
    }

    /// Starts a raw cursor that does not borrow the dict between steps.
    ///
    /// The caller passes the dict back on every [`RawIter::next`] call
    /// and promises not to mutate it for the cursor's lifetime; the
    /// fingerprint check in [`RawIter::finish`] turns a broken promise
    /// into a loud failure instead of silently skipped entries.
    pub fn raw_iter(&self) -> RawIter {
        RawIter {
            table: 0,
            bucket: 0,
            chain: 0,
            fingerprint: self.fingerprint(),
        }
    }

    /// A digest of the dict's structural state: table addresses, sizes,
    /// entry counts, and rehash position.
    pub fn fingerprint(&self) -> u64 {
        let integers = [
            self.ht[0].buckets.as_ptr() as u64,
            self.ht[0].size() as u64,
            self.ht[0].used as u64,
            self.ht[1].buckets.as_ptr() as u64,
            self.ht[1].size() as u64,
            self.ht[1].used as u64,
            self.rehash_idx as u64,
        ];
        let mut hash: u64 = 0;
        for n in integers {
            hash = hash.wrapping_add(n);
            // Tomas Wang's 64 bit integer mix
            hash = (!hash).wrapping_add(hash << 21);
            hash ^= hash >> 24;
            hash = hash.wrapping_add(hash << 3).wrapping_add(hash << 8);
            hash ^= hash >> 14;
            hash = hash.wrapping_add(hash << 2).wrapping_add(hash << 4);
            hash ^= hash >> 28;
            hash = hash.wrapping_add(hash << 31);
        }
        hash
    }

    fn position_of(&self, key: &[u8]) -> Option<(usize, usize, usize)> {
        if self.is_empty() {
            return None;
        }
        let h = self.hash(key);
        for t in 0..2 {
            let table = &self.ht[t];
            if table.size() == 0 {
                break;
            }
            let b = (h & table.mask()) as usize;
            if let Some(c) = table.buckets[b].iter().position(|(k, _)| k == key) {
                return Some((t, b, c));
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Inserts a key known to be absent into the write table (`ht[1]`
    /// during rehash).
    fn insert_new(&mut self, key: Bytes, value: V) {
        let t = if self.is_rehashing() { 1 } else { 0 };
        let h = self.hash(&key);
        let table = &mut self.ht[t];
        let b = (h & table.mask()) as usize;
        table.buckets[b].push((key, value));
        table.used += 1;
    }

    fn rehash_step(&mut self) {
        if self.is_rehashing() {
            self.rehash(1);
        }
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.ht[0].size() == 0 {
            self.ht[0] = Table::with_size(INITIAL_SIZE);
            return;
        }
        let used = self.ht[0].used;
        let size = self.ht[0].size();
        if used >= size && (self.resize_allowed || used / size >= FORCE_RESIZE_RATIO) {
            self.expand(used * 2);
        }
    }
}

/// Borrowing iterator over all entries (safe mode).
pub struct Iter<'a, V> {
    dict: &'a Dict<V>,
    table: usize,
    bucket: usize,
    chain: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.table > 1 {
                return None;
            }
            let table = &self.dict.ht[self.table];
            if self.bucket >= table.size() {
                // ht[1] only holds entries during rehash
                self.table += 1;
                self.bucket = 0;
                self.chain = 0;
                if self.table == 1 && !self.dict.is_rehashing() {
                    return None;
                }
                continue;
            }
            let chain = &table.buckets[self.bucket];
            if self.chain >= chain.len() {
                self.bucket += 1;
                self.chain = 0;
                continue;
            }
            let (k, v) = &chain[self.chain];
            self.chain += 1;
            return Some((k, v));
        }
    }
}

/// Position-based cursor over a dict that must not change underneath it
/// (unsafe mode). Mutating the dict between `next` calls is a
/// programmer error, detected by the fingerprint check in `finish`.
#[derive(Debug)]
pub struct RawIter {
    table: usize,
    bucket: usize,
    chain: usize,
    fingerprint: u64,
}

impl RawIter {
    /// Yields the next entry, or `None` when exhausted.
    pub fn next<'a, V>(&mut self, dict: &'a Dict<V>) -> Option<(&'a Bytes, &'a V)> {
        loop {
            if self.table > 1 {
                return None;
            }
            let table = &dict.ht[self.table];
            if self.bucket >= table.size() {
                self.table += 1;
                self.bucket = 0;
                self.chain = 0;
                if self.table == 1 && !dict.is_rehashing() {
                    self.table = 2;
                    return None;
                }
                continue;
            }
            let chain = &table.buckets[self.bucket];
            if self.chain >= chain.len() {
                self.bucket += 1;
                self.chain = 0;
                continue;
            }
            let (k, v) = &chain[self.chain];
            self.chain += 1;
            return Some((k, v));
        }
    }

    /// Verifies the dict was not mutated during the iteration.
    ///
    /// # Panics
    ///
    /// Panics if the fingerprint no longer matches.
    pub fn finish<V>(self, dict: &Dict<V>) {
        assert_eq!(
            self.fingerprint,
            dict.fingerprint(),
            "dict mutated during raw iteration"
        );
    }
}
