//! Slot-to-key index: a compressed radix tree over `(slot, key)` composites.
//!
//! Every key in database 0 is indexed under the 2-byte big-endian slot
//! number followed by the key bytes. Seeking to a slot's 2-byte prefix and
//! walking the subtree yields exactly the keys of that slot in
//! lexicographic order, which is what slot rebalancing needs: "give me up
//! to N keys of slot S" and "drain slot S".

use bytes::Bytes;

use crate::SLOT_COUNT;

/// One radix tree node. The discriminating byte of `prefix` doubles as
/// the sort key inside the parent's child list, so child lists stay
/// ordered and subtree walks are lexicographic for free.
#[derive(Debug, Default)]
struct Node {
    prefix: Vec<u8>,
    children: Vec<Node>,
    is_key: bool,
}

impl Node {
    fn child_pos(&self, byte: u8) -> Result<usize, usize> {
        self.children.binary_search_by_key(&byte, |c| c.prefix[0])
    }
}

/// Radix tree keyed by `[slot_hi, slot_lo, key…]` with a per-slot counter.
///
/// Maintained only in cluster mode, and only for database 0.
#[derive(Debug)]
pub struct SlotIndex {
    root: Node,
    slot_counts: Box<[u32]>,
    len: usize,
}

impl Default for SlotIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            slot_counts: vec![0; SLOT_COUNT as usize].into_boxed_slice(),
            len: 0,
        }
    }

    /// Total number of indexed keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no key is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of keys currently indexed under `slot`.
    pub fn slot_count(&self, slot: u16) -> u32 {
        self.slot_counts[slot as usize]
    }

    /// Indexes `key` under `slot`. Returns `true` if the composite was new.
    pub fn insert(&mut self, slot: u16, key: &[u8]) -> bool {
        let word = composite(slot, key);
        let inserted = insert_rec(&mut self.root, &word);
        if inserted {
            self.slot_counts[slot as usize] += 1;
            self.len += 1;
        }
        inserted
    }

    /// Removes `key` from `slot`. Returns `true` if it was present.
    pub fn remove(&mut self, slot: u16, key: &[u8]) -> bool {
        let word = composite(slot, key);
        let removed = remove_rec(&mut self.root, &word);
        if removed {
            self.slot_counts[slot as usize] -= 1;
            self.len -= 1;
        }
        removed
    }

    /// Returns up to `limit` keys of `slot`, in lexicographic key order.
    pub fn keys_in_slot(&self, slot: u16, limit: usize) -> Vec<Bytes> {
        let mut out = Vec::new();
        if limit == 0 || self.slot_counts[slot as usize] == 0 {
            return out;
        }
        let pre = [(slot >> 8) as u8, (slot & 0xff) as u8];
        if let Some((node, leftover)) = descend(&self.root, &pre) {
            let mut acc = leftover.to_vec();
            collect(node, &mut acc, limit, &mut out);
        }
        out
    }

    /// Returns the lexicographically smallest key of `slot`, if any.
    ///
    /// Drives the seek-and-delete loop that empties a slot: the caller
    /// deletes through the keyspace (which removes the index entry) and
    /// seeks again until [`SlotIndex::slot_count`] hits zero.
    pub fn first_key_in_slot(&self, slot: u16) -> Option<Bytes> {
        self.keys_in_slot(slot, 1).pop()
    }

    /// Drops every entry and resets all slot counters.
    pub fn clear(&mut self) {
        self.root = Node::default();
        self.slot_counts.iter_mut().for_each(|c| *c = 0);
        self.len = 0;
    }
}

fn composite(slot: u16, key: &[u8]) -> Vec<u8> {
    let mut word = Vec::with_capacity(key.len() + 2);
    word.push((slot >> 8) as u8);
    word.push((slot & 0xff) as u8);
    word.extend_from_slice(key);
    word
}

fn common_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn insert_rec(node: &mut Node, word: &[u8]) -> bool {
    if word.is_empty() {
        let was = node.is_key;
        node.is_key = true;
        return !was;
    }
    match node.child_pos(word[0]) {
        Err(pos) => {
            node.children.insert(
                pos,
                Node {
                    prefix: word.to_vec(),
                    children: Vec::new(),
                    is_key: true,
                },
            );
            true
        }
        Ok(pos) => {
            let child = &mut node.children[pos];
            let common = common_len(&child.prefix, word);
            if common == child.prefix.len() {
                return insert_rec(child, &word[common..]);
            }

            // Partial match: split the child at the divergence point.
            let tail = child.prefix.split_off(common);
            let lower = Node {
                prefix: tail,
                children: std::mem::take(&mut child.children),
                is_key: child.is_key,
            };
            child.children = vec![lower];
            child.is_key = false;

            if common == word.len() {
                // The new word ends exactly at the split.
                child.is_key = true;
            } else {
                let branch = Node {
                    prefix: word[common..].to_vec(),
                    children: Vec::new(),
                    is_key: true,
                };
                let at = child
                    .child_pos(branch.prefix[0])
                    .expect_err("split bytes diverge");
                child.children.insert(at, branch);
            }
            true
        }
    }
}

fn remove_rec(node: &mut Node, word: &[u8]) -> bool {
    if word.is_empty() {
        let was = node.is_key;
        node.is_key = false;
        return was;
    }
    let Ok(pos) = node.child_pos(word[0]) else {
        return false;
    };
    let child = &mut node.children[pos];
    if !word.starts_with(&child.prefix) {
        return false;
    }
    let plen = child.prefix.len();
    let removed = remove_rec(child, &word[plen..]);
    if removed {
        if !child.is_key && child.children.is_empty() {
            node.children.remove(pos);
        } else if !child.is_key && child.children.len() == 1 {
            // Re-compress the pass-through node left behind.
            let only = child.children.pop().expect("length checked");
            child.prefix.extend_from_slice(&only.prefix);
            child.children = only.children;
            child.is_key = only.is_key;
        }
    }
    removed
}

/// Walks down the tree matching `pre`, returning the node whose subtree
/// holds every word starting with `pre`, plus the unmatched remainder of
/// that node's own prefix (non-empty when `pre` ends inside it).
fn descend<'a>(root: &'a Node, pre: &[u8]) -> Option<(&'a Node, &'a [u8])> {
    let mut node = root;
    let mut rem: &[u8] = pre;
    loop {
        if rem.is_empty() {
            return Some((node, &[]));
        }
        let pos = node.child_pos(rem[0]).ok()?;
        let child = &node.children[pos];
        let common = common_len(&child.prefix, rem);
        if common == rem.len() {
            return Some((child, &child.prefix[common..]));
        }
        if common == child.prefix.len() {
            node = child;
            rem = &rem[common..];
            continue;
        }
        return None;
    }
}

/// Depth-first, in-order collection of the keys below `node`. `acc` holds
/// the key bytes accumulated past the 2-byte slot prefix. Returns `true`
/// once `limit` keys have been gathered.
fn collect(node: &Node, acc: &mut Vec<u8>, limit: usize, out: &mut Vec<Bytes>) -> bool {
    if node.is_key {
        out.push(Bytes::copy_from_slice(acc));
        if out.len() >= limit {
            return true;
        }
    }
    for child in &node.children {
        acc.extend_from_slice(&child.prefix);
        let done = collect(child, acc, limit, out);
        acc.truncate(acc.len() - child.prefix.len());
        if done {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_slot;

    #[test]
    fn insert_and_count() {
        let mut idx = SlotIndex::new();
        assert!(idx.insert(100, b"alpha"));
        assert!(idx.insert(100, b"beta"));
        assert!(!idx.insert(100, b"alpha"));
        assert_eq!(idx.slot_count(100), 2);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn remove_decrements() {
        let mut idx = SlotIndex::new();
        idx.insert(7, b"key");
        assert!(idx.remove(7, b"key"));
        assert!(!idx.remove(7, b"key"));
        assert_eq!(idx.slot_count(7), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn keys_come_back_sorted() {
        let mut idx = SlotIndex::new();
        for key in [&b"cherry"[..], b"apple", b"banana", b"apricot"] {
            idx.insert(42, key);
        }
        let keys = idx.keys_in_slot(42, 10);
        assert_eq!(keys, vec!["apple", "apricot", "banana", "cherry"]);
    }

    #[test]
    fn limit_truncates() {
        let mut idx = SlotIndex::new();
        for i in 0..20 {
            idx.insert(3, format!("k{i:02}").as_bytes());
        }
        assert_eq!(idx.keys_in_slot(3, 5).len(), 5);
        assert_eq!(idx.keys_in_slot(3, 0).len(), 0);
    }

    #[test]
    fn slots_do_not_bleed() {
        let mut idx = SlotIndex::new();
        // Adjacent slots share the high byte of the composite prefix.
        idx.insert(0x0101, b"one");
        idx.insert(0x0102, b"two");
        idx.insert(0x0100, b"zero");
        assert_eq!(idx.keys_in_slot(0x0101, 10), vec!["one"]);
        assert_eq!(idx.keys_in_slot(0x0102, 10), vec!["two"]);
        assert_eq!(idx.keys_in_slot(0x0100, 10), vec!["zero"]);
        assert_eq!(idx.keys_in_slot(0x0103, 10), Vec::<Bytes>::new());
    }

    #[test]
    fn shared_prefixes_split_and_merge() {
        let mut idx = SlotIndex::new();
        idx.insert(9, b"user:1000");
        idx.insert(9, b"user:1001");
        idx.insert(9, b"user:1");
        assert_eq!(idx.keys_in_slot(9, 10), vec!["user:1", "user:1000", "user:1001"]);

        // Removing the middle key re-merges the split path.
        assert!(idx.remove(9, b"user:1000"));
        assert_eq!(idx.keys_in_slot(9, 10), vec!["user:1", "user:1001"]);
        assert!(idx.remove(9, b"user:1"));
        assert!(idx.remove(9, b"user:1001"));
        assert_eq!(idx.slot_count(9), 0);
    }

    #[test]
    fn empty_key_is_indexable() {
        let mut idx = SlotIndex::new();
        idx.insert(0, b"");
        assert_eq!(idx.keys_in_slot(0, 10), vec![Bytes::new()]);
        assert!(idx.remove(0, b""));
    }

    #[test]
    fn first_key_drives_drain() {
        let mut idx = SlotIndex::new();
        let slot = key_slot(b"foo");
        idx.insert(slot, b"foo");
        idx.insert(slot, b"bar{foo}");
        let mut drained = Vec::new();
        while let Some(key) = idx.first_key_in_slot(slot) {
            idx.remove(slot, &key);
            drained.push(key);
        }
        assert_eq!(drained.len(), 2);
        assert_eq!(idx.slot_count(slot), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut idx = SlotIndex::new();
        idx.insert(1, b"a");
        idx.insert(2, b"b");
        idx.clear();
        assert!(idx.is_empty());
        assert_eq!(idx.slot_count(1), 0);
        assert_eq!(idx.keys_in_slot(2, 10), Vec::<Bytes>::new());
    }
}
