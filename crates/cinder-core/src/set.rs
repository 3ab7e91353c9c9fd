//! The Set datatype: a tagged variant over two encodings.
//!
//! Small all-integer sets live in a sorted packed array ([`IntSet`]);
//! everything else is a hash table with empty values. Promotion from
//! intset to table happens on the first non-integer element or once the
//! cardinality passes [`MAX_INTSET_ENTRIES`], and is one-way: a set
//! never returns to the compact encoding.

use bytes::Bytes;

use crate::dict::Dict;
use crate::intset::IntSet;
use crate::object::parse_strict_i64;

/// Cardinality threshold past which an intset converts to a table.
pub const MAX_INTSET_ENTRIES: usize = 512;

/// A set value in one of its two encodings.
#[derive(Debug, Clone)]
pub enum SetValue {
    IntSet(IntSet),
    Table(Dict<()>),
}

impl SetValue {
    /// Picks the encoding that can hold `first_element`: an intset when
    /// it is integer-representable, a table otherwise.
    pub fn new_for(first_element: &[u8]) -> SetValue {
        if parse_strict_i64(first_element).is_some() {
            SetValue::IntSet(IntSet::new())
        } else {
            SetValue::Table(Dict::new())
        }
    }

    /// Creates an empty set in the compact encoding. Temporary
    /// accumulators start here and promote on demand, exactly like a
    /// set built element by element.
    pub fn new_intset() -> SetValue {
        SetValue::IntSet(IntSet::new())
    }

    pub fn len(&self) -> usize {
        match self {
            SetValue::IntSet(s) => s.len(),
            SetValue::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The encoding name reported by OBJECT ENCODING.
    pub fn encoding_name(&self) -> &'static str {
        match self {
            SetValue::IntSet(_) => "intset",
            SetValue::Table(_) => "hashtable",
        }
    }

    /// Adds an element. Returns `true` if it was not already present.
    ///
    /// May convert the set to the table encoding as a side effect; all
    /// prior elements survive the conversion.
    pub fn add(&mut self, element: &Bytes) -> bool {
        match self {
            SetValue::Table(dict) => {
                if dict.contains(element) {
                    return false;
                }
                dict.add(element.clone(), ())
                    .expect("membership checked above");
                true
            }
            SetValue::IntSet(ints) => match parse_strict_i64(element) {
                Some(v) => {
                    let inserted = ints.insert(v);
                    if inserted && ints.len() > MAX_INTSET_ENTRIES {
                        self.convert_to_table();
                    }
                    inserted
                }
                None => {
                    self.convert_to_table();
                    self.add(element)
                }
            },
        }
    }

    /// Removes an element. Returns `true` if it was present.
    pub fn remove(&mut self, element: &[u8]) -> bool {
        match self {
            SetValue::Table(dict) => {
                let removed = dict.remove(element).is_some();
                if removed {
                    dict.shrink_if_sparse();
                }
                removed
            }
            SetValue::IntSet(ints) => match parse_strict_i64(element) {
                Some(v) => ints.remove(v),
                None => false,
            },
        }
    }

    /// Membership test, parsing or stringifying across encodings as
    /// needed.
    pub fn contains(&self, element: &[u8]) -> bool {
        match self {
            SetValue::Table(dict) => dict.contains(element),
            SetValue::IntSet(ints) => match parse_strict_i64(element) {
                Some(v) => ints.contains(v),
                None => false,
            },
        }
    }

    /// A random element, or `None` if the set is empty. Table-encoded
    /// sets inherit the dict sampler's chain-length bias.
    pub fn random(&self) -> Option<Bytes> {
        match self {
            SetValue::IntSet(ints) => ints.random().map(int_to_bytes),
            SetValue::Table(dict) => dict.random_entry().map(|(k, _)| k.clone()),
        }
    }

    /// Iterates every element. Intset elements come out as their
    /// decimal rendering.
    pub fn iter(&self) -> SetIter<'_> {
        match self {
            SetValue::IntSet(ints) => SetIter::Int {
                set: ints,
                index: 0,
            },
            SetValue::Table(dict) => SetIter::Table(dict.iter()),
        }
    }

    /// Converts to the table encoding, presized to the current
    /// cardinality. No-op if already a table.
    pub fn convert_to_table(&mut self) {
        let SetValue::IntSet(ints) = self else {
            return;
        };
        let mut dict: Dict<()> = Dict::new();
        dict.expand(ints.len());
        for v in ints.iter() {
            dict.add(int_to_bytes(v), ())
                .expect("intset elements are distinct");
        }
        *self = SetValue::Table(dict);
    }
}

fn int_to_bytes(v: i64) -> Bytes {
    Bytes::from(v.to_string())
}

/// Iterator over set elements in either encoding.
pub enum SetIter<'a> {
    Int { set: &'a IntSet, index: usize },
    Table(crate::dict::Iter<'a, ()>),
}

impl Iterator for SetIter<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        match self {
            SetIter::Int { set, index } => {
                let v = set.get(*index)?;
                *index += 1;
                Some(int_to_bytes(v))
            }
            SetIter::Table(inner) => inner.next().map(|(k, _)| k.clone()),
        }
    }
}

/// Intersection of `sets`, iterating the smallest input and probing the
/// rest. Empty input yields an empty result.
pub fn sinter(sets: &[&SetValue]) -> Vec<Bytes> {
    let Some(_) = sets.first() else {
        return Vec::new();
    };
    let mut ordered: Vec<&SetValue> = sets.to_vec();
    ordered.sort_by_key(|s| s.len());

    let (smallest, rest) = ordered.split_first().expect("non-empty checked");
    let mut out = Vec::new();
    for element in smallest.iter() {
        if rest.iter().all(|s| s.contains(&element)) {
            out.push(element);
        }
    }
    out
}

/// Union of `sets`, accumulated into a fresh set that starts compact
/// and promotes like any other.
pub fn sunion(sets: &[&SetValue]) -> SetValue {
    let mut out = SetValue::new_intset();
    for set in sets {
        for element in set.iter() {
            out.add(&element);
        }
    }
    out
}

/// Difference `first − ⋃ others`.
///
/// Two algorithms, chosen by estimated cost:
/// - Algorithm 1, O(|first|·n): probe every element of `first` against
///   each other set. Better constants and prunes on hits, so its
///   estimate gets halved; when it wins and there are several other
///   sets, they are probed in descending cardinality order to find
///   collisions early.
/// - Algorithm 2, O(Σ|Sᵢ|): copy `first` into the result, then remove
///   every element of the others, stopping once the result is empty.
pub fn sdiff(first: &SetValue, others: &[&SetValue]) -> SetValue {
    let algo_one_work = (first.len() as u64) * (others.len() as u64 + 1) / 2;
    let algo_two_work: u64 = (first.len() as u64) + others.iter().map(|s| s.len() as u64).sum::<u64>();

    if algo_one_work <= algo_two_work {
        let mut probes: Vec<&SetValue> = others.to_vec();
        if probes.len() > 1 {
            probes.sort_by(|a, b| b.len().cmp(&a.len()));
        }
        let mut out = SetValue::new_intset();
        for element in first.iter() {
            if !probes.iter().any(|s| s.contains(&element)) {
                out.add(&element);
            }
        }
        out
    } else {
        let mut out = SetValue::new_intset();
        for element in first.iter() {
            out.add(&element);
        }
        for set in others {
            for element in set.iter() {
                out.remove(&element);
            }
            if out.is_empty() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_owned())
    }

    fn set_of(elements: &[&str]) -> SetValue {
        let mut s = SetValue::new_for(elements.first().map_or(b"0".as_ref(), |e| e.as_bytes()));
        for e in elements {
            s.add(&b(e));
        }
        s
    }

    fn members(s: &SetValue) -> HashSet<Bytes> {
        s.iter().collect()
    }

    #[test]
    fn integers_stay_compact() {
        let s = set_of(&["1", "2", "3"]);
        assert_eq!(s.encoding_name(), "intset");
        assert_eq!(s.len(), 3);
        assert!(s.contains(b"2"));
        assert!(!s.contains(b"4"));
    }

    #[test]
    fn non_integer_promotes() {
        let mut s = set_of(&["1", "2", "3"]);
        assert!(s.add(&b("hello")));
        assert_eq!(s.encoding_name(), "hashtable");
        assert_eq!(s.len(), 4);
        // prior elements survive the conversion
        for e in ["1", "2", "3", "hello"] {
            assert!(s.contains(e.as_bytes()), "lost {e}");
        }
    }

    #[test]
    fn cardinality_promotes() {
        let mut s = SetValue::new_for(b"0");
        for i in 0..MAX_INTSET_ENTRIES {
            assert!(s.add(&b(&i.to_string())));
        }
        assert_eq!(s.encoding_name(), "intset");
        assert!(s.add(&b("99999")));
        assert_eq!(s.encoding_name(), "hashtable");
        assert_eq!(s.len(), MAX_INTSET_ENTRIES + 1);
    }

    #[test]
    fn promotion_is_one_way() {
        let mut s = set_of(&["1", "2", "hello"]);
        assert_eq!(s.encoding_name(), "hashtable");
        s.remove(b"hello");
        s.remove(b"2");
        // back to all-integer contents, but the encoding stays
        assert_eq!(s.encoding_name(), "hashtable");
    }

    #[test]
    fn non_canonical_integers_are_strings() {
        let mut s = SetValue::new_for(b"01");
        assert_eq!(s.encoding_name(), "hashtable");
        s.add(&b("01"));
        s.add(&b("1"));
        // "01" and "1" are distinct set members
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn duplicates_never_counted() {
        let mut s = SetValue::new_for(b"5");
        assert!(s.add(&b("5")));
        assert!(!s.add(&b("5")));
        s.add(&b("x"));
        assert!(!s.add(&b("x")));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn remove_across_encodings() {
        let mut s = set_of(&["1", "2"]);
        assert!(s.remove(b"1"));
        assert!(!s.remove(b"1"));
        assert!(!s.remove(b"zzz"));

        let mut t = set_of(&["a", "b"]);
        assert!(t.remove(b"a"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn random_returns_members() {
        let s = set_of(&["1", "2", "3"]);
        for _ in 0..20 {
            assert!(s.contains(&s.random().unwrap()));
        }
        let t = set_of(&["x", "y"]);
        for _ in 0..20 {
            assert!(t.contains(&t.random().unwrap()));
        }
        assert_eq!(SetValue::new_intset().random(), None);
    }

    #[test]
    fn inter_is_commutative() {
        let a = set_of(&["1", "2", "3", "x"]);
        let c = set_of(&["2", "x", "z"]);
        let ab: HashSet<_> = sinter(&[&a, &c]).into_iter().collect();
        let ba: HashSet<_> = sinter(&[&c, &a]).into_iter().collect();
        assert_eq!(ab, ba);
        assert_eq!(ab, HashSet::from([b("2"), b("x")]));
    }

    #[test]
    fn inter_mixed_encodings() {
        let ints = set_of(&["1", "2", "3"]);
        let strs = set_of(&["2", "3", "extra"]);
        assert_eq!(strs.encoding_name(), "hashtable");
        let result: HashSet<_> = sinter(&[&ints, &strs]).into_iter().collect();
        assert_eq!(result, HashSet::from([b("2"), b("3")]));
    }

    #[test]
    fn inter_empty_input() {
        assert!(sinter(&[]).is_empty());
        let a = set_of(&["1"]);
        let empty = SetValue::new_intset();
        assert!(sinter(&[&a, &empty]).is_empty());
    }

    #[test]
    fn union_with_empty_is_identity() {
        let a = set_of(&["1", "2", "hello"]);
        let empty = SetValue::new_intset();
        let u = sunion(&[&a, &empty]);
        assert_eq!(members(&u), members(&a));
    }

    #[test]
    fn union_dedups() {
        let a = set_of(&["1", "2"]);
        let c = set_of(&["2", "3"]);
        let u = sunion(&[&a, &c]);
        assert_eq!(u.len(), 3);
        assert_eq!(u.encoding_name(), "intset");
    }

    #[test]
    fn diff_with_self_is_empty() {
        let a = set_of(&["1", "2", "3"]);
        assert!(sdiff(&a, &[&a]).is_empty());
    }

    #[test]
    fn diff_probe_algorithm() {
        // small first set against large subtrahends: probing wins
        let first = set_of(&["1", "2", "3", "4", "5", "a", "b"]);
        let small = set_of(&["2", "b"]);
        let mut big_elems: Vec<String> = (10..200).map(|i| i.to_string()).collect();
        big_elems.push("3".into());
        let big = set_of(&big_elems.iter().map(|s| s.as_str()).collect::<Vec<_>>());

        let result = sdiff(&first, &[&small, &big]);
        assert_eq!(
            members(&result),
            HashSet::from([b("1"), b("4"), b("5"), b("a")])
        );
    }

    #[test]
    fn diff_copy_and_remove_algorithm() {
        // large first set against several tiny subtrahends: the
        // copy-and-remove estimate is cheaper
        let wide_elems: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        let first = set_of(&wide_elems.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        let result = sdiff(&first, &[&set_of(&["5"]), &set_of(&["7"])]);
        assert_eq!(result.len(), 198);
        assert!(!result.contains(b"5"));
        assert!(!result.contains(b"7"));
        assert!(result.contains(b"6"));
    }

    #[test]
    fn diff_with_no_others_is_copy() {
        let a = set_of(&["1", "x"]);
        assert_eq!(members(&sdiff(&a, &[])), members(&a));
    }

    #[test]
    fn iter_covers_everything() {
        let mut s = SetValue::new_for(b"0");
        for i in 0..100 {
            s.add(&b(&i.to_string()));
        }
        s.add(&b("not-a-number"));
        let all = members(&s);
        assert_eq!(all.len(), 101);
        assert!(all.contains(&b("42")));
        assert!(all.contains(&b("not-a-number")));
    }
}
