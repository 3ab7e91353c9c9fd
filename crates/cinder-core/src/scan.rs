//! The unified cursor scan behind SCAN and SSCAN, plus the glob
//! matcher used by MATCH and KEYS.
//!
//! Dict-backed targets advance with [`crate::dict::Dict::scan`], bounded
//! to `10 × count` cursor steps per call so a pathologically sparse
//! table cannot stall the server. Compact encodings (intset) are always
//! small, so they are returned whole with a final cursor of zero.

use bytes::Bytes;

use crate::keyspace::Keyspace;
use crate::propagate::PropagationSink;
use crate::server::ServerContext;
use crate::set::SetValue;

/// One page of scan output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; zero means the scan is done.
    pub cursor: u64,
    pub items: Vec<Bytes>,
}

/// Cursor steps allowed per call, as a multiple of `count`.
const MAX_ITERATIONS_FACTOR: u64 = 10;

/// SCAN over a database's key names.
///
/// `count` is an advisory batch size, not a limit. Collected keys are
/// filtered by the optional pattern and by expiry — an expired key is
/// reclaimed on the spot and not returned.
pub fn scan_keyspace(
    ks: &mut Keyspace,
    db: usize,
    cursor: u64,
    count: u64,
    pattern: Option<&[u8]>,
    ctx: &mut ServerContext,
    sink: &mut dyn PropagationSink,
) -> ScanPage {
    let count = count.max(1);
    let mut items = Vec::new();
    let mut cursor = cursor;
    let mut iterations = count * MAX_ITERATIONS_FACTOR;

    loop {
        cursor = ks.db(db).dict.scan(cursor, |key, _| {
            items.push(key.clone());
        });
        iterations -= 1;
        if cursor == 0 || iterations == 0 || items.len() as u64 >= count {
            break;
        }
    }

    filter_pattern(&mut items, pattern);
    items.retain(|key| !ks.expire_if_needed(db, key, ctx, sink));

    ScanPage { cursor, items }
}

/// SSCAN over one set value.
///
/// Table-encoded sets page through the dict cursor; intset-encoded sets
/// are compact and come back in a single page.
pub fn scan_set(set: &SetValue, cursor: u64, count: u64, pattern: Option<&[u8]>) -> ScanPage {
    let count = count.max(1);
    let mut items = Vec::new();
    let mut cursor = cursor;

    match set {
        SetValue::IntSet(ints) => {
            let mut pos = 0;
            while let Some(v) = ints.get(pos) {
                items.push(Bytes::from(v.to_string()));
                pos += 1;
            }
            cursor = 0;
        }
        SetValue::Table(dict) => {
            let mut iterations = count * MAX_ITERATIONS_FACTOR;
            loop {
                cursor = dict.scan(cursor, |member, _| {
                    items.push(member.clone());
                });
                iterations -= 1;
                if cursor == 0 || iterations == 0 || items.len() as u64 >= count {
                    break;
                }
            }
        }
    }

    filter_pattern(&mut items, pattern);
    ScanPage { cursor, items }
}

fn filter_pattern(items: &mut Vec<Bytes>, pattern: Option<&[u8]>) {
    // a bare "*" always matches, same as no pattern at all
    let Some(pat) = pattern.filter(|p| *p != b"*") else {
        return;
    };
    let matcher = GlobPattern::new(pat);
    items.retain(|item| matcher.matches(item));
}

/// Glob-style pattern over bytes: `*`, `?`, `[class]` (with ranges and
/// `^`/`!` negation), and backslash escapes.
///
/// Iterative two-pointer matcher with backtracking to the most recent
/// `*`, O(n·m) worst case. Compile once and reuse when testing one
/// pattern against many keys (KEYS, SCAN MATCH).
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
        }
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        glob_match(&self.pattern, text)
    }
}

/// One-shot form of [`GlobPattern`].
pub fn glob_match(pat: &[u8], text: &[u8]) -> bool {
    let mut pi = 0; // pattern index
    let mut ti = 0; // text index

    // backtracking state for the most recent '*'
    let mut star_pi: Option<usize> = None;
    let mut star_ti = 0;

    while ti < text.len() || pi < pat.len() {
        if pi < pat.len() {
            match pat[pi] {
                b'*' => {
                    // record star position and try matching zero bytes first
                    star_pi = Some(pi);
                    star_ti = ti;
                    pi += 1;
                    continue;
                }
                b'?' if ti < text.len() => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                b'[' if ti < text.len() => {
                    if let Some((matched, next_pi)) = match_class(pat, pi, text[ti]) {
                        if matched {
                            pi = next_pi;
                            ti += 1;
                            continue;
                        }
                    }
                    // class mismatch or unclosed class: backtrack
                }
                b'\\' if pi + 1 < pat.len() => {
                    if ti < text.len() && pat[pi + 1] == text[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c if ti < text.len() && c == text[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }

        // mismatch or end of pattern: try backtracking to the last '*'
        if let Some(sp) = star_pi {
            pi = sp + 1;
            star_ti += 1;
            ti = star_ti;
            if ti > text.len() {
                return false;
            }
        } else {
            return false;
        }
    }

    true
}

/// Matches `tc` against the class starting at `pat[open]` (a `[`).
/// Returns the verdict and the index just past the closing `]`, or
/// `None` when the class never closes.
fn match_class(pat: &[u8], open: usize, tc: u8) -> Option<(bool, usize)> {
    let mut j = open + 1;
    let mut negated = false;
    if j < pat.len() && (pat[j] == b'^' || pat[j] == b'!') {
        negated = true;
        j += 1;
    }

    let mut matched = false;
    while j < pat.len() && pat[j] != b']' {
        if pat[j] == b'\\' && j + 1 < pat.len() {
            j += 1;
            if pat[j] == tc {
                matched = true;
            }
        } else if j + 2 < pat.len() && pat[j + 1] == b'-' && pat[j + 2] != b']' {
            let (lo, hi) = if pat[j] <= pat[j + 2] {
                (pat[j], pat[j + 2])
            } else {
                (pat[j + 2], pat[j])
            };
            if tc >= lo && tc <= hi {
                matched = true;
            }
            j += 2;
        } else if pat[j] == tc {
            matched = true;
        }
        j += 1;
    }
    if j >= pat.len() {
        return None; // unclosed class
    }
    Some((matched != negated, j + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Value;
    use crate::propagate::NullSink;
    use std::collections::HashSet;

    // --- glob matcher ---

    #[test]
    fn literal_and_wildcards() {
        assert!(glob_match(b"hello", b"hello"));
        assert!(!glob_match(b"hello", b"world"));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h*o", b"hello"));
        assert!(glob_match(b"h*", b"h"));
        assert!(!glob_match(b"h*x", b"hello"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
    }

    #[test]
    fn star_backtracking() {
        assert!(glob_match(b"a*b*c", b"axxbxxc"));
        assert!(glob_match(b"*x*", b"aaxbb"));
        assert!(!glob_match(b"*x*", b"aabb"));
        assert!(glob_match(b"a**b", b"ab"));
    }

    #[test]
    fn character_classes() {
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"k[0-9]", b"k7"));
        assert!(!glob_match(b"k[0-9]", b"kx"));
        assert!(glob_match(b"k[^0-9]", b"kx"));
        assert!(!glob_match(b"k[!a-z]", b"kq"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"a\\?", b"a?"));
        assert!(glob_match(b"[\\]]x", b"]x"));
    }

    #[test]
    fn unclosed_class_never_matches() {
        assert!(!glob_match(b"a[bc", b"ab"));
    }

    #[test]
    fn empty_pattern_matches_only_empty() {
        assert!(glob_match(b"", b""));
        assert!(!glob_match(b"", b"x"));
    }

    // --- keyspace scan ---

    fn seeded_keyspace(n: usize) -> (Keyspace, ServerContext) {
        let mut ks = Keyspace::new(1, false);
        let mut ctx = ServerContext::new();
        let mut sink = NullSink;
        for i in 0..n {
            let key = Bytes::from(format!("k{i}"));
            let obj = ctx.new_object(Value::Str(Bytes::from_static(b"v")));
            ks.set(0, &key, obj, &mut ctx, &mut sink);
        }
        (ks, ctx)
    }

    #[test]
    fn full_scan_covers_keyspace() {
        let (mut ks, mut ctx) = seeded_keyspace(1000);
        let mut sink = NullSink;
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_keyspace(&mut ks, 0, cursor, 50, None, &mut ctx, &mut sink);
            seen.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn scan_with_pattern_filters_but_still_pages() {
        let (mut ks, mut ctx) = seeded_keyspace(100);
        let mut sink = NullSink;
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_keyspace(&mut ks, 0, cursor, 10, Some(b"k1*"), &mut ctx, &mut sink);
            seen.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        // k1, k10..k19: eleven keys
        assert_eq!(seen.len(), 11);
        for key in &seen {
            assert!(key.starts_with(b"k1"));
        }
    }

    #[test]
    fn scan_skips_and_reclaims_expired() {
        let (mut ks, mut ctx) = seeded_keyspace(20);
        let mut sink = NullSink;
        for i in 0..10 {
            ks.set_expire(0, format!("k{i}").as_bytes(), 100);
        }
        ctx.pinned_clock_ms = Some(101);

        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_keyspace(&mut ks, 0, cursor, 10, None, &mut ctx, &mut sink);
            seen.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(ks.dbsize(0), 10);
    }

    #[test]
    fn scan_interleaved_with_rehash_misses_nothing() {
        let (mut ks, mut ctx) = seeded_keyspace(500);
        let mut sink = NullSink;
        // kick off a migration and step it between pages
        ks.db_mut(0).dict.expand(4096);

        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_keyspace(&mut ks, 0, cursor, 20, None, &mut ctx, &mut sink);
            seen.extend(page.items);
            ks.db_mut(0).rehash_step(1);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn scan_empty_db_terminates() {
        let mut ks = Keyspace::new(1, false);
        let mut ctx = ServerContext::new();
        let mut sink = NullSink;
        let page = scan_keyspace(&mut ks, 0, 0, 10, None, &mut ctx, &mut sink);
        assert_eq!(page.cursor, 0);
        assert!(page.items.is_empty());
    }

    // --- set scan ---

    #[test]
    fn intset_scan_is_one_shot() {
        let mut set = SetValue::new_intset();
        for i in 0..50 {
            set.add(&Bytes::from(i.to_string()));
        }
        let page = scan_set(&set, 0, 5, None);
        assert_eq!(page.cursor, 0);
        assert_eq!(page.items.len(), 50);
    }

    #[test]
    fn table_set_scan_pages_to_completion() {
        let mut set = SetValue::new_intset();
        set.add(&Bytes::from_static(b"seed"));
        for i in 0..300 {
            set.add(&Bytes::from(format!("member{i}")));
        }
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_set(&set, cursor, 10, None);
            seen.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 301);
    }

    #[test]
    fn set_scan_pattern() {
        let mut set = SetValue::new_intset();
        set.add(&Bytes::from_static(b"apple"));
        set.add(&Bytes::from_static(b"apricot"));
        set.add(&Bytes::from_static(b"banana"));
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = scan_set(&set, cursor, 10, Some(b"ap*"));
            seen.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 2);
    }
}
