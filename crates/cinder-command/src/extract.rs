//! Key-argument extraction.
//!
//! Cluster routing and scripting need to know which argv positions name
//! keys, for any command — including ones this node does not serve
//! itself but may forward. Most commands declare a simple
//! `(first_key, last_key, step)` range (a negative `last_key` counts
//! from the end of argv); the handful with variable layouts register a
//! custom extractor. Every path tolerates arity violations by
//! returning no keys: the dispatcher reports those as errors, the
//! extractor must not panic on them.

use bytes::Bytes;

use crate::parse::{arg_eq, parse_int};

/// How a command's key arguments are found.
#[derive(Clone, Copy)]
pub enum KeyLayout {
    /// The command takes no keys.
    None,
    /// Keys at `first..=last` stepping by `step`; negative `last`
    /// counts back from the end of argv.
    Range {
        first: usize,
        last: i32,
        step: usize,
    },
    /// Commands whose key positions depend on other arguments.
    Custom(fn(&[Bytes]) -> Vec<usize>),
}

/// Returns the argv indices that are keys for this invocation.
/// `argv[0]` is the command name; unknown commands yield no keys.
pub fn key_positions(argv: &[Bytes]) -> Vec<usize> {
    let Some(name) = argv.first() else {
        return Vec::new();
    };
    let name = String::from_utf8_lossy(name).to_uppercase();
    match layout_for(&name) {
        KeyLayout::None => Vec::new(),
        KeyLayout::Range { first, last, step } => range_keys(argv, first, last, step),
        KeyLayout::Custom(extractor) => extractor(argv),
    }
}

/// The key layout table. Covers the served command set plus the
/// commands with registered custom extractors.
pub fn layout_for(name: &str) -> KeyLayout {
    use KeyLayout::*;
    match name {
        "DEL" | "UNLINK" | "EXISTS" | "SINTER" | "SUNION" | "SDIFF" => Range {
            first: 1,
            last: -1,
            step: 1,
        },
        "SINTERSTORE" | "SUNIONSTORE" | "SDIFFSTORE" => Range {
            first: 1,
            last: -1,
            step: 1,
        },
        "GET" | "SET" | "TYPE" | "MOVE" | "EXPIRE" | "PEXPIRE" | "TTL" | "PTTL" | "PERSIST"
        | "SADD" | "SREM" | "SISMEMBER" | "SCARD" | "SPOP" | "SRANDMEMBER" | "SSCAN" => Range {
            first: 1,
            last: 1,
            step: 1,
        },
        "RENAME" | "RENAMENX" | "SMOVE" => Range {
            first: 1,
            last: 2,
            step: 1,
        },
        "MSET" | "MSETNX" => Range {
            first: 1,
            last: -1,
            step: 2,
        },
        "OBJECT" => Range {
            first: 2,
            last: 2,
            step: 1,
        },
        "ZUNIONSTORE" | "ZINTERSTORE" => Custom(zunion_inter_keys),
        "EVAL" | "EVALSHA" => Custom(eval_keys),
        "SORT" => Custom(sort_keys),
        "MIGRATE" => Custom(migrate_keys),
        "GEORADIUS" | "GEORADIUSBYMEMBER" => Custom(georadius_keys),
        _ => None,
    }
}

fn range_keys(argv: &[Bytes], first: usize, last: i32, step: usize) -> Vec<usize> {
    let last = if last < 0 {
        argv.len() as i32 + last
    } else {
        last
    };
    if last < 0 {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let mut j = first;
    while j as i32 <= last {
        if j >= argv.len() {
            // fewer arguments than the declaration expects
            return Vec::new();
        }
        keys.push(j);
        j += step;
    }
    keys
}

/// `ZUNIONSTORE dest numkeys key [key ...]` — sources plus the
/// destination at argv[1].
fn zunion_inter_keys(argv: &[Bytes]) -> Vec<usize> {
    let Some(num) = argv.get(2).and_then(|a| parse_int(a)) else {
        return Vec::new();
    };
    if num <= 0 || num as usize > argv.len().saturating_sub(3) {
        return Vec::new();
    }
    let mut keys: Vec<usize> = (3..3 + num as usize).collect();
    keys.push(1);
    keys
}

/// `EVAL script numkeys key [key ...]`.
fn eval_keys(argv: &[Bytes]) -> Vec<usize> {
    let Some(num) = argv.get(2).and_then(|a| parse_int(a)) else {
        return Vec::new();
    };
    if num < 0 || num as usize > argv.len().saturating_sub(3) {
        return Vec::new();
    }
    (3..3 + num as usize).collect()
}

/// `SORT key [... STORE dest ...]` — the sort key plus an optional
/// STORE destination. Options with arguments are skipped so their
/// values are never mistaken for the STORE token; the last STORE wins.
fn sort_keys(argv: &[Bytes]) -> Vec<usize> {
    if argv.len() < 2 {
        return Vec::new();
    }
    let mut keys = vec![1];
    let mut store: Option<usize> = None;
    let mut i = 2;
    while i < argv.len() {
        if arg_eq(&argv[i], "limit") {
            i += 2;
        } else if arg_eq(&argv[i], "get") || arg_eq(&argv[i], "by") {
            i += 1;
        } else if arg_eq(&argv[i], "store") && i + 1 < argv.len() {
            store = Some(i + 1);
            i += 1;
        }
        i += 1;
    }
    if let Some(pos) = store {
        keys.push(pos);
    }
    keys
}

/// `MIGRATE host port key db timeout [... KEYS key ...]` — argv[3]
/// unless it is the empty placeholder of the multi-key form, in which
/// case the keys follow the KEYS token.
fn migrate_keys(argv: &[Bytes]) -> Vec<usize> {
    if argv.len() < 4 {
        return Vec::new();
    }
    if argv.len() > 6 && argv[3].is_empty() {
        for i in 6..argv.len() {
            if arg_eq(&argv[i], "keys") {
                return (i + 1..argv.len()).collect();
            }
        }
    }
    if argv[3].is_empty() {
        return Vec::new();
    }
    vec![3]
}

/// `GEORADIUS key ... [STORE dest] [STOREDIST dest]` — the queried key
/// plus at most one stored destination; a later STORE/STOREDIST
/// overrides an earlier one.
fn georadius_keys(argv: &[Bytes]) -> Vec<usize> {
    if argv.len() < 2 {
        return Vec::new();
    }
    let mut keys = vec![1];
    let mut stored: Option<usize> = None;
    let mut i = 5;
    while i < argv.len() {
        if (arg_eq(&argv[i], "store") || arg_eq(&argv[i], "storedist")) && i + 1 < argv.len() {
            stored = Some(i + 1);
            i += 1;
        }
        i += 1;
    }
    if let Some(pos) = stored {
        keys.push(pos);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn simple_ranges() {
        assert_eq!(key_positions(&argv(&["GET", "k"])), vec![1]);
        assert_eq!(key_positions(&argv(&["DEL", "a", "b", "c"])), vec![1, 2, 3]);
        assert_eq!(key_positions(&argv(&["RENAME", "a", "b"])), vec![1, 2]);
        assert_eq!(
            key_positions(&argv(&["MSET", "k1", "v1", "k2", "v2"])),
            vec![1, 3]
        );
        assert_eq!(key_positions(&argv(&["DBSIZE"])), Vec::<usize>::new());
        assert_eq!(key_positions(&argv(&["OBJECT", "ENCODING", "k"])), vec![2]);
    }

    #[test]
    fn unknown_command_has_no_keys() {
        assert_eq!(key_positions(&argv(&["WHATEVER", "x"])), Vec::<usize>::new());
    }

    #[test]
    fn arity_violations_yield_nothing() {
        // RENAME wants keys at 1 and 2 but only 1 exists
        assert_eq!(key_positions(&argv(&["RENAME", "a"])), Vec::<usize>::new());
        assert_eq!(key_positions(&argv(&["DEL"])), Vec::<usize>::new());
    }

    #[test]
    fn zunionstore_keys() {
        assert_eq!(
            key_positions(&argv(&["ZUNIONSTORE", "dst", "2", "a", "b", "WEIGHTS", "1", "2"])),
            vec![3, 4, 1]
        );
        // claimed key count exceeds what's present
        assert_eq!(
            key_positions(&argv(&["ZINTERSTORE", "dst", "9", "a", "b"])),
            Vec::<usize>::new()
        );
        assert_eq!(
            key_positions(&argv(&["ZUNIONSTORE", "dst", "x", "a"])),
            Vec::<usize>::new()
        );
    }

    #[test]
    fn eval_keys_follow_numkeys() {
        assert_eq!(
            key_positions(&argv(&["EVAL", "return 1", "2", "k1", "k2", "arg"])),
            vec![3, 4]
        );
        assert_eq!(
            key_positions(&argv(&["EVALSHA", "sha", "0"])),
            Vec::<usize>::new()
        );
        assert_eq!(
            key_positions(&argv(&["EVAL", "s", "3", "k1"])),
            Vec::<usize>::new()
        );
    }

    #[test]
    fn sort_store_detection() {
        assert_eq!(key_positions(&argv(&["SORT", "mylist"])), vec![1]);
        assert_eq!(
            key_positions(&argv(&["SORT", "mylist", "LIMIT", "0", "10", "STORE", "out"])),
            vec![1, 6]
        );
        // BY/GET option values must not be mistaken for STORE
        assert_eq!(
            key_positions(&argv(&["SORT", "mylist", "BY", "store", "GET", "store"])),
            vec![1]
        );
        // the last STORE wins
        assert_eq!(
            key_positions(&argv(&["SORT", "l", "STORE", "a", "STORE", "b"])),
            vec![1, 5]
        );
    }

    #[test]
    fn migrate_forms() {
        assert_eq!(
            key_positions(&argv(&["MIGRATE", "host", "6379", "key", "0", "500"])),
            vec![3]
        );
        assert_eq!(
            key_positions(&argv(&[
                "MIGRATE", "host", "6379", "", "0", "500", "KEYS", "a", "b", "c"
            ])),
            vec![7, 8, 9]
        );
        assert_eq!(
            key_positions(&argv(&["MIGRATE", "host", "6379"])),
            Vec::<usize>::new()
        );
    }

    #[test]
    fn georadius_store_forms() {
        assert_eq!(
            key_positions(&argv(&["GEORADIUS", "geo", "15", "37", "200", "km"])),
            vec![1]
        );
        assert_eq!(
            key_positions(&argv(&[
                "GEORADIUS", "geo", "15", "37", "200", "km", "STORE", "dst"
            ])),
            vec![1, 7]
        );
        // STOREDIST after STORE overrides it
        assert_eq!(
            key_positions(&argv(&[
                "GEORADIUSBYMEMBER", "geo", "m", "200", "km", "STORE", "a", "STOREDIST", "b"
            ])),
            vec![1, 8]
        );
    }
}
