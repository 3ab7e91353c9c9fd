//! Set commands.
//!
//! Mutating handlers reach the stored `SetValue` through
//! `Arc::make_mut`, so a value shared with another holder is cloned
//! before mutation — lookup handles are dropped first to keep the
//! stored object's refcount at one on the common path.
//!
//! SPOP rewrites its own propagation: replicas must remove exactly the
//! elements this node removed, so each pop goes out as an `SREM` (or
//! one `DEL` when the whole set is popped) and the SPOP itself is
//! suppressed.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use rand::Rng;

use cinder_core::propagate::target;
use cinder_core::scan::scan_set;
use cinder_core::{
    sdiff, sinter, sunion, EventClass, Kind, KeyspaceError, SetValue, SharedObject, Value,
};
use cinder_protocol::Frame;

use crate::handlers_keyspace::scan_reply;
use crate::parse::{parse_cursor, parse_int, parse_scan_options};
use crate::{error_frame, ExecCtx, ServerState};

const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

/// How many times larger the surviving remainder must be, relative to
/// the requested pops, before SPOP extracts elements one by one rather
/// than rebuilding the set from the survivors.
const SPOP_MOVE_STRATEGY_MUL: u64 = 5;

/// How many times larger the set must be, relative to the requested
/// sample, before SRANDMEMBER draws uniques instead of copying the set
/// and evicting down to size.
const SRANDMEMBER_SUB_STRATEGY_MUL: usize = 3;

fn wrongtype() -> Frame {
    error_frame(KeyspaceError::WrongType)
}

fn as_set(obj: &SharedObject) -> &SetValue {
    match obj.value() {
        Value::Set(set) => set,
        _ => unreachable!("type verified before use"),
    }
}

/// Runs `f` against the stored set under `key`. The caller has already
/// verified presence and type.
fn with_set_mut<T>(ecx: &mut ExecCtx, key: &[u8], f: impl FnOnce(&mut SetValue) -> T) -> Option<T> {
    let db = ecx.db();
    let handle = ecx.state.keyspace.db_mut(db).lookup_mut(key)?;
    match Arc::make_mut(handle).value_mut() {
        Value::Set(set) => Some(f(set)),
        _ => None,
    }
}

pub(crate) fn handle_sadd(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    match ecx.lookup_write(key) {
        Some(obj) if obj.kind() != Kind::Set => return wrongtype(),
        Some(_) => {}
        None => {
            let set = SetValue::new_for(&argv[2]);
            let value = ecx.state.ctx.new_object(Value::Set(set));
            let db = ecx.db();
            ecx.state.keyspace.add(db, key.clone(), value);
        }
    }

    let added = with_set_mut(ecx, key, |set| {
        let mut added = 0usize;
        for member in &argv[2..] {
            if set.add(member) {
                added += 1;
            }
        }
        added
    })
    .expect("set created or verified above");

    if added > 0 {
        ecx.signal_modified(key);
        ecx.notify(EventClass::Set, "sadd", key);
    }
    ecx.dirty(added as u64);
    Frame::Integer(added as i64)
}

pub(crate) fn handle_srem(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    let Some(obj) = ecx.lookup_write(key) else {
        return Frame::Integer(0);
    };
    if obj.kind() != Kind::Set {
        return wrongtype();
    }
    drop(obj);

    let (removed, emptied) = with_set_mut(ecx, key, |set| {
        let mut removed = 0usize;
        for member in &argv[2..] {
            if set.remove(member) {
                removed += 1;
                if set.is_empty() {
                    break;
                }
            }
        }
        (removed, set.is_empty())
    })
    .expect("type verified above");

    if removed > 0 {
        ecx.signal_modified(key);
        ecx.notify(EventClass::Set, "srem", key);
        if emptied {
            ecx.delete(key);
            ecx.notify(EventClass::Generic, "del", key);
        }
        ecx.dirty(removed as u64);
    }
    Frame::Integer(removed as i64)
}

pub(crate) fn handle_smove(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let (src, dst, member) = (&argv[1], &argv[2], &argv[3]);

    let Some(src_obj) = ecx.lookup_write(src) else {
        return Frame::Integer(0);
    };
    if src_obj.kind() != Kind::Set {
        return wrongtype();
    }
    let dst_obj = ecx.lookup_write(dst);
    if dst_obj.as_ref().is_some_and(|o| o.kind() != Kind::Set) {
        return wrongtype();
    }

    if src == dst {
        // same key: nothing moves, report membership
        return Frame::Integer(as_set(&src_obj).contains(member) as i64);
    }
    let dst_exists = dst_obj.is_some();
    drop(dst_obj);
    drop(src_obj);

    let (removed, src_emptied) = with_set_mut(ecx, src, |set| {
        let removed = set.remove(member);
        (removed, set.is_empty())
    })
    .expect("type verified above");
    if !removed {
        return Frame::Integer(0);
    }
    ecx.notify(EventClass::Set, "srem", src);

    if src_emptied {
        ecx.delete(src);
        ecx.notify(EventClass::Generic, "del", src);
    }

    if !dst_exists {
        let set = SetValue::new_for(member);
        let value = ecx.state.ctx.new_object(Value::Set(set));
        let db = ecx.db();
        ecx.state.keyspace.add(db, dst.clone(), value);
    }

    ecx.signal_modified(src);
    ecx.signal_modified(dst);
    ecx.dirty(1);

    let added = with_set_mut(ecx, dst, |set| set.add(member)).expect("created above");
    if added {
        ecx.dirty(1);
        ecx.notify(EventClass::Set, "sadd", dst);
    }
    Frame::Integer(1)
}

pub(crate) fn handle_sismember(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match ecx.lookup_read(&argv[1], false) {
        None => Frame::Integer(0),
        Some(obj) => match obj.value() {
            Value::Set(set) => Frame::Integer(set.contains(&argv[2]) as i64),
            _ => wrongtype(),
        },
    }
}

pub(crate) fn handle_scard(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match ecx.lookup_read(&argv[1], false) {
        None => Frame::Integer(0),
        Some(obj) => match obj.value() {
            Value::Set(set) => Frame::Integer(set.len() as i64),
            _ => wrongtype(),
        },
    }
}

pub(crate) fn handle_spop(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match argv.len() {
        2 => spop_single(ecx, argv),
        3 => spop_with_count(ecx, argv),
        _ => error_frame(KeyspaceError::Syntax),
    }
}

fn spop_single(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    let Some(obj) = ecx.lookup_write(key) else {
        return Frame::Null;
    };
    if obj.kind() != Kind::Set {
        return wrongtype();
    }
    drop(obj);

    let (element, emptied) = with_set_mut(ecx, key, |set| {
        let element = set.random().expect("stored sets are never empty");
        set.remove(&element);
        (element, set.is_empty())
    })
    .expect("type verified above");

    ecx.notify(EventClass::Set, "spop", key);

    // replicas remove exactly this element
    let db = ecx.db_id();
    ecx.prop.prevent_self_propagation();
    ecx.prop.also_propagate(
        db,
        vec![Bytes::from_static(b"SREM"), key.clone(), element.clone()],
        target::ALL,
    );

    if emptied {
        ecx.delete(key);
        ecx.notify(EventClass::Generic, "del", key);
    }
    ecx.signal_modified(key);
    ecx.dirty(1);
    Frame::Bulk(element)
}

fn spop_with_count(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    let Some(count) = parse_int(&argv[2]) else {
        return Frame::Error(NOT_AN_INTEGER.into());
    };
    if count < 0 {
        return error_frame(KeyspaceError::OutOfRange);
    }
    let count = count as u64;

    let Some(obj) = ecx.lookup_read(key, false) else {
        return Frame::Array(Vec::new());
    };
    if obj.kind() != Kind::Set {
        return wrongtype();
    }
    if count == 0 {
        return Frame::Array(Vec::new());
    }
    let size = as_set(&obj).len() as u64;

    ecx.notify(EventClass::Set, "spop", key);
    ecx.dirty(count);
    let db = ecx.db_id();

    // Popping everything: reply with the whole set, drop the key, and
    // let replicas see a single DEL.
    if count >= size {
        let members: Vec<Bytes> = as_set(&obj).iter().collect();
        drop(obj);
        ecx.delete(key);
        ecx.notify(EventClass::Generic, "del", key);
        ecx.prop.prevent_self_propagation();
        ecx.prop
            .also_propagate(db, vec![Bytes::from_static(b"DEL"), key.clone()], target::ALL);
        ecx.signal_modified(key);
        ecx.dirty(1);
        return Frame::Array(members.into_iter().map(Frame::Bulk).collect());
    }
    drop(obj);

    let remaining = size - count;
    let popped: Vec<Bytes> = if remaining * SPOP_MOVE_STRATEGY_MUL > count {
        // few pops relative to what stays: extract one by one
        with_set_mut(ecx, key, |set| {
            let mut popped = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let element = set.random().expect("count is below the set size");
                set.remove(&element);
                popped.push(element);
            }
            popped
        })
        .expect("type verified above")
    } else {
        // popping most of the set: move random survivors into a fresh
        // set, reply with what is left of the original
        let (survivors, popped) = with_set_mut(ecx, key, |set| {
            let mut keep = SetValue::new_intset();
            for _ in 0..remaining {
                let element = set.random().expect("remaining is below the set size");
                set.remove(&element);
                keep.add(&element);
            }
            (keep, set.iter().collect::<Vec<_>>())
        })
        .expect("type verified above");
        let db_idx = ecx.db();
        let value = ecx.state.ctx.new_object(Value::Set(survivors));
        let ServerState { keyspace, ctx } = &mut *ecx.state;
        keyspace.overwrite(db_idx, key, value, ctx);
        popped
    };

    for element in &popped {
        ecx.prop.also_propagate(
            db,
            vec![Bytes::from_static(b"SREM"), key.clone(), element.clone()],
            target::ALL,
        );
    }
    ecx.prop.prevent_self_propagation();
    ecx.signal_modified(key);
    ecx.dirty(1);
    Frame::Array(popped.into_iter().map(Frame::Bulk).collect())
}

pub(crate) fn handle_srandmember(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match argv.len() {
        2 => {
            let Some(obj) = ecx.lookup_read(&argv[1], false) else {
                return Frame::Null;
            };
            match obj.value() {
                Value::Set(set) => {
                    Frame::Bulk(set.random().expect("stored sets are never empty"))
                }
                _ => wrongtype(),
            }
        }
        3 => srandmember_with_count(ecx, argv),
        _ => error_frame(KeyspaceError::Syntax),
    }
}

fn srandmember_with_count(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Some(count) = parse_int(&argv[2]) else {
        return Frame::Error(NOT_AN_INTEGER.into());
    };
    let Some(obj) = ecx.lookup_read(&argv[1], false) else {
        return Frame::Array(Vec::new());
    };
    let Value::Set(set) = obj.value() else {
        return wrongtype();
    };
    if count == 0 {
        return Frame::Array(Vec::new());
    }

    // negative count: independent draws, duplicates allowed
    if count < 0 {
        let want = count.unsigned_abs() as usize;
        let mut out = Vec::with_capacity(want);
        for _ in 0..want {
            out.push(Frame::Bulk(set.random().expect("set verified non-empty")));
        }
        return Frame::Array(out);
    }

    let want = count as usize;
    let size = set.len();
    if want >= size {
        return Frame::Array(set.iter().map(Frame::Bulk).collect());
    }

    if want * SRANDMEMBER_SUB_STRATEGY_MUL > size {
        // close to the full set: copy everything, evict down to size
        let mut members: Vec<Bytes> = set.iter().collect();
        let mut rng = rand::rng();
        while members.len() > want {
            let victim = rng.random_range(0..members.len());
            members.swap_remove(victim);
        }
        Frame::Array(members.into_iter().map(Frame::Bulk).collect())
    } else {
        // small sample: draw until enough unique elements came up
        let mut chosen: HashSet<Bytes> = HashSet::with_capacity(want);
        let mut out = Vec::with_capacity(want);
        while out.len() < want {
            let element = set.random().expect("set verified non-empty");
            if chosen.insert(element.clone()) {
                out.push(Frame::Bulk(element));
            }
        }
        Frame::Array(out)
    }
}

/// Resolves each key to its set object; `None` marks a missing key.
fn resolve_sets(
    ecx: &mut ExecCtx,
    keys: &[Bytes],
    write: bool,
) -> Result<Vec<Option<SharedObject>>, Frame> {
    let mut objs = Vec::with_capacity(keys.len());
    for key in keys {
        let obj = if write {
            ecx.lookup_write(key)
        } else {
            ecx.lookup_read(key, false)
        };
        match obj {
            None => objs.push(None),
            Some(o) if o.kind() != Kind::Set => return Err(wrongtype()),
            Some(o) => objs.push(Some(o)),
        }
    }
    Ok(objs)
}

/// Stores an algebra result under `dst`. The old destination always
/// goes away first; an empty result leaves the key deleted and replies
/// zero.
fn store_set(ecx: &mut ExecCtx, dst: &Bytes, result: SetValue, event: &'static str) -> Frame {
    let deleted = ecx.delete(dst);
    let len = result.len();
    if len == 0 {
        if deleted {
            ecx.notify(EventClass::Generic, "del", dst);
        }
        ecx.signal_modified(dst);
        ecx.dirty(1);
        return Frame::Integer(0);
    }
    let db = ecx.db();
    let value = ecx.state.ctx.new_object(Value::Set(result));
    ecx.state.keyspace.add(db, dst.clone(), value);
    ecx.notify(EventClass::Set, event, dst);
    ecx.signal_modified(dst);
    ecx.dirty(1);
    Frame::Integer(len as i64)
}

pub(crate) fn handle_sinter(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sinter_generic(ecx, &argv[1..], None)
}

pub(crate) fn handle_sinterstore(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sinter_generic(ecx, &argv[2..], Some(&argv[1]))
}

fn sinter_generic(ecx: &mut ExecCtx, keys: &[Bytes], dst: Option<&Bytes>) -> Frame {
    let objs = match resolve_sets(ecx, keys, dst.is_some()) {
        Ok(objs) => objs,
        Err(frame) => return frame,
    };

    // one missing input empties the whole intersection
    if objs.iter().any(|o| o.is_none()) {
        return match dst {
            Some(d) => {
                if ecx.delete(d) {
                    ecx.signal_modified(d);
                    ecx.dirty(1);
                }
                Frame::Integer(0)
            }
            None => Frame::Array(Vec::new()),
        };
    }

    let members = {
        let sets: Vec<&SetValue> = objs
            .iter()
            .map(|o| as_set(o.as_ref().expect("missing inputs handled above")))
            .collect();
        sinter(&sets)
    };
    drop(objs);

    match dst {
        None => Frame::Array(members.into_iter().map(Frame::Bulk).collect()),
        Some(d) => {
            let mut result = SetValue::new_intset();
            for member in &members {
                result.add(member);
            }
            store_set(ecx, d, result, "sinterstore")
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SetOp {
    Union,
    Diff,
}

pub(crate) fn handle_sunion(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sunion_diff_generic(ecx, &argv[1..], None, SetOp::Union)
}

pub(crate) fn handle_sunionstore(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sunion_diff_generic(ecx, &argv[2..], Some(&argv[1]), SetOp::Union)
}

pub(crate) fn handle_sdiff(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sunion_diff_generic(ecx, &argv[1..], None, SetOp::Diff)
}

pub(crate) fn handle_sdiffstore(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    sunion_diff_generic(ecx, &argv[2..], Some(&argv[1]), SetOp::Diff)
}

fn sunion_diff_generic(
    ecx: &mut ExecCtx,
    keys: &[Bytes],
    dst: Option<&Bytes>,
    op: SetOp,
) -> Frame {
    let objs = match resolve_sets(ecx, keys, dst.is_some()) {
        Ok(objs) => objs,
        Err(frame) => return frame,
    };

    let result = match op {
        SetOp::Union => {
            let sets: Vec<&SetValue> = objs.iter().flatten().map(as_set).collect();
            sunion(&sets)
        }
        SetOp::Diff => match objs.first().and_then(|o| o.as_ref()) {
            // a missing first set makes the whole difference empty
            None => SetValue::new_intset(),
            Some(first) => {
                let others: Vec<&SetValue> = objs[1..].iter().flatten().map(as_set).collect();
                sdiff(as_set(first), &others)
            }
        },
    };
    drop(objs);

    match dst {
        None => Frame::Array(result.iter().map(Frame::Bulk).collect()),
        Some(d) => {
            let event = match op {
                SetOp::Union => "sunionstore",
                SetOp::Diff => "sdiffstore",
            };
            store_set(ecx, d, result, event)
        }
    }
}

pub(crate) fn handle_sscan(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Ok(cursor) = parse_cursor(&argv[2]) else {
        return Frame::Error("ERR invalid cursor".into());
    };
    let Some(obj) = ecx.lookup_read(&argv[1], false) else {
        return scan_reply(cinder_core::ScanPage {
            cursor: 0,
            items: Vec::new(),
        });
    };
    let Value::Set(set) = obj.value() else {
        return wrongtype();
    };
    let opts = match parse_scan_options(argv, 3) {
        Ok(opts) => opts,
        Err(msg) => return Frame::Error(msg.into()),
    };
    let page = scan_set(set, cursor, opts.count, opts.pattern.as_deref());
    scan_reply(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dispatch, Session};
    use cinder_core::{NullSink, RecordingSink};

    fn run(state: &mut ServerState, session: &mut Session, parts: &[&str]) -> Frame {
        let argv: Vec<Bytes> = parts.iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut sink = NullSink;
        dispatch(state, session, &argv, &mut sink)
    }

    fn run_sink(
        state: &mut ServerState,
        session: &mut Session,
        sink: &mut RecordingSink,
        parts: &[&str],
    ) -> Frame {
        let argv: Vec<Bytes> = parts.iter().map(|s| Bytes::from(s.to_string())).collect();
        dispatch(state, session, &argv, sink)
    }

    fn sorted_members(frame: Frame) -> Vec<String> {
        let Frame::Array(items) = frame else {
            panic!("expected array, got {frame:?}")
        };
        let mut out: Vec<String> = items
            .into_iter()
            .map(|f| match f {
                Frame::Bulk(b) => String::from_utf8_lossy(&b).into_owned(),
                other => panic!("expected bulk, got {other:?}"),
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn sadd_counts_new_members_only() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        assert_eq!(
            run(&mut state, &mut session, &["SADD", "s", "a", "b"]),
            Frame::Integer(2)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SADD", "s", "b", "c"]),
            Frame::Integer(1)
        );
        assert_eq!(run(&mut state, &mut session, &["SCARD", "s"]), Frame::Integer(3));
    }

    #[test]
    fn sadd_on_string_is_wrongtype() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "k", "v"]);
        assert!(matches!(
            run(&mut state, &mut session, &["SADD", "k", "m"]),
            Frame::Error(msg) if msg.starts_with("WRONGTYPE")
        ));
    }

    #[test]
    fn srem_deletes_emptied_key() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "a", "b"]);
        assert_eq!(
            run(&mut state, &mut session, &["SREM", "s", "a", "b", "zzz"]),
            Frame::Integer(2)
        );
        assert_eq!(run(&mut state, &mut session, &["EXISTS", "s"]), Frame::Integer(0));
        assert_eq!(
            run(&mut state, &mut session, &["SREM", "s", "a"]),
            Frame::Integer(0)
        );
    }

    #[test]
    fn sismember_and_scard() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "x"]);
        assert_eq!(
            run(&mut state, &mut session, &["SISMEMBER", "s", "x"]),
            Frame::Integer(1)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SISMEMBER", "s", "y"]),
            Frame::Integer(0)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SCARD", "missing"]),
            Frame::Integer(0)
        );
    }

    #[test]
    fn smove_transfers_membership() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "src", "m", "other"]);
        run(&mut state, &mut session, &["SADD", "dst", "existing"]);
        assert_eq!(
            run(&mut state, &mut session, &["SMOVE", "src", "dst", "m"]),
            Frame::Integer(1)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SISMEMBER", "src", "m"]),
            Frame::Integer(0)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SISMEMBER", "dst", "m"]),
            Frame::Integer(1)
        );
        // missing member moves nothing
        assert_eq!(
            run(&mut state, &mut session, &["SMOVE", "src", "dst", "nope"]),
            Frame::Integer(0)
        );
    }

    #[test]
    fn smove_creates_destination_and_reaps_source() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "src", "only"]);
        assert_eq!(
            run(&mut state, &mut session, &["SMOVE", "src", "fresh", "only"]),
            Frame::Integer(1)
        );
        assert_eq!(run(&mut state, &mut session, &["EXISTS", "src"]), Frame::Integer(0));
        assert_eq!(run(&mut state, &mut session, &["SCARD", "fresh"]), Frame::Integer(1));
    }

    #[test]
    fn smove_same_key_reports_membership() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "m"]);
        assert_eq!(
            run(&mut state, &mut session, &["SMOVE", "s", "s", "m"]),
            Frame::Integer(1)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SMOVE", "s", "s", "nope"]),
            Frame::Integer(0)
        );
    }

    #[test]
    fn spop_single_rewrites_to_srem() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let mut sink = RecordingSink::new();
        run(&mut state, &mut session, &["SADD", "s", "a", "b", "c"]);
        let popped = run_sink(&mut state, &mut session, &mut sink, &["SPOP", "s"]);
        let Frame::Bulk(element) = popped else {
            panic!("expected bulk, got {popped:?}")
        };
        assert_eq!(run(&mut state, &mut session, &["SCARD", "s"]), Frame::Integer(2));
        assert_eq!(sink.verbs(), vec!["SREM"]);
        assert_eq!(sink.commands[0].1[2], element);
    }

    #[test]
    fn spop_count_propagates_srem_per_element() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let mut sink = RecordingSink::new();
        run(&mut state, &mut session, &["SADD", "s", "x", "y", "z", "w", "v", "u"]);
        let reply = run_sink(&mut state, &mut session, &mut sink, &["SPOP", "s", "2"]);
        let Frame::Array(items) = reply else {
            panic!("expected array")
        };
        assert_eq!(items.len(), 2);
        assert_eq!(run(&mut state, &mut session, &["SCARD", "s"]), Frame::Integer(4));
        // two SREMs, no SPOP
        assert_eq!(sink.verbs(), vec!["SREM", "SREM"]);
    }

    #[test]
    fn spop_all_becomes_del() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let mut sink = RecordingSink::new();
        run(&mut state, &mut session, &["SADD", "s", "a", "b"]);
        let reply = run_sink(&mut state, &mut session, &mut sink, &["SPOP", "s", "10"]);
        let Frame::Array(items) = reply else {
            panic!("expected array")
        };
        assert_eq!(items.len(), 2);
        assert_eq!(run(&mut state, &mut session, &["EXISTS", "s"]), Frame::Integer(0));
        assert_eq!(sink.verbs(), vec!["DEL"]);
    }

    #[test]
    fn spop_rebuild_strategy_keeps_survivors() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let members: Vec<String> = (0..100).map(|i| format!("m{i}")).collect();
        let mut argv = vec!["SADD".to_string(), "s".to_string()];
        argv.extend(members.clone());
        let parts: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
        run(&mut state, &mut session, &parts);

        // popping 90 of 100 triggers the rebuild strategy
        let reply = run(&mut state, &mut session, &["SPOP", "s", "90"]);
        let Frame::Array(items) = reply else {
            panic!("expected array")
        };
        assert_eq!(items.len(), 90);
        assert_eq!(run(&mut state, &mut session, &["SCARD", "s"]), Frame::Integer(10));

        // popped and surviving members partition the original set
        let mut popped: HashSet<String> = items
            .into_iter()
            .map(|f| match f {
                Frame::Bulk(b) => String::from_utf8_lossy(&b).into_owned(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(popped.len(), 90);
        let survivors = sorted_members(run(&mut state, &mut session, &["SUNION", "s"]));
        assert_eq!(survivors.len(), 10);
        for m in &survivors {
            assert!(!popped.remove(m), "member {m} both popped and kept");
        }
    }

    #[test]
    fn spop_edge_replies() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        assert_eq!(run(&mut state, &mut session, &["SPOP", "nope"]), Frame::Null);
        assert_eq!(
            run(&mut state, &mut session, &["SPOP", "nope", "3"]),
            Frame::Array(Vec::new())
        );
        run(&mut state, &mut session, &["SADD", "s", "a"]);
        assert_eq!(
            run(&mut state, &mut session, &["SPOP", "s", "0"]),
            Frame::Array(Vec::new())
        );
        assert!(matches!(
            run(&mut state, &mut session, &["SPOP", "s", "-1"]),
            Frame::Error(msg) if msg.contains("out of range")
        ));
    }

    #[test]
    fn srandmember_variants() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "a", "b", "c", "d", "e"]);

        // single form
        let Frame::Bulk(_) = run(&mut state, &mut session, &["SRANDMEMBER", "s"]) else {
            panic!("expected bulk")
        };

        // positive count below cardinality: unique members
        let Frame::Array(items) = run(&mut state, &mut session, &["SRANDMEMBER", "s", "3"]) else {
            panic!()
        };
        assert_eq!(items.len(), 3);
        let unique: HashSet<_> = items.iter().collect();
        assert_eq!(unique.len(), 3);

        // count above cardinality: the whole set
        let Frame::Array(all) = run(&mut state, &mut session, &["SRANDMEMBER", "s", "50"]) else {
            panic!()
        };
        assert_eq!(all.len(), 5);

        // negative count: duplicates allowed, exact length
        let Frame::Array(dups) = run(&mut state, &mut session, &["SRANDMEMBER", "s", "-12"]) else {
            panic!()
        };
        assert_eq!(dups.len(), 12);

        // the set itself was never modified
        assert_eq!(run(&mut state, &mut session, &["SCARD", "s"]), Frame::Integer(5));

        assert_eq!(run(&mut state, &mut session, &["SRANDMEMBER", "nope"]), Frame::Null);
        assert_eq!(
            run(&mut state, &mut session, &["SRANDMEMBER", "nope", "3"]),
            Frame::Array(Vec::new())
        );
    }

    #[test]
    fn sinter_and_store() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "a", "1", "2", "3", "x"]);
        run(&mut state, &mut session, &["SADD", "b", "2", "3", "y"]);

        assert_eq!(
            sorted_members(run(&mut state, &mut session, &["SINTER", "a", "b"])),
            vec!["2", "3"]
        );
        // missing key empties the intersection
        assert_eq!(
            run(&mut state, &mut session, &["SINTER", "a", "nope"]),
            Frame::Array(Vec::new())
        );

        assert_eq!(
            run(&mut state, &mut session, &["SINTERSTORE", "dst", "a", "b"]),
            Frame::Integer(2)
        );
        assert_eq!(
            sorted_members(run(&mut state, &mut session, &["SUNION", "dst"])),
            vec!["2", "3"]
        );

        // empty result removes a stale destination
        assert_eq!(
            run(&mut state, &mut session, &["SINTERSTORE", "dst", "a", "nope"]),
            Frame::Integer(0)
        );
        assert_eq!(run(&mut state, &mut session, &["EXISTS", "dst"]), Frame::Integer(0));
    }

    #[test]
    fn sunion_and_sdiff() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "a", "1", "2"]);
        run(&mut state, &mut session, &["SADD", "b", "2", "3"]);

        assert_eq!(
            sorted_members(run(&mut state, &mut session, &["SUNION", "a", "b", "nope"])),
            vec!["1", "2", "3"]
        );
        assert_eq!(
            sorted_members(run(&mut state, &mut session, &["SDIFF", "a", "b"])),
            vec!["1"]
        );
        // diff with itself is empty
        assert_eq!(
            run(&mut state, &mut session, &["SDIFF", "a", "a"]),
            Frame::Array(Vec::new())
        );
        // missing first key: empty
        assert_eq!(
            run(&mut state, &mut session, &["SDIFF", "nope", "a"]),
            Frame::Array(Vec::new())
        );

        assert_eq!(
            run(&mut state, &mut session, &["SUNIONSTORE", "u", "a", "b"]),
            Frame::Integer(3)
        );
        assert_eq!(
            run(&mut state, &mut session, &["SDIFFSTORE", "d", "a", "b"]),
            Frame::Integer(1)
        );
        assert_eq!(
            sorted_members(run(&mut state, &mut session, &["SUNION", "d"])),
            vec!["1"]
        );
    }

    #[test]
    fn algebra_type_errors_surface() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "str", "v"]);
        run(&mut state, &mut session, &["SADD", "s", "1"]);
        for cmd in [
            vec!["SINTER", "s", "str"],
            vec!["SUNION", "str"],
            vec!["SDIFF", "s", "str"],
            vec!["SINTERSTORE", "dst", "s", "str"],
        ] {
            assert!(matches!(
                run(&mut state, &mut session, &cmd),
                Frame::Error(msg) if msg.starts_with("WRONGTYPE")
            ));
        }
    }

    #[test]
    fn sscan_pages_and_filters() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "apple", "apricot", "banana"]);

        let reply = run(&mut state, &mut session, &["SSCAN", "s", "0", "MATCH", "ap*"]);
        let Frame::Array(parts) = reply else { panic!() };
        let Frame::Array(items) = &parts[1] else {
            panic!()
        };
        // table-encoded set this small returns in one page
        assert_eq!(items.len(), 2);

        assert_eq!(
            run(&mut state, &mut session, &["SSCAN", "nope", "0"]),
            Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"0")),
                Frame::Array(Vec::new())
            ])
        );
        assert!(matches!(
            run(&mut state, &mut session, &["SSCAN", "s", "bad"]),
            Frame::Error(msg) if msg == "ERR invalid cursor"
        ));
    }

    #[test]
    fn sscan_intset_single_page() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let mut argv = vec!["SADD".to_string(), "nums".to_string()];
        argv.extend((0..100).map(|i| i.to_string()));
        let parts: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
        run(&mut state, &mut session, &parts);

        let reply = run(&mut state, &mut session, &["SSCAN", "nums", "0", "COUNT", "5"]);
        let Frame::Array(resp) = reply else { panic!() };
        assert_eq!(resp[0], Frame::Bulk(Bytes::from_static(b"0")));
        let Frame::Array(items) = &resp[1] else {
            panic!()
        };
        assert_eq!(items.len(), 100);
    }
}
