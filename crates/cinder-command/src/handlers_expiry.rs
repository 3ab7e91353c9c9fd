//! TTL management commands.
//!
//! An EXPIRE whose deadline is already in the past deletes the key
//! immediately on a master and rewrites its propagation to a DEL, so a
//! replica replaying the stream performs the same deletion instead of
//! re-evaluating a clock it does not share.

use bytes::Bytes;

use cinder_core::propagate::target;
use cinder_core::EventClass;
use cinder_protocol::Frame;

use crate::parse::parse_int;
use crate::ExecCtx;

const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

pub(crate) fn handle_expire(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    expire_generic(ecx, argv, 1000)
}

pub(crate) fn handle_pexpire(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    expire_generic(ecx, argv, 1)
}

fn expire_generic(ecx: &mut ExecCtx, argv: &[Bytes], unit_ms: i64) -> Frame {
    let key = &argv[1];
    let Some(ttl) = parse_int(&argv[2]) else {
        return Frame::Error(NOT_AN_INTEGER.into());
    };
    if ecx.lookup_write(key).is_none() {
        return Frame::Integer(0);
    }

    let now = ecx.state.ctx.now_ms() as i64;
    let when = now.saturating_add(ttl.saturating_mul(unit_ms));

    if when <= now && !ecx.state.ctx.is_replica {
        // the deadline already passed: the key dies here and the
        // deletion (not the EXPIRE) is what replicas must see
        ecx.delete(key);
        ecx.dirty(1);
        ecx.signal_modified(key);
        ecx.notify(EventClass::Generic, "del", key);
        let db = ecx.db_id();
        ecx.prop.prevent_self_propagation();
        ecx.prop.also_propagate(
            db,
            vec![Bytes::from_static(b"DEL"), key.clone()],
            target::ALL,
        );
        Frame::Integer(1)
    } else {
        let db = ecx.db();
        ecx.state.keyspace.set_expire(db, key, when.max(0) as u64);
        ecx.dirty(1);
        ecx.signal_modified(key);
        ecx.notify(EventClass::Generic, "expire", key);
        Frame::Integer(1)
    }
}

pub(crate) fn handle_ttl(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    ttl_generic(ecx, argv, false)
}

pub(crate) fn handle_pttl(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    ttl_generic(ecx, argv, true)
}

fn ttl_generic(ecx: &mut ExecCtx, argv: &[Bytes], output_ms: bool) -> Frame {
    let key = &argv[1];
    if ecx.lookup_read(key, true).is_none() {
        return Frame::Integer(-2);
    }
    let db = ecx.db();
    match ecx.state.keyspace.get_expire(db, key) {
        None => Frame::Integer(-1),
        Some(when) => {
            let remaining = when.saturating_sub(ecx.state.ctx.now_ms());
            if output_ms {
                Frame::Integer(remaining as i64)
            } else {
                Frame::Integer(((remaining + 500) / 1000) as i64)
            }
        }
    }
}

pub(crate) fn handle_persist(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    if ecx.lookup_write(key).is_none() {
        return Frame::Integer(0);
    }
    let db = ecx.db();
    if ecx.state.keyspace.remove_expire(db, key) {
        ecx.dirty(1);
        ecx.signal_modified(key);
        Frame::Integer(1)
    } else {
        Frame::Integer(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dispatch, ServerState, Session};
    use cinder_core::RecordingSink;

    fn run(state: &mut ServerState, session: &mut Session, parts: &[&str]) -> Frame {
        let argv: Vec<Bytes> = parts.iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut sink = RecordingSink::new();
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

    #[test]
    fn expire_missing_key_is_zero() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        assert_eq!(
            run(&mut state, &mut session, &["EXPIRE", "nope", "10"]),
            Frame::Integer(0)
        );
    }

    #[test]
    fn pexpire_then_pttl() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            run(&mut state, &mut session, &["PEXPIRE", "k", "10000"]),
            Frame::Integer(1)
        );
        match run(&mut state, &mut session, &["PTTL", "k"]) {
            Frame::Integer(ms) => assert!(ms > 0 && ms <= 10_000),
            other => panic!("unexpected {other:?}"),
        }
        match run(&mut state, &mut session, &["TTL", "k"]) {
            Frame::Integer(s) => assert!(s >= 9 && s <= 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ttl_reports_missing_and_persistent() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        assert_eq!(run(&mut state, &mut session, &["TTL", "k"]), Frame::Integer(-2));
        run(&mut state, &mut session, &["SET", "k", "v"]);
        assert_eq!(run(&mut state, &mut session, &["TTL", "k"]), Frame::Integer(-1));
    }

    #[test]
    fn past_deadline_deletes_and_rewrites_propagation() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        let mut sink = RecordingSink::new();
        run(&mut state, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            run_sink(&mut state, &mut session, &mut sink, &["PEXPIRE", "k", "-1"]),
            Frame::Integer(1)
        );
        assert_eq!(run(&mut state, &mut session, &["GET", "k"]), Frame::Null);
        // the sink saw the DEL rewrite, not the PEXPIRE itself
        assert_eq!(sink.verbs(), vec!["DEL"]);
    }

    #[test]
    fn persist_drops_ttl_once() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "k", "v"]);
        run(&mut state, &mut session, &["EXPIRE", "k", "100"]);
        assert_eq!(run(&mut state, &mut session, &["PERSIST", "k"]), Frame::Integer(1));
        assert_eq!(run(&mut state, &mut session, &["PERSIST", "k"]), Frame::Integer(0));
        assert_eq!(run(&mut state, &mut session, &["TTL", "k"]), Frame::Integer(-1));
    }

    #[test]
    fn expire_rejects_garbage() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "k", "v"]);
        assert!(matches!(
            run(&mut state, &mut session, &["EXPIRE", "k", "abc"]),
            Frame::Error(msg) if msg.contains("not an integer")
        ));
    }
}
