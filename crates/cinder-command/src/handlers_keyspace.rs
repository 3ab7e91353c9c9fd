//! Type-agnostic commands over the keyspace: deletion, existence,
//! database selection and maintenance, renaming, scanning, and the
//! OBJECT introspection subcommands.

use bytes::Bytes;

use cinder_core::scan::scan_keyspace;
use cinder_core::{AccessPolicy, EventClass, FlushMode, KeyspaceError, ScanPage};
use cinder_protocol::Frame;

use crate::parse::{arg_eq, parse_cursor, parse_int, parse_scan_options};
use crate::{error_frame, ExecCtx, ServerState, ShutdownMode};

const INVALID_CURSOR: &str = "ERR invalid cursor";

pub(crate) fn handle_del(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    del_generic(ecx, argv, false)
}

pub(crate) fn handle_unlink(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    del_generic(ecx, argv, true)
}

fn del_generic(ecx: &mut ExecCtx, argv: &[Bytes], lazy: bool) -> Frame {
    let mut deleted = 0i64;
    for key in &argv[1..] {
        ecx.expire_if_needed(key);
        let db = ecx.db();
        let removed = if lazy {
            ecx.state.keyspace.delete_async(db, key)
        } else {
            ecx.state.keyspace.delete_sync(db, key)
        };
        if removed {
            ecx.signal_modified(key);
            ecx.notify(EventClass::Generic, "del", key);
            ecx.dirty(1);
            deleted += 1;
        }
    }
    Frame::Integer(deleted)
}

pub(crate) fn handle_exists(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let mut count = 0i64;
    for key in &argv[1..] {
        let db = ecx.db();
        let ServerState { keyspace, ctx } = &mut *ecx.state;
        if keyspace.exists(db, key, ctx, &mut *ecx.sink) {
            count += 1;
        }
    }
    Frame::Integer(count)
}

pub(crate) fn handle_select(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Some(id) = parse_int(&argv[1]) else {
        return Frame::Error("ERR invalid DB index".into());
    };
    match ecx.state.keyspace.select(id, &ecx.state.ctx) {
        Ok(idx) => {
            ecx.session.db = idx;
            Frame::ok()
        }
        Err(KeyspaceError::OutOfRange) => Frame::Error("ERR DB index is out of range".into()),
        Err(other) => error_frame(other),
    }
}

pub(crate) fn handle_randomkey(ecx: &mut ExecCtx, _argv: &[Bytes]) -> Frame {
    let db = ecx.db();
    let ServerState { keyspace, ctx } = &mut *ecx.state;
    match keyspace.random_key(db, ctx, &mut *ecx.sink) {
        Some(key) => Frame::Bulk(key),
        None => Frame::Null,
    }
}

pub(crate) fn handle_keys(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let db = ecx.db();
    let ServerState { keyspace, ctx } = &mut *ecx.state;
    let keys = keyspace.keys(db, &argv[1], ctx, &mut *ecx.sink);
    Frame::Array(keys.into_iter().map(Frame::Bulk).collect())
}

pub(crate) fn handle_scan(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Ok(cursor) = parse_cursor(&argv[1]) else {
        return Frame::Error(INVALID_CURSOR.into());
    };
    let opts = match parse_scan_options(argv, 2) {
        Ok(opts) => opts,
        Err(msg) => return Frame::Error(msg.into()),
    };
    let db = ecx.db();
    let ServerState { keyspace, ctx } = &mut *ecx.state;
    let page = scan_keyspace(
        keyspace,
        db,
        cursor,
        opts.count,
        opts.pattern.as_deref(),
        ctx,
        &mut *ecx.sink,
    );
    scan_reply(page)
}

/// SCAN-family reply shape: the next cursor as a bulk string, then the
/// collected elements.
pub(crate) fn scan_reply(page: ScanPage) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::from(page.cursor.to_string())),
        Frame::Array(page.items.into_iter().map(Frame::Bulk).collect()),
    ])
}

pub(crate) fn handle_type(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match ecx.lookup_read(&argv[1], true) {
        Some(obj) => Frame::Simple(obj.kind().as_str().into()),
        None => Frame::Simple("none".into()),
    }
}

pub(crate) fn handle_dbsize(ecx: &mut ExecCtx, _argv: &[Bytes]) -> Frame {
    let db = ecx.db();
    Frame::Integer(ecx.state.keyspace.dbsize(db) as i64)
}

pub(crate) fn handle_rename(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match rename_generic(ecx, argv, false) {
        Ok(_) => Frame::ok(),
        Err(frame) => frame,
    }
}

pub(crate) fn handle_renamenx(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match rename_generic(ecx, argv, true) {
        Ok(renamed) => Frame::Integer(renamed as i64),
        Err(frame) => frame,
    }
}

fn rename_generic(ecx: &mut ExecCtx, argv: &[Bytes], nx: bool) -> Result<bool, Frame> {
    let db = ecx.db();
    let ServerState { keyspace, ctx } = &mut *ecx.state;
    keyspace
        .rename(db, &argv[1], &argv[2], nx, ctx, &mut *ecx.sink)
        .map_err(error_frame)
}

pub(crate) fn handle_move(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Some(dst) = parse_int(&argv[2]) else {
        return error_frame(KeyspaceError::OutOfRange);
    };
    let db = ecx.db();
    let ServerState { keyspace, ctx } = &mut *ecx.state;
    match keyspace.move_key(db, dst, &argv[1], ctx, &mut *ecx.sink) {
        Ok(moved) => Frame::Integer(moved as i64),
        Err(err) => error_frame(err),
    }
}

pub(crate) fn handle_swapdb(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let Some(a) = parse_int(&argv[1]) else {
        return Frame::Error("ERR invalid first DB index".into());
    };
    let Some(b) = parse_int(&argv[2]) else {
        return Frame::Error("ERR invalid second DB index".into());
    };
    match ecx.state.keyspace.swap_databases(a, b, &ecx.state.ctx) {
        Ok(()) => {
            ecx.dirty(1);
            Frame::ok()
        }
        Err(KeyspaceError::OutOfRange) => Frame::Error("ERR DB index is out of range".into()),
        Err(other) => error_frame(other),
    }
}

fn flush_mode(argv: &[Bytes]) -> Result<FlushMode, Frame> {
    match argv.len() {
        1 => Ok(FlushMode::Sync),
        2 if arg_eq(&argv[1], "async") => Ok(FlushMode::Async),
        _ => Err(error_frame(KeyspaceError::Syntax)),
    }
}

pub(crate) fn handle_flushdb(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let mode = match flush_mode(argv) {
        Ok(mode) => mode,
        Err(frame) => return frame,
    };
    let db = ecx.db();
    let removed = ecx
        .state
        .keyspace
        .empty_db(Some(db), mode, &mut ecx.state.ctx)
        .expect("session database is always in range");
    ecx.dirty(removed);
    Frame::ok()
}

pub(crate) fn handle_flushall(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let mode = match flush_mode(argv) {
        Ok(mode) => mode,
        Err(frame) => return frame,
    };
    let removed = ecx
        .state
        .keyspace
        .empty_db(None, mode, &mut ecx.state.ctx)
        .expect("flushing all databases cannot be out of range");
    ecx.dirty(removed);
    Frame::ok()
}

/// SHUTDOWN records the request on the session; the front-end tears the
/// process down instead of delivering the (null) reply. While loading,
/// a SAVE request degrades to NOSAVE so a half-read dataset is never
/// written back out.
pub(crate) fn handle_shutdown(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let mode = match argv.len() {
        1 => ShutdownMode::Default,
        2 if arg_eq(&argv[1], "nosave") => ShutdownMode::NoSave,
        2 if arg_eq(&argv[1], "save") => ShutdownMode::Save,
        _ => return error_frame(KeyspaceError::Syntax),
    };
    let mode = if ecx.state.ctx.loading {
        ShutdownMode::NoSave
    } else {
        mode
    };
    ecx.session.shutdown = Some(mode);
    Frame::Null
}

pub(crate) fn handle_object(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    match (sub.as_str(), argv.len()) {
        ("HELP", 2) => Frame::Array(
            [
                "OBJECT <subcommand> <key>. Subcommands:",
                "ENCODING -- the internal representation of the value.",
                "REFCOUNT -- the number of references of the value.",
                "IDLETIME -- seconds since the value was last accessed (LRU policy).",
                "FREQ -- the access frequency counter (LFU policy).",
            ]
            .iter()
            .map(|line| Frame::Simple((*line).into()))
            .collect(),
        ),
        ("ENCODING", 3) => match ecx.lookup_read(&argv[2], true) {
            Some(obj) => Frame::Bulk(Bytes::from_static(obj.encoding().as_bytes())),
            None => Frame::Null,
        },
        ("REFCOUNT", 3) => match ecx.lookup_read(&argv[2], true) {
            // the handle we hold is not part of the stored refcount
            Some(obj) => Frame::Integer(std::sync::Arc::strong_count(&obj) as i64 - 1),
            None => Frame::Null,
        },
        ("IDLETIME", 3) => {
            if !matches!(ecx.state.ctx.policy, AccessPolicy::Lru) {
                return Frame::Error(
                    "ERR An LFU maxmemory policy is selected, idle time not tracked".into(),
                );
            }
            match ecx.lookup_read(&argv[2], true) {
                Some(obj) => Frame::Integer(obj.idle_seconds(ecx.state.ctx.now_ms()) as i64),
                None => Frame::Null,
            }
        }
        ("FREQ", 3) => {
            let AccessPolicy::Lfu { decay_minutes, .. } = ecx.state.ctx.policy else {
                return Frame::Error(
                    "ERR An LFU maxmemory policy is not selected, access frequency not tracked"
                        .into(),
                );
            };
            match ecx.lookup_read(&argv[2], true) {
                Some(obj) => {
                    let now_min = cinder_core::time::now_minutes(ecx.state.ctx.now_ms());
                    Frame::Integer(obj.lfu_decayed_counter(now_min, decay_minutes) as i64)
                }
                None => Frame::Null,
            }
        }
        _ => Frame::Error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{sub}'. Try OBJECT HELP"
        )),
    }
}
