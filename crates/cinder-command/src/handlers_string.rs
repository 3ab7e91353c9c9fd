//! GET and SET. Only the plain two-argument SET form is served here;
//! the option-laden variants live with the string type, outside this
//! crate's scope.

use bytes::Bytes;

use cinder_core::{EventClass, KeyspaceError, Value};
use cinder_protocol::Frame;

use crate::{error_frame, ExecCtx, ServerState};

pub(crate) fn handle_get(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    match ecx.lookup_read(&argv[1], false) {
        None => Frame::Null,
        Some(obj) => match obj.value() {
            Value::Str(data) => Frame::Bulk(data.clone()),
            _ => error_frame(KeyspaceError::WrongType),
        },
    }
}

pub(crate) fn handle_set(ecx: &mut ExecCtx, argv: &[Bytes]) -> Frame {
    let key = &argv[1];
    let value = ecx.state.ctx.new_object(Value::Str(argv[2].clone()));
    let db = ecx.db();
    {
        let ServerState { keyspace, ctx } = &mut *ecx.state;
        keyspace.set(db, key, value, ctx, &mut *ecx.sink);
    }
    ecx.dirty(1);
    ecx.notify(EventClass::String, "set", key);
    Frame::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dispatch, Session};
    use cinder_core::RecordingSink;

    fn run(state: &mut ServerState, session: &mut Session, parts: &[&str]) -> Frame {
        let argv: Vec<Bytes> = parts.iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut sink = RecordingSink::new();
        dispatch(state, session, &argv, &mut sink)
    }

    #[test]
    fn set_get_roundtrip() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        assert_eq!(run(&mut state, &mut session, &["SET", "k", "v"]), Frame::ok());
        assert_eq!(
            run(&mut state, &mut session, &["GET", "k"]),
            Frame::Bulk(Bytes::from_static(b"v"))
        );
        assert_eq!(run(&mut state, &mut session, &["GET", "nope"]), Frame::Null);
    }

    #[test]
    fn get_on_set_key_is_wrongtype() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SADD", "s", "m"]);
        assert!(matches!(
            run(&mut state, &mut session, &["GET", "s"]),
            Frame::Error(msg) if msg.starts_with("WRONGTYPE")
        ));
    }

    #[test]
    fn set_overwrites_and_clears_ttl() {
        let mut state = ServerState::new(1);
        let mut session = Session::new(1);
        run(&mut state, &mut session, &["SET", "k", "v1"]);
        run(&mut state, &mut session, &["PEXPIRE", "k", "100000"]);
        run(&mut state, &mut session, &["SET", "k", "v2"]);
        assert_eq!(
            run(&mut state, &mut session, &["PTTL", "k"]),
            Frame::Integer(-1)
        );
        assert_eq!(
            run(&mut state, &mut session, &["GET", "k"]),
            Frame::Bulk(Bytes::from_static(b"v2"))
        );
    }
}
