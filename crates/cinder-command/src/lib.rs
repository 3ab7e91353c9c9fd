//! cinder-command: the wire-surface command layer.
//!
//! Owns the command table (name, arity, write flag, handler), the
//! table-driven and per-command key extractors, and the per-command
//! propagation buffer. Handlers are plain functions from parsed argv to
//! a reply [`Frame`]; the dispatcher wires them to the keyspace, the
//! server context, and the injected propagation sink.

mod extract;
mod handlers_expiry;
mod handlers_keyspace;
mod handlers_set;
mod handlers_string;
mod parse;
mod propagation;
mod registry;

pub use extract::{key_positions, KeyLayout};
pub use propagation::Propagation;
pub use registry::{CommandArity, CommandRegistry, CommandSpec};

use bytes::Bytes;

use cinder_core::propagate::{target, PropagationSink};
use cinder_core::{DropHandle, Keyspace, ServerContext, SharedObject};
use cinder_protocol::Frame;

/// The engine half every command operates on: the database array plus
/// the explicit server context.
#[derive(Debug)]
pub struct ServerState {
    pub keyspace: Keyspace,
    pub ctx: ServerContext,
}

impl ServerState {
    /// A standalone (non-cluster) server with `dbnum` databases.
    pub fn new(dbnum: usize) -> Self {
        Self::with_cluster(dbnum, false)
    }

    /// Cluster mode restricts commands to database 0 and maintains the
    /// slot index there.
    pub fn with_cluster(dbnum: usize, cluster_enabled: bool) -> Self {
        let mut ctx = ServerContext::new();
        ctx.cluster_enabled = cluster_enabled;
        ServerState {
            keyspace: Keyspace::new(dbnum, cluster_enabled),
            ctx,
        }
    }

    /// Starts the background drop thread and wires it to the keyspace.
    pub fn spawn_dropper(&mut self) {
        self.keyspace.set_drop_handle(DropHandle::spawn());
    }

    /// One background tick: incremental rehash plus active expiration.
    pub fn cron(&mut self, sink: &mut dyn PropagationSink) -> u64 {
        self.keyspace.cron(&mut self.ctx, sink)
    }
}

/// How SHUTDOWN was asked to treat persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Default,
    Save,
    NoSave,
}

/// Per-connection state.
#[derive(Debug)]
pub struct Session {
    /// Currently SELECTed database.
    pub db: usize,
    /// Client id used by the watch/block trackers.
    pub id: cinder_core::ClientId,
    /// Set when a SHUTDOWN was accepted; the front-end terminates the
    /// process instead of sending the pending reply.
    pub shutdown: Option<ShutdownMode>,
}

impl Session {
    pub fn new(id: cinder_core::ClientId) -> Self {
        Session {
            db: 0,
            id,
            shutdown: None,
        }
    }
}

/// Everything a handler can reach while executing one command.
pub struct ExecCtx<'a> {
    pub state: &'a mut ServerState,
    pub session: &'a mut Session,
    pub prop: &'a mut Propagation,
    pub sink: &'a mut dyn PropagationSink,
}

impl ExecCtx<'_> {
    pub fn db(&self) -> usize {
        self.session.db
    }

    pub fn db_id(&self) -> u32 {
        self.session.db as u32
    }

    pub fn lookup_read(&mut self, key: &Bytes, no_touch: bool) -> Option<SharedObject> {
        let db = self.session.db;
        let ServerState { keyspace, ctx } = &mut *self.state;
        keyspace.lookup_read(db, key, no_touch, ctx, &mut *self.sink)
    }

    pub fn lookup_write(&mut self, key: &Bytes) -> Option<SharedObject> {
        let db = self.session.db;
        let ServerState { keyspace, ctx } = &mut *self.state;
        keyspace.lookup_write(db, key, ctx, &mut *self.sink)
    }

    /// Lazy-expire check against the current database.
    pub fn expire_if_needed(&mut self, key: &Bytes) -> bool {
        let db = self.session.db;
        let ServerState { keyspace, ctx } = &mut *self.state;
        keyspace.expire_if_needed(db, key, ctx, &mut *self.sink)
    }

    /// Delete honoring the lazy-free configuration.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let db = self.session.db;
        let ServerState { keyspace, ctx } = &mut *self.state;
        keyspace.delete(db, key, ctx)
    }

    pub fn signal_modified(&mut self, key: &Bytes) {
        let db = self.session.db;
        self.state.keyspace.signal_modified(db, key);
    }

    pub fn notify(&mut self, class: cinder_core::EventClass, event: &'static str, key: &Bytes) {
        let db = self.db_id();
        self.state.ctx.notify(class, event, key, db);
    }

    pub fn dirty(&mut self, by: u64) {
        self.state.ctx.dirty += by;
    }
}

/// Executes one command: resolves the table entry, validates arity,
/// runs the handler, then flushes propagation — the original argv when
/// the command dirtied the keyspace (unless suppressed), followed by
/// any extra emissions in order.
pub fn dispatch(
    state: &mut ServerState,
    session: &mut Session,
    argv: &[Bytes],
    sink: &mut dyn PropagationSink,
) -> Frame {
    let Some(name) = argv.first() else {
        return Frame::Error("ERR empty command".into());
    };
    let name = String::from_utf8_lossy(name).to_uppercase();
    let registry = registry::global();
    let Some(spec) = registry.get(&name) else {
        tracing::debug!(command = %name, "unknown command");
        return Frame::Error(format!("ERR unknown command '{name}'"));
    };
    if !spec.arity.accepts(argv.len() - 1) {
        return Frame::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_lowercase()
        ));
    }

    state.ctx.caller.readonly_command = !spec.write;
    let dirty_before = state.ctx.dirty;
    let mut prop = Propagation::default();

    let reply = {
        let mut ecx = ExecCtx {
            state: &mut *state,
            session: &mut *session,
            prop: &mut prop,
            sink: &mut *sink,
        };
        (spec.handler)(&mut ecx, argv)
    };

    if state.ctx.dirty > dirty_before && !prop.suppressed() {
        sink.feed(session.db as u32, argv, target::ALL);
    }
    for (db, extra_argv, targets) in prop.drain() {
        sink.feed(db, &extra_argv, targets);
    }
    reply
}

/// Maps a core error onto its single-line wire form.
pub(crate) fn error_frame(err: cinder_core::KeyspaceError) -> Frame {
    Frame::Error(err.to_string())
}
