//! Runtime command registry.
//!
//! One [`CommandSpec`] per command: canonical name, arity constraint,
//! write flag (drives propagation and the replica read-only masking),
//! and the handler callback. Key argument positions are declared
//! separately in [`crate::extract`].

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;

use cinder_protocol::Frame;

use crate::handlers_expiry::{
    handle_expire, handle_persist, handle_pexpire, handle_pttl, handle_ttl,
};
use crate::handlers_keyspace::{
    handle_dbsize, handle_del, handle_exists, handle_flushall, handle_flushdb, handle_keys,
    handle_move, handle_object, handle_randomkey, handle_rename, handle_renamenx, handle_scan,
    handle_select, handle_shutdown, handle_swapdb, handle_type, handle_unlink,
};
use crate::handlers_set::{
    handle_sadd, handle_scard, handle_sdiff, handle_sdiffstore, handle_sinter,
    handle_sinterstore, handle_sismember, handle_smove, handle_spop, handle_srandmember,
    handle_srem, handle_sscan, handle_sunion, handle_sunionstore,
};
use crate::handlers_string::{handle_get, handle_set};
use crate::ExecCtx;

/// Handler callback: parsed argv in, reply frame out.
pub type CommandHandler = fn(&mut ExecCtx, &[Bytes]) -> Frame;

/// Arity constraints for a command, counted in arguments after the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// Command must have exactly this many arguments.
    Exact(usize),
    /// Command must have at least this many arguments.
    AtLeast(usize),
}

impl CommandArity {
    pub fn accepts(self, args: usize) -> bool {
        match self {
            CommandArity::Exact(n) => args == n,
            CommandArity::AtLeast(n) => args >= n,
        }
    }
}

/// Metadata and callback for one command table entry.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Canonical uppercase command name.
    pub name: &'static str,
    /// Arity constraint used for lightweight input validation.
    pub arity: CommandArity,
    /// Whether the command can mutate the keyspace.
    pub write: bool,
    /// Handler callback.
    pub handler: CommandHandler,
}

/// Registry of every served command.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry preloaded with the full command set.
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register_keyspace_commands();
        registry.register_string_commands();
        registry.register_expiry_commands();
        registry.register_set_commands();
        registry
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn register(&mut self, spec: CommandSpec) {
        self.entries.insert(spec.name, spec);
    }

    fn register_keyspace_commands(&mut self) {
        self.register(CommandSpec {
            name: "DEL",
            arity: CommandArity::AtLeast(1),
            write: true,
            handler: handle_del,
        });
        self.register(CommandSpec {
            name: "UNLINK",
            arity: CommandArity::AtLeast(1),
            write: true,
            handler: handle_unlink,
        });
        self.register(CommandSpec {
            name: "EXISTS",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_exists,
        });
        self.register(CommandSpec {
            name: "SELECT",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_select,
        });
        self.register(CommandSpec {
            name: "RANDOMKEY",
            arity: CommandArity::Exact(0),
            write: false,
            handler: handle_randomkey,
        });
        self.register(CommandSpec {
            name: "KEYS",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_keys,
        });
        self.register(CommandSpec {
            name: "SCAN",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_scan,
        });
        self.register(CommandSpec {
            name: "TYPE",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_type,
        });
        self.register(CommandSpec {
            name: "DBSIZE",
            arity: CommandArity::Exact(0),
            write: false,
            handler: handle_dbsize,
        });
        self.register(CommandSpec {
            name: "RENAME",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_rename,
        });
        self.register(CommandSpec {
            name: "RENAMENX",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_renamenx,
        });
        self.register(CommandSpec {
            name: "MOVE",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_move,
        });
        self.register(CommandSpec {
            name: "SWAPDB",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_swapdb,
        });
        self.register(CommandSpec {
            name: "FLUSHDB",
            arity: CommandArity::AtLeast(0),
            write: true,
            handler: handle_flushdb,
        });
        self.register(CommandSpec {
            name: "FLUSHALL",
            arity: CommandArity::AtLeast(0),
            write: true,
            handler: handle_flushall,
        });
        self.register(CommandSpec {
            name: "SHUTDOWN",
            arity: CommandArity::AtLeast(0),
            write: false,
            handler: handle_shutdown,
        });
        self.register(CommandSpec {
            name: "OBJECT",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_object,
        });
    }

    fn register_string_commands(&mut self) {
        self.register(CommandSpec {
            name: "GET",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_get,
        });
        self.register(CommandSpec {
            name: "SET",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_set,
        });
    }

    fn register_expiry_commands(&mut self) {
        self.register(CommandSpec {
            name: "EXPIRE",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_expire,
        });
        self.register(CommandSpec {
            name: "PEXPIRE",
            arity: CommandArity::Exact(2),
            write: true,
            handler: handle_pexpire,
        });
        self.register(CommandSpec {
            name: "TTL",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_ttl,
        });
        self.register(CommandSpec {
            name: "PTTL",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_pttl,
        });
        self.register(CommandSpec {
            name: "PERSIST",
            arity: CommandArity::Exact(1),
            write: true,
            handler: handle_persist,
        });
    }

    fn register_set_commands(&mut self) {
        self.register(CommandSpec {
            name: "SADD",
            arity: CommandArity::AtLeast(2),
            write: true,
            handler: handle_sadd,
        });
        self.register(CommandSpec {
            name: "SREM",
            arity: CommandArity::AtLeast(2),
            write: true,
            handler: handle_srem,
        });
        self.register(CommandSpec {
            name: "SMOVE",
            arity: CommandArity::Exact(3),
            write: true,
            handler: handle_smove,
        });
        self.register(CommandSpec {
            name: "SISMEMBER",
            arity: CommandArity::Exact(2),
            write: false,
            handler: handle_sismember,
        });
        self.register(CommandSpec {
            name: "SCARD",
            arity: CommandArity::Exact(1),
            write: false,
            handler: handle_scard,
        });
        self.register(CommandSpec {
            name: "SPOP",
            arity: CommandArity::AtLeast(1),
            write: true,
            handler: handle_spop,
        });
        self.register(CommandSpec {
            name: "SRANDMEMBER",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_srandmember,
        });
        self.register(CommandSpec {
            name: "SINTER",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_sinter,
        });
        self.register(CommandSpec {
            name: "SINTERSTORE",
            arity: CommandArity::AtLeast(2),
            write: true,
            handler: handle_sinterstore,
        });
        self.register(CommandSpec {
            name: "SUNION",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_sunion,
        });
        self.register(CommandSpec {
            name: "SUNIONSTORE",
            arity: CommandArity::AtLeast(2),
            write: true,
            handler: handle_sunionstore,
        });
        self.register(CommandSpec {
            name: "SDIFF",
            arity: CommandArity::AtLeast(1),
            write: false,
            handler: handle_sdiff,
        });
        self.register(CommandSpec {
            name: "SDIFFSTORE",
            arity: CommandArity::AtLeast(2),
            write: true,
            handler: handle_sdiffstore,
        });
        self.register(CommandSpec {
            name: "SSCAN",
            arity: CommandArity::AtLeast(2),
            write: false,
            handler: handle_sscan,
        });
    }
}

/// The process-wide registry, built once on first use.
pub(crate) fn global() -> &'static CommandRegistry {
    static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CommandRegistry::with_builtin_commands)
}
