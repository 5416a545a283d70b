use super::handlers_blocking::{
    handle_blpop, handle_brpop, handle_brpoplpush, handle_bzpopmax, handle_bzpopmin,
};
use super::handlers_hash::{handle_hdel, handle_hget, handle_hlen, handle_hset};
use super::handlers_keyspace::{
    handle_command, handle_del, handle_exists, handle_expire, handle_flushdb, handle_pttl,
    handle_ttl, handle_type,
};
use super::handlers_list::{
    handle_llen, handle_lpop, handle_lpush, handle_lpushx, handle_lrange, handle_rpop,
    handle_rpoplpush, handle_rpush, handle_rpushx,
};
use super::handlers_set::{handle_sadd, handle_scard, handle_smembers, handle_srem};
use super::handlers_sorted_set::{
    handle_zadd, handle_zcard, handle_zpopmax, handle_zpopmin, handle_zscore,
};
use super::handlers_string::{handle_echo, handle_get, handle_ping, handle_set};
use super::{CommandArity, CommandOutcome, CommandSpec, DispatchState};
use crate::command::{CommandFrame, Reply};
use crate::containers::HotMap as HashMap;

/// Runtime command registry.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Builds an empty command registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builds a registry preloaded with the full built-in command surface.
    #[must_use]
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register_connection_commands();
        registry.register_keyspace_commands();
        registry.register_list_commands();
        registry.register_hash_commands();
        registry.register_set_commands();
        registry.register_sorted_set_commands();
        registry.register_blocking_commands();
        registry
    }

    fn register_connection_commands(&mut self) {
        self.register(CommandSpec {
            name: "PING",
            arity: CommandArity::AtLeast(0),
            handler: handle_ping,
        });
        self.register(CommandSpec {
            name: "ECHO",
            arity: CommandArity::Exact(1),
            handler: handle_echo,
        });
        self.register(CommandSpec {
            name: "COMMAND",
            arity: CommandArity::AtLeast(0),
            handler: handle_command,
        });
    }

    fn register_keyspace_commands(&mut self) {
        self.register(CommandSpec {
            name: "GET",
            arity: CommandArity::Exact(1),
            handler: handle_get,
        });
        self.register(CommandSpec {
            name: "SET",
            arity: CommandArity::Exact(2),
            handler: handle_set,
        });
        self.register(CommandSpec {
            name: "DEL",
            arity: CommandArity::AtLeast(1),
            handler: handle_del,
        });
        self.register(CommandSpec {
            name: "EXISTS",
            arity: CommandArity::AtLeast(1),
            handler: handle_exists,
        });
        self.register(CommandSpec {
            name: "TYPE",
            arity: CommandArity::Exact(1),
            handler: handle_type,
        });
        self.register(CommandSpec {
            name: "EXPIRE",
            arity: CommandArity::Exact(2),
            handler: handle_expire,
        });
        self.register(CommandSpec {
            name: "TTL",
            arity: CommandArity::Exact(1),
            handler: handle_ttl,
        });
        self.register(CommandSpec {
            name: "PTTL",
            arity: CommandArity::Exact(1),
            handler: handle_pttl,
        });
        self.register(CommandSpec {
            name: "FLUSHDB",
            arity: CommandArity::AtLeast(0),
            handler: handle_flushdb,
        });
    }

    fn register_list_commands(&mut self) {
        self.register(CommandSpec {
            name: "LPUSH",
            arity: CommandArity::AtLeast(2),
            handler: handle_lpush,
        });
        self.register(CommandSpec {
            name: "LPUSHX",
            arity: CommandArity::AtLeast(2),
            handler: handle_lpushx,
        });
        self.register(CommandSpec {
            name: "RPUSH",
            arity: CommandArity::AtLeast(2),
            handler: handle_rpush,
        });
        self.register(CommandSpec {
            name: "RPUSHX",
            arity: CommandArity::AtLeast(2),
            handler: handle_rpushx,
        });
        self.register(CommandSpec {
            name: "LPOP",
            arity: CommandArity::Exact(1),
            handler: handle_lpop,
        });
        self.register(CommandSpec {
            name: "RPOP",
            arity: CommandArity::Exact(1),
            handler: handle_rpop,
        });
        self.register(CommandSpec {
            name: "LLEN",
            arity: CommandArity::Exact(1),
            handler: handle_llen,
        });
        self.register(CommandSpec {
            name: "LRANGE",
            arity: CommandArity::Exact(3),
            handler: handle_lrange,
        });
        self.register(CommandSpec {
            name: "RPOPLPUSH",
            arity: CommandArity::Exact(2),
            handler: handle_rpoplpush,
        });
    }

    fn register_hash_commands(&mut self) {
        self.register(CommandSpec {
            name: "HSET",
            arity: CommandArity::AtLeast(3),
            handler: handle_hset,
        });
        self.register(CommandSpec {
            name: "HGET",
            arity: CommandArity::Exact(2),
            handler: handle_hget,
        });
        self.register(CommandSpec {
            name: "HDEL",
            arity: CommandArity::AtLeast(2),
            handler: handle_hdel,
        });
        self.register(CommandSpec {
            name: "HLEN",
            arity: CommandArity::Exact(1),
            handler: handle_hlen,
        });
    }

    fn register_set_commands(&mut self) {
        self.register(CommandSpec {
            name: "SADD",
            arity: CommandArity::AtLeast(2),
            handler: handle_sadd,
        });
        self.register(CommandSpec {
            name: "SREM",
            arity: CommandArity::AtLeast(2),
            handler: handle_srem,
        });
        self.register(CommandSpec {
            name: "SCARD",
            arity: CommandArity::Exact(1),
            handler: handle_scard,
        });
        self.register(CommandSpec {
            name: "SMEMBERS",
            arity: CommandArity::Exact(1),
            handler: handle_smembers,
        });
    }

    fn register_sorted_set_commands(&mut self) {
        self.register(CommandSpec {
            name: "ZADD",
            arity: CommandArity::AtLeast(3),
            handler: handle_zadd,
        });
        self.register(CommandSpec {
            name: "ZSCORE",
            arity: CommandArity::Exact(2),
            handler: handle_zscore,
        });
        self.register(CommandSpec {
            name: "ZCARD",
            arity: CommandArity::Exact(1),
            handler: handle_zcard,
        });
        self.register(CommandSpec {
            name: "ZPOPMAX",
            arity: CommandArity::Exact(1),
            handler: handle_zpopmax,
        });
        self.register(CommandSpec {
            name: "ZPOPMIN",
            arity: CommandArity::Exact(1),
            handler: handle_zpopmin,
        });
    }

    fn register_blocking_commands(&mut self) {
        self.register(CommandSpec {
            name: "BLPOP",
            arity: CommandArity::AtLeast(2),
            handler: handle_blpop,
        });
        self.register(CommandSpec {
            name: "BRPOP",
            arity: CommandArity::AtLeast(2),
            handler: handle_brpop,
        });
        self.register(CommandSpec {
            name: "BRPOPLPUSH",
            arity: CommandArity::Exact(3),
            handler: handle_brpoplpush,
        });
        self.register(CommandSpec {
            name: "BZPOPMAX",
            arity: CommandArity::AtLeast(2),
            handler: handle_bzpopmax,
        });
        self.register(CommandSpec {
            name: "BZPOPMIN",
            arity: CommandArity::AtLeast(2),
            handler: handle_bzpopmin,
        });
    }

    /// Registers or replaces one command in the table.
    pub fn register(&mut self, spec: CommandSpec) {
        self.entries.insert(spec.name.to_owned(), spec);
    }

    /// Validates command existence and arity without executing handler logic.
    ///
    /// # Errors
    ///
    /// Returns user-facing error text for unknown command names or invalid argument count.
    pub fn validate_frame(&self, frame: &CommandFrame) -> Result<(), String> {
        let command_name = frame.name.to_ascii_uppercase();
        let Some(spec) = self.entries.get(&command_name) else {
            return Err(format!("ERR unknown command '{command_name}'"));
        };

        match spec.arity {
            CommandArity::Exact(expected) if frame.args.len() != expected => Err(format!(
                "ERR wrong number of arguments for '{}' command",
                spec.name
            )),
            CommandArity::AtLeast(minimum) if frame.args.len() < minimum => Err(format!(
                "ERR wrong number of arguments for '{}' command",
                spec.name
            )),
            _ => Ok(()),
        }
    }

    /// Dispatches one canonical command frame to its registered handler.
    #[must_use]
    pub fn dispatch(&self, frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
        if let Err(message) = self.validate_frame(frame) {
            return Reply::Error(message).into();
        }

        let command_name = frame.name.to_ascii_uppercase();
        let Some(spec) = self.entries.get(&command_name) else {
            return Reply::Error(format!("ERR unknown command '{command_name}'")).into();
        };
        (spec.handler)(frame, state)
    }
}
