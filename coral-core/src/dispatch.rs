//! Command registration and dispatch.
//!
//! Protocol parsing produces a canonical command frame, then a registry resolves and executes
//! the matching handler against the keyspace state. A handler answers immediately with a reply,
//! or asks the caller to park the client by returning a deferral descriptor. The dispatcher
//! itself never blocks.

use std::time::Duration;

use crate::command::{CommandFrame, Reply};
use crate::value::ValueKind;

#[path = "dispatch/command_spec.rs"]
mod command_spec;
#[path = "dispatch/handlers_blocking.rs"]
mod handlers_blocking;
#[path = "dispatch/handlers_hash.rs"]
mod handlers_hash;
#[path = "dispatch/handlers_keyspace.rs"]
mod handlers_keyspace;
#[path = "dispatch/handlers_list.rs"]
mod handlers_list;
#[path = "dispatch/handlers_set.rs"]
mod handlers_set;
#[path = "dispatch/handlers_sorted_set.rs"]
mod handlers_sorted_set;
#[path = "dispatch/handlers_string.rs"]
mod handlers_string;
#[path = "dispatch/registry.rs"]
mod registry;
#[path = "dispatch/state.rs"]
mod state;

pub use command_spec::{CommandArity, CommandSpec};
pub use registry::CommandRegistry;
pub use state::DispatchState;

/// Handler function signature used by command registry entries.
pub type CommandHandler = fn(&CommandFrame, &mut DispatchState) -> CommandOutcome;

/// Result of dispatching one command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The command completed; the reply goes straight back to the client.
    Reply(Reply),
    /// The command cannot complete now; the caller parks the client as described.
    Block(Deferral),
}

impl From<Reply> for CommandOutcome {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// Deferred pop flavor requested by a blocking command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedOperation {
    /// `BLPOP`: pop the head of a list.
    PopLeft,
    /// `BRPOP`: pop the tail of a list.
    PopRight,
    /// `BZPOPMAX`: pop the highest-scored sorted-set member.
    PopMaxScore,
    /// `BZPOPMIN`: pop the lowest-scored sorted-set member.
    PopMinScore,
    /// `BRPOPLPUSH`: pop the source tail and push it onto the destination head.
    RotatePopPush,
}

impl BlockedOperation {
    /// Whether a value of `kind` can satisfy this operation.
    #[must_use]
    pub fn serves_kind(self, kind: ValueKind) -> bool {
        match self {
            Self::PopLeft | Self::PopRight | Self::RotatePopPush => kind == ValueKind::List,
            Self::PopMaxScore | Self::PopMinScore => kind == ValueKind::SortedSet,
        }
    }
}

/// Descriptor returned by a blocking command whose keys cannot satisfy it right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
    /// Relative wait budget; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Watched keys, in client argument order.
    pub keys: Vec<Vec<u8>>,
    /// Pop flavor to perform once a key becomes servable.
    pub operation: BlockedOperation,
    /// Rotate destination for [`BlockedOperation::RotatePopPush`].
    pub destination: Option<Vec<u8>>,
}
