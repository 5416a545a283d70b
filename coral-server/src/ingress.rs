//! Shared command-draining path for socket events and post-unblock resumption.

use std::collections::HashMap;

use coral_core::command::Reply;
use mio::Token;

use crate::app::ServerApp;
use crate::reactor::Session;

/// Executes every complete command buffered on one session.
///
/// Parked waiters are served right after each executed command, before the next pipelined
/// command runs, so a pipelined pop cannot take an element out from under a waiter that
/// blocked first. `peers` holds every other session; the caller keeps the driven session
/// out of the map.
///
/// Stops when the buffer runs dry, when the session parks on a blocking command (pipelined
/// commands behind it stay queued until it is released), or when the socket dies mid-write.
/// A framing violation answers with the protocol error and starts the drain-then-close path.
pub(crate) fn drive_session_commands(
    app: &mut ServerApp,
    token: Token,
    session: &mut Session,
    peers: &mut HashMap<Token, Session>,
) {
    loop {
        if app.scheduler.is_blocked(token) {
            return;
        }
        match session.parser.try_pop_command() {
            Ok(Some(parsed)) => {
                let encoded = app.execute_parsed_command(token, parsed);
                app.scheduler.drain_ready_keys(&mut app.state, peers);
                let Some(encoded) = encoded else {
                    continue;
                };
                if !session.enqueue_reply(&encoded) {
                    return;
                }
            }
            Ok(None) => return,
            Err(error) => {
                let _ = session.enqueue_reply(&Reply::Error(error.to_string()).to_resp_bytes());
                session.mark_draining();
                return;
            }
        }
    }
}
