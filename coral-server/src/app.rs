//! Process composition root for `coral-server`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coral_common::config::RuntimeConfig;
use coral_common::error::{CoralError, CoralResult};
use coral_core::command::CommandFrame;
use coral_core::dispatch::{CommandOutcome, CommandRegistry, DispatchState};
use coral_facade::protocol::ParsedCommand;
use mio::Token;

use crate::blocking::BlockingScheduler;
use crate::reactor::ServerReactor;

/// Recurring server-side work driven by the event loop clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeEventKind {
    /// Bounded expiry sweep plus dict resize/rehash steps.
    Housekeeping,
}

#[derive(Debug, Clone, Copy)]
struct TimeEvent {
    deadline: Instant,
    kind: TimeEventKind,
}

/// Single-process composition: keyspace, command table, parked clients, and timers.
#[derive(Debug)]
pub(crate) struct ServerApp {
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: CommandRegistry,
    pub(crate) state: DispatchState,
    pub(crate) scheduler: BlockingScheduler,
    time_events: Vec<TimeEvent>,
}

impl ServerApp {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        let cron_period = Duration::from_millis(config.cron_period_millis());
        Self {
            config,
            registry: CommandRegistry::with_builtin_commands(),
            state: DispatchState::new(),
            scheduler: BlockingScheduler::new(),
            time_events: vec![TimeEvent {
                deadline: Instant::now() + cron_period,
                kind: TimeEventKind::Housekeeping,
            }],
        }
    }

    /// Executes one parsed command for the session identified by `token`.
    ///
    /// Returns the encoded reply, or `None` when the command parked the session and the
    /// reply will be produced by a later drain, timeout, or disconnect.
    pub(crate) fn execute_parsed_command(
        &mut self,
        token: Token,
        parsed: ParsedCommand,
    ) -> Option<Vec<u8>> {
        let frame = CommandFrame::new(parsed.name, parsed.args);
        let outcome = self.registry.dispatch(&frame, &mut self.state);
        self.scheduler.absorb_created_keys(&mut self.state);
        match outcome {
            CommandOutcome::Reply(reply) => Some(reply.to_resp_bytes()),
            CommandOutcome::Block(deferral) => {
                self.scheduler.block_session(token, deferral, Instant::now());
                None
            }
        }
    }

    /// The instant the poll wait must give control back to the loop.
    pub(crate) fn next_poll_timeout(&self, now: Instant) -> Option<Duration> {
        let mut nearest = self
            .time_events
            .iter()
            .map(|event| event.deadline)
            .min();
        if let Some(deadline) = self.scheduler.nearest_deadline() {
            nearest = Some(nearest.map_or(deadline, |current| current.min(deadline)));
        }
        nearest.map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fires every due time event and reschedules the recurring ones.
    pub(crate) fn run_due_time_events(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.time_events.len() {
            if self.time_events[index].deadline > now {
                index += 1;
                continue;
            }
            let kind = self.time_events[index].kind;
            match self.run_time_event(kind) {
                Some(period) => {
                    self.time_events[index].deadline = now + period;
                    index += 1;
                }
                None => {
                    let _ = self.time_events.swap_remove(index);
                }
            }
        }
    }

    /// Runs one time event and reports the delay until its next run, if it recurs.
    fn run_time_event(&mut self, kind: TimeEventKind) -> Option<Duration> {
        match kind {
            TimeEventKind::Housekeeping => {
                self.server_cron();
                Some(Duration::from_millis(self.config.cron_period_millis()))
            }
        }
    }

    fn server_cron(&mut self) {
        let evicted = self
            .state
            .sweep_expired(self.config.max_expire_lookups_per_cron);
        if evicted > 0 {
            tracing::debug!(evicted, "expired keys swept");
        }
        self.state
            .maintain_tables(Duration::from_millis(self.config.rehash_budget_millis));
        tracing::trace!(keys = self.state.key_count(), "housekeeping tick");
    }
}

/// Binds the listener and runs the event loop until a fatal reactor error.
///
/// # Errors
///
/// Returns `CoralError::Io` when binding fails or the poller breaks.
pub(crate) fn run() -> CoralResult<()> {
    let config = config_from_args(std::env::args().skip(1))?;
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let mut app = ServerApp::new(config);
    let mut reactor = ServerReactor::bind(addr, &app.config)?;
    tracing::info!(%addr, "coral-server listening");

    loop {
        let timeout = app.next_poll_timeout(Instant::now());
        reactor.tick(&mut app, timeout)?;
    }
}

/// Reads an optional port override from the command line.
fn config_from_args(mut args: impl Iterator<Item = String>) -> CoralResult<RuntimeConfig> {
    let mut config = RuntimeConfig::default();
    if let Some(raw) = args.next() {
        config.port = raw
            .parse::<u16>()
            .map_err(|_| CoralError::InvalidConfig("port must be a number between 0 and 65535"))?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{ServerApp, config_from_args};
    use coral_common::config::RuntimeConfig;
    use coral_common::error::CoralError;
    use coral_facade::protocol::ParsedCommand;
    use googletest::prelude::*;
    use mio::Token;
    use rstest::rstest;
    use std::time::{Duration, Instant};

    fn parsed(name: &str, args: &[&[u8]]) -> ParsedCommand {
        ParsedCommand {
            name: name.to_owned(),
            args: args.iter().map(|arg| arg.to_vec()).collect(),
        }
    }

    #[rstest]
    fn immediate_command_returns_encoded_reply() {
        let mut app = ServerApp::new(RuntimeConfig::default());
        let reply = app.execute_parsed_command(Token(1), parsed("PING", &[]));
        assert_that!(&reply, eq(&Some(b"+PONG\r\n".to_vec())));
    }

    #[rstest]
    fn blocking_command_parks_the_session_without_a_reply() {
        let mut app = ServerApp::new(RuntimeConfig::default());
        let reply = app.execute_parsed_command(Token(1), parsed("BLPOP", &[b"q", b"0"]));
        assert_that!(reply.is_none(), eq(true));
        assert_that!(app.scheduler.is_blocked(Token(1)), eq(true));
    }

    #[rstest]
    fn poll_timeout_is_capped_by_the_soonest_deadline() {
        let mut app = ServerApp::new(RuntimeConfig::default());
        let now = Instant::now();

        // the housekeeping event runs every cron period
        let cron_cap = app.next_poll_timeout(now).expect("cron must be scheduled");
        assert_that!(
            cron_cap <= Duration::from_millis(app.config.cron_period_millis()),
            eq(true)
        );

        // a short blocking timeout pulls the cap down further
        let _ = app.execute_parsed_command(Token(1), parsed("BLPOP", &[b"q", b"0.01"]));
        let after_block = Instant::now();
        let blocked_cap = app
            .next_poll_timeout(after_block)
            .expect("deadline must exist");
        assert_that!(blocked_cap <= Duration::from_millis(10), eq(true));
    }

    #[rstest]
    fn housekeeping_sweeps_expired_keys_and_reschedules() {
        let mut app = ServerApp::new(RuntimeConfig::default());
        let _ = app.execute_parsed_command(Token(1), parsed("SET", &[b"k", b"v"]));
        assert_that!(app.state.set_expiry(b"k", 1), eq(true));

        let fire_at = Instant::now() + Duration::from_millis(app.config.cron_period_millis());
        app.run_due_time_events(fire_at);
        assert_that!(app.state.key_count(), eq(0));

        // the event rescheduled itself rather than disappearing
        assert_that!(app.next_poll_timeout(fire_at).is_some(), eq(true));
    }

    #[rstest]
    fn port_argument_overrides_the_default() {
        let config = config_from_args(vec!["7000".to_owned()].into_iter())
            .expect("numeric port should parse");
        assert_that!(config.port, eq(7000));

        let rejected = config_from_args(vec!["not-a-port".to_owned()].into_iter());
        assert_that!(
            &rejected,
            eq(&Err(CoralError::InvalidConfig(
                "port must be a number between 0 and 65535"
            )))
        );
    }
}
