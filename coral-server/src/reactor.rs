//! Single-threaded readiness event loop.
//!
//! One `mio::Poll` instance drives the listener and every accepted session. Sessions are
//! keyed by token and advance through `Active -> Draining -> Closing`: draining sessions
//! flush queued replies before the socket goes away, closing ones are reaped at the end of
//! the cycle. Parked clients are served right after each executed command (see
//! `drive_session_commands`); each cycle then handles time events, blocking-wait timeouts,
//! and resumption of released sessions from the same thread that executes commands.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coral_common::config::RuntimeConfig;
use coral_common::error::{CoralError, CoralResult};
use coral_facade::connection::ConnectionState;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::app::ServerApp;
use crate::ingress::drive_session_commands;

const LISTENER_TOKEN: Token = Token(0);
const SESSION_TOKEN_START: usize = 1;
const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionLifecycle {
    Active,
    Draining,
    Closing,
}

/// One accepted client: socket, parser state, and pending output.
#[derive(Debug)]
pub(crate) struct Session {
    socket: TcpStream,
    pub(crate) parser: ConnectionState,
    write_buffer: Vec<u8>,
    lifecycle: SessionLifecycle,
    interest: Interest,
}

impl Session {
    pub(crate) fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            parser: ConnectionState::new(),
            write_buffer: Vec::new(),
            lifecycle: SessionLifecycle::Active,
            interest: Interest::READABLE,
        }
    }

    /// Queues one encoded reply and flushes as much as the socket accepts right now.
    ///
    /// Returns `false` when the socket failed hard; the reply is considered undelivered.
    pub(crate) fn enqueue_reply(&mut self, bytes: &[u8]) -> bool {
        self.write_buffer.extend_from_slice(bytes);
        self.try_flush();
        self.lifecycle != SessionLifecycle::Closing
    }

    fn try_flush(&mut self) {
        while !self.write_buffer.is_empty() {
            match self.socket.write(self.write_buffer.as_slice()) {
                Ok(0) => {
                    self.mark_closing();
                    return;
                }
                Ok(written) => {
                    let _ = self.write_buffer.drain(..written);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_error) => {
                    self.mark_closing();
                    return;
                }
            }
        }
    }

    pub(crate) fn mark_draining(&mut self) {
        if self.lifecycle == SessionLifecycle::Active {
            self.lifecycle = SessionLifecycle::Draining;
        }
    }

    fn mark_closing(&mut self) {
        self.lifecycle = SessionLifecycle::Closing;
    }

    fn can_read(&self) -> bool {
        self.lifecycle == SessionLifecycle::Active
    }

    fn should_close_now(&self) -> bool {
        self.lifecycle == SessionLifecycle::Closing
            || (self.lifecycle == SessionLifecycle::Draining && self.write_buffer.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn shutdown_write_for_tests(&self) -> std::io::Result<()> {
        self.socket.shutdown(std::net::Shutdown::Write)
    }
}

/// One reactor instance owning the listener and all accepted sessions.
#[derive(Debug)]
pub(crate) struct ServerReactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    next_token: usize,
    sessions: HashMap<Token, Session>,
}

impl ServerReactor {
    /// Binds the listener and registers it in the reactor poller.
    ///
    /// # Errors
    ///
    /// Returns `CoralError::Io` if the bind or poll registration fails.
    pub(crate) fn bind(addr: SocketAddr, config: &RuntimeConfig) -> CoralResult<Self> {
        let poll =
            Poll::new().map_err(|error| CoralError::Io(format!("create poll failed: {error}")))?;
        let mut listener = TcpListener::bind(addr)
            .map_err(|error| CoralError::Io(format!("bind listener failed: {error}")))?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| {
                CoralError::Io(format!("register listener in poll failed: {error}"))
            })?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.normalized_max_poll_events()),
            listener,
            next_token: SESSION_TOKEN_START,
            sessions: HashMap::new(),
        })
    }

    #[cfg(test)]
    fn local_addr(&self) -> CoralResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| CoralError::Io(format!("query local address failed: {error}")))
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs one full event-loop cycle: socket readiness, time events, blocking timeouts,
    /// and the ready-key drain.
    ///
    /// # Errors
    ///
    /// Returns `CoralError::Io` if polling or socket registration fails.
    pub(crate) fn tick(&mut self, app: &mut ServerApp, timeout: Option<Duration>) -> CoralResult<()> {
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(|error| CoralError::Io(format!("poll wait failed: {error}")))?;
        let snapshots = self
            .events
            .iter()
            .map(|event| {
                (
                    event.token(),
                    event.is_readable(),
                    event.is_writable(),
                    event.is_read_closed() || event.is_write_closed() || event.is_error(),
                )
            })
            .collect::<Vec<_>>();

        for &(token, readable, writable, closed_or_error) in &snapshots {
            if token == LISTENER_TOKEN {
                self.accept_new_sessions()?;
                continue;
            }
            self.handle_session_event(app, token, readable, writable, closed_or_error)?;
        }

        let now = Instant::now();
        app.run_due_time_events(now);
        app.scheduler
            .drain_ready_keys(&mut app.state, &mut self.sessions);
        app.scheduler.expire_timed_out(now, &mut self.sessions);
        self.resume_unblocked_sessions(app);
        self.sweep_sessions(app)
    }

    fn accept_new_sessions(&mut self) -> CoralResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut socket, peer)) => {
                    let token = self.allocate_session_token();
                    self.poll
                        .registry()
                        .register(&mut socket, token, Interest::READABLE)
                        .map_err(|error| {
                            CoralError::Io(format!(
                                "register accepted session in poll failed: {error}"
                            ))
                        })?;
                    let _ = socket.set_nodelay(true);
                    tracing::debug!(token = token.0, %peer, "session accepted");
                    let _ = self.sessions.insert(token, Session::new(socket));
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    return Err(CoralError::Io(format!("accept session failed: {error}")));
                }
            }
        }
    }

    fn handle_session_event(
        &mut self,
        app: &mut ServerApp,
        token: Token,
        readable: bool,
        writable: bool,
        closed_or_error: bool,
    ) -> CoralResult<()> {
        let Some(mut session) = self.sessions.remove(&token) else {
            return Ok(());
        };

        // a half-closed peer may still have a final command buffered; read it before
        // honoring the close so its reply goes out
        if readable && session.can_read() {
            Self::read_session_bytes(app, token, &mut session, &mut self.sessions);
        }
        if closed_or_error {
            session.mark_draining();
        }
        if writable && !session.write_buffer.is_empty() {
            session.try_flush();
        }

        if session.should_close_now() {
            return self.close_session(app, token, session);
        }
        self.refresh_session_interest(token, &mut session)?;
        let _ = self.sessions.insert(token, session);
        Ok(())
    }

    fn read_session_bytes(
        app: &mut ServerApp,
        token: Token,
        session: &mut Session,
        peers: &mut HashMap<Token, Session>,
    ) {
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            match session.socket.read(&mut chunk) {
                Ok(0) => {
                    session.mark_draining();
                    return;
                }
                Ok(read_len) => {
                    session.parser.feed_bytes(&chunk[..read_len]);
                    drive_session_commands(app, token, session, peers);
                    if !session.can_read() {
                        return;
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_error) => {
                    session.mark_closing();
                    return;
                }
            }
        }
    }

    /// Feeds buffered input of freshly released sessions back through the dispatcher.
    ///
    /// Loops until no further sessions are released: a resumed session's pipelined
    /// commands may serve other waiters, who must not sit out a full poll wait.
    fn resume_unblocked_sessions(&mut self, app: &mut ServerApp) {
        loop {
            let released = app.scheduler.take_unblocked();
            if released.is_empty() {
                return;
            }
            for token in released {
                let Some(mut session) = self.sessions.remove(&token) else {
                    continue;
                };
                drive_session_commands(app, token, &mut session, &mut self.sessions);
                let _ = self.sessions.insert(token, session);
            }
        }
    }

    /// End-of-cycle pass: closes finished sessions and realigns poll interest with the
    /// write buffers the drain phases may have filled.
    fn sweep_sessions(&mut self, app: &mut ServerApp) -> CoralResult<()> {
        let mut doomed = Vec::new();
        let registry = self.poll.registry();
        for (&token, session) in &mut self.sessions {
            if session.should_close_now() {
                doomed.push(token);
                continue;
            }
            let mut next_interest = if session.can_read() {
                Interest::READABLE
            } else {
                Interest::WRITABLE
            };
            if !session.write_buffer.is_empty() {
                next_interest |= Interest::WRITABLE;
            }
            if next_interest != session.interest {
                registry
                    .reregister(&mut session.socket, token, next_interest)
                    .map_err(|error| {
                        CoralError::Io(format!("refresh session poll interest failed: {error}"))
                    })?;
                session.interest = next_interest;
            }
        }
        for token in doomed {
            if let Some(session) = self.sessions.remove(&token) {
                self.close_session(app, token, session)?;
            }
        }
        Ok(())
    }

    fn refresh_session_interest(&self, token: Token, session: &mut Session) -> CoralResult<()> {
        let mut next_interest = if session.can_read() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if !session.write_buffer.is_empty() {
            next_interest |= Interest::WRITABLE;
        }
        if next_interest == session.interest {
            return Ok(());
        }

        self.poll
            .registry()
            .reregister(&mut session.socket, token, next_interest)
            .map_err(|error| {
                CoralError::Io(format!("refresh session poll interest failed: {error}"))
            })?;
        session.interest = next_interest;
        Ok(())
    }

    fn close_session(
        &self,
        app: &mut ServerApp,
        token: Token,
        mut session: Session,
    ) -> CoralResult<()> {
        self.poll
            .registry()
            .deregister(&mut session.socket)
            .map_err(|error| {
                CoralError::Io(format!(
                    "deregister closed session {} failed: {error}",
                    token.0
                ))
            })?;
        app.scheduler.forget_session(token);
        tracing::debug!(token = token.0, "session closed");
        Ok(())
    }

    fn allocate_session_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}

#[cfg(test)]
mod tests {
    use super::ServerReactor;
    use crate::app::ServerApp;
    use coral_common::config::RuntimeConfig;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::io::{Read, Write};
    use std::net::{Shutdown, SocketAddr, TcpStream};
    use std::time::{Duration, Instant};

    fn bound_reactor() -> (ServerApp, ServerReactor, SocketAddr) {
        let app = ServerApp::new(RuntimeConfig::default());
        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let reactor = ServerReactor::bind(bind_addr, &RuntimeConfig::default())
            .expect("reactor bind should succeed");
        let listen_addr = reactor
            .local_addr()
            .expect("local addr should be available");
        (app, reactor, listen_addr)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let client = TcpStream::connect(addr).expect("connect should succeed");
        client
            .set_nonblocking(true)
            .expect("nonblocking client should be configurable");
        client
    }

    fn pump_until(
        reactor: &mut ServerReactor,
        app: &mut ServerApp,
        client: &mut TcpStream,
        expected_len: usize,
        budget: Duration,
    ) -> Vec<u8> {
        let deadline = Instant::now() + budget;
        let mut response = Vec::new();
        while Instant::now() < deadline && response.len() < expected_len {
            reactor
                .tick(app, Some(Duration::from_millis(5)))
                .expect("reactor tick should succeed");

            let mut chunk = [0_u8; 256];
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(read_len) => response.extend_from_slice(&chunk[..read_len]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(error) => panic!("read from client failed: {error}"),
            }
        }
        response
    }

    #[rstest]
    fn reactor_executes_ping_roundtrip() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut client = connect(addr);
        client
            .write_all(b"*1\r\n$4\r\nPING\r\n")
            .expect("write ping should succeed");

        let response = pump_until(
            &mut reactor,
            &mut app,
            &mut client,
            7,
            Duration::from_millis(600),
        );
        assert_that!(&response, eq(&b"+PONG\r\n".to_vec()));
    }

    #[rstest]
    fn pipelined_push_then_blocking_pop_answers_immediately() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut client = connect(addr);
        client
            .write_all(
                b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nv\r\n*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n",
            )
            .expect("write pipeline should succeed");

        let response = pump_until(
            &mut reactor,
            &mut app,
            &mut client,
            22,
            Duration::from_millis(600),
        );
        assert_that!(&response, eq(&b":1\r\n*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));
    }

    #[rstest]
    fn pipelined_pop_does_not_steal_from_a_parked_waiter() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut waiter = connect(addr);
        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .expect("write blpop should succeed");

        let parked = pump_until(
            &mut reactor,
            &mut app,
            &mut waiter,
            1,
            Duration::from_millis(120),
        );
        assert_that!(parked.is_empty(), eq(true));

        // the push must wake the waiter before the pipelined LPOP runs
        let mut pusher = connect(addr);
        pusher
            .write_all(
                b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nv\r\n*2\r\n$4\r\nLPOP\r\n$1\r\nq\r\n",
            )
            .expect("write pipeline should succeed");

        let woken = pump_until(
            &mut reactor,
            &mut app,
            &mut waiter,
            18,
            Duration::from_millis(600),
        );
        assert_that!(&woken, eq(&b"*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));

        let push_replies = pump_until(
            &mut reactor,
            &mut app,
            &mut pusher,
            9,
            Duration::from_millis(600),
        );
        assert_that!(&push_replies, eq(&b":1\r\n$-1\r\n".to_vec()));
    }

    #[rstest]
    fn half_closed_client_still_receives_its_final_reply() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut client = connect(addr);
        client
            .write_all(b"*1\r\n$4\r\nPING\r\n")
            .expect("write ping should succeed");
        client
            .shutdown(Shutdown::Write)
            .expect("half-close should succeed");

        let response = pump_until(
            &mut reactor,
            &mut app,
            &mut client,
            7,
            Duration::from_millis(600),
        );
        assert_that!(&response, eq(&b"+PONG\r\n".to_vec()));
    }

    #[rstest]
    fn blocked_client_wakes_when_another_client_pushes() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut waiter = connect(addr);
        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .expect("write blpop should succeed");

        // let the waiter park before anything arrives on the key
        let parked = pump_until(
            &mut reactor,
            &mut app,
            &mut waiter,
            1,
            Duration::from_millis(120),
        );
        assert_that!(parked.is_empty(), eq(true));

        let mut pusher = connect(addr);
        pusher
            .write_all(b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nv\r\n")
            .expect("write rpush should succeed");

        let woken = pump_until(
            &mut reactor,
            &mut app,
            &mut waiter,
            18,
            Duration::from_millis(600),
        );
        assert_that!(&woken, eq(&b"*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));

        let push_reply = pump_until(
            &mut reactor,
            &mut app,
            &mut pusher,
            4,
            Duration::from_millis(600),
        );
        assert_that!(&push_reply, eq(&b":1\r\n".to_vec()));
    }

    #[rstest]
    fn blocking_pop_times_out_with_a_null_array() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut client = connect(addr);
        let started = Instant::now();
        client
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$3\r\n0.1\r\n")
            .expect("write blpop should succeed");

        let response = pump_until(
            &mut reactor,
            &mut app,
            &mut client,
            5,
            Duration::from_millis(1200),
        );
        assert_that!(&response, eq(&b"*-1\r\n".to_vec()));
        assert_that!(started.elapsed() >= Duration::from_millis(100), eq(true));
    }

    #[rstest]
    fn malformed_frame_answers_error_and_closes() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut client = connect(addr);
        client
            .write_all(b"*1\r\n$abc\r\n")
            .expect("write malformed frame should succeed");

        let response = pump_until(
            &mut reactor,
            &mut app,
            &mut client,
            42,
            Duration::from_millis(600),
        );
        assert_that!(
            &response,
            eq(&b"-ERR Protocol error: invalid bulk length\r\n".to_vec())
        );

        let deadline = Instant::now() + Duration::from_millis(600);
        let mut closed = false;
        while Instant::now() < deadline {
            reactor
                .tick(&mut app, Some(Duration::from_millis(5)))
                .expect("reactor tick should succeed");
            let mut chunk = [0_u8; 16];
            match client.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(_) | Err(_) => {}
            }
        }
        assert_that!(closed, eq(true));
    }

    #[rstest]
    fn reactor_drops_session_state_after_peer_close() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let client = TcpStream::connect(addr).expect("connect should succeed");
        drop(client);

        let deadline = Instant::now() + Duration::from_millis(600);
        while Instant::now() < deadline {
            reactor
                .tick(&mut app, Some(Duration::from_millis(5)))
                .expect("reactor tick should succeed");
            if reactor.session_count() == 0 {
                break;
            }
        }
        assert_that!(reactor.session_count(), eq(0_usize));
    }

    #[rstest]
    fn disconnecting_waiter_is_forgotten_by_the_scheduler() {
        let (mut app, mut reactor, addr) = bound_reactor();
        let mut waiter = connect(addr);
        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .expect("write blpop should succeed");

        let _ = pump_until(
            &mut reactor,
            &mut app,
            &mut waiter,
            1,
            Duration::from_millis(120),
        );
        drop(waiter);

        let deadline = Instant::now() + Duration::from_millis(600);
        while Instant::now() < deadline {
            reactor
                .tick(&mut app, Some(Duration::from_millis(5)))
                .expect("reactor tick should succeed");
            if reactor.session_count() == 0 {
                break;
            }
        }
        assert_that!(reactor.session_count(), eq(0_usize));

        // a later push must not be consumed on behalf of the vanished waiter
        let mut pusher = connect(addr);
        pusher
            .write_all(
                b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nv\r\n*2\r\n$4\r\nLLEN\r\n$1\r\nq\r\n",
            )
            .expect("write rpush should succeed");
        let replies = pump_until(
            &mut reactor,
            &mut app,
            &mut pusher,
            8,
            Duration::from_millis(600),
        );
        assert_that!(&replies, eq(&b":1\r\n:1\r\n".to_vec()));
    }
}
