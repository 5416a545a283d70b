//! Scheduler for clients parked on blocking pop commands.
//!
//! A blocked client never occupies a thread. The reactor hands the scheduler a deferral
//! descriptor and moves on; the scheduler keeps three indexes over the parked population:
//! per-key FIFO queues of waiting sessions, an ordered set of timeout deadlines, and a
//! deduplicated queue of keys that became servable since the last drain. All delivery and
//! rollback happens inside the drain pass at the end of each reactor cycle.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

use coral_core::command::{Reply, format_score};
use coral_core::containers::{HotMap, HotSet};
use coral_core::dispatch::{BlockedOperation, Deferral, DispatchState};
use mio::Token;

use crate::reactor::Session;

/// Everything remembered about one parked session.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockedState {
    /// Absolute wakeup deadline; `None` waits until a key is served or the peer leaves.
    deadline: Option<Instant>,
    /// Watched keys, in client argument order.
    keys: Vec<Vec<u8>>,
    operation: BlockedOperation,
    destination: Option<Vec<u8>>,
}

/// Value removed from the keyspace on behalf of a parked session, held so a failed delivery
/// can put it back.
#[derive(Debug)]
enum PoppedValue {
    Element(Vec<u8>),
    Scored(Vec<u8>, f64),
}

/// Token-keyed bookkeeping for every parked session.
#[derive(Debug, Default)]
pub(crate) struct BlockingScheduler {
    waiters: HotMap<Token, BlockedState>,
    key_queues: HotMap<Vec<u8>, VecDeque<Token>>,
    timeouts: BTreeSet<(Instant, Token)>,
    ready_keys: VecDeque<Vec<u8>>,
    ready_membership: HotSet<Vec<u8>>,
    unblocked: VecDeque<Token>,
}

impl BlockingScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether this session currently awaits a deferred pop.
    pub(crate) fn is_blocked(&self, token: Token) -> bool {
        self.waiters.contains_key(&token)
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Parks a session as described by its deferral descriptor.
    pub(crate) fn block_session(&mut self, token: Token, deferral: Deferral, now: Instant) {
        let deadline = deferral.timeout.map(|timeout| now + timeout);
        let mut indexed = HotSet::new();
        for key in &deferral.keys {
            if indexed.insert(key.clone()) {
                self.key_queues
                    .entry(key.clone())
                    .or_default()
                    .push_back(token);
            }
        }
        if let Some(deadline) = deadline {
            let _ = self.timeouts.insert((deadline, token));
        }
        tracing::debug!(token = token.0, keys = deferral.keys.len(), "session blocked");
        let _ = self.waiters.insert(
            token,
            BlockedState {
                deadline,
                keys: deferral.keys,
                operation: deferral.operation,
                destination: deferral.destination,
            },
        );
    }

    /// Drops every trace of a session, typically on disconnect.
    pub(crate) fn forget_session(&mut self, token: Token) {
        let Some(blocked) = self.waiters.remove(&token) else {
            return;
        };
        if let Some(deadline) = blocked.deadline {
            let _ = self.timeouts.remove(&(deadline, token));
        }
        for key in &blocked.keys {
            if let Some(queue) = self.key_queues.get_mut(key) {
                queue.retain(|waiting| *waiting != token);
                if queue.is_empty() {
                    let _ = self.key_queues.remove(key);
                }
            }
        }
    }

    /// Earliest pending timeout, used to cap the reactor poll wait.
    pub(crate) fn nearest_deadline(&self) -> Option<Instant> {
        self.timeouts.first().map(|&(deadline, _)| deadline)
    }

    /// Sessions released since the last call. The reactor resumes their buffered input.
    pub(crate) fn take_unblocked(&mut self) -> Vec<Token> {
        self.unblocked.drain(..).collect()
    }

    /// Queues `key` for the next drain pass when at least one session waits on it.
    pub(crate) fn mark_ready_if_watched(&mut self, key: &[u8]) {
        let watched = self
            .key_queues
            .get(key)
            .is_some_and(|queue| !queue.is_empty());
        if watched && self.ready_membership.insert(key.to_vec()) {
            self.ready_keys.push_back(key.to_vec());
        }
    }

    /// Moves keys created by the last command batch into the ready queue.
    pub(crate) fn absorb_created_keys(&mut self, state: &mut DispatchState) {
        for key in state.take_created_keys() {
            self.mark_ready_if_watched(&key);
        }
    }

    /// Wakes every session whose deadline has passed, in deadline order, with a null reply.
    pub(crate) fn expire_timed_out(
        &mut self,
        now: Instant,
        sessions: &mut HashMap<Token, Session>,
    ) {
        while let Some(&(deadline, token)) = self.timeouts.first() {
            if deadline > now {
                return;
            }
            let _ = self.timeouts.pop_first();
            let Some(operation) = self.waiters.get(&token).map(|blocked| blocked.operation)
            else {
                continue;
            };
            let reply = if operation == BlockedOperation::RotatePopPush {
                Reply::Null
            } else {
                Reply::NullArray
            };
            if let Some(session) = sessions.get_mut(&token) {
                let _ = session.enqueue_reply(&reply.to_resp_bytes());
            }
            tracing::debug!(token = token.0, "blocking wait timed out");
            self.forget_session(token);
            self.unblocked.push_back(token);
        }
    }

    /// Serves every ready key until no waiter can make progress.
    pub(crate) fn drain_ready_keys(
        &mut self,
        state: &mut DispatchState,
        sessions: &mut HashMap<Token, Session>,
    ) {
        self.absorb_created_keys(state);
        while let Some(key) = self.pop_ready_key() {
            self.serve_waiters_on_key(&key, state, sessions);
            // a rotate destination or a rollback may have created fresh keys
            self.absorb_created_keys(state);
        }
    }

    fn pop_ready_key(&mut self) -> Option<Vec<u8>> {
        let key = self.ready_keys.pop_front()?;
        let _ = self.ready_membership.remove(&key);
        Some(key)
    }

    fn serve_waiters_on_key(
        &mut self,
        key: &[u8],
        state: &mut DispatchState,
        sessions: &mut HashMap<Token, Session>,
    ) {
        loop {
            let Some(kind) = state.value_kind(key) else {
                return;
            };
            let Some(queue) = self.key_queues.get_mut(key) else {
                return;
            };
            let Some(&token) = queue.front() else {
                let _ = self.key_queues.remove(key);
                return;
            };
            let Some(blocked) = self.waiters.get(&token) else {
                // stale entry left behind by an already released waiter
                let _ = queue.pop_front();
                continue;
            };

            if !blocked.operation.serves_kind(kind) {
                // the head waiter wants a different value kind: it moves to the tail and the
                // key stays parked until something marks it ready again
                let _ = queue.pop_front();
                queue.push_back(token);
                return;
            }

            let operation = blocked.operation;
            let destination = blocked.destination.clone();
            match Self::perform_deferred_pop(state, key, operation, destination.as_deref()) {
                Err(message) => {
                    if let Some(session) = sessions.get_mut(&token) {
                        let _ = session.enqueue_reply(&Reply::Error(message).to_resp_bytes());
                    }
                    self.release_waiter(token);
                }
                Ok(None) => return,
                Ok(Some((reply, popped))) => {
                    let delivered = sessions
                        .get_mut(&token)
                        .is_some_and(|session| session.enqueue_reply(&reply.to_resp_bytes()));
                    if delivered {
                        self.release_waiter(token);
                    } else {
                        tracing::debug!(token = token.0, "delivery failed, rolling back pop");
                        Self::rollback_deferred_pop(
                            state,
                            key,
                            operation,
                            destination.as_deref(),
                            popped,
                        );
                        // the socket is dead; the reactor reaps it without a farewell reply
                        self.forget_session(token);
                    }
                }
            }
        }
    }

    fn release_waiter(&mut self, token: Token) {
        self.forget_session(token);
        self.unblocked.push_back(token);
    }

    /// Removes one value for a waiter and shapes its reply.
    ///
    /// `Ok(None)` means the key emptied between the readiness mark and this attempt.
    fn perform_deferred_pop(
        state: &mut DispatchState,
        key: &[u8],
        operation: BlockedOperation,
        destination: Option<&[u8]>,
    ) -> Result<Option<(Reply, PoppedValue)>, String> {
        match operation {
            BlockedOperation::PopLeft => Ok(state.left_pop_from(key).map(|element| {
                (
                    key_element_reply(key, &element),
                    PoppedValue::Element(element),
                )
            })),
            BlockedOperation::PopRight => Ok(state.right_pop_from(key).map(|element| {
                (
                    key_element_reply(key, &element),
                    PoppedValue::Element(element),
                )
            })),
            BlockedOperation::PopMaxScore => Ok(state.pop_max_from(key).map(|(member, score)| {
                (
                    key_member_score_reply(key, &member, score),
                    PoppedValue::Scored(member, score),
                )
            })),
            BlockedOperation::PopMinScore => Ok(state.pop_min_from(key).map(|(member, score)| {
                (
                    key_member_score_reply(key, &member, score),
                    PoppedValue::Scored(member, score),
                )
            })),
            BlockedOperation::RotatePopPush => {
                let Some(destination) = destination else {
                    return Ok(None);
                };
                Ok(state.rotate_pop_push(key, destination)?.map(|element| {
                    (
                        Reply::BulkString(element.clone()),
                        PoppedValue::Element(element),
                    )
                }))
            }
        }
    }

    /// Puts a popped value back where it came from after a failed delivery.
    fn rollback_deferred_pop(
        state: &mut DispatchState,
        key: &[u8],
        operation: BlockedOperation,
        destination: Option<&[u8]>,
        popped: PoppedValue,
    ) {
        match (operation, popped) {
            (BlockedOperation::PopLeft, PoppedValue::Element(element)) => {
                if let Ok(list) = state.lookup_list_for_write(key) {
                    list.push_front(element);
                }
            }
            (BlockedOperation::PopRight, PoppedValue::Element(element)) => {
                if let Ok(list) = state.lookup_list_for_write(key) {
                    list.push_back(element);
                }
            }
            (
                BlockedOperation::PopMaxScore | BlockedOperation::PopMinScore,
                PoppedValue::Scored(member, score),
            ) => {
                if let Ok(sorted) = state.lookup_sorted_set_for_write(key) {
                    let _ = sorted.add(score, member);
                }
            }
            (BlockedOperation::RotatePopPush, PoppedValue::Element(element)) => {
                if let Some(destination) = destination {
                    let _ = state.left_pop_from(destination);
                }
                if let Ok(list) = state.lookup_list_for_write(key) {
                    list.push_back(element);
                }
            }
            _ => {}
        }
    }
}

fn key_element_reply(key: &[u8], element: &[u8]) -> Reply {
    Reply::Array(vec![
        Reply::BulkString(key.to_vec()),
        Reply::BulkString(element.to_vec()),
    ])
}

fn key_member_score_reply(key: &[u8], member: &[u8], score: f64) -> Reply {
    Reply::Array(vec![
        Reply::BulkString(key.to_vec()),
        Reply::BulkString(member.to_vec()),
        Reply::BulkString(format_score(score).into_bytes()),
    ])
}

#[cfg(test)]
mod tests {
    use super::{BlockingScheduler, HashMap};
    use crate::reactor::Session;
    use coral_core::dispatch::{BlockedOperation, CommandOutcome, CommandRegistry, Deferral, DispatchState};
    use coral_core::command::CommandFrame;
    use googletest::prelude::*;
    use mio::Token;
    use rstest::rstest;
    use std::io::Read;
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    fn session_pair(listener: &TcpListener) -> (Session, TcpStream) {
        let addr = listener
            .local_addr()
            .expect("listener must expose local addr");
        let client = TcpStream::connect(addr).expect("connect should succeed");
        let (server_stream, _) = listener.accept().expect("accept should succeed");
        server_stream
            .set_nonblocking(true)
            .expect("accepted socket should be nonblocking");
        client
            .set_nonblocking(true)
            .expect("client socket should be nonblocking");
        let session = Session::new(mio::net::TcpStream::from_std(server_stream));
        (session, client)
    }

    fn read_until(client: &mut TcpStream, expected_len: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_millis(600);
        let mut collected = Vec::new();
        while Instant::now() < deadline && collected.len() < expected_len {
            let mut chunk = [0_u8; 256];
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(read_len) => collected.extend_from_slice(&chunk[..read_len]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(error) => panic!("read from client failed: {error}"),
            }
        }
        collected
    }

    fn list_deferral(keys: &[&[u8]], timeout: Option<Duration>) -> Deferral {
        Deferral {
            timeout,
            keys: keys.iter().map(|key| key.to_vec()).collect(),
            operation: BlockedOperation::PopLeft,
            destination: None,
        }
    }

    fn push(state: &mut DispatchState, key: &[u8], element: &[u8]) {
        let registry = CommandRegistry::with_builtin_commands();
        let frame = CommandFrame::new("RPUSH", vec![key.to_vec(), element.to_vec()]);
        let CommandOutcome::Reply(_) = registry.dispatch(&frame, state) else {
            panic!("RPUSH must not defer");
        };
    }

    #[rstest]
    fn waiters_on_one_key_are_served_in_arrival_order() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (first_session, mut first_client) = session_pair(&listener);
        let (second_session, mut second_client) = session_pair(&listener);
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), first_session);
        let _ = sessions.insert(Token(2), second_session);

        let mut state = DispatchState::new();
        let mut scheduler = BlockingScheduler::new();
        scheduler.block_session(Token(1), list_deferral(&[b"q"], None), Instant::now());
        scheduler.block_session(Token(2), list_deferral(&[b"q"], None), Instant::now());

        push(&mut state, b"q", b"v");
        scheduler.drain_ready_keys(&mut state, &mut sessions);

        let first = read_until(&mut first_client, 18);
        assert_that!(&first, eq(&b"*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));
        assert_that!(scheduler.is_blocked(Token(1)), eq(false));
        assert_that!(scheduler.is_blocked(Token(2)), eq(true));
        assert_that!(read_until(&mut second_client, 1).is_empty(), eq(true));
    }

    #[rstest]
    fn multi_key_waiter_is_fully_released_by_one_key() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (session, mut client) = session_pair(&listener);
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), session);

        let mut state = DispatchState::new();
        let mut scheduler = BlockingScheduler::new();
        scheduler.block_session(
            Token(1),
            list_deferral(&[b"a", b"b"], None),
            Instant::now(),
        );

        push(&mut state, b"b", b"from-b");
        scheduler.drain_ready_keys(&mut state, &mut sessions);

        let reply = read_until(&mut client, 23);
        assert_that!(&reply, eq(&b"*2\r\n$1\r\nb\r\n$6\r\nfrom-b\r\n".to_vec()));
        assert_that!(scheduler.waiter_count(), eq(0));

        // the other watched key no longer wakes anyone
        push(&mut state, b"a", b"ignored");
        scheduler.drain_ready_keys(&mut state, &mut sessions);
        assert_that!(read_until(&mut client, 1).is_empty(), eq(true));
    }

    #[rstest]
    fn timeouts_fire_in_deadline_order_with_null_replies() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (first_session, mut first_client) = session_pair(&listener);
        let (second_session, mut second_client) = session_pair(&listener);
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), first_session);
        let _ = sessions.insert(Token(2), second_session);

        let start = Instant::now();
        let mut scheduler = BlockingScheduler::new();
        // the later deadline is registered first on purpose
        scheduler.block_session(
            Token(2),
            list_deferral(&[b"q"], Some(Duration::from_millis(20))),
            start,
        );
        scheduler.block_session(
            Token(1),
            list_deferral(&[b"q"], Some(Duration::from_millis(10))),
            start,
        );

        assert_that!(
            scheduler.nearest_deadline(),
            eq(Some(start + Duration::from_millis(10)))
        );

        scheduler.expire_timed_out(start + Duration::from_millis(30), &mut sessions);

        assert_that!(&scheduler.take_unblocked(), eq(&vec![Token(1), Token(2)]));
        assert_that!(&read_until(&mut first_client, 5), eq(&b"*-1\r\n".to_vec()));
        assert_that!(&read_until(&mut second_client, 5), eq(&b"*-1\r\n".to_vec()));
        assert_that!(scheduler.waiter_count(), eq(0));
    }

    #[rstest]
    fn failed_delivery_rolls_the_value_back_for_the_next_waiter() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (dead_session, _dead_client) = session_pair(&listener);
        let (live_session, mut live_client) = session_pair(&listener);
        dead_session
            .shutdown_write_for_tests()
            .expect("shutdown of the dead session should succeed");
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), dead_session);
        let _ = sessions.insert(Token(2), live_session);

        let mut state = DispatchState::new();
        let mut scheduler = BlockingScheduler::new();
        scheduler.block_session(Token(1), list_deferral(&[b"q"], None), Instant::now());
        scheduler.block_session(Token(2), list_deferral(&[b"q"], None), Instant::now());

        push(&mut state, b"q", b"v");
        scheduler.drain_ready_keys(&mut state, &mut sessions);

        // the dead head waiter is dropped and the rolled-back value reaches the live one
        let reply = read_until(&mut live_client, 18);
        assert_that!(&reply, eq(&b"*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));
        assert_that!(scheduler.waiter_count(), eq(0));
        assert_that!(state.key_count(), eq(0));
    }

    #[rstest]
    fn mismatched_head_waiter_moves_to_the_tail_and_parks_the_key() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (zset_session, mut zset_client) = session_pair(&listener);
        let (list_session, mut list_client) = session_pair(&listener);
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), zset_session);
        let _ = sessions.insert(Token(2), list_session);

        let mut state = DispatchState::new();
        let mut scheduler = BlockingScheduler::new();
        scheduler.block_session(
            Token(1),
            Deferral {
                timeout: None,
                keys: vec![b"q".to_vec()],
                operation: BlockedOperation::PopMaxScore,
                destination: None,
            },
            Instant::now(),
        );
        scheduler.block_session(Token(2), list_deferral(&[b"q"], None), Instant::now());

        push(&mut state, b"q", b"v");
        scheduler.drain_ready_keys(&mut state, &mut sessions);

        // the pass stops at the mismatch: nobody is served and the value stays put
        assert_that!(read_until(&mut zset_client, 1).is_empty(), eq(true));
        assert_that!(read_until(&mut list_client, 1).is_empty(), eq(true));
        assert_that!(scheduler.waiter_count(), eq(2));
        assert_that!(state.key_count(), eq(1));

        // the next readiness mark finds the list waiter at the head
        scheduler.mark_ready_if_watched(b"q");
        scheduler.drain_ready_keys(&mut state, &mut sessions);
        let reply = read_until(&mut list_client, 18);
        assert_that!(&reply, eq(&b"*2\r\n$1\r\nq\r\n$1\r\nv\r\n".to_vec()));
        assert_that!(scheduler.is_blocked(Token(1)), eq(true));
    }

    #[rstest]
    fn rotate_waiter_receives_the_element_and_fills_the_destination() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (session, mut client) = session_pair(&listener);
        let mut sessions = HashMap::new();
        let _ = sessions.insert(Token(1), session);

        let mut state = DispatchState::new();
        let mut scheduler = BlockingScheduler::new();
        scheduler.block_session(
            Token(1),
            Deferral {
                timeout: None,
                keys: vec![b"src".to_vec()],
                operation: BlockedOperation::RotatePopPush,
                destination: Some(b"dst".to_vec()),
            },
            Instant::now(),
        );

        push(&mut state, b"src", b"v");
        scheduler.drain_ready_keys(&mut state, &mut sessions);

        assert_that!(&read_until(&mut client, 7), eq(&b"$1\r\nv\r\n".to_vec()));
        let moved = state
            .lookup_list(b"dst")
            .ok()
            .flatten()
            .map(|list| list.iter().cloned().collect::<Vec<_>>());
        assert_that!(&moved, eq(&Some(vec![b"v".to_vec()])));
    }

    #[rstest]
    fn forgetting_a_session_clears_every_index() {
        let mut scheduler = BlockingScheduler::new();
        let start = Instant::now();
        scheduler.block_session(
            Token(7),
            list_deferral(&[b"a", b"b"], Some(Duration::from_secs(5))),
            start,
        );

        scheduler.forget_session(Token(7));

        assert_that!(scheduler.waiter_count(), eq(0));
        assert_that!(scheduler.nearest_deadline().is_none(), eq(true));
        scheduler.mark_ready_if_watched(b"a");
        assert_that!(scheduler.ready_keys.is_empty(), eq(true));
    }

    #[rstest]
    fn dead_session_socket_reports_failed_delivery() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listener bind should succeed");
        let (mut session, client) = session_pair(&listener);
        session
            .shutdown_write_for_tests()
            .expect("shutdown should succeed");
        drop(client);

        assert_that!(session.enqueue_reply(b"+OK\r\n"), eq(false));
    }
}
