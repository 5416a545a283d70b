use super::state::now_millis;
use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply};

pub(super) fn handle_del(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let mut removed = 0;
    for key in &frame.args {
        state.purge_expired_key(key);
        if state.delete_key(key) {
            removed += 1;
        }
    }
    Reply::Integer(removed).into()
}

pub(super) fn handle_exists(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let mut present = 0;
    for key in &frame.args {
        if state.value_kind(key).is_some() {
            present += 1;
        }
    }
    Reply::Integer(present).into()
}

pub(super) fn handle_type(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    Reply::SimpleString(state.type_name(&frame.args[0]).to_owned()).into()
}

pub(super) fn handle_expire(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let Some(seconds) = parse_integer_argument(&frame.args[1]) else {
        return Reply::Error("ERR value is not an integer or out of range".to_owned()).into();
    };
    state.purge_expired_key(&frame.args[0]);
    let deadline = now_millis().saturating_add_signed(seconds.saturating_mul(1000));
    if state.set_expiry(&frame.args[0], deadline) {
        Reply::Integer(1).into()
    } else {
        Reply::Integer(0).into()
    }
}

pub(super) fn handle_ttl(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match remaining_millis(state, &frame.args[0]) {
        Remaining::Missing => Reply::Integer(-2).into(),
        Remaining::NoDeadline => Reply::Integer(-1).into(),
        Remaining::Millis(millis) => Reply::Integer((millis / 1000) as i64).into(),
    }
}

pub(super) fn handle_pttl(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match remaining_millis(state, &frame.args[0]) {
        Remaining::Missing => Reply::Integer(-2).into(),
        Remaining::NoDeadline => Reply::Integer(-1).into(),
        Remaining::Millis(millis) => Reply::Integer(millis as i64).into(),
    }
}

pub(super) fn handle_flushdb(_frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    state.flush();
    Reply::ok().into()
}

/// Minimal `COMMAND` so redis-cli handshakes cleanly.
pub(super) fn handle_command(_frame: &CommandFrame, _state: &mut DispatchState) -> CommandOutcome {
    Reply::Array(Vec::new()).into()
}

enum Remaining {
    Missing,
    NoDeadline,
    Millis(u64),
}

fn remaining_millis(state: &mut DispatchState, key: &[u8]) -> Remaining {
    state.purge_expired_key(key);
    if state.value_kind(key).is_none() {
        return Remaining::Missing;
    }
    match state.expiry_millis(key) {
        None => Remaining::NoDeadline,
        Some(deadline) => Remaining::Millis(deadline.saturating_sub(now_millis())),
    }
}

fn parse_integer_argument(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse::<i64>().ok()
}
