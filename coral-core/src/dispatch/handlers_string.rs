use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply};

pub(super) fn handle_ping(frame: &CommandFrame, _state: &mut DispatchState) -> CommandOutcome {
    if frame.args.is_empty() {
        return Reply::SimpleString("PONG".to_owned()).into();
    }
    if frame.args.len() == 1 {
        return Reply::BulkString(frame.args[0].clone()).into();
    }
    Reply::Error("ERR wrong number of arguments for 'PING' command".to_owned()).into()
}

pub(super) fn handle_echo(frame: &CommandFrame, _state: &mut DispatchState) -> CommandOutcome {
    Reply::BulkString(frame.args[0].clone()).into()
}

pub(super) fn handle_get(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_string(&frame.args[0]) {
        Ok(Some(value)) => Reply::BulkString(value.clone()).into(),
        Ok(None) => Reply::Null.into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_set(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    state.set_string(&frame.args[0], frame.args[1].clone());
    Reply::ok().into()
}
