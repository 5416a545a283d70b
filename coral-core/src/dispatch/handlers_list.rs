use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply};

pub(super) fn handle_lpush(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    push_elements(frame, state, PushSide::Left, true)
}

pub(super) fn handle_lpushx(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    push_elements(frame, state, PushSide::Left, false)
}

pub(super) fn handle_rpush(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    push_elements(frame, state, PushSide::Right, true)
}

pub(super) fn handle_rpushx(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    push_elements(frame, state, PushSide::Right, false)
}

pub(super) fn handle_lpop(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    if let Err(message) = state.lookup_list(&frame.args[0]) {
        return Reply::Error(message).into();
    }
    match state.left_pop_from(&frame.args[0]) {
        Some(element) => Reply::BulkString(element).into(),
        None => Reply::Null.into(),
    }
}

pub(super) fn handle_rpop(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    if let Err(message) = state.lookup_list(&frame.args[0]) {
        return Reply::Error(message).into();
    }
    match state.right_pop_from(&frame.args[0]) {
        Some(element) => Reply::BulkString(element).into(),
        None => Reply::Null.into(),
    }
}

pub(super) fn handle_llen(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_list(&frame.args[0]) {
        Ok(Some(list)) => Reply::Integer(list.len() as i64).into(),
        Ok(None) => Reply::Integer(0).into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_lrange(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let (Some(start), Some(stop)) = (
        parse_index_argument(&frame.args[1]),
        parse_index_argument(&frame.args[2]),
    ) else {
        return Reply::Error("ERR value is not an integer or out of range".to_owned()).into();
    };

    let list = match state.lookup_list(&frame.args[0]) {
        Ok(Some(list)) => list,
        Ok(None) => return Reply::Array(Vec::new()).into(),
        Err(message) => return Reply::Error(message).into(),
    };

    let length = list.len() as i64;
    let start = clamp_index(start, length);
    let stop = clamp_index(stop, length);
    if start > stop || start >= length {
        return Reply::Array(Vec::new()).into();
    }

    let elements = list
        .iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .map(|element| Reply::BulkString(element.clone()))
        .collect();
    Reply::Array(elements).into()
}

pub(super) fn handle_rpoplpush(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    if let Err(message) = state.lookup_list(&frame.args[0]) {
        return Reply::Error(message).into();
    }
    match state.rotate_pop_push(&frame.args[0], &frame.args[1]) {
        Ok(Some(element)) => Reply::BulkString(element).into(),
        Ok(None) => Reply::Null.into(),
        Err(message) => Reply::Error(message).into(),
    }
}

enum PushSide {
    Left,
    Right,
}

fn push_elements(
    frame: &CommandFrame,
    state: &mut DispatchState,
    side: PushSide,
    create_missing: bool,
) -> CommandOutcome {
    let key = &frame.args[0];
    if !create_missing {
        match state.lookup_list(key) {
            Ok(Some(_)) => {}
            Ok(None) => return Reply::Integer(0).into(),
            Err(message) => return Reply::Error(message).into(),
        }
    }

    let list = match state.lookup_list_for_write(key) {
        Ok(list) => list,
        Err(message) => return Reply::Error(message).into(),
    };
    for element in &frame.args[1..] {
        match side {
            PushSide::Left => list.push_front(element.clone()),
            PushSide::Right => list.push_back(element.clone()),
        }
    }
    Reply::Integer(list.len() as i64).into()
}

fn parse_index_argument(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse::<i64>().ok()
}

/// Maps a possibly negative range index onto `[0, length]`.
fn clamp_index(index: i64, length: i64) -> i64 {
    if index < 0 {
        (length + index).max(0)
    } else {
        index
    }
}
