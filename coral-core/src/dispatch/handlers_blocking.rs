use std::time::Duration;

use super::{BlockedOperation, CommandOutcome, Deferral, DispatchState};
use crate::command::{CommandFrame, Reply, format_score};

pub(super) fn handle_blpop(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    blocking_list_pop(frame, state, BlockedOperation::PopLeft)
}

pub(super) fn handle_brpop(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    blocking_list_pop(frame, state, BlockedOperation::PopRight)
}

pub(super) fn handle_bzpopmax(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    blocking_score_pop(frame, state, BlockedOperation::PopMaxScore)
}

pub(super) fn handle_bzpopmin(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    blocking_score_pop(frame, state, BlockedOperation::PopMinScore)
}

pub(super) fn handle_brpoplpush(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let timeout = match parse_timeout_argument(&frame.args[2]) {
        Ok(timeout) => timeout,
        Err(message) => return Reply::Error(message).into(),
    };

    let source = &frame.args[0];
    match state.lookup_list(source) {
        Ok(Some(_)) => match state.rotate_pop_push(source, &frame.args[1]) {
            Ok(Some(element)) => Reply::BulkString(element).into(),
            Ok(None) => Reply::Null.into(),
            Err(message) => Reply::Error(message).into(),
        },
        Ok(None) => CommandOutcome::Block(Deferral {
            timeout,
            keys: vec![source.clone()],
            operation: BlockedOperation::RotatePopPush,
            destination: Some(frame.args[1].clone()),
        }),
        Err(message) => Reply::Error(message).into(),
    }
}

fn blocking_list_pop(
    frame: &CommandFrame,
    state: &mut DispatchState,
    operation: BlockedOperation,
) -> CommandOutcome {
    let (keys, timeout) = match split_keys_and_timeout(frame) {
        Ok(parts) => parts,
        Err(message) => return Reply::Error(message).into(),
    };

    for key in keys {
        match state.lookup_list(key) {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(message) => return Reply::Error(message).into(),
        }
        let popped = match operation {
            BlockedOperation::PopRight => state.right_pop_from(key),
            _ => state.left_pop_from(key),
        };
        if let Some(element) = popped {
            return Reply::Array(vec![
                Reply::BulkString(key.clone()),
                Reply::BulkString(element),
            ])
            .into();
        }
    }

    CommandOutcome::Block(Deferral {
        timeout,
        keys: owned_keys(frame),
        operation,
        destination: None,
    })
}

fn blocking_score_pop(
    frame: &CommandFrame,
    state: &mut DispatchState,
    operation: BlockedOperation,
) -> CommandOutcome {
    let (keys, timeout) = match split_keys_and_timeout(frame) {
        Ok(parts) => parts,
        Err(message) => return Reply::Error(message).into(),
    };

    for key in keys {
        match state.lookup_sorted_set(key) {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(message) => return Reply::Error(message).into(),
        }
        let popped = match operation {
            BlockedOperation::PopMinScore => state.pop_min_from(key),
            _ => state.pop_max_from(key),
        };
        if let Some((member, score)) = popped {
            return Reply::Array(vec![
                Reply::BulkString(key.clone()),
                Reply::BulkString(member),
                Reply::BulkString(format_score(score).into_bytes()),
            ])
            .into();
        }
    }

    CommandOutcome::Block(Deferral {
        timeout,
        keys: owned_keys(frame),
        operation,
        destination: None,
    })
}

fn split_keys_and_timeout(frame: &CommandFrame) -> Result<(&[Vec<u8>], Option<Duration>), String> {
    let (timeout_raw, keys) = frame
        .args
        .split_last()
        .ok_or_else(|| "ERR wrong number of arguments".to_owned())?;
    let timeout = parse_timeout_argument(timeout_raw)?;
    Ok((keys, timeout))
}

fn owned_keys(frame: &CommandFrame) -> Vec<Vec<u8>> {
    frame.args[..frame.args.len() - 1].to_vec()
}

/// Parses a blocking timeout in seconds. Zero means wait forever.
fn parse_timeout_argument(raw: &[u8]) -> Result<Option<Duration>, String> {
    let seconds = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite())
        .ok_or_else(|| "ERR timeout is not a float or out of range".to_owned())?;
    if seconds < 0.0 {
        return Err("ERR timeout is negative".to_owned());
    }
    if seconds == 0.0 {
        Ok(None)
    } else {
        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| "ERR timeout is not a float or out of range".to_owned())
    }
}
