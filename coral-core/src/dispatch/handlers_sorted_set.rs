use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply, format_score};

pub(super) fn handle_zadd(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    if !frame.args[1..].len().is_multiple_of(2) {
        return Reply::Error("ERR syntax error".to_owned()).into();
    }
    let mut pending = Vec::with_capacity(frame.args[1..].len() / 2);
    for pair in frame.args[1..].chunks_exact(2) {
        let Some(score) = parse_score_argument(&pair[0]) else {
            return Reply::Error("ERR value is not a valid float".to_owned()).into();
        };
        pending.push((pair[1].clone(), score));
    }

    let sorted = match state.lookup_sorted_set_for_write(&frame.args[0]) {
        Ok(sorted) => sorted,
        Err(message) => return Reply::Error(message).into(),
    };
    let mut added = 0;
    for (member, score) in pending {
        if sorted.add(score, member) {
            added += 1;
        }
    }
    Reply::Integer(added).into()
}

pub(super) fn handle_zscore(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_sorted_set(&frame.args[0]) {
        Ok(Some(sorted)) => match sorted.score(&frame.args[1]) {
            Some(score) => Reply::BulkString(format_score(score).into_bytes()).into(),
            None => Reply::Null.into(),
        },
        Ok(None) => Reply::Null.into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_zcard(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_sorted_set(&frame.args[0]) {
        Ok(Some(sorted)) => Reply::Integer(sorted.len() as i64).into(),
        Ok(None) => Reply::Integer(0).into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_zpopmax(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    pop_extreme(frame, state, DispatchState::pop_max_from)
}

pub(super) fn handle_zpopmin(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    pop_extreme(frame, state, DispatchState::pop_min_from)
}

fn pop_extreme(
    frame: &CommandFrame,
    state: &mut DispatchState,
    pop: fn(&mut DispatchState, &[u8]) -> Option<(Vec<u8>, f64)>,
) -> CommandOutcome {
    if let Err(message) = state.lookup_sorted_set(&frame.args[0]) {
        return Reply::Error(message).into();
    }
    match pop(state, &frame.args[0]) {
        Some((member, score)) => Reply::Array(vec![
            Reply::BulkString(member),
            Reply::BulkString(format_score(score).into_bytes()),
        ])
        .into(),
        None => Reply::Array(Vec::new()).into(),
    }
}

pub(super) fn parse_score_argument(raw: &[u8]) -> Option<f64> {
    let score = std::str::from_utf8(raw).ok()?.parse::<f64>().ok()?;
    if score.is_nan() { None } else { Some(score) }
}
