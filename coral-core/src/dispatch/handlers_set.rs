use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply};

pub(super) fn handle_sadd(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let set = match state.lookup_set_for_write(&frame.args[0]) {
        Ok(set) => set,
        Err(message) => return Reply::Error(message).into(),
    };
    let mut added = 0;
    for member in &frame.args[1..] {
        if set.insert(member.clone()) {
            added += 1;
        }
    }
    Reply::Integer(added).into()
}

pub(super) fn handle_srem(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let key = frame.args[0].clone();
    let mut removed = 0;
    match state.lookup_set(&key) {
        Ok(Some(set)) => {
            for member in &frame.args[1..] {
                if set.remove(member) {
                    removed += 1;
                }
            }
        }
        Ok(None) => return Reply::Integer(0).into(),
        Err(message) => return Reply::Error(message).into(),
    }
    if state
        .lookup_set(&key)
        .is_ok_and(|set| set.is_some_and(|set| set.is_empty()))
    {
        let _ = state.delete_key(&key);
    }
    Reply::Integer(removed).into()
}

pub(super) fn handle_scard(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_set(&frame.args[0]) {
        Ok(Some(set)) => Reply::Integer(set.len() as i64).into(),
        Ok(None) => Reply::Integer(0).into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_smembers(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_set(&frame.args[0]) {
        Ok(Some(set)) => {
            let members = set
                .iter()
                .map(|member| Reply::BulkString(member.clone()))
                .collect();
            Reply::Array(members).into()
        }
        Ok(None) => Reply::Array(Vec::new()).into(),
        Err(message) => Reply::Error(message).into(),
    }
}
