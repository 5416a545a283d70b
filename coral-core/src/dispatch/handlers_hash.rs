use super::{CommandOutcome, DispatchState};
use crate::command::{CommandFrame, Reply};

pub(super) fn handle_hset(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    if !frame.args[1..].len().is_multiple_of(2) {
        return Reply::Error("ERR wrong number of arguments for 'HSET' command".to_owned()).into();
    }

    let hash = match state.lookup_hash_for_write(&frame.args[0]) {
        Ok(hash) => hash,
        Err(message) => return Reply::Error(message).into(),
    };
    let mut added = 0;
    for pair in frame.args[1..].chunks_exact(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    Reply::Integer(added).into()
}

pub(super) fn handle_hget(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_hash(&frame.args[0]) {
        Ok(Some(hash)) => match hash.get(&frame.args[1]) {
            Some(value) => Reply::BulkString(value.clone()).into(),
            None => Reply::Null.into(),
        },
        Ok(None) => Reply::Null.into(),
        Err(message) => Reply::Error(message).into(),
    }
}

pub(super) fn handle_hdel(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    let key = frame.args[0].clone();
    let mut removed = 0;
    match state.lookup_hash(&key) {
        Ok(Some(hash)) => {
            for field in &frame.args[1..] {
                if hash.remove(field).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(None) => return Reply::Integer(0).into(),
        Err(message) => return Reply::Error(message).into(),
    }
    if state
        .lookup_hash(&key)
        .is_ok_and(|hash| hash.is_some_and(|hash| hash.is_empty()))
    {
        let _ = state.delete_key(&key);
    }
    Reply::Integer(removed).into()
}

pub(super) fn handle_hlen(frame: &CommandFrame, state: &mut DispatchState) -> CommandOutcome {
    match state.lookup_hash(&frame.args[0]) {
        Ok(Some(hash)) => Reply::Integer(hash.len() as i64).into(),
        Ok(None) => Reply::Integer(0).into(),
        Err(message) => Reply::Error(message).into(),
    }
}
