//! Mutable keyspace state shared by every command handler.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::containers::{HotMap, HotSet};
use crate::keyspace::Dict;
use crate::value::{SortedSet, Value, ValueKind};

/// Error line for operations against a value of the wrong kind.
pub const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Current wall clock in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// The keyspace: value dict, expiry dict, and bookkeeping for the blocking scheduler.
///
/// Keys expired by the clock are purged lazily on access; the housekeeping time event runs the
/// bounded active sweep and the incremental-rehash steps.
#[derive(Debug, Default)]
pub struct DispatchState {
    keyspace: Dict<Value>,
    expires: Dict<u64>,
    /// Keys created since the last drain, so the scheduler can re-check their waiter queues.
    created_keys: Vec<Vec<u8>>,
}

impl DispatchState {
    /// Creates an empty keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keyspace.len()
    }

    /// Drops the key when its expiry deadline has passed.
    pub fn purge_expired_key(&mut self, key: &[u8]) {
        let Some(&deadline) = self.expires.get(key) else {
            return;
        };
        if deadline <= now_millis() {
            let _ = self.expires.remove(key);
            let _ = self.keyspace.remove(key);
        }
    }

    /// Kind of the value at `key`, after lazy expiry.
    pub fn value_kind(&mut self, key: &[u8]) -> Option<ValueKind> {
        self.purge_expired_key(key);
        self.keyspace.get(key).map(Value::kind)
    }

    /// `TYPE`-style name of the value at `key`; `"none"` when absent.
    pub fn type_name(&mut self, key: &[u8]) -> &'static str {
        self.purge_expired_key(key);
        self.keyspace.get(key).map_or("none", Value::type_name)
    }

    /// Removes the key from both dicts. Returns `true` when a value existed.
    pub fn delete_key(&mut self, key: &[u8]) -> bool {
        let _ = self.expires.remove(key);
        self.keyspace.remove(key).is_some()
    }

    /// Drops every key and expiry.
    pub fn flush(&mut self) {
        self.keyspace = Dict::new();
        self.expires = Dict::new();
    }

    /// Stores a plain string value, clearing any previous expiry.
    pub fn set_string(&mut self, key: &[u8], value: Vec<u8>) {
        let _ = self.expires.remove(key);
        let _ = self.keyspace.insert(key.to_vec(), Value::Str(value));
    }

    /// Absolute expiry deadline of `key` in Unix milliseconds.
    #[must_use]
    pub fn expiry_millis(&self, key: &[u8]) -> Option<u64> {
        self.expires.get(key).copied()
    }

    /// Sets the expiry deadline for an existing key. Returns `false` when the key is absent.
    pub fn set_expiry(&mut self, key: &[u8], deadline_millis: u64) -> bool {
        if !self.keyspace.contains_key(key) {
            return false;
        }
        let _ = self.expires.insert(key.to_vec(), deadline_millis);
        true
    }

    fn record_created(&mut self, key: &[u8]) {
        self.created_keys.push(key.to_vec());
    }

    /// Hands out the keys created since the last call, for ready-key marking.
    pub fn take_created_keys(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.created_keys)
    }

    // --- typed accessors -------------------------------------------------------------------

    /// String value at `key`.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-string value.
    pub fn lookup_string(&mut self, key: &[u8]) -> Result<Option<&Vec<u8>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get(key) {
            Some(Value::Str(value)) => Ok(Some(value)),
            Some(_) => Err(WRONGTYPE.to_owned()),
            None => Ok(None),
        }
    }

    /// List at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-list value.
    pub fn lookup_list(&mut self, key: &[u8]) -> Result<Option<&mut VecDeque<Vec<u8>>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get_mut(key) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(WRONGTYPE.to_owned()),
            None => Ok(None),
        }
    }

    /// List at `key`, created empty when absent. Creation is recorded for the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-list value.
    pub fn lookup_list_for_write(
        &mut self,
        key: &[u8],
    ) -> Result<&mut VecDeque<Vec<u8>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get(key).map(Value::kind) {
            None => {
                let _ = self.keyspace.insert(key.to_vec(), Value::List(VecDeque::new()));
                self.record_created(key);
            }
            Some(ValueKind::List) => {}
            Some(_) => return Err(WRONGTYPE.to_owned()),
        }
        match self.keyspace.get_mut(key) {
            Some(Value::List(list)) => Ok(list),
            _ => Err(WRONGTYPE.to_owned()),
        }
    }

    /// Hash at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-hash value.
    pub fn lookup_hash(
        &mut self,
        key: &[u8],
    ) -> Result<Option<&mut HotMap<Vec<u8>, Vec<u8>>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get_mut(key) {
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(WRONGTYPE.to_owned()),
            None => Ok(None),
        }
    }

    /// Hash at `key`, created empty when absent.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-hash value.
    pub fn lookup_hash_for_write(
        &mut self,
        key: &[u8],
    ) -> Result<&mut HotMap<Vec<u8>, Vec<u8>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get(key).map(Value::kind) {
            None => {
                let _ = self.keyspace.insert(key.to_vec(), Value::Hash(HotMap::new()));
                self.record_created(key);
            }
            Some(ValueKind::Hash) => {}
            Some(_) => return Err(WRONGTYPE.to_owned()),
        }
        match self.keyspace.get_mut(key) {
            Some(Value::Hash(hash)) => Ok(hash),
            _ => Err(WRONGTYPE.to_owned()),
        }
    }

    /// Set at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-set value.
    pub fn lookup_set(&mut self, key: &[u8]) -> Result<Option<&mut HotSet<Vec<u8>>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get_mut(key) {
            Some(Value::Set(set)) => Ok(Some(set)),
            Some(_) => Err(WRONGTYPE.to_owned()),
            None => Ok(None),
        }
    }

    /// Set at `key`, created empty when absent.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-set value.
    pub fn lookup_set_for_write(&mut self, key: &[u8]) -> Result<&mut HotSet<Vec<u8>>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get(key).map(Value::kind) {
            None => {
                let _ = self.keyspace.insert(key.to_vec(), Value::Set(HotSet::new()));
                self.record_created(key);
            }
            Some(ValueKind::Set) => {}
            Some(_) => return Err(WRONGTYPE.to_owned()),
        }
        match self.keyspace.get_mut(key) {
            Some(Value::Set(set)) => Ok(set),
            _ => Err(WRONGTYPE.to_owned()),
        }
    }

    /// Sorted set at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-sorted-set value.
    pub fn lookup_sorted_set(&mut self, key: &[u8]) -> Result<Option<&mut SortedSet>, String> {
        self.purge_expired_key(key);
        match self.keyspace.get_mut(key) {
            Some(Value::SortedSet(sorted)) => Ok(Some(sorted)),
            Some(_) => Err(WRONGTYPE.to_owned()),
            None => Ok(None),
        }
    }

    /// Sorted set at `key`, created empty when absent.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the key holds a non-sorted-set value.
    pub fn lookup_sorted_set_for_write(&mut self, key: &[u8]) -> Result<&mut SortedSet, String> {
        self.purge_expired_key(key);
        match self.keyspace.get(key).map(Value::kind) {
            None => {
                let _ = self
                    .keyspace
                    .insert(key.to_vec(), Value::SortedSet(SortedSet::new()));
                self.record_created(key);
            }
            Some(ValueKind::SortedSet) => {}
            Some(_) => return Err(WRONGTYPE.to_owned()),
        }
        match self.keyspace.get_mut(key) {
            Some(Value::SortedSet(sorted)) => Ok(sorted),
            _ => Err(WRONGTYPE.to_owned()),
        }
    }

    // --- pop primitives shared by immediate and deferred paths -----------------------------

    /// Pops the list head at `key`, dropping the key when the list empties.
    pub fn left_pop_from(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let Some(Value::List(list)) = self.keyspace.get_mut(key) else {
            return None;
        };
        let popped = list.pop_front();
        if list.is_empty() {
            let _ = self.delete_key(key);
        }
        popped
    }

    /// Pops the list tail at `key`, dropping the key when the list empties.
    pub fn right_pop_from(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let Some(Value::List(list)) = self.keyspace.get_mut(key) else {
            return None;
        };
        let popped = list.pop_back();
        if list.is_empty() {
            let _ = self.delete_key(key);
        }
        popped
    }

    /// Pops the highest-scored member at `key`, dropping the key when the set empties.
    pub fn pop_max_from(&mut self, key: &[u8]) -> Option<(Vec<u8>, f64)> {
        let Some(Value::SortedSet(sorted)) = self.keyspace.get_mut(key) else {
            return None;
        };
        let popped = sorted.pop_max();
        if sorted.is_empty() {
            let _ = self.delete_key(key);
        }
        popped
    }

    /// Pops the lowest-scored member at `key`, dropping the key when the set empties.
    pub fn pop_min_from(&mut self, key: &[u8]) -> Option<(Vec<u8>, f64)> {
        let Some(Value::SortedSet(sorted)) = self.keyspace.get_mut(key) else {
            return None;
        };
        let popped = sorted.pop_min();
        if sorted.is_empty() {
            let _ = self.delete_key(key);
        }
        popped
    }

    /// Pops the source tail and pushes it onto the destination head (`RPOPLPUSH`).
    ///
    /// Rotating a single-element list onto itself is a no-op that still reports the element.
    /// Returns `Ok(None)` when the source is absent.
    ///
    /// # Errors
    ///
    /// Returns the `WRONGTYPE` line when the destination holds a non-list value. The
    /// destination is checked before the source is mutated.
    pub fn rotate_pop_push(
        &mut self,
        source: &[u8],
        destination: &[u8],
    ) -> Result<Option<Vec<u8>>, String> {
        self.purge_expired_key(destination);
        if let Some(value) = self.keyspace.get(destination) {
            if value.kind() != ValueKind::List {
                return Err(WRONGTYPE.to_owned());
            }
        }

        let Some(Value::List(source_list)) = self.keyspace.get_mut(source) else {
            return Ok(None);
        };
        if source == destination && source_list.len() == 1 {
            return Ok(source_list.back().cloned());
        }

        let Some(element) = self.right_pop_from(source) else {
            return Ok(None);
        };
        let destination_list = self.lookup_list_for_write(destination)?;
        destination_list.push_front(element.clone());
        Ok(Some(element))
    }

    // --- housekeeping ----------------------------------------------------------------------

    /// Active expiry sweep, bounded by `max_lookups` inspected entries. Returns the number of
    /// evicted keys.
    pub fn sweep_expired(&mut self, max_lookups: usize) -> usize {
        let now = now_millis();
        let mut inspected = 0;
        let mut doomed = Vec::new();
        for (key, &deadline) in self.expires.iter() {
            inspected += 1;
            if deadline <= now {
                doomed.push(key.clone());
            }
            if inspected >= max_lookups {
                break;
            }
        }
        for key in &doomed {
            let _ = self.expires.remove(key);
            let _ = self.keyspace.remove(key);
        }
        doomed.len()
    }

    /// Resizes and incrementally rehashes both dicts within the given budget.
    pub fn maintain_tables(&mut self, rehash_budget: Duration) {
        self.keyspace.resize_if_needed();
        self.expires.resize_if_needed();
        self.keyspace.rehash_millis(rehash_budget);
        self.expires.rehash_millis(rehash_budget);
    }
}
