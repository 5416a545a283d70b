//! Incremental-rehash hash table backing the keyspace.
//!
//! The dict keeps two bucket tables while a rehash is in flight and migrates buckets in small
//! bounded steps, so the single reactor thread never stalls on one large reallocation. Growth
//! and shrinking decisions are made only from the periodic housekeeping time event.

use std::hash::{BuildHasher, RandomState};
use std::time::{Duration, Instant};

/// Bucket count of a freshly created table.
pub const INITIAL_BUCKET_COUNT: usize = 4;

/// Shrink once fill drops below this percentage (and the table grew past its initial size).
const MIN_FILL_PERCENT: usize = 10;

/// Upper bound of empty buckets visited by one incremental step.
const MAX_EMPTY_VISITS_PER_STEP: usize = 10;

/// Buckets migrated between two clock checks of [`Dict::rehash_millis`].
const BUCKETS_PER_CLOCK_CHECK: usize = 100;

#[derive(Debug, Clone)]
struct Table<V> {
    buckets: Vec<Vec<(Vec<u8>, V)>>,
    used: usize,
}

impl<V> Table<V> {
    fn with_bucket_count(bucket_count: usize) -> Self {
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Vec::new);
        Self { buckets, used: 0 }
    }

    fn bucket_index(&self, hash: u64) -> usize {
        // Bucket counts are powers of two, so the mask keeps the full hash distribution.
        (hash as usize) & (self.buckets.len() - 1)
    }
}

/// Chained hash table with Redis-style incremental rehashing.
#[derive(Debug)]
pub struct Dict<V> {
    main: Table<V>,
    rehash_target: Option<Table<V>>,
    rehash_index: usize,
    hasher: RandomState,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    /// Creates an empty dict with the initial bucket count.
    #[must_use]
    pub fn new() -> Self {
        Self {
            main: Table::with_bucket_count(INITIAL_BUCKET_COUNT),
            rehash_target: None,
            rehash_index: 0,
            hasher: RandomState::new(),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.main.used + self.rehash_target.as_ref().map_or(0, |table| table.used)
    }

    /// Whether the dict holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket slots across both tables.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.main.buckets.len()
            + self
                .rehash_target
                .as_ref()
                .map_or(0, |table| table.buckets.len())
    }

    /// Whether a bucket migration is currently in flight.
    #[must_use]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_target.is_some()
    }

    fn hash(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Looks up one entry.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let hash = self.hash(key);
        let main_bucket = &self.main.buckets[self.main.bucket_index(hash)];
        if let Some((_, value)) = main_bucket.iter().find(|(stored, _)| stored == key) {
            return Some(value);
        }
        let target = self.rehash_target.as_ref()?;
        target.buckets[target.bucket_index(hash)]
            .iter()
            .find(|(stored, _)| stored == key)
            .map(|(_, value)| value)
    }

    /// Looks up one entry for mutation.
    #[must_use]
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let hash = self.hash(key);
        let main_index = self.main.bucket_index(hash);
        if self.main.buckets[main_index]
            .iter()
            .any(|(stored, _)| stored == key)
        {
            return self.main.buckets[main_index]
                .iter_mut()
                .find(|(stored, _)| stored == key)
                .map(|(_, value)| value);
        }
        let target = self.rehash_target.as_mut()?;
        let target_index = target.bucket_index(hash);
        target.buckets[target_index]
            .iter_mut()
            .find(|(stored, _)| stored == key)
            .map(|(_, value)| value)
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces one entry, returning the previous value for replacements.
    pub fn insert(&mut self, key: Vec<u8>, value: V) -> Option<V> {
        self.rehash_step();
        let hash = self.hash(&key);

        let main_index = self.main.bucket_index(hash);
        if let Some(slot) = self.main.buckets[main_index]
            .iter_mut()
            .find(|(stored, _)| *stored == key)
        {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        if let Some(target) = self.rehash_target.as_mut() {
            let target_index = target.bucket_index(hash);
            if let Some(slot) = target.buckets[target_index]
                .iter_mut()
                .find(|(stored, _)| *stored == key)
            {
                return Some(std::mem::replace(&mut slot.1, value));
            }
            target.buckets[target_index].push((key, value));
            target.used += 1;
        } else {
            self.main.buckets[main_index].push((key, value));
            self.main.used += 1;
        }
        None
    }

    /// Removes one entry, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.rehash_step();
        let hash = self.hash(key);

        let main_index = self.main.bucket_index(hash);
        if let Some(position) = self.main.buckets[main_index]
            .iter()
            .position(|(stored, _)| stored == key)
        {
            self.main.used -= 1;
            return Some(self.main.buckets[main_index].swap_remove(position).1);
        }
        let target = self.rehash_target.as_mut()?;
        let target_index = target.bucket_index(hash);
        let position = target.buckets[target_index]
            .iter()
            .position(|(stored, _)| stored == key)?;
        target.used -= 1;
        Some(target.buckets[target_index].swap_remove(position).1)
    }

    /// Visits every entry, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &V)> {
        self.main
            .buckets
            .iter()
            .chain(
                self.rehash_target
                    .iter()
                    .flat_map(|table| table.buckets.iter()),
            )
            .flatten()
            .map(|(key, value)| (key, value))
    }

    /// Starts growing or shrinking when the fill ratio warrants it.
    ///
    /// Growth triggers at 100% load; shrinking triggers below 10% fill once the table grew past
    /// its initial size. Called only from the housekeeping time event.
    pub fn resize_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let used = self.main.used;
        let buckets = self.main.buckets.len();
        if used >= buckets {
            self.start_rehash((used.max(1) * 2).next_power_of_two());
        } else if buckets > INITIAL_BUCKET_COUNT && used * 100 / buckets < MIN_FILL_PERCENT {
            self.start_rehash(used.next_power_of_two().max(INITIAL_BUCKET_COUNT));
        }
    }

    fn start_rehash(&mut self, new_bucket_count: usize) {
        if new_bucket_count == self.main.buckets.len() {
            return;
        }
        tracing::debug!(
            from = self.main.buckets.len(),
            to = new_bucket_count,
            used = self.main.used,
            "dict rehash started"
        );
        self.rehash_target = Some(Table::with_bucket_count(new_bucket_count));
        self.rehash_index = 0;
    }

    /// Migrates one bucket (skipping a bounded number of empty ones) toward the new table.
    fn rehash_step(&mut self) {
        let Some(mut target) = self.rehash_target.take() else {
            return;
        };

        let mut empty_visits = 0;
        while self.rehash_index < self.main.buckets.len() {
            let bucket = std::mem::take(&mut self.main.buckets[self.rehash_index]);
            self.rehash_index += 1;
            if bucket.is_empty() {
                empty_visits += 1;
                if empty_visits >= MAX_EMPTY_VISITS_PER_STEP {
                    break;
                }
                continue;
            }
            for (key, value) in bucket {
                let index = target.bucket_index(self.hasher.hash_one(&key));
                target.buckets[index].push((key, value));
                target.used += 1;
                self.main.used -= 1;
            }
            break;
        }

        if self.rehash_index >= self.main.buckets.len() && self.main.used == 0 {
            tracing::debug!(buckets = target.buckets.len(), "dict rehash finished");
            self.main = target;
            self.rehash_index = 0;
        } else {
            self.rehash_target = Some(target);
        }
    }

    /// Runs incremental rehash steps until the budget elapses or the migration completes.
    pub fn rehash_millis(&mut self, budget: Duration) {
        if !self.is_rehashing() {
            return;
        }
        let deadline = Instant::now() + budget;
        while self.is_rehashing() {
            for _ in 0..BUCKETS_PER_CLOCK_CHECK {
                self.rehash_step();
                if !self.is_rehashing() {
                    return;
                }
            }
            if Instant::now() >= deadline {
                return;
            }
        }
    }
}
