//! Keyspace value variants.
//!
//! Values are a closed tagged enum so every decision point (type checks, waiter compatibility)
//! is an exhaustive match rather than open-ended inspection.

use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};

use crate::containers::{HotMap, HotSet};

/// One stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(HotMap<Vec<u8>, Vec<u8>>),
    Set(HotSet<Vec<u8>>),
    SortedSet(SortedSet),
}

/// Discriminant of [`Value`], used for type checks and waiter compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    List,
    Hash,
    Set,
    SortedSet,
}

impl Value {
    /// Returns the variant discriminant.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Hash(_) => ValueKind::Hash,
            Self::Set(_) => ValueKind::Set,
            Self::SortedSet(_) => ValueKind::SortedSet,
        }
    }

    /// `TYPE` command name of this variant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::SortedSet(_) => "zset",
        }
    }

    /// Whether this value is a collection that became empty and should be dropped from the
    /// keyspace. Plain strings never count as empty collections.
    #[must_use]
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::List(list) => list.is_empty(),
            Self::Hash(hash) => hash.is_empty(),
            Self::Set(set) => set.is_empty(),
            Self::SortedSet(sorted) => sorted.is_empty(),
        }
    }
}

/// Member ordered by score first, member bytes second.
///
/// Scores are compared with `total_cmp`; NaN scores are rejected at the command layer, so the
/// total order here matches IEEE ordering for every stored score.
#[derive(Debug, Clone)]
struct ScoredMember {
    score: f64,
    member: Vec<u8>,
}

impl PartialEq for ScoredMember {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredMember {}

impl PartialOrd for ScoredMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// Sorted set: a member-to-score map plus a score-ordered index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HotMap<Vec<u8>, f64>,
    ordered: BTreeSet<ScoredMember>,
}

impl SortedSet {
    /// Creates an empty sorted set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds a member or updates its score. Returns `true` when the member is new.
    pub fn add(&mut self, score: f64, member: Vec<u8>) -> bool {
        if let Some(previous) = self.scores.insert(member.clone(), score) {
            let _ = self.ordered.remove(&ScoredMember {
                score: previous,
                member: member.clone(),
            });
            let _ = self.ordered.insert(ScoredMember { score, member });
            false
        } else {
            let _ = self.ordered.insert(ScoredMember { score, member });
            true
        }
    }

    /// Score of one member.
    #[must_use]
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Removes a member. Returns `true` when it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        let Some(score) = self.scores.remove(member) else {
            return false;
        };
        let _ = self.ordered.remove(&ScoredMember {
            score,
            member: member.to_vec(),
        });
        true
    }

    /// Pops the highest-scored member.
    pub fn pop_max(&mut self) -> Option<(Vec<u8>, f64)> {
        let top = self.ordered.pop_last()?;
        let _ = self.scores.remove(&top.member);
        Some((top.member, top.score))
    }

    /// Pops the lowest-scored member.
    pub fn pop_min(&mut self) -> Option<(Vec<u8>, f64)> {
        let bottom = self.ordered.pop_first()?;
        let _ = self.scores.remove(&bottom.member);
        Some((bottom.member, bottom.score))
    }
}

#[cfg(test)]
mod tests {
    use super::{SortedSet, Value, ValueKind};
    use googletest::prelude::*;
    use rstest::rstest;
    use std::collections::VecDeque;

    #[rstest]
    fn sorted_set_orders_by_score_then_member() {
        let mut sorted = SortedSet::new();
        assert_that!(sorted.add(2.0, b"b".to_vec()), eq(true));
        assert_that!(sorted.add(1.0, b"c".to_vec()), eq(true));
        assert_that!(sorted.add(1.0, b"a".to_vec()), eq(true));

        assert_that!(&sorted.pop_max(), eq(&Some((b"b".to_vec(), 2.0))));
        assert_that!(&sorted.pop_min(), eq(&Some((b"a".to_vec(), 1.0))));
        assert_that!(&sorted.pop_min(), eq(&Some((b"c".to_vec(), 1.0))));
        assert_that!(&sorted.pop_min(), eq(&None));
    }

    #[rstest]
    fn updating_a_score_moves_the_member_in_the_order_index() {
        let mut sorted = SortedSet::new();
        let _ = sorted.add(1.0, b"m".to_vec());
        assert_that!(sorted.add(5.0, b"m".to_vec()), eq(false));
        assert_that!(sorted.len(), eq(1_usize));
        assert_that!(&sorted.pop_max(), eq(&Some((b"m".to_vec(), 5.0))));
        assert_that!(sorted.is_empty(), eq(true));
    }

    #[rstest]
    fn remove_keeps_both_indexes_consistent() {
        let mut sorted = SortedSet::new();
        let _ = sorted.add(1.0, b"x".to_vec());
        let _ = sorted.add(2.0, b"y".to_vec());
        assert_that!(sorted.remove(b"x"), eq(true));
        assert_that!(sorted.remove(b"x"), eq(false));
        assert_that!(&sorted.score(b"y"), eq(&Some(2.0)));
        assert_that!(&sorted.pop_max(), eq(&Some((b"y".to_vec(), 2.0))));
    }

    #[rstest]
    fn empty_collections_are_flagged_for_removal() {
        let empty_list = Value::List(VecDeque::new());
        assert_that!(empty_list.is_empty_collection(), eq(true));
        assert_that!(empty_list.kind(), eq(ValueKind::List));

        let string = Value::Str(Vec::new());
        assert_that!(string.is_empty_collection(), eq(false));
        assert_that!(string.type_name(), eq("string"));
    }
}
