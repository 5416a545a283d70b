//! Hot-path container aliases used by core data structures.
//!
//! Container choices are centralized here so allocator/container upgrades can be done in one
//! place without touching command logic modules.

use hashbrown::{HashMap as HbMap, HashSet as HbSet};

/// Hot-path hash map used by value payloads and scheduler indexes.
pub type HotMap<K, V> = HbMap<K, V>;

/// Hot-path hash set used by ready-key and membership tracking.
pub type HotSet<T> = HbSet<T>;
