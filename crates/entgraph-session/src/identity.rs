//! The per-execution identity cache.
//!
//! Within one query execution there is at most one live instance per
//! (node, identifier): a 1:N join fan-out that repeats a parent's columns
//! across many rows must always resolve to the same parent instance. The
//! cache also remembers which polymorphic variant an identifier resolved to
//! and which relation edges were already wired, so inflation stays
//! idempotent with respect to row order.

use entgraph_core::{EntityRef, Value};
use entgraph_query::NodeId;
use std::collections::{HashMap, HashSet};

/// Cache key: node index plus identifier value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    node: usize,
    id: Value,
}

impl EntityKey {
    /// Key for a node's identifier value.
    #[must_use]
    pub fn new(node: NodeId, id: Value) -> Self {
        Self {
            node: node.index(),
            id,
        }
    }

    /// The identifier value.
    #[must_use]
    pub fn id(&self) -> &Value {
        &self.id
    }
}

struct CachedEntity {
    entity: EntityRef,
    variant: Option<usize>,
}

/// Identity cache for one query execution.
#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<EntityKey, CachedEntity>,
    wired: HashSet<(EntityKey, EntityKey)>,
}

impl IdentityCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached instance for a key, if any.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&EntityRef> {
        self.entries.get(key).map(|e| &e.entity)
    }

    /// Cache an instance for a key.
    pub fn insert(&mut self, key: EntityKey, entity: EntityRef) {
        self.entries.insert(
            key,
            CachedEntity {
                entity,
                variant: None,
            },
        );
    }

    /// The remembered polymorphic variant for a key.
    #[must_use]
    pub fn variant(&self, key: &EntityKey) -> Option<usize> {
        self.entries.get(key).and_then(|e| e.variant)
    }

    /// Remember the resolved polymorphic variant for a key.
    pub fn set_variant(&mut self, key: &EntityKey, variant: usize) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.variant = Some(variant);
        }
    }

    /// Record that a (parent, child) edge was wired.
    ///
    /// Returns `true` the first time; repeated rows then skip the fixer.
    pub fn mark_wired(&mut self, parent: EntityKey, child: EntityKey) -> bool {
        self.wired.insert((parent, child))
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all cached instances and wiring records.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.wired.clear();
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .field("wired", &self.wired.len())
            .finish()
    }
}
