//! Per-batch write context.
//!
//! A [`WriteBatch`] is created at the start of one cascaded write batch and
//! passed by mutable reference through every hook invoked during that batch.
//! It carries the [`RelationScratch`] the owned-by-target cascade needs and
//! the running write counters. Nothing here is shared between batches:
//! concurrent batches each get their own instance.

use entgraph_core::{EntityRef, entity_ptr};
use std::collections::HashMap;

/// Ephemeral (target → source) associations for one cascaded batch.
///
/// The foreign-key provider on a table that does not own the relation
/// property only receives the *target* entity; this store lets it find the
/// source whose identifier the foreign key must carry. Entries are keyed by
/// pointer identity of the target reference and the store is cleared
/// unconditionally when the batch step finishes, success or not.
#[derive(Default)]
pub struct RelationScratch {
    sources: HashMap<usize, EntityRef>,
}

impl RelationScratch {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a target entity with its current source.
    pub fn put(&mut self, target: &EntityRef, source: &EntityRef) {
        self.sources.insert(entity_ptr(target), source.clone());
    }

    /// The source currently associated with a target, if any.
    #[must_use]
    pub fn source_for(&self, target: &EntityRef) -> Option<&EntityRef> {
        self.sources.get(&entity_ptr(target))
    }

    /// Drop all associations.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Number of associations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the store holds no associations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for RelationScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationScratch")
            .field("entries", &self.sources.len())
            .finish()
    }
}

/// Running counters for one write batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteStats {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted.
    pub deleted: usize,
}

impl WriteStats {
    /// Total number of rows written.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Context object for one cascaded write batch.
#[derive(Debug, Default)]
pub struct WriteBatch {
    scratch: RelationScratch,
    /// Write counters, updated by the persisters as statements execute.
    pub stats: WriteStats,
}

impl WriteBatch {
    /// Create a fresh batch context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The relation-scratch store.
    #[must_use]
    pub fn scratch(&self) -> &RelationScratch {
        &self.scratch
    }

    /// Mutable access to the relation-scratch store.
    pub fn scratch_mut(&mut self) -> &mut RelationScratch {
        &mut self.scratch
    }
}
