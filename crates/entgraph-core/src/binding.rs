//! Per-node inflation capabilities.
//!
//! Instead of discovering accessors reflectively, every entity node of a
//! join tree carries an explicit [`EntityBinding`]: a closure extracting the
//! node's identifier from a row and a closure building (or completing) an
//! instance. Edges carry a [`RelationFixer`] that wires a freshly inflated
//! child into its parent.

use crate::Result;
use crate::entity::{EntityRef, new_entity};
use crate::row::{FromValue, Row};
use crate::value::Value;

/// Alias-keyed read access to one node's columns within a row.
///
/// Column aliases follow the `<prefix>_<column>` scheme the query compiler
/// produces; the reader carries the node's prefix so bindings address
/// columns by their mapped name alone.
pub struct RowReader<'a> {
    row: &'a Row,
    prefix: &'a str,
}

impl<'a> RowReader<'a> {
    /// Create a reader over `row` for the node with the given alias prefix.
    #[must_use]
    pub fn new(row: &'a Row, prefix: &'a str) -> Self {
        Self { row, prefix }
    }

    /// The alias a column of this node carries in the result set.
    #[must_use]
    pub fn alias(&self, column: &str) -> String {
        format!("{}_{}", self.prefix, column)
    }

    /// Typed value of one of this node's columns.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        self.row.get_named(&self.alias(column))
    }

    /// Raw value of one of this node's columns, if present in the row.
    #[must_use]
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.row.get_by_name(&self.alias(column))
    }

    /// Raw value of a column selected outside the alias scheme
    /// (e.g. a polymorphic discriminator).
    #[must_use]
    pub fn get_bare(&self, column: &str) -> Option<&Value> {
        self.row.get_by_name(column)
    }

    /// The underlying row.
    #[must_use]
    pub fn row(&self) -> &Row {
        self.row
    }
}

/// Extracts a node's identifier from a row.
///
/// Returns `Ok(None)` when an outer join produced no matching row, which
/// short-circuits inflation of the node's whole subtree.
pub type IdentifierFn = dyn Fn(&RowReader<'_>) -> Result<Option<Value>> + Send + Sync;

/// Builds a new instance from a row, or completes the existing one.
///
/// `existing` is the identity-cached instance for this identifier when one
/// is already live; implementations then return that same reference
/// (optionally merging columns into it).
pub type NewOrMergeFn = dyn Fn(&RowReader<'_>, Option<&EntityRef>) -> Result<EntityRef> + Send + Sync;

/// The inflation capability bundle attached to an entity node.
pub struct EntityBinding {
    /// Label for diagnostics, typically the entity type name.
    pub entity_type: &'static str,
    identifier: Box<IdentifierFn>,
    new_or_merge: Box<NewOrMergeFn>,
}

impl EntityBinding {
    /// Create a binding from explicit capabilities.
    pub fn new(
        entity_type: &'static str,
        identifier: impl Fn(&RowReader<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
        new_or_merge: impl Fn(&RowReader<'_>, Option<&EntityRef>) -> Result<EntityRef>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            entity_type,
            identifier: Box::new(identifier),
            new_or_merge: Box::new(new_or_merge),
        }
    }

    /// Create a binding for the common case: the identifier is a single
    /// column and rows are built by one constructor closure.
    ///
    /// On a cache hit the existing instance is handed back unchanged.
    pub fn keyed<M, F>(entity_type: &'static str, id_column: &'static str, build: F) -> Self
    where
        M: Send + Sync + 'static,
        F: Fn(&RowReader<'_>) -> Result<M> + Send + Sync + 'static,
    {
        Self::new(
            entity_type,
            move |reader| {
                Ok(reader
                    .get_value(id_column)
                    .filter(|v| !v.is_null())
                    .cloned())
            },
            move |reader, existing| match existing {
                Some(entity) => Ok(entity.clone()),
                None => Ok(new_entity(build(reader)?)),
            },
        )
    }

    /// Extract the identifier for this node from a row.
    pub fn identifier(&self, reader: &RowReader<'_>) -> Result<Option<Value>> {
        (self.identifier)(reader)
    }

    /// Build or complete an instance for this node from a row.
    pub fn new_or_merge(
        &self,
        reader: &RowReader<'_>,
        existing: Option<&EntityRef>,
    ) -> Result<EntityRef> {
        (self.new_or_merge)(reader, existing)
    }
}

impl std::fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityBinding")
            .field("entity_type", &self.entity_type)
            .finish_non_exhaustive()
    }
}

/// How a fixed relation stores its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Single-valued assignment.
    ToOne,
    /// Collection accumulation.
    ToMany,
}

/// Wires an inflated child entity into its parent's relation field.
///
/// The engine invokes a fixer at most once per distinct
/// (parent identity, child identity) pair of an edge, so `ToMany` fixers
/// can push unconditionally.
pub struct RelationFixer {
    pub kind: RelationKind,
    apply: Box<dyn Fn(&EntityRef, &EntityRef) -> Result<()> + Send + Sync>,
}

impl RelationFixer {
    /// Fixer for a to-one relation.
    pub fn to_one(
        apply: impl Fn(&EntityRef, &EntityRef) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: RelationKind::ToOne,
            apply: Box::new(apply),
        }
    }

    /// Fixer for a to-many relation.
    pub fn to_many(
        apply: impl Fn(&EntityRef, &EntityRef) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: RelationKind::ToMany,
            apply: Box::new(apply),
        }
    }

    /// Wire `child` into `parent`.
    pub fn apply(&self, parent: &EntityRef, child: &EntityRef) -> Result<()> {
        (self.apply)(parent, child)
    }
}

impl std::fmt::Debug for RelationFixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationFixer").field("kind", &self.kind).finish_non_exhaustive()
    }
}
