//! The join node model.
//!
//! A [`JoinTree`] describes how one aggregate is fetched: which tables are
//! joined, through which key pairs, and which capability bundle inflates
//! each node. It carries no SQL; the compiler derives that separately.
//!
//! Trees are built once at mapping-configuration time and never mutated
//! afterwards, so sharing one tree across concurrent query executions is
//! safe.

use entgraph_core::binding::{EntityBinding, IdentifierFn, NewOrMergeFn, RelationFixer, RowReader};
use entgraph_core::{EntityRef, Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of a node within its [`JoinTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a child table is joined to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

impl JoinType {
    /// The SQL keyword for this join type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// The key pair on the edge from a parent node to a child node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinKey {
    /// Column on the parent side.
    pub left: String,
    /// Column on the child side.
    pub right: String,
    pub join_type: JoinType,
}

impl JoinKey {
    /// An INNER JOIN key pair.
    pub fn inner(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            join_type: JoinType::Inner,
        }
    }

    /// A LEFT OUTER JOIN key pair.
    pub fn left_outer(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            join_type: JoinType::LeftOuter,
        }
    }
}

/// One concrete subtype of a polymorphic root.
pub struct PolymorphicVariant {
    /// Label for diagnostics, typically the subtype name.
    pub entity_type: &'static str,
    /// Discriminator value selecting this subtype.
    pub tag: Value,
    new_or_merge: Box<NewOrMergeFn>,
}

impl PolymorphicVariant {
    /// Create a variant from its discriminator tag and constructor.
    pub fn new(
        entity_type: &'static str,
        tag: Value,
        new_or_merge: impl Fn(&RowReader<'_>, Option<&EntityRef>) -> Result<EntityRef>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            entity_type,
            tag,
            new_or_merge: Box::new(new_or_merge),
        }
    }

    /// Build or complete an instance of this subtype from a row.
    pub fn new_or_merge(
        &self,
        reader: &RowReader<'_>,
        existing: Option<&EntityRef>,
    ) -> Result<EntityRef> {
        (self.new_or_merge)(reader, existing)
    }
}

impl std::fmt::Debug for PolymorphicVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymorphicVariant")
            .field("entity_type", &self.entity_type)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// A table-per-class root backed by a generated union sub-query.
///
/// The union projects a superset column set: branch-specific columns are
/// null for rows belonging to other branches. All variants extract the
/// identifier from the same pseudo-columns, so the identifier capability
/// lives on the root rather than per variant.
pub struct PolymorphicRoot {
    /// The pre-generated union sub-query (without surrounding parentheses).
    pub union_sql: String,
    /// Pseudo-column whose value selects the concrete subtype.
    pub discriminator: String,
    identifier: Box<IdentifierFn>,
    /// Subtype variants, in declaration order.
    pub variants: Vec<PolymorphicVariant>,
}

impl PolymorphicRoot {
    /// Extract the root identifier from a row.
    pub fn identifier(&self, reader: &RowReader<'_>) -> Result<Option<Value>> {
        (self.identifier)(reader)
    }

    /// Find the variant matching a discriminator value.
    #[must_use]
    pub fn variant_for(&self, tag: &Value) -> Option<(usize, &PolymorphicVariant)> {
        self.variants.iter().enumerate().find(|(_, v)| &v.tag == tag)
    }

    /// The variant at a remembered index.
    #[must_use]
    pub fn variant(&self, index: usize) -> Option<&PolymorphicVariant> {
        self.variants.get(index)
    }
}

impl std::fmt::Debug for PolymorphicRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymorphicRoot")
            .field("discriminator", &self.discriminator)
            .field("variants", &self.variants)
            .finish_non_exhaustive()
    }
}

/// A node in an aggregate join tree.
#[derive(Debug)]
pub struct JoinNode {
    name: String,
    table: String,
    columns: Vec<String>,
    binding: Option<EntityBinding>,
    fixer: Option<RelationFixer>,
    key: Option<JoinKey>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    polymorphic: Option<PolymorphicRoot>,
}

impl JoinNode {
    /// The node's unique name, used as a path key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The relational table this node reads from.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The columns this node selects.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The inflation capability, absent on pure join nodes.
    #[must_use]
    pub fn binding(&self) -> Option<&EntityBinding> {
        self.binding.as_ref()
    }

    /// The relation fixer wiring this node's entity into its parent.
    #[must_use]
    pub fn fixer(&self) -> Option<&RelationFixer> {
        self.fixer.as_ref()
    }

    /// The join key on the edge from the parent, absent on the root.
    #[must_use]
    pub fn key(&self) -> Option<&JoinKey> {
        self.key.as_ref()
    }

    /// The parent node, absent on the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child nodes in declaration order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The polymorphic union configuration, present only on union roots.
    #[must_use]
    pub fn polymorphic(&self) -> Option<&PolymorphicRoot> {
        self.polymorphic.as_ref()
    }

    /// Whether this node is a pure join (no entity of its own).
    #[must_use]
    pub fn is_pure_join(&self) -> bool {
        self.binding.is_none() && self.polymorphic.is_none()
    }
}

/// A child relation to attach with [`JoinTree::add_relation`].
pub struct Relation {
    name: String,
    table: String,
    columns: Vec<String>,
    binding: Option<EntityBinding>,
    key: JoinKey,
    fixer: Option<RelationFixer>,
}

impl Relation {
    /// An entity-bearing relation node.
    pub fn entity(
        name: impl Into<String>,
        table: impl Into<String>,
        key: JoinKey,
        binding: EntityBinding,
        fixer: RelationFixer,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            binding: Some(binding),
            key,
            fixer: Some(fixer),
        }
    }

    /// A pure join node, used only to reach descendants
    /// (e.g. an associative/link table).
    pub fn join(name: impl Into<String>, table: impl Into<String>, key: JoinKey) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            binding: None,
            key,
            fixer: None,
        }
    }

    /// Set the columns this node selects.
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

/// The aggregate join tree.
pub struct JoinTree {
    nodes: Vec<JoinNode>,
    root: Option<NodeId>,
    by_name: HashMap<String, NodeId>,
}

impl JoinTree {
    /// Create an empty tree with no root.
    ///
    /// Compiling an empty tree fails with the empty-tree mapping error;
    /// attach a root through [`JoinTree::with_root`] instead when the
    /// aggregate shape is known up front.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            by_name: HashMap::new(),
        }
    }

    /// Create a tree with an entity root.
    pub fn with_root(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: &[&str],
        binding: EntityBinding,
    ) -> Self {
        let name = name.into();
        let root = JoinNode {
            name: name.clone(),
            table: table.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            binding: Some(binding),
            fixer: None,
            key: None,
            parent: None,
            children: Vec::new(),
            polymorphic: None,
        };
        let mut by_name = HashMap::new();
        by_name.insert(name, NodeId(0));
        Self {
            nodes: vec![root],
            root: Some(NodeId(0)),
            by_name,
        }
    }

    /// Create a tree whose root is a polymorphic union over several
    /// concrete-subtype tables.
    pub fn with_polymorphic_root(
        name: impl Into<String>,
        union_sql: impl Into<String>,
        discriminator: impl Into<String>,
        columns: &[&str],
        identifier: impl Fn(&RowReader<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
        variants: Vec<PolymorphicVariant>,
    ) -> Result<Self> {
        if variants.is_empty() {
            return Err(Error::invalid_polymorphic(
                "polymorphic root declared without variants",
            ));
        }
        for (i, variant) in variants.iter().enumerate() {
            if variants[..i].iter().any(|v| v.tag == variant.tag) {
                return Err(Error::invalid_polymorphic(format!(
                    "discriminator tag {} declared twice",
                    variant.tag
                )));
            }
        }

        let name = name.into();
        let root = JoinNode {
            name: name.clone(),
            table: name.clone(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            binding: None,
            fixer: None,
            key: None,
            parent: None,
            children: Vec::new(),
            polymorphic: Some(PolymorphicRoot {
                union_sql: union_sql.into(),
                discriminator: discriminator.into(),
                identifier: Box::new(identifier),
                variants,
            }),
        };
        let mut by_name = HashMap::new();
        by_name.insert(name, NodeId(0));
        Ok(Self {
            nodes: vec![root],
            root: Some(NodeId(0)),
            by_name,
        })
    }

    /// Attach a relation under a named parent node.
    ///
    /// Fails with an unknown-node mapping error when `parent_name` is not
    /// in this tree, and with a duplicate-node error when the relation's
    /// name is already taken.
    pub fn add_relation(&mut self, parent_name: &str, relation: Relation) -> Result<NodeId> {
        let parent = *self
            .by_name
            .get(parent_name)
            .ok_or_else(|| Error::unknown_node(parent_name))?;
        if self.by_name.contains_key(&relation.name) {
            return Err(Error::duplicate_node(&relation.name));
        }

        let id = NodeId(self.nodes.len());
        self.by_name.insert(relation.name.clone(), id);
        self.nodes.push(JoinNode {
            name: relation.name,
            table: relation.table,
            columns: relation.columns,
            binding: relation.binding,
            fixer: relation.fixer,
            key: Some(relation.key),
            parent: Some(parent),
            children: Vec::new(),
            polymorphic: None,
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Graft an independently built tree as a subtree at a named node.
    ///
    /// The subtree's root is identified with the named node: its columns are
    /// merged (and its binding adopted when the named node has none), and
    /// its descendants are re-parented under the named node. This composes a
    /// relation's own aggregate-fetch tree into the referencing aggregate's
    /// tree without re-specifying it; a join that duplicates an existing one
    /// is collapsed later, by the compiler.
    pub fn project(&mut self, subtree: JoinTree, at_node_name: &str) -> Result<()> {
        let at = *self
            .by_name
            .get(at_node_name)
            .ok_or_else(|| Error::unknown_node(at_node_name))?;
        let sub_root = subtree.root.ok_or_else(Error::empty_tree)?;

        for node in &subtree.nodes {
            if node.parent.is_some() && self.by_name.contains_key(&node.name) {
                return Err(Error::duplicate_node(&node.name));
            }
        }

        // The sub-root is not copied, so fresh ids are assigned in iteration
        // order with its slot skipped.
        let offset = self.nodes.len();
        let mut sub_nodes = Vec::with_capacity(subtree.nodes.len() - 1);
        let mut remapped = vec![at; subtree.nodes.len()];
        let mut next = offset;
        for (i, slot) in remapped.iter_mut().enumerate() {
            if i != sub_root.0 {
                *slot = NodeId(next);
                next += 1;
            }
        }

        for (i, node) in subtree.nodes.into_iter().enumerate() {
            if i == sub_root.0 {
                let target = &mut self.nodes[at.0];
                for column in node.columns {
                    if !target.columns.contains(&column) {
                        target.columns.push(column);
                    }
                }
                if target.binding.is_none() {
                    target.binding = node.binding;
                }
                for child in node.children {
                    self.nodes[at.0].children.push(remapped[child.0]);
                }
                continue;
            }
            let id = remapped[i];
            self.by_name.insert(node.name.clone(), id);
            sub_nodes.push(JoinNode {
                parent: Some(remapped[node.parent.expect("non-root subtree node has a parent").0]),
                children: node.children.iter().map(|c| remapped[c.0]).collect(),
                ..node
            });
            debug_assert_eq!(id.0, offset + sub_nodes.len() - 1);
        }
        self.nodes.extend(sub_nodes);
        Ok(())
    }

    /// The root node, when the tree has one.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The node with the given id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &JoinNode {
        &self.nodes[id.0]
    }

    /// Look up a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node-name path from the root to a node, root included.
    #[must_use]
    pub fn path(&self, id: NodeId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            path.push(self.nodes[node.0].name.as_str());
            cursor = self.nodes[node.0].parent;
        }
        path.reverse();
        path
    }

    /// Pre-order iteration over node ids.
    #[must_use]
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root else {
            return order;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.nodes[id.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}

impl Default for JoinTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JoinTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinTree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .finish()
    }
}
