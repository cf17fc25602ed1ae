//! The compiled alias table.
//!
//! Maps every (node, column) pair of a join tree to a globally unique result
//! column alias, and every node to the SQL qualifier its columns are read
//! through. Both are functions of the node-name path from the root, never of
//! the table identity alone, so one physical table reachable at two tree
//! positions (self-relations, diamonds) still gets disjoint aliases.

use crate::tree::NodeId;
use entgraph_core::binding::RowReader;
use entgraph_core::Row;
use std::collections::HashMap;

/// The one-to-one mapping from (node, column) to SQL alias.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    /// Table alias each node is addressed through in FROM/JOIN/ON clauses.
    /// Merged duplicate joins share a qualifier.
    qualifiers: Vec<String>,
    /// Column-alias prefix per node; unique even for merged joins.
    prefixes: Vec<String>,
    /// (node index, column) -> result column alias.
    columns: HashMap<(usize, String), String>,
}

impl AliasTable {
    pub(crate) fn with_capacity(nodes: usize) -> Self {
        Self {
            qualifiers: vec![String::new(); nodes],
            prefixes: vec![String::new(); nodes],
            columns: HashMap::new(),
        }
    }

    pub(crate) fn set_qualifier(&mut self, node: NodeId, qualifier: String) {
        self.qualifiers[node.index()] = qualifier;
    }

    pub(crate) fn set_prefix(&mut self, node: NodeId, prefix: String) {
        self.prefixes[node.index()] = prefix;
    }

    pub(crate) fn insert_column(&mut self, node: NodeId, column: &str, alias: String) {
        self.columns.insert((node.index(), column.to_string()), alias);
    }

    /// The SQL qualifier (table alias) a node's columns are read through.
    #[must_use]
    pub fn qualifier(&self, node: NodeId) -> &str {
        &self.qualifiers[node.index()]
    }

    /// The column-alias prefix of a node.
    #[must_use]
    pub fn prefix(&self, node: NodeId) -> &str {
        &self.prefixes[node.index()]
    }

    /// The result column alias of one node column.
    #[must_use]
    pub fn column_alias(&self, node: NodeId, column: &str) -> Option<&str> {
        self.columns
            .get(&(node.index(), column.to_string()))
            .map(String::as_str)
    }

    /// A reader over `row` scoped to one node's aliases.
    #[must_use]
    pub fn reader<'a>(&'a self, row: &'a Row, node: NodeId) -> RowReader<'a> {
        RowReader::new(row, self.prefix(node))
    }

    /// Number of aliased columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether no columns are aliased.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
