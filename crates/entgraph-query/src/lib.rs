//! Aggregate join-tree model and SQL compiler for EntGraph.
//!
//! A [`JoinTree`] declares how one aggregate maps onto relational tables;
//! [`QueryCompiler`] turns it into a single reusable `SELECT` plus the
//! [`AliasTable`] the row inflater resolves columns through.

pub mod alias;
pub mod compile;
pub mod tree;

pub use alias::AliasTable;
pub use compile::{CompiledSelect, QueryCompiler};
pub use tree::{
    JoinKey, JoinNode, JoinTree, JoinType, NodeId, PolymorphicRoot, PolymorphicVariant, Relation,
};
