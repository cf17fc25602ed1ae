//! Core types and traits for the EntGraph persistence engine.
//!
//! This crate provides the foundation the query compiler, row inflater and
//! cascade coordinator build on:
//!
//! - `Value` / `Row` for wire-neutral column data
//! - the error taxonomy and `Result` alias
//! - `EntityRef` shared entity references and the per-node capability
//!   bundle (`EntityBinding`, `RelationFixer`, `RowReader`)
//! - the narrow `Connection` and `Dialect` seams
//! - `Cx`/`Outcome` re-exports from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod binding;
pub mod connection;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use binding::{EntityBinding, IdentifierFn, NewOrMergeFn, RelationFixer, RelationKind, RowReader};
pub use connection::Connection;
pub use entity::{EntityRef, entity_ptr, new_entity, same_entity, typed, with_entity, with_entity_mut};
pub use error::{
    CascadeError, Error, InflateError, MappingError, MappingErrorKind, QueryError, QueryErrorKind,
    Result, TypeError,
};
pub use identifiers::{AnsiDialect, Dialect, is_plain_ident, quote_ident, quote_if_keyword};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
