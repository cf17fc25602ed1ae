//! EntGraph: an aggregate-oriented object-relational persistence engine.
//!
//! Given a declarative mapping of an entity graph onto relational tables,
//! EntGraph compiles the graph into one SQL `SELECT` fetching a whole
//! aggregate, reconstructs entity instances with correct object identity
//! from the flat row stream, and on the write side keeps one-to-one
//! foreign keys consistent across tables through cascade coordination.
//!
//! # Reading an aggregate
//!
//! ```ignore
//! use entgraph::prelude::*;
//!
//! let mut tree = JoinTree::with_root("Country", "Country", &["id", "name"], country_binding());
//! tree.add_relation(
//!     "Country",
//!     Relation::entity(
//!         "capital",
//!         "City",
//!         JoinKey::left_outer("capital_id", "id"),
//!         city_binding(),
//!         capital_fixer(),
//!     )
//!     .columns(&["id", "name"]),
//! )?;
//!
//! let query = AggregateQuery::new(tree)?;
//! let countries = query.fetch(&cx, &conn, &[]).await?;
//! ```
//!
//! # Writing an aggregate
//!
//! ```ignore
//! let city = PersisterBuilder::new("City", "id", city_identity)
//!     .column("name", city_name)
//!     .generated_id(apply_city_id)
//!     .build();
//! let mut country = PersisterBuilder::new("Country", "id", country_identity)
//!     .column("name", country_name)
//!     .generated_id(apply_country_id);
//! SourceOwnedCascade::attach(relation, &mut country, city);
//! let country = country.build();
//!
//! let mut batch = WriteBatch::new();
//! country.insert_batch(&cx, &conn, &mut batch, &aggregates).await?;
//! ```

pub mod fetch;

pub use fetch::AggregateQuery;

pub use entgraph_core::{
    AnsiDialect, Connection, Cx, Dialect, EntityBinding, EntityRef, Error, FromValue,
    MappingErrorKind, Outcome, RelationFixer, RelationKind, Result, Row, RowReader, Value,
    new_entity, same_entity, typed, with_entity, with_entity_mut,
};
pub use entgraph_query::{
    AliasTable, CompiledSelect, JoinKey, JoinTree, JoinType, NodeId, PolymorphicVariant,
    QueryCompiler, Relation,
};
pub use entgraph_session::{
    CascadeHook, EntityKey, EntityPersister, EventStream, ForeignKeyMaintainer, IdentityCache,
    Inflater, OneToOneRelation, PersisterBuilder, Phase, RelationScratch, SourceOwnedCascade,
    TargetOwnedCascade, WriteBatch, WriteStats,
};

/// Common imports for mapping, fetching and cascading aggregates.
pub mod prelude {
    pub use crate::fetch::AggregateQuery;
    pub use entgraph_core::{
        Connection, Cx, EntityBinding, EntityRef, Error, Outcome, RelationFixer, Result, Row,
        RowReader, Value, new_entity, typed, with_entity, with_entity_mut,
    };
    pub use entgraph_query::{JoinKey, JoinTree, PolymorphicVariant, Relation};
    pub use entgraph_session::{
        ForeignKeyMaintainer, IdentityCache, Inflater, OneToOneRelation, PersisterBuilder, Phase,
        SourceOwnedCascade, TargetOwnedCascade, WriteBatch,
    };
}
