//! Row inflation and write-cascade coordination for EntGraph.
//!
//! The read side turns the flat row stream of a compiled aggregate query
//! back into an entity graph ([`Inflater`] + [`IdentityCache`]); the write
//! side keeps one-to-one foreign keys consistent across two tables
//! ([`SourceOwnedCascade`], [`TargetOwnedCascade`], [`ForeignKeyMaintainer`])
//! by hooking into each persister's lifecycle [`EventStream`].

pub mod batch;
pub mod cascade;
pub mod events;
pub mod identity;
pub mod inflate;
pub mod maintainer;
pub mod persister;

pub use batch::{RelationScratch, WriteBatch, WriteStats};
pub use cascade::{OneToOneRelation, RelationAccessor, SourceOwnedCascade, TargetOwnedCascade};
pub use events::{BoxFuture, CascadeHook, EventStream, Phase};
pub use identity::{EntityKey, IdentityCache};
pub use inflate::Inflater;
pub use maintainer::ForeignKeyMaintainer;
pub use persister::{EntityPersister, PersisterBuilder};

// ============================================================================
// Unit Tests
// ============================================================================
