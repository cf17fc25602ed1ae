//! The aggregate fetch driver.
//!
//! Ties the pieces together: a join tree is compiled once into an
//! [`AggregateQuery`]; each execution pulls the row stream through the
//! caller's connection, allocates a fresh identity cache and inflates the
//! rows into distinct aggregate roots.

use asupersync::{Cx, Outcome};
use entgraph_core::{AnsiDialect, Connection, Dialect, EntityRef, Error, Result, Row, Value};
use entgraph_query::{AliasTable, CompiledSelect, JoinTree, QueryCompiler};
use entgraph_session::{IdentityCache, Inflater};

/// A reusable compiled aggregate query.
///
/// Immutable after construction; safe to share across concurrently
/// executing queries. Each execution gets its own identity cache.
#[derive(Debug)]
pub struct AggregateQuery {
    tree: JoinTree,
    compiled: CompiledSelect,
}

impl AggregateQuery {
    /// Compile a tree with ANSI identifier quoting.
    pub fn new(tree: JoinTree) -> Result<Self> {
        Self::with_dialect(tree, &AnsiDialect)
    }

    /// Compile a tree against a specific dialect.
    pub fn with_dialect(tree: JoinTree, dialect: &dyn Dialect) -> Result<Self> {
        let compiled = QueryCompiler::new(dialect).compile(&tree)?;
        Ok(Self { tree, compiled })
    }

    /// Compile a tree with a caller-rendered WHERE predicate appended.
    pub fn filtered(tree: JoinTree, predicate: &str) -> Result<Self> {
        let compiled = QueryCompiler::new(&AnsiDialect).compile_filtered(&tree, Some(predicate))?;
        Ok(Self { tree, compiled })
    }

    /// The compiled SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    /// The compiled alias table.
    #[must_use]
    pub fn aliases(&self) -> &AliasTable {
        &self.compiled.aliases
    }

    /// The join tree this query was compiled from.
    #[must_use]
    pub fn tree(&self) -> &JoinTree {
        &self.tree
    }

    /// An inflater over this query's tree and aliases.
    #[must_use]
    pub fn inflater(&self) -> Inflater<'_> {
        Inflater::new(&self.tree, &self.compiled.aliases)
    }

    /// Inflate an already-fetched row stream with a fresh identity cache.
    pub fn inflate_all(&self, rows: &[Row]) -> Result<Vec<EntityRef>> {
        self.inflater().inflate_all(rows)
    }

    /// Inflate rows into a caller-owned identity cache.
    ///
    /// Lets several statements of one logical query execution share
    /// instances; the cache must not outlive the execution.
    pub fn inflate_into(&self, rows: &[Row], cache: &mut IdentityCache) -> Result<Vec<EntityRef>> {
        self.inflater().inflate_rows(rows, cache)
    }

    /// Execute the query and inflate the full result.
    ///
    /// Returns the distinct aggregate roots in first-seen order. The
    /// identity cache lives exactly as long as this execution.
    pub async fn fetch<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        params: &[Value],
    ) -> Outcome<Vec<EntityRef>, Error> {
        let rows = match conn.query(cx, self.sql(), params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(rows = rows.len(), "fetched aggregate rows");
        match self.inflate_all(&rows) {
            Ok(roots) => Outcome::Ok(roots),
            Err(e) => Outcome::Err(e),
        }
    }
}
