//! Foreign-key maintenance for read-mostly relations.
//!
//! Unlike the cascade coordinator, the maintainer does not alter either
//! persister's normal write cascade. It issues one dedicated batch of
//! UPDATE statements touching only the FK column, keeping the relation
//! consistent without full entity cascading.

use asupersync::{Cx, Outcome};
use entgraph_core::{Connection, EntityRef, Error, Result, Value};
use std::sync::Arc;

use crate::persister::EntityPersister;

/// Batched FK-only updates for one one-to-one relation owned by the target.
pub struct ForeignKeyMaintainer<C: Connection> {
    target: Arc<EntityPersister<C>>,
    fk_column: String,
    target_of: Box<dyn Fn(&EntityRef) -> Result<Option<EntityRef>> + Send + Sync>,
    source_identity: Box<dyn Fn(&EntityRef) -> Result<Option<Value>> + Send + Sync>,
}

impl<C: Connection> ForeignKeyMaintainer<C> {
    /// Create a maintainer for the FK column in the target's table.
    pub fn new(
        target: Arc<EntityPersister<C>>,
        fk_column: impl Into<String>,
        target_of: impl Fn(&EntityRef) -> Result<Option<EntityRef>> + Send + Sync + 'static,
        source_identity: impl Fn(&EntityRef) -> Result<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            target,
            fk_column: fk_column.into(),
            target_of: Box::new(target_of),
            source_identity: Box::new(source_identity),
        }
    }

    /// Bring the FK column in line for the given sources' targets.
    ///
    /// Sources without a target, and pairs where either side has no
    /// persistent identity yet, are skipped with a warning; maintenance
    /// never inserts rows.
    #[tracing::instrument(level = "debug", skip_all, fields(column = %self.fk_column, sources = sources.len()))]
    pub async fn maintain(
        &self,
        cx: &Cx,
        conn: &C,
        sources: &[EntityRef],
    ) -> Outcome<u64, Error> {
        let sql = self.target.fk_update_sql(&self.fk_column);
        let mut statements = Vec::new();
        for source in sources {
            let target = match (self.target_of)(source) {
                Ok(Some(target)) => target,
                Ok(None) => continue,
                Err(e) => return Outcome::Err(e),
            };
            let target_id = match self.target.identity_of(&target) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    tracing::warn!(table = %self.target.table(), "skipping unpersisted target in FK maintenance");
                    continue;
                }
                Err(e) => return Outcome::Err(e),
            };
            let source_id = match (self.source_identity)(source) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    tracing::warn!(table = %self.target.table(), "skipping unpersisted source in FK maintenance");
                    continue;
                }
                Err(e) => return Outcome::Err(e),
            };
            statements.push((sql.clone(), vec![source_id, target_id]));
        }

        if statements.is_empty() {
            return Outcome::Ok(0);
        }
        tracing::debug!(statements = statements.len(), "issuing FK maintenance batch");
        match conn.batch(cx, &statements).await {
            Outcome::Ok(counts) => Outcome::Ok(counts.iter().sum()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<C: Connection> std::fmt::Debug for ForeignKeyMaintainer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignKeyMaintainer")
            .field("table", &self.target.table())
            .field("fk_column", &self.fk_column)
            .finish_non_exhaustive()
    }
}
