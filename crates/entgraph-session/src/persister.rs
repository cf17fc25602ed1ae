//! Entity persisters.
//!
//! An [`EntityPersister`] writes one entity type to one table. It knows the
//! mapped columns (as extraction closures), the *shadow columns* the engine
//! populates itself (typically foreign keys), how to read an entity's
//! identifier, and optionally how to apply a database-generated id. Every
//! write batch emits the surrounding lifecycle events, which is where the
//! cascade coordinator hooks in.

use crate::batch::WriteBatch;
use crate::events::{CascadeHook, EventStream, Phase};
use asupersync::{Cx, Outcome};
use entgraph_core::{AnsiDialect, Connection, Dialect, EntityRef, Error, Result, Value};
use std::sync::Arc;

/// Reads an entity's identifier; `None` (or NULL) means "not yet persisted".
pub type IdentityFn = Box<dyn Fn(&EntityRef) -> Result<Option<Value>> + Send + Sync>;

/// A directly mapped column: name plus value extraction.
struct ColumnBinding {
    column: String,
    extract: Box<dyn Fn(&EntityRef) -> Result<Value> + Send + Sync>,
}

/// A column populated by the engine rather than by a mapped property.
///
/// The provider sees the per-batch context, which is how the
/// owned-by-target foreign-key provider reaches the relation scratch.
struct ShadowColumn {
    column: String,
    provide: Box<dyn Fn(&WriteBatch, &EntityRef) -> Result<Value> + Send + Sync>,
}

/// Builder for [`EntityPersister`].
///
/// Column and id configuration use the consuming builder style; hooks and
/// shadow columns register through `&mut` so cascade wiring can add them
/// while the caller still owns the builder.
pub struct PersisterBuilder<C: Connection> {
    table: String,
    id_column: String,
    columns: Vec<ColumnBinding>,
    shadow_columns: Vec<ShadowColumn>,
    identity: IdentityFn,
    apply_generated_id: Option<Box<dyn Fn(&EntityRef, i64) -> Result<()> + Send + Sync>>,
    events: EventStream<C>,
    dialect: Arc<dyn Dialect>,
}

impl<C: Connection> PersisterBuilder<C> {
    /// Start a builder for one table.
    pub fn new(
        table: impl Into<String>,
        id_column: impl Into<String>,
        identity: impl Fn(&EntityRef) -> Result<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            columns: Vec::new(),
            shadow_columns: Vec::new(),
            identity: Box::new(identity),
            apply_generated_id: None,
            events: EventStream::new(),
            dialect: Arc::new(AnsiDialect),
        }
    }

    /// Map a column to an extraction closure.
    #[must_use]
    pub fn column(
        mut self,
        name: impl Into<String>,
        extract: impl Fn(&EntityRef) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.columns.push(ColumnBinding {
            column: name.into(),
            extract: Box::new(extract),
        });
        self
    }

    /// Apply database-generated ids after insert.
    ///
    /// When set, inserts run row by row through [`Connection::insert`] so
    /// each entity receives its generated key.
    #[must_use]
    pub fn generated_id(
        mut self,
        apply: impl Fn(&EntityRef, i64) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.apply_generated_id = Some(Box::new(apply));
        self
    }

    /// Use a specific dialect for identifier quoting.
    #[must_use]
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Register an engine-populated column.
    pub fn shadow_column(
        &mut self,
        name: impl Into<String>,
        provide: impl Fn(&WriteBatch, &EntityRef) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.shadow_columns.push(ShadowColumn {
            column: name.into(),
            provide: Box::new(provide),
        });
    }

    /// Register a lifecycle handler.
    pub fn on(&mut self, phase: Phase, hook: impl CascadeHook<C> + 'static) {
        self.events.on(phase, hook);
    }

    /// Register an error observer.
    pub fn on_error(&mut self, hook: impl Fn(&[EntityRef], &Error) + Send + Sync + 'static) {
        self.events.on_error(hook);
    }

    /// Finish the persister.
    #[must_use]
    pub fn build(self) -> Arc<EntityPersister<C>> {
        Arc::new(EntityPersister {
            table: self.table,
            id_column: self.id_column,
            columns: self.columns,
            shadow_columns: self.shadow_columns,
            identity: self.identity,
            apply_generated_id: self.apply_generated_id,
            events: self.events,
            dialect: self.dialect,
        })
    }
}

/// Writes one entity type to one table, emitting lifecycle events.
pub struct EntityPersister<C: Connection> {
    table: String,
    id_column: String,
    columns: Vec<ColumnBinding>,
    shadow_columns: Vec<ShadowColumn>,
    identity: IdentityFn,
    apply_generated_id: Option<Box<dyn Fn(&EntityRef, i64) -> Result<()> + Send + Sync>>,
    events: EventStream<C>,
    dialect: Arc<dyn Dialect>,
}

impl<C: Connection> EntityPersister<C> {
    /// The mapped table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The identifier column name.
    #[must_use]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// The persister's event stream, for inspection.
    #[must_use]
    pub fn events(&self) -> &EventStream<C> {
        &self.events
    }

    /// An entity's identifier value, NULL normalized to `None`.
    pub fn identity_of(&self, entity: &EntityRef) -> Result<Option<Value>> {
        Ok((self.identity)(entity)?.filter(|v| !v.is_null()))
    }

    /// Whether an entity already has a persistent identity.
    pub fn is_persisted(&self, entity: &EntityRef) -> Result<bool> {
        Ok(self.identity_of(entity)?.is_some())
    }

    fn row_values(&self, batch: &WriteBatch, entity: &EntityRef) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.columns.len() + self.shadow_columns.len());
        for column in &self.columns {
            values.push((column.extract)(entity)?);
        }
        for shadow in &self.shadow_columns {
            values.push((shadow.provide)(batch, entity)?);
        }
        Ok(values)
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.column.as_str())
            .chain(self.shadow_columns.iter().map(|s| s.column.as_str()))
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Insert a batch of entities, with before/after events.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table, count = entities.len()))]
    pub async fn insert_batch(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        entities: &[EntityRef],
    ) -> Outcome<(), Error> {
        if entities.is_empty() {
            return Outcome::Ok(());
        }
        match self
            .events
            .emit(cx, conn, batch, Phase::BeforeInsert, entities)
            .await
        {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        match self.run_inserts(cx, conn, batch, entities).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => {
                self.events.dispatch_error(entities, &e);
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        batch.stats.inserted += entities.len();

        self.events
            .emit(cx, conn, batch, Phase::AfterInsert, entities)
            .await
    }

    async fn run_inserts(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &WriteBatch,
        entities: &[EntityRef],
    ) -> Outcome<(), Error> {
        let col_list = self.column_list();
        let column_count = self.columns.len() + self.shadow_columns.len();

        if let Some(apply_id) = &self.apply_generated_id {
            // Row-by-row so each entity receives its generated key.
            let placeholders = (1..=column_count)
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.dialect.quote_ident(&self.table),
                col_list,
                placeholders
            );
            for entity in entities {
                let params = match self.row_values(batch, entity) {
                    Ok(values) => values,
                    Err(e) => return Outcome::Err(e),
                };
                tracing::trace!(sql = %sql, "executing insert");
                match conn.insert(cx, &sql, &params).await {
                    Outcome::Ok(id) => {
                        if let Err(e) = apply_id(entity, id) {
                            return Outcome::Err(e);
                        }
                    }
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            return Outcome::Ok(());
        }

        // Multi-row INSERT when no generated key must flow back.
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.dialect.quote_ident(&self.table),
            col_list
        );
        let mut params: Vec<Value> = Vec::with_capacity(entities.len() * column_count);
        let mut param_idx = 1;
        for (i, entity) in entities.iter().enumerate() {
            let values = match self.row_values(batch, entity) {
                Ok(values) => values,
                Err(e) => return Outcome::Err(e),
            };
            if i > 0 {
                sql.push_str(", ");
            }
            let placeholders = (0..values.len())
                .map(|_| {
                    let p = format!("${param_idx}");
                    param_idx += 1;
                    p
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push('(');
            sql.push_str(&placeholders);
            sql.push(')');
            params.extend(values);
        }

        tracing::trace!(sql = %sql, rows = entities.len(), "executing insert batch");
        match conn.execute(cx, &sql, &params).await {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Update a batch of entities, with before/after events.
    ///
    /// Entities with no identity cannot be addressed and are skipped with a
    /// warning.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table, count = entities.len()))]
    pub async fn update_batch(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        entities: &[EntityRef],
    ) -> Outcome<(), Error> {
        if entities.is_empty() {
            return Outcome::Ok(());
        }
        match self
            .events
            .emit(cx, conn, batch, Phase::BeforeUpdate, entities)
            .await
        {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let column_count = self.columns.len() + self.shadow_columns.len();
        let set_clause = self
            .columns
            .iter()
            .map(|c| c.column.as_str())
            .chain(self.shadow_columns.iter().map(|s| s.column.as_str()))
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", self.dialect.quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            self.dialect.quote_ident(&self.table),
            set_clause,
            self.dialect.quote_ident(&self.id_column),
            column_count + 1
        );

        let mut updated = 0;
        for entity in entities {
            let id = match self.identity_of(entity) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    tracing::warn!(table = %self.table, "skipping update of entity without identity");
                    continue;
                }
                Err(e) => {
                    self.events.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
            };
            let mut params = match self.row_values(batch, entity) {
                Ok(values) => values,
                Err(e) => {
                    self.events.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
            };
            params.push(id);
            tracing::trace!(sql = %sql, "executing update");
            match conn.execute(cx, &sql, &params).await {
                Outcome::Ok(_) => updated += 1,
                Outcome::Err(e) => {
                    self.events.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        batch.stats.updated += updated;

        self.events
            .emit(cx, conn, batch, Phase::AfterUpdate, entities)
            .await
    }

    /// Delete a batch of entities, with before/after events.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table, count = entities.len()))]
    pub async fn delete_batch(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        entities: &[EntityRef],
    ) -> Outcome<(), Error> {
        if entities.is_empty() {
            return Outcome::Ok(());
        }
        match self
            .events
            .emit(cx, conn, batch, Phase::BeforeDelete, entities)
            .await
        {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut ids = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.identity_of(entity) {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {
                    tracing::warn!(table = %self.table, "skipping delete of entity without identity");
                }
                Err(e) => {
                    self.events.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
            }
        }

        if !ids.is_empty() {
            let placeholders = (1..=ids.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                self.dialect.quote_ident(&self.table),
                self.dialect.quote_ident(&self.id_column),
                placeholders
            );
            tracing::trace!(sql = %sql, rows = ids.len(), "executing delete batch");
            match conn.execute(cx, &sql, &ids).await {
                Outcome::Ok(_) => batch.stats.deleted += ids.len(),
                Outcome::Err(e) => {
                    self.events.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.events
            .emit(cx, conn, batch, Phase::AfterDelete, entities)
            .await
    }

    /// Set one foreign-key column for a set of rows, bypassing the normal
    /// column bindings. Used for nullification and FK maintenance.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table, column = %column, rows = ids.len()))]
    pub async fn set_foreign_key(
        &self,
        cx: &Cx,
        conn: &C,
        column: &str,
        value: Value,
        ids: &[Value],
    ) -> Outcome<u64, Error> {
        if ids.is_empty() {
            return Outcome::Ok(0);
        }
        let placeholders = (2..=ids.len() + 1)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE {} IN ({})",
            self.dialect.quote_ident(&self.table),
            self.dialect.quote_ident(column),
            self.dialect.quote_ident(&self.id_column),
            placeholders
        );
        let mut params = Vec::with_capacity(ids.len() + 1);
        params.push(value);
        params.extend(ids.iter().cloned());
        conn.execute(cx, &sql, &params).await
    }

    /// The statement updating one FK column of one row, for batched
    /// maintenance through [`Connection::batch`].
    pub(crate) fn fk_update_sql(&self, column: &str) -> String {
        format!(
            "UPDATE {} SET {} = $1 WHERE {} = $2",
            self.dialect.quote_ident(&self.table),
            self.dialect.quote_ident(column),
            self.dialect.quote_ident(&self.id_column)
        )
    }
}

impl<C: Connection> std::fmt::Debug for EntityPersister<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPersister")
            .field("table", &self.table)
            .field("columns", &self.columns.len())
            .field("shadow_columns", &self.shadow_columns.len())
            .finish_non_exhaustive()
    }
}
