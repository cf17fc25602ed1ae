//! The one-to-one cascade coordinator.
//!
//! A one-to-one relation spans two persisters, and which table physically
//! holds the foreign-key column decides the coordination strategy:
//!
//! - **Owned by source** ([`SourceOwnedCascade`]): the FK lives in the
//!   referencing table. Targets are persisted *before* the source row so the
//!   shadow-column provider can read an already-known target identifier.
//! - **Owned by target** ([`TargetOwnedCascade`]): the FK lives in the
//!   referenced table. The provider only ever sees the target entity, so the
//!   coordinator records (target → source) pairs in the per-batch relation
//!   scratch before cascading, and clears the scratch unconditionally
//!   afterwards; a failure must not leak associations into a later batch.
//!
//! Both variants register their handlers on the source persister's event
//! stream rather than being called directly.

use crate::batch::WriteBatch;
use crate::events::{BoxFuture, CascadeHook, Phase};
use crate::persister::{EntityPersister, PersisterBuilder};
use asupersync::{Cx, Outcome};
use entgraph_core::{Connection, EntityRef, Error, Result, Value, entity_ptr, same_entity};
use std::collections::HashSet;
use std::sync::Arc;

/// Reads the relation's current target from a source entity.
pub type RelationAccessor = Box<dyn Fn(&EntityRef) -> Result<Option<EntityRef>> + Send + Sync>;

/// Declares one one-to-one relation for cascade coordination.
pub struct OneToOneRelation {
    name: &'static str,
    fk_column: String,
    orphan_removal: bool,
    target_of: RelationAccessor,
    previous_target_of: Option<RelationAccessor>,
}

impl OneToOneRelation {
    /// Declare a relation: its name, the foreign-key column, and the
    /// accessor reading the current target from a source entity.
    pub fn new(
        name: &'static str,
        fk_column: impl Into<String>,
        target_of: impl Fn(&EntityRef) -> Result<Option<EntityRef>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            fk_column: fk_column.into(),
            orphan_removal: false,
            target_of: Box::new(target_of),
            previous_target_of: None,
        }
    }

    /// Delete a previously related target when the relation is cleared or
    /// reassigned, instead of merely nullifying the foreign key.
    #[must_use]
    pub fn orphan_removal(mut self, enabled: bool) -> Self {
        self.orphan_removal = enabled;
        self
    }

    /// Accessor reading the target the source pointed at before the current
    /// modification. Sources without previous-state tracking leave this
    /// unset, and every update is then treated as newly set.
    #[must_use]
    pub fn previous_target(
        mut self,
        accessor: impl Fn(&EntityRef) -> Result<Option<EntityRef>> + Send + Sync + 'static,
    ) -> Self {
        self.previous_target_of = Some(Box::new(accessor));
        self
    }

    /// The relation name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The foreign-key column.
    #[must_use]
    pub fn fk_column(&self) -> &str {
        &self.fk_column
    }

    fn target_of(&self, source: &EntityRef) -> Result<Option<EntityRef>> {
        (self.target_of)(source)
    }

    fn previous_target_of(&self, source: &EntityRef) -> Result<Option<EntityRef>> {
        match &self.previous_target_of {
            Some(accessor) => accessor(source),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for OneToOneRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneToOneRelation")
            .field("name", &self.name)
            .field("fk_column", &self.fk_column)
            .field("orphan_removal", &self.orphan_removal)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Owned by source
// ============================================================================

/// Cascade coordination for a one-to-one relation whose FK column lives in
/// the source (referencing) table.
pub struct SourceOwnedCascade<C: Connection> {
    relation: OneToOneRelation,
    target: Arc<EntityPersister<C>>,
}

impl<C: Connection + 'static> SourceOwnedCascade<C> {
    /// Wire the cascade: a shadow FK column on the source computed from the
    /// already-known target identifier, plus hooks persisting targets before
    /// the source row (insert/update), cascading updates to the target, and
    /// removing orphans after delete.
    pub fn attach(
        relation: OneToOneRelation,
        source: &mut PersisterBuilder<C>,
        target: Arc<EntityPersister<C>>,
    ) -> Arc<Self> {
        let cascade = Arc::new(Self { relation, target });

        let provider = Arc::clone(&cascade);
        let fk_column = cascade.relation.fk_column.clone();
        source.shadow_column(fk_column, move |_batch, entity| provider.fk_value(entity));

        source.on(Phase::BeforeInsert, PersistNewTargets(Arc::clone(&cascade)));
        source.on(Phase::BeforeUpdate, PersistNewTargets(Arc::clone(&cascade)));
        source.on(Phase::AfterUpdate, CascadeTargetUpdate(Arc::clone(&cascade)));
        source.on(Phase::AfterDelete, RemoveOrphans(Arc::clone(&cascade)));
        cascade
    }

    /// FK value for one source row: the target's identifier, or NULL when
    /// the relation is unset. The before-insert/update hooks guarantee the
    /// target is persisted by the time this runs.
    fn fk_value(&self, source: &EntityRef) -> Result<Value> {
        match self.relation.target_of(source)? {
            Some(target) => match self.target.identity_of(&target)? {
                Some(id) => Ok(id),
                None => Err(Error::cascade(
                    self.relation.name,
                    "target has no identity while computing the foreign key",
                )),
            },
            None => Ok(Value::Null),
        }
    }

    fn unpersisted_targets(&self, sources: &[EntityRef]) -> Result<Vec<EntityRef>> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for source in sources {
            if let Some(target) = self.relation.target_of(source)? {
                if !self.target.is_persisted(&target)? && seen.insert(entity_ptr(&target)) {
                    pending.push(target);
                }
            }
        }
        Ok(pending)
    }

    fn persisted_targets(&self, sources: &[EntityRef]) -> Result<Vec<EntityRef>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for source in sources {
            if let Some(target) = self.relation.target_of(source)? {
                if self.target.is_persisted(&target)? && seen.insert(entity_ptr(&target)) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }

    async fn persist_new_targets(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        let pending = match self.unpersisted_targets(sources) {
            Ok(pending) => pending,
            Err(e) => return Outcome::Err(e),
        };
        self.target.insert_batch(cx, conn, batch, &pending).await
    }

    async fn cascade_target_update(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        let targets = match self.persisted_targets(sources) {
            Ok(targets) => targets,
            Err(e) => return Outcome::Err(e),
        };
        self.target.update_batch(cx, conn, batch, &targets).await
    }

    /// Orphan removal after delete: the source row pointed at the target,
    /// so the target row is only deletable once the source row is gone.
    async fn remove_orphans(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        if !self.relation.orphan_removal {
            return Outcome::Ok(());
        }
        let targets = match self.persisted_targets(sources) {
            Ok(targets) => targets,
            Err(e) => return Outcome::Err(e),
        };
        self.target.delete_batch(cx, conn, batch, &targets).await
    }
}

struct PersistNewTargets<C: Connection>(Arc<SourceOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for PersistNewTargets<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.persist_new_targets(cx, conn, batch, entities))
    }
}

struct CascadeTargetUpdate<C: Connection>(Arc<SourceOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for CascadeTargetUpdate<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.cascade_target_update(cx, conn, batch, entities))
    }
}

struct RemoveOrphans<C: Connection>(Arc<SourceOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for RemoveOrphans<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.remove_orphans(cx, conn, batch, entities))
    }
}

// ============================================================================
// Owned by target
// ============================================================================

/// Cascade coordination for a one-to-one relation whose FK column lives in
/// the target (referenced) table.
pub struct TargetOwnedCascade<C: Connection> {
    relation: OneToOneRelation,
    target: Arc<EntityPersister<C>>,
}

impl<C: Connection + 'static> TargetOwnedCascade<C> {
    /// Register the FK shadow-column provider on the *target* persister.
    ///
    /// The provider only receives the target entity; it finds the owning
    /// source through the relation scratch of the current batch and renders
    /// the source's identifier. A target persisted outside any cascade batch
    /// has no association and gets NULL.
    pub fn provide_foreign_key(
        target: &mut PersisterBuilder<C>,
        fk_column: impl Into<String>,
        source_identity: impl Fn(&EntityRef) -> Result<Option<Value>> + Send + Sync + 'static,
    ) {
        target.shadow_column(fk_column, move |batch, target_entity| {
            match batch.scratch().source_for(target_entity) {
                Some(source) => Ok(source_identity(source)?.unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            }
        });
    }

    /// Wire the source-side hooks: cascade target persistence after the
    /// source row exists (insert), reconcile previous/new targets on update,
    /// and detach or delete targets before the source row disappears.
    pub fn attach(
        relation: OneToOneRelation,
        source: &mut PersisterBuilder<C>,
        target: Arc<EntityPersister<C>>,
    ) -> Arc<Self> {
        let cascade = Arc::new(Self { relation, target });
        source.on(Phase::AfterInsert, PersistOwnedTargets(Arc::clone(&cascade)));
        source.on(Phase::AfterUpdate, ReconcileTargets(Arc::clone(&cascade)));
        source.on(Phase::BeforeDelete, DetachTargets(Arc::clone(&cascade)));
        cascade
    }

    fn current_pairs(&self, sources: &[EntityRef]) -> Result<Vec<(EntityRef, EntityRef)>> {
        let mut pairs = Vec::new();
        for source in sources {
            if let Some(target) = self.relation.target_of(source)? {
                pairs.push((source.clone(), target));
            }
        }
        Ok(pairs)
    }

    fn persisted_ids(&self, targets: &[EntityRef]) -> Result<Vec<Value>> {
        let mut ids = Vec::new();
        for target in targets {
            if let Some(id) = self.target.identity_of(target)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Populate the scratch, cascade the targets, then clear the scratch on
    /// every outcome arm before handing the result back.
    async fn persist_targets_with_scratch(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        pairs: &[(EntityRef, EntityRef)],
    ) -> Outcome<(), Error> {
        if pairs.is_empty() {
            return Outcome::Ok(());
        }
        for (source, target) in pairs {
            batch.scratch_mut().put(target, source);
        }
        let outcome = self.insert_or_update_targets(cx, conn, batch, pairs).await;
        batch.scratch_mut().clear();
        outcome
    }

    async fn insert_or_update_targets(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        pairs: &[(EntityRef, EntityRef)],
    ) -> Outcome<(), Error> {
        let mut to_insert = Vec::new();
        let mut to_update = Vec::new();
        for (_, target) in pairs {
            match self.target.is_persisted(target) {
                Ok(true) => to_update.push(target.clone()),
                Ok(false) => to_insert.push(target.clone()),
                Err(e) => return Outcome::Err(e),
            }
        }
        match self.target.insert_batch(cx, conn, batch, &to_insert).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.target.update_batch(cx, conn, batch, &to_update).await
    }

    /// After the source rows exist, their targets can carry the FK.
    async fn after_source_insert(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        let pairs = match self.current_pairs(sources) {
            Ok(pairs) => pairs,
            Err(e) => return Outcome::Err(e),
        };
        self.persist_targets_with_scratch(cx, conn, batch, &pairs).await
    }

    /// The three-case previous/new analysis per updated source:
    /// newly set, unchanged, or cleared/reassigned. A target the source no
    /// longer points at must not keep a dangling FK: it is deleted under
    /// orphan removal and nullified otherwise.
    async fn reconcile_after_update(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        let mut stale = Vec::new();
        let mut pairs = Vec::new();
        for source in sources {
            let previous = match self.relation.previous_target_of(source) {
                Ok(previous) => previous,
                Err(e) => return Outcome::Err(e),
            };
            let current = match self.relation.target_of(source) {
                Ok(current) => current,
                Err(e) => return Outcome::Err(e),
            };
            match (previous, current) {
                (Some(prev), Some(new)) if same_entity(&prev, &new) => {
                    pairs.push((source.clone(), new));
                }
                (Some(prev), Some(new)) => {
                    stale.push(prev);
                    pairs.push((source.clone(), new));
                }
                (Some(prev), None) => stale.push(prev),
                (None, Some(new)) => pairs.push((source.clone(), new)),
                (None, None) => {}
            }
        }

        if !stale.is_empty() {
            if self.relation.orphan_removal {
                match self.target.delete_batch(cx, conn, batch, &stale).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            } else {
                let ids = match self.persisted_ids(&stale) {
                    Ok(ids) => ids,
                    Err(e) => return Outcome::Err(e),
                };
                match self
                    .target
                    .set_foreign_key(cx, conn, &self.relation.fk_column, Value::Null, &ids)
                    .await
                {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }

        self.persist_targets_with_scratch(cx, conn, batch, &pairs).await
    }

    /// Before the source row disappears, its target's FK would dangle:
    /// delete the target under orphan removal, else nullify its FK first.
    async fn detach_before_delete(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        sources: &[EntityRef],
    ) -> Outcome<(), Error> {
        let mut targets = Vec::new();
        for source in sources {
            match self.relation.target_of(source) {
                Ok(Some(target)) => targets.push(target),
                Ok(None) => {}
                Err(e) => return Outcome::Err(e),
            }
        }
        if targets.is_empty() {
            return Outcome::Ok(());
        }
        if self.relation.orphan_removal {
            return self.target.delete_batch(cx, conn, batch, &targets).await;
        }
        let ids = match self.persisted_ids(&targets) {
            Ok(ids) => ids,
            Err(e) => return Outcome::Err(e),
        };
        match self
            .target
            .set_foreign_key(cx, conn, &self.relation.fk_column, Value::Null, &ids)
            .await
        {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

struct PersistOwnedTargets<C: Connection>(Arc<TargetOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for PersistOwnedTargets<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.after_source_insert(cx, conn, batch, entities))
    }
}

struct ReconcileTargets<C: Connection>(Arc<TargetOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for ReconcileTargets<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.reconcile_after_update(cx, conn, batch, entities))
    }
}

struct DetachTargets<C: Connection>(Arc<TargetOwnedCascade<C>>);

impl<C: Connection + 'static> CascadeHook<C> for DetachTargets<C> {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(self.0.detach_before_delete(cx, conn, batch, entities))
    }
}
