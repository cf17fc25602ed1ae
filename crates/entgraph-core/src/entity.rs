//! Shared entity references.
//!
//! Inflated entities are shared: a 1:N fan-out must hand every parent row
//! the *same* instance, and relation fixers mutate instances that other
//! parts of the graph already point at. An [`EntityRef`] is a type-erased
//! `Arc` whose payload is `RwLock<M>` for the concrete entity type `M`;
//! [`typed`] recovers the concrete handle.

use crate::Result;
use crate::error::Error;
use std::any::Any;
use std::sync::{Arc, RwLock};

/// A shared, type-erased entity instance.
///
/// The payload is always `RwLock<M>` for some entity type `M`.
pub type EntityRef = Arc<dyn Any + Send + Sync>;

/// Wrap a fresh entity instance into a shared reference.
#[must_use]
pub fn new_entity<M: Send + Sync + 'static>(entity: M) -> EntityRef {
    Arc::new(RwLock::new(entity))
}

/// Recover the typed handle behind an [`EntityRef`].
///
/// Returns `None` when the reference holds a different entity type.
#[must_use]
pub fn typed<M: Send + Sync + 'static>(entity: &EntityRef) -> Option<Arc<RwLock<M>>> {
    Arc::clone(entity).downcast::<RwLock<M>>().ok()
}

/// Pointer identity of an entity reference.
///
/// Two `EntityRef`s compare equal here exactly when they share one
/// underlying instance; this is the key the relation-scratch store uses.
#[must_use]
pub fn entity_ptr(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity).cast::<()>() as usize
}

/// Whether two references point at the same underlying instance.
#[must_use]
pub fn same_entity(a: &EntityRef, b: &EntityRef) -> bool {
    entity_ptr(a) == entity_ptr(b)
}

/// Read a typed entity through its lock.
pub fn with_entity<M, R>(entity: &EntityRef, f: impl FnOnce(&M) -> R) -> Result<R>
where
    M: Send + Sync + 'static,
{
    let handle = typed::<M>(entity).ok_or_else(|| {
        Error::Custom(format!(
            "entity reference does not hold a {}",
            std::any::type_name::<M>()
        ))
    })?;
    let guard = handle
        .read()
        .map_err(|_| Error::Custom("entity lock poisoned".to_string()))?;
    Ok(f(&guard))
}

/// Mutate a typed entity through its lock.
pub fn with_entity_mut<M, R>(entity: &EntityRef, f: impl FnOnce(&mut M) -> R) -> Result<R>
where
    M: Send + Sync + 'static,
{
    let handle = typed::<M>(entity).ok_or_else(|| {
        Error::Custom(format!(
            "entity reference does not hold a {}",
            std::any::type_name::<M>()
        ))
    })?;
    let mut guard = handle
        .write()
        .map_err(|_| Error::Custom("entity lock poisoned".to_string()))?;
    Ok(f(&mut guard))
}
