//! The per-persister lifecycle event stream.
//!
//! Each persister exposes before/after hooks around its insert, update and
//! delete batches plus an `on_error` channel. The cascade coordinator
//! registers its handlers here instead of being called directly, which keeps
//! persistence and cascade logic decoupled. Handlers run in registration
//! order; the first failure stops the chain, fires the error hooks and
//! propagates unchanged.

use crate::batch::WriteBatch;
use asupersync::{Cx, Outcome};
use entgraph_core::{Connection, EntityRef, Error};
use std::future::Future;
use std::pin::Pin;

/// Lifecycle phases a handler can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl Phase {
    const COUNT: usize = 6;

    const fn index(self) -> usize {
        match self {
            Phase::BeforeInsert => 0,
            Phase::AfterInsert => 1,
            Phase::BeforeUpdate => 2,
            Phase::AfterUpdate => 3,
            Phase::BeforeDelete => 4,
            Phase::AfterDelete => 5,
        }
    }
}

/// Boxed future type returned by hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An async lifecycle handler.
///
/// Implemented by the cascade coordinator's hook types; a blanket impl
/// covers plain functions returning a boxed future.
pub trait CascadeHook<C: Connection>: Send + Sync {
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>>;
}

impl<C, F> CascadeHook<C> for F
where
    C: Connection,
    F: for<'a> Fn(
            &'a Cx,
            &'a C,
            &'a mut WriteBatch,
            &'a [EntityRef],
        ) -> BoxFuture<'a, Outcome<(), Error>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        conn: &'a C,
        batch: &'a mut WriteBatch,
        entities: &'a [EntityRef],
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        self(cx, conn, batch, entities)
    }
}

/// Synchronous error observer.
pub type ErrorHook = Box<dyn Fn(&[EntityRef], &Error) + Send + Sync>;

/// Ordered handler lists per lifecycle phase for one persister.
pub struct EventStream<C: Connection> {
    handlers: [Vec<Box<dyn CascadeHook<C>>>; Phase::COUNT],
    error_hooks: Vec<ErrorHook>,
}

impl<C: Connection> EventStream<C> {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| Vec::new()),
            error_hooks: Vec::new(),
        }
    }

    /// Register a handler for a phase. Handlers run in registration order.
    pub fn on(&mut self, phase: Phase, hook: impl CascadeHook<C> + 'static) {
        self.handlers[phase.index()].push(Box::new(hook));
    }

    /// Register an error observer.
    pub fn on_error(&mut self, hook: impl Fn(&[EntityRef], &Error) + Send + Sync + 'static) {
        self.error_hooks.push(Box::new(hook));
    }

    /// Number of handlers registered for a phase.
    #[must_use]
    pub fn handler_count(&self, phase: Phase) -> usize {
        self.handlers[phase.index()].len()
    }

    /// Run the handlers of one phase over a batch of entities.
    ///
    /// Stops at the first non-`Ok` outcome. Errors are reported to the
    /// error hooks before propagating; cancellation and panics pass through
    /// untouched.
    pub async fn emit(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut WriteBatch,
        phase: Phase,
        entities: &[EntityRef],
    ) -> Outcome<(), Error> {
        for hook in &self.handlers[phase.index()] {
            match hook.call(cx, conn, batch, entities).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    self.dispatch_error(entities, &e);
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    /// Report a failure to the error hooks.
    pub fn dispatch_error(&self, entities: &[EntityRef], error: &Error) {
        for hook in &self.error_hooks {
            hook(entities, error);
        }
    }
}

impl<C: Connection> Default for EventStream<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> std::fmt::Debug for EventStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("handlers", &self.handlers.iter().map(Vec::len).sum::<usize>())
            .field("error_hooks", &self.error_hooks.len())
            .finish()
    }
}
