//! The connection seam.
//!
//! EntGraph never opens a connection itself. The inflater consumes rows the
//! caller pulled through [`Connection::query`], and the cascade coordinator
//! issues its writes through [`Connection::execute`] / [`Connection::insert`]
//! / [`Connection::batch`]. Pooling, transactions and statement preparation
//! belong to the driver layer behind this trait.
//!
//! All operations are async, take a `Cx` context and return a four-state
//! `Outcome` so cancellation propagates without being mistaken for failure.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection capable of executing statements.
///
/// Implementations must be `Send + Sync` for use across async boundaries.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the generated key.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Execute multiple statements as one batch.
    ///
    /// Returns the rows affected by each statement. Statements run
    /// sequentially; drivers may optimize the round trips.
    fn batch(
        &self,
        cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send;
}
