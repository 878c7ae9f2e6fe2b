//! Store adapter boundary.
//!
//! The harness only needs a small operation set from the primary store and
//! its derived mirror. A `StoreConnector` provisions and tears down the
//! schema and hands out connections; each worker owns exactly one
//! `StoreConnection` for its whole lifetime.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};

pub use memory::{MemoryConnection, MemoryConnector, MemoryStoreOptions};
pub use postgres::{PostgresConnection, PostgresConnector, PostgresOptions};

/// A row as stored, with the id assigned by the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: u64,
    pub value: i64,
    pub text: String,
}

/// A row to insert; the primary assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub value: i64,
    pub text: String,
}

/// Which side of the mirror a read goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    Primary,
    Derived,
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreTarget::Primary => f.write_str("primary"),
            StoreTarget::Derived => f.write_str("derived"),
        }
    }
}

/// `AVG/MIN/MAX` over the value column. All `None` on an empty table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aggregate {
    pub avg: Option<f64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Schema lifecycle and connection factory for one primary/derived pair.
pub trait StoreConnector: Send + Sync {
    /// Creates (or recreates) the primary table and its derived mirror.
    fn provision_schema(&self) -> Result<()>;

    fn teardown_schema(&self) -> Result<()>;

    /// Opens a connection dedicated to a single worker.
    fn connect(&self) -> Result<Box<dyn StoreConnection>>;
}

/// Operations a worker issues over its own connection.
///
/// Mutations always go to the primary. `update_random` and `delete_random`
/// return the number of affected rows; zero is a normal outcome when a
/// concurrent worker removed the chosen row first.
pub trait StoreConnection: Send {
    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<()>;

    fn insert_one(&mut self, record: NewRecord) -> Result<()>;

    fn update_random(&mut self, new_value: i64) -> Result<u64>;

    fn delete_random(&mut self) -> Result<u64>;

    fn count(&mut self, target: StoreTarget) -> Result<i64>;

    fn aggregate(&mut self, target: StoreTarget) -> Result<Aggregate>;

    fn filter(&mut self, target: StoreTarget, threshold: i64, limit: usize)
        -> Result<Vec<Record>>;

    /// Asks the derived store to catch up with the primary.
    fn sync(&mut self) -> Result<()>;

    /// Releases the connection. Called exactly once by `ConnectionGuard`.
    fn close(&mut self);
}

/// Owns a connection and closes it when dropped, on every exit path.
pub struct ConnectionGuard {
    conn: Box<dyn StoreConnection>,
}

impl ConnectionGuard {
    pub fn new(conn: Box<dyn StoreConnection>) -> Self {
        Self { conn }
    }
}

impl Deref for ConnectionGuard {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.close();
    }
}
