//! Database access seam.
//!
//! # Responsibilities
//! - Abstract "open a connection" and "run a statement" behind traits
//! - Carry driver-independent parameter and result values
//!
//! # Design Decisions
//! - The manager is generic over `Connector`, so tests inject scripted fakes
//! - The pooled sqlx implementation lives in `pool.rs`
//! - Statements take positional parameters as `SqlValue`s

use async_trait::async_trait;

use crate::error::Result;

pub mod pool;
pub mod value;

pub use pool::{SqlxConnection, SqlxConnector};
pub use value::{FromSqlValue, Row, SqlValue};

/// A live database connection.
#[async_trait]
pub trait Connection: Send {
    /// Cheap round trip proving the connection works.
    async fn ping(&mut self) -> Result<()>;

    /// Run a statement and collect every row.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// First column of the first row, `None` for an empty result.
    async fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next().and_then(|row| row.into_values().into_iter().next()))
    }
}

/// Produces connections to one database.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection + 'static;

    async fn connect(&self) -> Result<Self::Connection>;

    /// Release pooled resources. Called once by the manager on stop.
    async fn close(&self) {}
}
