//! Pooled connections through sqlx's `Any` driver.
//!
//! # Responsibilities
//! - Own the connection pool for the configured URL (postgres or sqlite)
//! - Bind `SqlValue` parameters and decode rows into `SqlValue`s
//!
//! # Design Decisions
//! - The pool is created lazily so construction never touches the network
//! - Acquire timeout comes from `database.connect_timeout_secs`

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row as _, ValueRef};

use crate::config::DatabaseConfig;
use crate::db::{Connection, Connector, Row, SqlValue};
use crate::error::{Error, Result};

/// Connector backed by an sqlx `AnyPool`.
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    pool: AnyPool,
}

impl SqlxConnector {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy(&config.url)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    type Connection = SqlxConnection;

    async fn connect(&self) -> Result<SqlxConnection> {
        let conn = self.pool.acquire().await?;
        Ok(SqlxConnection(conn))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A connection checked out of the pool. Returned to the pool on drop.
#[derive(Debug)]
pub struct SqlxConnection(PoolConnection<Any>);

#[async_trait]
impl Connection for SqlxConnection {
    async fn ping(&mut self) -> Result<()> {
        sqlx::Connection::ping(&mut *self.0).await?;
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let query = params.iter().fold(sqlx::query(sql), bind);
        let rows = query.fetch_all(&mut *self.0).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let query = params.iter().fold(sqlx::query(sql), bind);
        let done = query.execute(&mut *self.0).await?;
        Ok(done.rows_affected())
    }
}

fn bind<'q>(query: Query<'q, Any, AnyArguments<'q>>, value: &SqlValue) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
    }
}

fn decode_row(row: &AnyRow) -> Result<Row> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|idx| decode_value(row, idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

fn decode_value(row: &AnyRow, idx: usize) -> Result<SqlValue> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(SqlValue::Int(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(SqlValue::Float(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Ok(SqlValue::Bool(v));
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(SqlValue::Text(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Ok(SqlValue::Bytes(v));
    }

    Err(Error::Conversion(format!("column {} has an unsupported type", idx)))
}
