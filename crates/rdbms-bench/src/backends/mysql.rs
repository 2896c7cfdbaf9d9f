//! MySQL backend.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Connection as _, Row};

use crate::catalog::ResultShape;
use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::{Error, Result};

use super::{optional_row, Connection, ScannedRow};

/// MySQL connection pool.
///
/// sqlx keeps every idle connection until the pool closes, so the idle capacity is
/// the open capacity.
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Create a lazily connecting pool for a `mysql://` url.
    pub fn new(url: &str, settings: &PoolSettings) -> Result<Self> {
        let options = MySqlConnectOptions::from_str(url)
            .map_err(|e| Error::connectivity(Engine::MySql, e))?;

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_open)
            .min_connections(0)
            .idle_timeout(None)
            .max_lifetime(settings.max_lifetime)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }
}

#[async_trait]
impl Connection for MySqlBackend {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::connectivity(Engine::MySql, e))?;
        conn.ping()
            .await
            .map_err(|e| Error::connectivity(Engine::MySql, e))
    }

    async fn fetch_row(&self, sql: &str, shape: ResultShape) -> Result<Option<ScannedRow>> {
        let fetched = sqlx::Executor::fetch_optional(&self.pool, sqlx::raw_sql(sql)).await;
        let row = optional_row(fetched).map_err(|e| Error::query(Engine::MySql, e))?;

        row.map(|row| decode_row(&row, shape)).transpose()
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::query(Engine::MySql, e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &MySqlRow, shape: ResultShape) -> Result<ScannedRow> {
    if row.len() != shape.columns() {
        return Err(Error::decode(
            Engine::MySql,
            format!("expected {} column(s), got {}", shape.columns(), row.len()),
        ));
    }

    let engine = Engine::MySql;
    match shape {
        ResultShape::Int => ScannedRow::from_columns(engine, shape, decode_int(row, 0)?, None),
        ResultShape::Text => ScannedRow::from_columns(engine, shape, None, decode_text(row, 0)?),
        ResultShape::IntAndText => {
            ScannedRow::from_columns(engine, shape, decode_int(row, 0)?, decode_text(row, 1)?)
        }
    }
}

fn decode_int(row: &MySqlRow, index: usize) -> Result<Option<i64>> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value);
    }

    let value = row
        .try_get::<Option<u64>, _>(index)
        .map_err(|e| Error::decode(Engine::MySql, e))?;
    value
        .map(i64::try_from)
        .transpose()
        .map_err(|e| Error::decode(Engine::MySql, e))
}

fn decode_text(row: &MySqlRow, index: usize) -> Result<Option<String>> {
    row.try_get::<Option<String>, _>(index)
        .map_err(|e| Error::decode(Engine::MySql, e))
}
