//! PostgreSQL backend.
//!
//! Statements go through the simple query protocol, so a catalog entry may prefix its
//! query with session settings such as `SET enable_hashjoin = off;`.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection as _, Row};

use crate::catalog::ResultShape;
use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::{Error, Result};

use super::{optional_row, Connection, ScannedRow};

/// PostgreSQL connection pool.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create a lazily connecting pool for a `postgres://` url.
    pub fn new(url: &str, settings: &PoolSettings) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| Error::connectivity(Engine::Postgres, e))?;

        let pool = PgPoolOptions::new()
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
impl Connection for PostgresBackend {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::connectivity(Engine::Postgres, e))?;
        conn.ping()
            .await
            .map_err(|e| Error::connectivity(Engine::Postgres, e))
    }

    async fn fetch_row(&self, sql: &str, shape: ResultShape) -> Result<Option<ScannedRow>> {
        let fetched = sqlx::Executor::fetch_optional(&self.pool, sqlx::raw_sql(sql)).await;
        let row = optional_row(fetched).map_err(|e| Error::query(Engine::Postgres, e))?;

        row.map(|row| decode_row(&row, shape)).transpose()
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::query(Engine::Postgres, e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &PgRow, shape: ResultShape) -> Result<ScannedRow> {
    if row.len() != shape.columns() {
        return Err(Error::decode(
            Engine::Postgres,
            format!("expected {} column(s), got {}", shape.columns(), row.len()),
        ));
    }

    let engine = Engine::Postgres;
    match shape {
        ResultShape::Int => ScannedRow::from_columns(engine, shape, decode_int(row, 0)?, None),
        ResultShape::Text => ScannedRow::from_columns(engine, shape, None, decode_text(row, 0)?),
        ResultShape::IntAndText => {
            ScannedRow::from_columns(engine, shape, decode_int(row, 0)?, decode_text(row, 1)?)
        }
    }
}

/// Postgres integer types are strict, so try each width in turn.
fn decode_int(row: &PgRow, index: usize) -> Result<Option<i64>> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map(i64::from));
    }
    row.try_get::<Option<i16>, _>(index)
        .map(|value| value.map(i64::from))
        .map_err(|e| Error::decode(Engine::Postgres, e))
}

fn decode_text(row: &PgRow, index: usize) -> Result<Option<String>> {
    row.try_get::<Option<String>, _>(index)
        .map_err(|e| Error::decode(Engine::Postgres, e))
}
