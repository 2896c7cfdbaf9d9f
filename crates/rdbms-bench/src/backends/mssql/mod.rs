//! SQL Server backend.
//!
//! Connection strings use the ADO format, e.g.
//! `server=tcp:localhost,1433;user id=SA;password=...;database=test;TrustServerCertificate=true`.

pub mod pool;

use async_trait::async_trait;
use tiberius::{ColumnData, Row};

use crate::catalog::ResultShape;
use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::{Error, Result};

use super::{Connection, ScannedRow};

pub use pool::{ClientPool, PoolConfig, PooledClient};

/// SQL Server client pool for one server version.
#[derive(Debug)]
pub struct MsSqlBackend {
    engine: Engine,
    pool: ClientPool,
}

impl MsSqlBackend {
    /// Create a lazily connecting pool from an ADO connection string.
    pub fn new(engine: Engine, url: &str, settings: &PoolSettings) -> Result<Self> {
        let config = tiberius::Config::from_ado_string(url)
            .map_err(|e| Error::connectivity(engine, e))?;
        let pool = ClientPool::new(PoolConfig::new(engine, config, settings));
        Ok(Self { engine, pool })
    }
}

#[async_trait]
impl Connection for MsSqlBackend {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.pool.acquire().await?;
        client.begin_request();
        let result = match client.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_row().await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                client.end_request();
                Ok(())
            }
            Err(e) => {
                client.discard();
                Err(Error::connectivity(self.engine, e))
            }
        }
    }

    async fn fetch_row(&self, sql: &str, shape: ResultShape) -> Result<Option<ScannedRow>> {
        let mut client = self.pool.acquire().await?;
        client.begin_request();
        let row = match client.simple_query(sql).await {
            Ok(stream) => stream.into_row().await,
            Err(e) => Err(e),
        };
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                client.discard();
                return Err(Error::query(self.engine, e));
            }
        };
        client.end_request();
        drop(client);

        row.map(|row| decode_row(self.engine, &row, shape))
            .transpose()
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        let mut client = self.pool.acquire().await?;
        client.begin_request();
        for batch in split_batches(script) {
            let result = match client.simple_query(batch.as_str()).await {
                Ok(stream) => stream.into_results().await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                client.discard();
                return Err(Error::query(self.engine, e));
            }
        }
        client.end_request();
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Split a script into batches on `GO` separator lines.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        let trimmed = line.trim().trim_end_matches(';');
        if trimmed.eq_ignore_ascii_case("go") {
            if !current.trim().is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current);
    }
    batches
}

fn decode_row(engine: Engine, row: &Row, shape: ResultShape) -> Result<ScannedRow> {
    let cells: Vec<&ColumnData<'static>> = row.cells().map(|(_, data)| data).collect();
    if cells.len() != shape.columns() {
        return Err(Error::decode(
            engine,
            format!("expected {} column(s), got {}", shape.columns(), cells.len()),
        ));
    }

    match shape {
        ResultShape::Int => {
            ScannedRow::from_columns(engine, shape, decode_int(engine, cells[0])?, None)
        }
        ResultShape::Text => {
            ScannedRow::from_columns(engine, shape, None, decode_text(engine, cells[0])?)
        }
        ResultShape::IntAndText => ScannedRow::from_columns(
            engine,
            shape,
            decode_int(engine, cells[0])?,
            decode_text(engine, cells[1])?,
        ),
    }
}

fn decode_int(engine: Engine, data: &ColumnData<'_>) -> Result<Option<i64>> {
    match data {
        ColumnData::U8(value) => Ok(value.map(i64::from)),
        ColumnData::I16(value) => Ok(value.map(i64::from)),
        ColumnData::I32(value) => Ok(value.map(i64::from)),
        ColumnData::I64(value) => Ok(*value),
        other => Err(Error::decode(
            engine,
            format!("expected integer column, got {:?}", other),
        )),
    }
}

fn decode_text(engine: Engine, data: &ColumnData<'_>) -> Result<Option<String>> {
    match data {
        ColumnData::String(value) => Ok(value.as_ref().map(|s| s.to_string())),
        other => Err(Error::decode(
            engine,
            format!("expected character column, got {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_split_batches() {
        let script = "create database test;\nGO\nuse test;\ncreate table client (id int);\n  go  \n\nGO;\ninsert into client values (1);\n";
        let batches = split_batches(script);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].trim(), "create database test;");
        assert!(batches[1].contains("create table client"));
        assert_eq!(batches[2].trim(), "insert into client values (1);");
    }

    #[test]
    fn test_split_batches_keeps_go_inside_identifiers() {
        let batches = split_batches("select 1 as go_live;\nselect 2;");
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_decode_int_widths() {
        let engine = Engine::MsSql2019;
        assert_eq!(decode_int(engine, &ColumnData::U8(Some(7))).unwrap(), Some(7));
        assert_eq!(decode_int(engine, &ColumnData::I32(Some(-3))).unwrap(), Some(-3));
        assert_eq!(decode_int(engine, &ColumnData::I64(None)).unwrap(), None);
        assert!(decode_int(engine, &ColumnData::String(Some(Cow::from("x")))).is_err());
    }

    #[test]
    fn test_decode_text() {
        let engine = Engine::MsSql2022;
        assert_eq!(
            decode_text(engine, &ColumnData::String(Some(Cow::from("Alice")))).unwrap(),
            Some("Alice".to_string())
        );
        assert!(decode_text(engine, &ColumnData::I32(Some(1))).is_err());
    }
}
