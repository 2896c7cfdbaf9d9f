//! Database backends.
//!
//! This module provides a common interface for MySQL, PostgreSQL and SQL Server
//! so every engine is driven through the same runner.

pub mod mssql;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;

use crate::catalog::ResultShape;
use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::Result;

pub use mssql::MsSqlBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use rows::ScannedRow;

/// A pooled, engine-specific connection handle.
///
/// Implementations perform exactly one request/response round trip per call and fully
/// consume the response so the underlying connection can be reused.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Engine this connection talks to.
    fn engine(&self) -> Engine;

    /// Check that the server is reachable.
    async fn ping(&self) -> Result<()>;

    /// Run a statement and decode its first row with the declared shape.
    ///
    /// Returns `Ok(None)` when the statement legitimately produced no rows.
    async fn fetch_row(&self, sql: &str, shape: ResultShape) -> Result<Option<ScannedRow>>;

    /// Execute a multi-statement script, discarding any results.
    async fn execute_script(&self, script: &str) -> Result<()>;

    /// Close every pooled connection.
    async fn close(&self);
}

/// Open a pool for an engine.
///
/// Pools connect lazily; call [`Connection::ping`] to verify reachability.
pub async fn connect(
    engine: Engine,
    url: &str,
    pool: &PoolSettings,
) -> Result<Box<dyn Connection>> {
    let conn: Box<dyn Connection> = match engine {
        Engine::MySql => Box::new(MySqlBackend::new(url, pool)?),
        Engine::Postgres => Box::new(PostgresBackend::new(url, pool)?),
        Engine::MsSql2019 | Engine::MsSql2022 => Box::new(MsSqlBackend::new(engine, url, pool)?),
    };
    Ok(conn)
}

/// Treat sqlx's `RowNotFound` as an empty result rather than a failure.
pub(crate) fn optional_row<R>(
    result: std::result::Result<Option<R>, sqlx::Error>,
) -> std::result::Result<Option<R>, sqlx::Error> {
    match result {
        Err(sqlx::Error::RowNotFound) => Ok(None),
        other => other,
    }
}

/// Row values shared by all backends.
pub mod rows {
    use crate::catalog::ResultShape;
    use crate::engine::Engine;
    use crate::error::{Error, Result};

    /// Integer placeholder for a statement that returned no rows.
    pub const NO_ROWS_INT: i64 = -1;

    /// String placeholder for a statement that returned no rows.
    pub const NO_ROWS_TEXT: &str = "N/A";

    fn require<T>(engine: Engine, value: Option<T>, kind: &str) -> Result<T> {
        value.ok_or_else(|| Error::decode(engine, format!("unexpected NULL in {} column", kind)))
    }

    /// A decoded first row.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ScannedRow {
        Int(i64),
        Text(String),
        IntAndText(i64, String),
    }

    impl ScannedRow {
        /// Placeholder row for a statement that returned no rows.
        pub fn sentinel(shape: ResultShape) -> Self {
            match shape {
                ResultShape::Int => ScannedRow::Int(NO_ROWS_INT),
                ResultShape::Text => ScannedRow::Text(NO_ROWS_TEXT.to_string()),
                ResultShape::IntAndText => {
                    ScannedRow::IntAndText(NO_ROWS_INT, NO_ROWS_TEXT.to_string())
                }
            }
        }

        /// Build a row from decoded column values.
        ///
        /// A NULL in a column the shape declares is a decode error; placeholders are
        /// reserved for statements that return no rows at all.
        pub fn from_columns(
            engine: Engine,
            shape: ResultShape,
            int: Option<i64>,
            text: Option<String>,
        ) -> Result<Self> {
            let row = match shape {
                ResultShape::Int => ScannedRow::Int(require(engine, int, "integer")?),
                ResultShape::Text => ScannedRow::Text(require(engine, text, "character")?),
                ResultShape::IntAndText => ScannedRow::IntAndText(
                    require(engine, int, "integer")?,
                    require(engine, text, "character")?,
                ),
            };
            Ok(row)
        }

        /// Shape of this row.
        pub fn shape(&self) -> ResultShape {
            match self {
                ScannedRow::Int(_) => ResultShape::Int,
                ScannedRow::Text(_) => ResultShape::Text,
                ScannedRow::IntAndText(..) => ResultShape::IntAndText,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_sentinels() {
            assert_eq!(ScannedRow::sentinel(ResultShape::Int), ScannedRow::Int(-1));
            assert_eq!(
                ScannedRow::sentinel(ResultShape::Text),
                ScannedRow::Text("N/A".to_string())
            );
            assert_eq!(
                ScannedRow::sentinel(ResultShape::IntAndText),
                ScannedRow::IntAndText(-1, "N/A".to_string())
            );
        }

        #[test]
        fn test_from_columns() {
            let row = ScannedRow::from_columns(
                Engine::MySql,
                ResultShape::IntAndText,
                Some(7),
                Some("Alice".into()),
            )
            .unwrap();
            assert_eq!(row, ScannedRow::IntAndText(7, "Alice".to_string()));
            assert_eq!(row.shape(), ResultShape::IntAndText);

            // Columns the shape does not declare are ignored.
            let row =
                ScannedRow::from_columns(Engine::MySql, ResultShape::Text, None, Some("FR".into()))
                    .unwrap();
            assert_eq!(row, ScannedRow::Text("FR".to_string()));
        }

        #[test]
        fn test_null_in_declared_column_is_decode_error() {
            let err = ScannedRow::from_columns(Engine::Postgres, ResultShape::Text, None, None)
                .unwrap_err();
            assert!(matches!(err, Error::Decode { .. }));
            assert!(err.to_string().contains("NULL in character column"), "{}", err);

            let err = ScannedRow::from_columns(
                Engine::MsSql2019,
                ResultShape::IntAndText,
                None,
                Some("x".into()),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Decode { .. }));
        }
    }
}
