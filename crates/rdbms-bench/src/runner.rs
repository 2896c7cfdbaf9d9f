//! Timed execution of a single statement.
//!
//! A run executes the statement `warmup` times without timing, then `measurement`
//! times inside a single timing window, and reports the mean latency of the measured
//! calls. Executions are strictly sequential.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backends::{Connection, ScannedRow};
use crate::catalog::ResultShape;
use crate::error::{Error, Result};

/// Performs one round trip of a statement against a connection.
#[async_trait]
pub trait Executor<C: ?Sized + Sync>: Send + Sync {
    /// Execute `query` once and fully consume its response.
    async fn execute(&self, conn: &C, query: &str) -> Result<()>;
}

/// Outcome of a timed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Mean latency per measured execution.
    pub mean: Duration,
    /// Wall-clock span of the measurement phase.
    pub total: Duration,
    /// Number of measured executions.
    pub executions: u32,
}

/// Warm up, then time `measurement` executions of `query`.
///
/// Warm-up executions are excluded from the timing window but their errors still
/// abort the run. A zero `measurement` count is rejected before anything executes.
pub async fn run<C, E>(
    executor: &E,
    conn: &C,
    query: &str,
    warmup: u32,
    measurement: u32,
) -> Result<Measurement>
where
    C: ?Sized + Sync,
    E: Executor<C> + ?Sized,
{
    if measurement == 0 {
        return Err(Error::Config(
            "measurement executions must be positive".to_string(),
        ));
    }

    for _ in 0..warmup {
        executor.execute(conn, query).await?;
    }

    let start = Instant::now();
    for _ in 0..measurement {
        executor.execute(conn, query).await?;
    }
    let total = start.elapsed();

    let mean = total / measurement;
    tracing::debug!(warmup, executions = measurement, ?total, ?mean, "measurement complete");

    Ok(Measurement {
        mean,
        total,
        executions: measurement,
    })
}

/// Race a future against the root token and a time ceiling.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(res) => res,
            Err(_) => Err(Error::timeout(operation, limit)),
        },
    }
}

/// Probe a connection with the short connectivity ceiling.
pub async fn ping(conn: &dyn Connection, cancel: &CancellationToken, limit: Duration) -> Result<()> {
    let operation = format!("ping {}", conn.engine());
    bounded(cancel, limit, &operation, conn.ping()).await
}

/// Executor that fetches and decodes the first row of each statement.
///
/// A statement with no rows decodes to the shape's placeholder values; any other
/// failure, including a timeout or cancellation, is returned as an error.
#[derive(Debug, Clone)]
pub struct RowScanner {
    shape: ResultShape,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RowScanner {
    /// Create a scanner for statements of the given shape.
    pub fn new(shape: ResultShape, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            shape,
            timeout,
            cancel,
        }
    }

    /// Execute a statement and return its decoded first row.
    pub async fn scan(&self, conn: &dyn Connection, query: &str) -> Result<ScannedRow> {
        let operation = format!("query on {}", conn.engine());
        let row = bounded(
            &self.cancel,
            self.timeout,
            &operation,
            conn.fetch_row(query, self.shape),
        )
        .await?;

        match row {
            Some(row) if row.shape() != self.shape => Err(Error::decode(
                conn.engine(),
                format!("expected {:?} row, got {:?}", self.shape, row.shape()),
            )),
            Some(row) => Ok(row),
            None => Ok(ScannedRow::sentinel(self.shape)),
        }
    }
}

#[async_trait]
impl<'c> Executor<dyn Connection + 'c> for RowScanner {
    async fn execute(&self, conn: &(dyn Connection + 'c), query: &str) -> Result<()> {
        let row = self.scan(conn, query).await?;
        tracing::trace!(?row, "row scanned");
        Ok(())
    }
}
