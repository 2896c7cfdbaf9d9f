//! Run controller.
//!
//! Drives every selected engine through the catalog: obtain a connection, probe it,
//! load fixtures, then for each case run its setup script and benchmark its
//! statements, recording their mean latency. Connections and ephemeral instances are
//! released whether the engine succeeds or fails.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::backends::{self, Connection};
use crate::catalog::{Catalog, TestCase};
use crate::config::{BenchConfig, FailurePolicy};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::fixtures;
use crate::provision::{EphemeralInstance, InstanceSpec};
use crate::report::{Report, ResultKey};
use crate::runner::{self, bounded, RowScanner};

/// Benchmarks a catalog against the configured engines.
pub struct Suite<'a> {
    catalog: &'a Catalog,
    config: &'a BenchConfig,
    cancel: CancellationToken,
}

impl<'a> Suite<'a> {
    /// Create a run controller. `cancel` is the root token for the whole run.
    pub fn new(catalog: &'a Catalog, config: &'a BenchConfig, cancel: CancellationToken) -> Self {
        Self {
            catalog,
            config,
            cancel,
        }
    }

    /// Benchmark every configured engine in order.
    pub async fn run(&self) -> Result<Report> {
        self.catalog.validate(&self.config.engines)?;

        let mut report = Report::new();
        for &engine in &self.config.engines {
            match self.run_engine(engine, &mut report).await {
                Ok(()) => {}
                Err(e) if self.keeps_going(&e) => {
                    tracing::warn!(engine = %engine, error = %e, "engine failed, continuing");
                    report.record_failure(ResultKey::engine(engine), e);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            results = report.len(),
            failures = report.failures().len(),
            "benchmark complete"
        );
        Ok(report)
    }

    /// Benchmark one engine, provisioning an instance if configured.
    pub async fn run_engine(&self, engine: Engine, report: &mut Report) -> Result<()> {
        if self.config.provision {
            let scripts = self.init_scripts(engine)?;
            let spec = InstanceSpec::for_engine(engine, self.config.startup_timeout)
                .with_init_scripts(scripts);
            let instance = EphemeralInstance::start(spec, &self.cancel).await?;

            let result = self.run_url(engine, instance.url(), false, report).await;
            instance.shutdown().await;
            result
        } else {
            let url = self
                .config
                .urls
                .get(&engine)
                .ok_or_else(|| Error::Config(format!("no connection url for {}", engine)))?;
            self.run_url(engine, url, true, report).await
        }
    }

    async fn run_url(
        &self,
        engine: Engine,
        url: &str,
        load_init_scripts: bool,
        report: &mut Report,
    ) -> Result<()> {
        let conn = backends::connect(engine, url, &self.config.pool).await?;
        let result = self.run_connection(conn.as_ref(), load_init_scripts, report).await;
        conn.close().await;
        tracing::debug!(engine = %engine, "connection closed");
        result
    }

    /// Probe, prepare and benchmark an open connection.
    ///
    /// The connection is not closed; that is left to whoever opened it.
    pub async fn run_connection(
        &self,
        conn: &dyn Connection,
        load_init_scripts: bool,
        report: &mut Report,
    ) -> Result<()> {
        let engine = conn.engine();
        runner::ping(conn, &self.cancel, self.config.ping_timeout).await?;
        tracing::info!(engine = %engine, "connected");

        self.prepare(conn, load_init_scripts).await?;
        self.benchmark(conn, report).await
    }

    async fn prepare(&self, conn: &dyn Connection, load_init_scripts: bool) -> Result<()> {
        let engine = conn.engine();
        let limit = self.config.startup_timeout;

        if load_init_scripts {
            for script in self.init_scripts(engine)? {
                let operation = format!("load {} on {}", script.display(), engine);
                bounded(&self.cancel, limit, &operation, fixtures::load_script(conn, &script))
                    .await?;
            }
        }

        if let Some(scale) = self.config.generate_fixtures {
            let operation = format!("load generated fixtures on {}", engine);
            bounded(&self.cancel, limit, &operation, fixtures::load_generated(conn, scale)).await?;
        }
        Ok(())
    }

    /// Run a case's setup script for this engine, if it has one.
    async fn setup(&self, conn: &dyn Connection, case: &TestCase) -> Result<()> {
        let engine = conn.engine();
        let Some(script) = case.setup.get(&engine) else {
            return Ok(());
        };
        tracing::debug!(engine = %engine, case = %case.id, "running setup script");
        let operation = format!("setup of {} on {}", case.id, engine);
        bounded(
            &self.cancel,
            self.config.startup_timeout,
            &operation,
            conn.execute_script(script),
        )
        .await
    }

    async fn benchmark(&self, conn: &dyn Connection, report: &mut Report) -> Result<()> {
        let engine = conn.engine();
        let warmup = self.config.warmup_executions;

        for case in self.catalog.cases() {
            if let Err(e) = self.setup(conn, case).await {
                if !self.keeps_going(&e) {
                    tracing::error!(engine = %engine, case = %case.id, error = %e, "setup failed");
                    return Err(e);
                }
                tracing::warn!(
                    engine = %engine,
                    case = %case.id,
                    error = %e,
                    "setup failed, skipping case"
                );
                report.record_failure(ResultKey::new(&case.id, engine, ""), e);
                continue;
            }

            let executions = self.config.executions_for(case);
            for query in case.queries_for(engine) {
                let key = ResultKey::new(&case.id, engine, query.label);
                let scanner =
                    RowScanner::new(query.shape(), self.config.query_timeout, self.cancel.clone());

                tracing::info!(key = %key, warmup, executions, "running");
                match runner::run(&scanner, conn, query.sql, warmup, executions).await {
                    Ok(measurement) => {
                        tracing::info!(key = %key, mean = ?measurement.mean, "measured");
                        report.record(key, measurement.mean);
                    }
                    Err(e) if self.keeps_going(&e) => {
                        tracing::warn!(key = %key, error = %e, "case failed, continuing");
                        report.record_failure(key, e);
                    }
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "case failed");
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn init_scripts(&self, engine: Engine) -> Result<Vec<PathBuf>> {
        match &self.config.fixtures_dir {
            Some(dir) => fixtures::discover_init_scripts(dir, engine),
            None => Ok(Vec::new()),
        }
    }

    fn keeps_going(&self, err: &Error) -> bool {
        self.config.failure_policy == FailurePolicy::Continue && !err.is_cancelled()
    }
}
