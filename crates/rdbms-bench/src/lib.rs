//! rdbms-bench library.
//!
//! This crate measures mean query latency of the same logical statements on MySQL,
//! PostgreSQL and SQL Server 2019/2022, against running servers or throwaway
//! containers, and renders the results as JSON or a table.

pub mod backends;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod provision;
pub mod report;
pub mod runner;
pub mod suite;

pub use backends::{connect, Connection, ScannedRow};
pub use catalog::{Catalog, QueryCase, ResultShape, TestCase};
pub use config::{Args, BenchConfig, FailurePolicy, PoolSettings};
pub use engine::Engine;
pub use error::{Error, Result};
pub use fixtures::Scale;
pub use provision::{EphemeralInstance, InstanceSpec};
pub use report::{OutputFormat, Report, ResultKey};
pub use runner::{Executor, Measurement, RowScanner};
pub use suite::Suite;
