//! Result aggregation and rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{Cell, Table};

use crate::engine::Engine;
use crate::error::Result;

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented JSON object
    Json,
    /// ASCII table format
    Table,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

/// Identifies one measured statement: test, engine and optional sub-case.
///
/// Empty parts are left out of the displayed form, so a key built from a plain string
/// displays as that string and an engine-level key displays as the engine id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    pub test: String,
    pub engine: String,
    pub case: Option<String>,
}

impl ResultKey {
    /// Create a key. An empty sub-case label means no sub-case.
    pub fn new(test: impl Into<String>, engine: Engine, case: &str) -> Self {
        Self {
            test: test.into(),
            engine: engine.id().to_string(),
            case: if case.is_empty() {
                None
            } else {
                Some(case.to_string())
            },
        }
    }

    /// Key for a failure that hit a whole engine rather than one statement.
    pub fn engine(engine: Engine) -> Self {
        Self {
            test: String::new(),
            engine: engine.id().to_string(),
            case: None,
        }
    }
}

impl From<&str> for ResultKey {
    fn from(key: &str) -> Self {
        Self {
            test: key.to_string(),
            engine: String::new(),
            case: None,
        }
    }
}

impl From<String> for ResultKey {
    fn from(key: String) -> Self {
        key.as_str().into()
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [Some(self.test.as_str()), Some(self.engine.as_str()), self.case.as_deref()];
        let mut first = true;
        for part in parts.into_iter().flatten().filter(|p| !p.is_empty()) {
            if !first {
                f.write_str(" - ")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// Mean latency per statement, built up over a run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    results: BTreeMap<ResultKey, Duration>,
    failures: BTreeMap<ResultKey, String>,
}

impl Report {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the mean latency for a key, replacing any earlier value.
    pub fn record(&mut self, key: impl Into<ResultKey>, duration: Duration) {
        self.results.insert(key.into(), duration);
    }

    /// Record a failed statement.
    pub fn record_failure(&mut self, key: impl Into<ResultKey>, message: impl ToString) {
        self.failures.insert(key.into(), message.to_string());
    }

    /// Look up a recorded duration by its displayed key.
    pub fn get(&self, key: &str) -> Option<Duration> {
        self.results
            .iter()
            .find(|(k, _)| k.to_string() == key)
            .map(|(_, duration)| *duration)
    }

    /// Look up a recorded failure by its displayed key.
    pub fn failure(&self, key: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|(k, _)| k.to_string() == key)
            .map(|(_, message)| message.as_str())
    }

    /// Recorded results in key order.
    pub fn results(&self) -> &BTreeMap<ResultKey, Duration> {
        &self.results
    }

    /// Recorded failures in key order.
    pub fn failures(&self) -> &BTreeMap<ResultKey, String> {
        &self.failures
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no results were recorded.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Render in the requested format.
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => self.render_json(),
            OutputFormat::Table => Ok(self.render_table()),
        }
    }

    /// Render as an indented JSON object of displayed key -> mean latency.
    ///
    /// Failures, if any, follow under a `"failures"` object so the results block stays
    /// a flat map.
    pub fn render_json(&self) -> Result<String> {
        let results: BTreeMap<String, String> = self
            .results
            .iter()
            .map(|(key, duration)| (key.to_string(), format_duration(*duration)))
            .collect();

        if self.failures.is_empty() {
            return Ok(serde_json::to_string_pretty(&results)?);
        }

        let failures: BTreeMap<String, &str> = self
            .failures
            .iter()
            .map(|(key, message)| (key.to_string(), message.as_str()))
            .collect();
        let value = serde_json::json!({
            "results": results,
            "failures": failures,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Render as an ASCII table with one row per statement.
    pub fn render_table(&self) -> String {
        if self.results.is_empty() && self.failures.is_empty() {
            return "No results".to_string();
        }

        let row = |key: &ResultKey, mean: String| {
            vec![
                Cell::new(&key.test),
                Cell::new(&key.engine),
                Cell::new(key.case.as_deref().unwrap_or("")),
                Cell::new(mean),
            ]
        };

        let mut table = Table::new();
        table.set_header(vec!["test", "engine", "case", "mean"]);
        for (key, duration) in &self.results {
            table.add_row(row(key, format_duration(*duration)));
        }
        for (key, message) in &self.failures {
            table.add_row(row(key, format!("FAILED: {}", message)));
        }
        table.to_string()
    }
}

/// Format a duration with the largest fitting unit, e.g. `12ms`, `1.5ms`, `850µs`.
pub fn format_duration(duration: Duration) -> String {
    format!("{:?}", duration)
}
