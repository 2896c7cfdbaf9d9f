//! Query catalog.
//!
//! Maps each (test case, engine, sub-case label) to the SQL text sent to that engine.
//! Dialect differences such as identifier quoting or planner hints live in the SQL text
//! itself; the runner treats it as opaque.
//!
//! The catalog is validated before any connection is opened: every test case must
//! provide at least one statement for every engine selected for the run.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Result shape a statement is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// A single integer column.
    Int,
    /// A single character column.
    Text,
    /// An integer column followed by a character column.
    IntAndText,
}

impl ResultShape {
    /// Number of columns the decode binds.
    pub fn columns(&self) -> usize {
        match self {
            ResultShape::Int | ResultShape::Text => 1,
            ResultShape::IntAndText => 2,
        }
    }
}

/// A named test case with per-engine statements.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Short identifier used in result keys (e.g. "01").
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Declared result shape of every statement in the case.
    pub shape: ResultShape,
    /// Measurement executions for this case; the configured default when `None`.
    pub executions: Option<u32>,
    /// Script run once per engine before the case is measured.
    pub setup: BTreeMap<Engine, String>,
    /// Engine -> sub-case label -> SQL. The empty label means "no sub-case".
    pub queries: BTreeMap<Engine, BTreeMap<String, String>>,
}

impl TestCase {
    /// Create a test case with no statements.
    pub fn new(id: impl Into<String>, description: impl Into<String>, shape: ResultShape) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            shape,
            executions: None,
            setup: BTreeMap::new(),
            queries: BTreeMap::new(),
        }
    }

    /// Set the measurement executions for this case.
    pub fn with_executions(mut self, executions: u32) -> Self {
        self.executions = Some(executions);
        self
    }

    /// Add a statement for one engine.
    pub fn with_query(
        mut self,
        engine: Engine,
        label: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        self.queries
            .entry(engine)
            .or_default()
            .insert(label.into(), sql.into());
        self
    }

    /// Add the same statement for every engine.
    pub fn with_query_all(mut self, label: &str, sql: &str) -> Self {
        for engine in Engine::ALL {
            self = self.with_query(engine, label, sql);
        }
        self
    }

    /// Add a setup script for one engine.
    pub fn with_setup(mut self, engine: Engine, script: impl Into<String>) -> Self {
        self.setup.insert(engine, script.into());
        self
    }

    /// Statements for an engine, ordered by label.
    pub fn queries_for(&self, engine: Engine) -> impl Iterator<Item = QueryCase<'_>> {
        self.queries
            .get(&engine)
            .into_iter()
            .flat_map(move |labels| {
                labels.iter().map(move |(label, sql)| QueryCase {
                    test: self,
                    engine,
                    label,
                    sql,
                })
            })
    }
}

/// One statement to benchmark: a test case bound to an engine and sub-case.
#[derive(Debug, Clone, Copy)]
pub struct QueryCase<'a> {
    pub test: &'a TestCase,
    pub engine: Engine,
    pub label: &'a str,
    pub sql: &'a str,
}

impl QueryCase<'_> {
    /// Declared result shape.
    pub fn shape(&self) -> ResultShape {
        self.test.shape
    }
}

/// An ordered collection of test cases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    cases: Vec<TestCase>,
}

impl Catalog {
    /// Create a catalog from test cases, rejecting duplicate ids.
    pub fn new(cases: Vec<TestCase>) -> Result<Self> {
        let mut seen = HashSet::new();
        for case in &cases {
            if !seen.insert(case.id.as_str()) {
                return Err(Error::Catalog(format!("duplicate test case id '{}'", case.id)));
            }
        }
        Ok(Self { cases })
    }

    /// The reference battery of lookups, aggregates and index seeks.
    ///
    /// Expects the `client`/`order`/`order_detail` fixture schema.
    pub fn builtin() -> Self {
        let cases = vec![
            TestCase::new("01", "lookup by primary key", ResultShape::Int)
                .with_executions(3000)
                .with_query_all("first key", "select id from client as c where id = 0;")
                .with_query_all("last key", "select id from client as c where id = 9999;")
                .with_query_all(
                    "lookup_and_agg",
                    "select count(*) from order_detail as od where order_id = 1;",
                ),
            TestCase::new(
                "02",
                "lookup by primary key + column not in index",
                ResultShape::IntAndText,
            )
            .with_executions(3000)
            .with_query_all("", "select id, name from client as c where id = 1;"),
            TestCase::new("03", "min and max", ResultShape::Int)
                .with_executions(3000)
                .with_query_all("min", "select min(id) from client as c;")
                .with_query_all("max", "select max(id) from client as c;")
                .with_query_all("min-max", "select min(id) + max(id) from client as c;"),
            TestCase::new("04", "index seek with complex condition", ResultShape::Int)
                .with_executions(200)
                .with_query_all(
                    "",
                    "select count(*) from client where id >= 1 and id < 10000 and id < 2;",
                )
                .with_query_all(
                    "bigger range",
                    "select count(*) from order_detail where order_id >= 1 and order_id < 10000 and order_id < 2;",
                )
                .with_query_all(
                    "much bigger range",
                    "select count(*) from order_detail where order_id >= 1 and order_id < 100000 and order_id < 2;",
                )
                .with_query_all(
                    "fixed",
                    "select count(*) from order_detail where order_id >= 1 and order_id < 2 and order_id < 100000;",
                ),
            TestCase::new("05", "nonclustered index seek vs. scan", ResultShape::Text)
                .with_executions(200)
                .with_query_all("", "select min(name) from client where country = 'FR';")
                .with_query_all("CY", "select min(name) from client where country = 'CY';")
                .with_query_all("US", "select min(name) from client where country = 'US';"),
        ];

        Self { cases }
    }

    /// Parse a catalog from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        file.into_catalog()
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| Error::Catalog(format!("{}: {}", path.display(), e)))
    }

    /// Serialize the catalog to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        let file = CatalogFile::from_catalog(self);
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Test cases in run order.
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Number of test cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the catalog has no test cases.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Keep only the given test case ids, preserving catalog order.
    pub fn select(self, ids: &[String]) -> Result<Self> {
        if ids.is_empty() {
            return Ok(self);
        }

        let unknown: Vec<&str> = ids
            .iter()
            .filter(|id| !self.cases.iter().any(|c| &c.id == *id))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::Catalog(format!(
                "unknown test case(s): {}",
                unknown.join(", ")
            )));
        }

        let cases = self
            .cases
            .into_iter()
            .filter(|c| ids.contains(&c.id))
            .collect();
        Ok(Self { cases })
    }

    /// Check that every test case has non-empty statements for every engine.
    ///
    /// All problems (missing case/engine pairs, empty statements, zero execution
    /// counts) are reported in a single error.
    pub fn validate(&self, engines: &[Engine]) -> Result<()> {
        if self.cases.is_empty() {
            return Err(Error::Catalog("catalog has no test cases".to_string()));
        }

        let mut problems = Vec::new();
        for case in &self.cases {
            if case.executions == Some(0) {
                problems.push(format!("{}: zero executions", case.id));
            }
            for engine in engines {
                match case.queries.get(engine) {
                    Some(labels) if !labels.is_empty() => {
                        for (label, sql) in labels {
                            if sql.trim().is_empty() {
                                problems.push(format!(
                                    "{}/{}[{}]: empty statement",
                                    case.id, engine, label
                                ));
                            }
                        }
                    }
                    _ => problems.push(format!("{}/{}: missing statements", case.id, engine)),
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Catalog(format!("invalid catalog: {}", problems.join(", "))))
        }
    }
}

/// On-disk catalog format. Engines are keyed by their identifiers.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    cases: Vec<TestCaseFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TestCaseFile {
    id: String,
    #[serde(default)]
    description: String,
    shape: ResultShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executions: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    setup: BTreeMap<String, String>,
    queries: BTreeMap<String, BTreeMap<String, String>>,
}

impl CatalogFile {
    fn from_catalog(catalog: &Catalog) -> Self {
        let cases = catalog
            .cases
            .iter()
            .map(|case| TestCaseFile {
                id: case.id.clone(),
                description: case.description.clone(),
                shape: case.shape,
                executions: case.executions,
                setup: case
                    .setup
                    .iter()
                    .map(|(engine, script)| (engine.id().to_string(), script.clone()))
                    .collect(),
                queries: case
                    .queries
                    .iter()
                    .map(|(engine, labels)| (engine.id().to_string(), labels.clone()))
                    .collect(),
            })
            .collect();
        Self { cases }
    }

    fn into_catalog(self) -> Result<Catalog> {
        let mut cases = Vec::with_capacity(self.cases.len());
        for file in self.cases {
            let mut case = TestCase::new(file.id, file.description, file.shape);
            case.executions = file.executions;
            for (engine, script) in file.setup {
                let engine: Engine = engine.parse().map_err(|e| {
                    Error::Catalog(format!("test case '{}': {}", case.id, e))
                })?;
                case.setup.insert(engine, script);
            }
            for (engine, labels) in file.queries {
                let engine: Engine = engine.parse().map_err(|e| {
                    Error::Catalog(format!("test case '{}': {}", case.id, e))
                })?;
                case.queries.insert(engine, labels);
            }
            cases.push(case);
        }
        Catalog::new(cases)
    }
}
