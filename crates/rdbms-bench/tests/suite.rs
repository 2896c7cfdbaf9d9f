//! Run controller tests against in-process stub connections.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rdbms_bench::fixtures::{generate_statements, Scale};
use rdbms_bench::{
    BenchConfig, Catalog, Connection, Engine, Error, FailurePolicy, Report, Result, ResultShape,
    ScannedRow, Suite, TestCase,
};

/// Answers statements by keyword: `boom` fails, `empty` returns no rows, `hang` never
/// returns, anything else sleeps for `latency` and returns a row of the requested shape.
/// Scripts are recorded together with the number of fetches seen before them; a script
/// containing `boom` fails.
struct StubConnection {
    engine: Engine,
    latency: Duration,
    reachable: bool,
    fetches: AtomicU32,
    scripts: Mutex<Vec<(String, u32)>>,
}

impl StubConnection {
    fn new(engine: Engine) -> Self {
        Self {
            engine,
            latency: Duration::ZERO,
            reachable: true,
            fetches: AtomicU32::new(0),
            scripts: Mutex::new(Vec::new()),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn scripts(&self) -> Vec<String> {
        self.script_log().into_iter().map(|(script, _)| script).collect()
    }

    /// Each script as `script@fetches-before-it`.
    fn script_timeline(&self) -> Vec<String> {
        self.script_log()
            .into_iter()
            .map(|(script, fetches)| format!("{}@{}", script, fetches))
            .collect()
    }

    fn script_log(&self) -> Vec<(String, u32)> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for StubConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Error::connectivity(self.engine, "connection refused"))
        }
    }

    async fn fetch_row(&self, sql: &str, shape: ResultShape) -> Result<Option<ScannedRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if sql.contains("boom") {
            return Err(Error::query(self.engine, "syntax error near 'boom'"));
        }
        if sql.contains("hang") {
            return std::future::pending().await;
        }
        if sql.contains("empty") {
            return Ok(None);
        }
        tokio::time::sleep(self.latency).await;
        let row = match shape {
            ResultShape::Int => ScannedRow::Int(1),
            ResultShape::Text => ScannedRow::Text("FR".to_string()),
            ResultShape::IntAndText => ScannedRow::IntAndText(1, "Alice".to_string()),
        };
        Ok(Some(row))
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        if script.contains("boom") {
            return Err(Error::query(self.engine, "relation \"boom\" does not exist"));
        }
        let fetches = self.fetches();
        self.scripts.lock().unwrap().push((script.to_string(), fetches));
        Ok(())
    }

    async fn close(&self) {}
}

fn config() -> BenchConfig {
    BenchConfig::new(vec![Engine::Postgres])
        .with_warmup(1)
        .with_executions(2)
}

fn catalog(cases: Vec<TestCase>) -> Catalog {
    Catalog::new(cases).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_mean_latency_recorded_per_statement() {
    let catalog = catalog(vec![TestCase::new("01", "pk lookup", ResultShape::Int)
        .with_query(Engine::Postgres, "", "select id from client where id = 42")]);
    let config = config().with_warmup(2).with_forced_executions(5);
    let conn = StubConnection::new(Engine::Postgres).with_latency(Duration::from_millis(10));

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    assert_eq!(conn.fetches(), 7);
    assert_eq!(report.get("01 - postgres"), Some(Duration::from_millis(10)));
}

#[tokio::test]
async fn test_sub_cases_and_per_case_executions() {
    let catalog = catalog(vec![
        TestCase::new("02", "aggregates", ResultShape::Int)
            .with_executions(4)
            .with_query(Engine::Postgres, "min", "select min(id) from client")
            .with_query(Engine::Postgres, "max", "select max(id) from client"),
        TestCase::new("03", "text", ResultShape::Text)
            .with_query(Engine::Postgres, "", "select country from client limit 1"),
    ]);
    let config = config();
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    // (1 + 4) per aggregate sub-case, (1 + 2) for the text case.
    assert_eq!(conn.fetches(), 13);
    let keys: Vec<String> = report.results().keys().map(|k| k.to_string()).collect();
    assert_eq!(
        keys,
        vec!["02 - postgres - max", "02 - postgres - min", "03 - postgres"]
    );
}

#[tokio::test]
async fn test_empty_results_do_not_abort() {
    let catalog = catalog(vec![TestCase::new("04", "missing row", ResultShape::IntAndText)
        .with_query(Engine::Postgres, "", "select id, name from client where 'empty'")]);
    let config = config();
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    assert!(report.get("04 - postgres").is_some());
    assert!(report.failures().is_empty());
}

#[tokio::test]
async fn test_error_aborts_without_recording_case() {
    let catalog = catalog(vec![
        TestCase::new("01", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 1"),
        TestCase::new("02", "bad", ResultShape::Int)
            .with_query(Engine::Postgres, "", "select boom"),
        TestCase::new("03", "never reached", ResultShape::Int)
            .with_query(Engine::Postgres, "", "select 3"),
    ]);
    let config = config();
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    let err = suite
        .run_connection(&conn, true, &mut report)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Query { .. }));
    assert!(report.get("01 - postgres").is_some());
    assert!(report.get("02 - postgres").is_none());
    assert!(report.get("03 - postgres").is_none());
    // The failing statement errored during its first warm-up execution.
    assert_eq!(conn.fetches(), 3 + 1);
}

#[tokio::test]
async fn test_continue_policy_records_failure_and_proceeds() {
    let catalog = catalog(vec![
        TestCase::new("01", "bad", ResultShape::Int).with_query(Engine::Postgres, "", "select boom"),
        TestCase::new("02", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 2"),
    ]);
    let config = config().with_failure_policy(FailurePolicy::Continue);
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    assert!(report.get("02 - postgres").is_some());
    let failure = report.failure("01 - postgres").unwrap();
    assert!(failure.contains("boom"), "{}", failure);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_even_when_continuing() {
    let catalog = catalog(vec![
        TestCase::new("01", "stuck", ResultShape::Int).with_query(Engine::Postgres, "", "select hang"),
        TestCase::new("02", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 2"),
    ]);
    let config = config().with_failure_policy(FailurePolicy::Continue);
    let conn = StubConnection::new(Engine::Postgres);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let suite = Suite::new(&catalog, &config, cancel);
    let mut report = Report::new();
    let err = suite
        .run_connection(&conn, true, &mut report)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(report.is_empty());
    assert!(report.failures().is_empty());
}

#[tokio::test]
async fn test_unreachable_engine_fails_before_benchmarking() {
    let catalog = catalog(vec![
        TestCase::new("01", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 1")
    ]);
    let config = config();
    let conn = StubConnection::new(Engine::Postgres).unreachable();

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    let err = suite
        .run_connection(&conn, true, &mut report)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connectivity { .. }));
    assert_eq!(conn.fetches(), 0);
}

#[tokio::test]
async fn test_fixtures_and_setup_run_before_benchmarks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b_init.sql"), "insert into t values (2);").unwrap();
    std::fs::write(dir.path().join("a_init.sql"), "create table t (id int);").unwrap();
    std::fs::write(dir.path().join("notes.sql"), "ignored").unwrap();

    let catalog = catalog(vec![TestCase::new("01", "ok", ResultShape::Int)
        .with_setup(Engine::Postgres, "analyze client;")
        .with_query(Engine::Postgres, "", "select 1")]);
    let config = config()
        .with_fixtures_dir(dir.path())
        .with_generated_fixtures(Scale::Tiny);
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    let generated = generate_statements(Engine::Postgres, Scale::Tiny);
    let scripts = conn.scripts();
    assert_eq!(scripts.len(), 2 + generated.len() + 1);
    assert_eq!(scripts[0], "create table t (id int);");
    assert_eq!(scripts[1], "insert into t values (2);");
    assert_eq!(&scripts[2..2 + generated.len()], generated.as_slice());
    assert_eq!(scripts.last().unwrap(), "analyze client;");
}

#[tokio::test]
async fn test_setup_runs_right_before_its_case() {
    let catalog = catalog(vec![
        TestCase::new("a", "first", ResultShape::Int)
            .with_setup(Engine::Postgres, "setup_a")
            .with_query(Engine::Postgres, "", "select 1"),
        TestCase::new("b", "second", ResultShape::Int)
            .with_setup(Engine::Postgres, "setup_b")
            .with_query(Engine::Postgres, "", "select 2"),
    ]);
    let config = config();
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    // Case `a` runs 1 warm-up + 2 measured fetches before `setup_b`.
    assert_eq!(conn.script_timeline(), vec!["setup_a@0", "setup_b@3"]);
    assert_eq!(report.len(), 2);
}

#[tokio::test]
async fn test_failed_setup_skips_only_its_case_when_continuing() {
    let catalog = catalog(vec![
        TestCase::new("a", "broken setup", ResultShape::Int)
            .with_setup(Engine::Postgres, "create index on boom")
            .with_query(Engine::Postgres, "", "select 1"),
        TestCase::new("b", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 2"),
    ]);
    let config = config().with_failure_policy(FailurePolicy::Continue);
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    assert!(report.failure("a - postgres").unwrap().contains("boom"));
    assert!(report.get("a - postgres").is_none());
    assert!(report.get("b - postgres").is_some());
    assert_eq!(conn.fetches(), 3);
}

#[tokio::test]
async fn test_init_scripts_skipped_when_loaded_in_container() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("init.sql"), "create table t (id int);").unwrap();

    let catalog = catalog(vec![
        TestCase::new("01", "ok", ResultShape::Int).with_query(Engine::Postgres, "", "select 1")
    ]);
    let config = config().with_fixtures_dir(dir.path());
    let conn = StubConnection::new(Engine::Postgres);

    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, false, &mut report).await.unwrap();

    assert!(conn.scripts().is_empty());
}

#[tokio::test]
async fn test_run_rejects_incomplete_catalog() {
    let catalog = catalog(vec![
        TestCase::new("01", "pg only", ResultShape::Int).with_query(Engine::Postgres, "", "select 1")
    ]);
    let config = BenchConfig::new(vec![Engine::Postgres, Engine::MySql]);

    let err = Suite::new(&catalog, &config, CancellationToken::new())
        .run()
        .await
        .unwrap_err();

    match err {
        Error::Catalog(message) => assert!(message.contains("01/mysql"), "{}", message),
        other => panic!("expected catalog error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_builtin_catalog_covers_every_engine() {
    let catalog = Catalog::builtin();
    catalog.validate(&Engine::ALL).unwrap();

    let config = BenchConfig::new(vec![Engine::MsSql2022]).with_forced_executions(1);
    let conn = StubConnection::new(Engine::MsSql2022);
    let suite = Suite::new(&catalog, &config, CancellationToken::new());
    let mut report = Report::new();
    suite.run_connection(&conn, true, &mut report).await.unwrap();

    assert!(report.len() >= catalog.len());
    assert!(report.results().keys().all(|k| k.engine == "mssql-22"));
}
