//! Ephemeral database instances.
//!
//! Starts a throwaway engine container, waits until it accepts a readiness probe,
//! runs init scripts inside it with the engine's own command-line client and reports
//! a connection url. The container is removed on every exit path.

use std::path::PathBuf;
use std::time::Duration;

use testcontainers::core::{CmdWaitFor, ExecCommand, IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, GenericImage, ImageExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backends;
use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::runner::{bounded, ping};

/// Database created in every instance.
pub const DATABASE: &str = "test_db";

/// Password of the MySQL `root` user.
pub const MYSQL_PASSWORD: &str = "mysql";

/// Password of the PostgreSQL `postgres` user.
pub const POSTGRES_PASSWORD: &str = "postgres";

/// Password of the SQL Server `SA` user.
pub const MSSQL_PASSWORD: &str = "myStrong(!)Password";

/// Delay between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Ceiling for a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a readiness log line is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Everything needed to start one instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub engine: Engine,
    pub image: String,
    pub tag: String,
    pub env: Vec<(String, String)>,
    /// Log line printed once the server accepts connections.
    pub ready_message: (LogStream, String),
    /// Scripts copied into the container and run in order after startup.
    pub init_scripts: Vec<PathBuf>,
    /// Deadline for the container to start and pass the readiness probe.
    pub startup_timeout: Duration,
}

impl InstanceSpec {
    /// Default image and environment for an engine.
    pub fn for_engine(engine: Engine, startup_timeout: Duration) -> Self {
        let env = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        let (image, tag, env, ready_message) = match engine {
            Engine::MySql => (
                "mysql",
                "8.0",
                env(&[
                    ("MYSQL_ROOT_PASSWORD", MYSQL_PASSWORD),
                    ("MYSQL_DATABASE", DATABASE),
                ]),
                (LogStream::Stderr, "port: 3306  MySQL Community Server"),
            ),
            Engine::Postgres => (
                "postgres",
                "16",
                env(&[
                    ("POSTGRES_PASSWORD", POSTGRES_PASSWORD),
                    ("POSTGRES_DB", DATABASE),
                ]),
                (LogStream::Stderr, "database system is ready to accept connections"),
            ),
            Engine::MsSql2019 | Engine::MsSql2022 => (
                "mcr.microsoft.com/mssql/server",
                if engine == Engine::MsSql2019 {
                    "2019-CU20-ubuntu-20.04"
                } else {
                    "2022-CU4-ubuntu-20.04"
                },
                env(&[
                    ("ACCEPT_EULA", "Y"),
                    ("MSSQL_SA_PASSWORD", MSSQL_PASSWORD),
                    ("MSSQL_PID", "Developer"),
                ]),
                (LogStream::Stdout, "SQL Server is now ready for client connections"),
            ),
        };

        Self {
            engine,
            image: image.to_string(),
            tag: tag.to_string(),
            env,
            ready_message: (ready_message.0, ready_message.1.to_string()),
            init_scripts: Vec::new(),
            startup_timeout,
        }
    }

    /// Override the image reference.
    pub fn with_image(mut self, image: impl Into<String>, tag: impl Into<String>) -> Self {
        self.image = image.into();
        self.tag = tag.into();
        self
    }

    /// Scripts to run inside the container after startup.
    pub fn with_init_scripts(mut self, scripts: Vec<PathBuf>) -> Self {
        self.init_scripts = scripts;
        self
    }

    fn wait_for(&self) -> WaitFor {
        let (stream, message) = &self.ready_message;
        match stream {
            LogStream::Stdout => WaitFor::message_on_stdout(message.as_str()),
            LogStream::Stderr => WaitFor::message_on_stderr(message.as_str()),
        }
    }

    fn container_path(script: &std::path::Path) -> String {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "init.sql".to_string());
        format!("/tmp/{}", name)
    }
}

/// Connection url for an engine listening on `host:port`.
pub fn endpoint_url(engine: Engine, host: &str, port: u16, database: &str) -> String {
    match engine {
        Engine::MySql => format!(
            "mysql://root:{}@{}:{}/{}",
            MYSQL_PASSWORD, host, port, database
        ),
        Engine::Postgres => format!(
            "postgres://postgres:{}@{}:{}/{}?sslmode=disable",
            POSTGRES_PASSWORD, host, port, database
        ),
        Engine::MsSql2019 | Engine::MsSql2022 => format!(
            "server=tcp:{},{};user id=SA;password={};database={};TrustServerCertificate=true",
            host, port, MSSQL_PASSWORD, database
        ),
    }
}

/// Command that runs a script file inside the engine's container.
pub fn init_command(engine: Engine, container_path: &str) -> Vec<String> {
    let args: Vec<&str> = match engine {
        Engine::MySql => {
            return vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "mysql -uroot -p'{}' {} < {}",
                    MYSQL_PASSWORD, DATABASE, container_path
                ),
            ]
        }
        Engine::Postgres => vec![
            "psql",
            "-v",
            "ON_ERROR_STOP=1",
            "-U",
            "postgres",
            "-d",
            DATABASE,
            "-f",
            container_path,
        ],
        Engine::MsSql2019 | Engine::MsSql2022 => vec![
            "/opt/mssql-tools/bin/sqlcmd",
            "-S",
            "localhost",
            "-U",
            "SA",
            "-P",
            MSSQL_PASSWORD,
            "-d",
            "master",
            "-b",
            "-i",
            container_path,
        ],
    };
    args.into_iter().map(String::from).collect()
}

/// A running throwaway instance.
pub struct EphemeralInstance {
    engine: Engine,
    container: ContainerAsync<GenericImage>,
    url: String,
}

impl EphemeralInstance {
    /// Start an instance and wait until it is ready for benchmarking.
    ///
    /// If any step after the container starts fails, the container is removed before
    /// the error is returned.
    pub async fn start(spec: InstanceSpec, cancel: &CancellationToken) -> Result<Self> {
        let engine = spec.engine;
        tracing::info!(
            engine = %engine,
            image = %format!("{}:{}", spec.image, spec.tag),
            "starting ephemeral instance"
        );

        let mut request: ContainerRequest<GenericImage> =
            GenericImage::new(spec.image.clone(), spec.tag.clone())
                .with_exposed_port(engine.default_port().tcp())
                .with_wait_for(spec.wait_for())
                .with_startup_timeout(spec.startup_timeout);
        for (key, value) in &spec.env {
            request = request.with_env_var(key.clone(), value.clone());
        }
        for script in &spec.init_scripts {
            let contents = std::fs::read(script).map_err(|e| {
                Error::Provisioning(format!("cannot read {}: {}", script.display(), e))
            })?;
            request = request.with_copy_to(InstanceSpec::container_path(script), contents);
        }

        let container = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            started = request.start() => started.map_err(|e| {
                Error::Provisioning(format!("{}: start {}:{}: {}", engine, spec.image, spec.tag, e))
            })?,
        };

        match Self::initialise(&spec, &container, cancel).await {
            Ok(url) => {
                tracing::info!(engine = %engine, "ephemeral instance ready");
                Ok(Self {
                    engine,
                    container,
                    url,
                })
            }
            Err(e) => {
                remove(engine, container).await;
                Err(e)
            }
        }
    }

    async fn initialise(
        spec: &InstanceSpec,
        container: &ContainerAsync<GenericImage>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let engine = spec.engine;
        let provisioning = |e: testcontainers::TestcontainersError| {
            Error::Provisioning(format!("{}: {}", engine, e))
        };

        let host = container.get_host().await.map_err(provisioning)?.to_string();
        let port = container
            .get_host_port_ipv4(engine.default_port().tcp())
            .await
            .map_err(provisioning)?;

        // SQL Server has no database until one is created, so probe `master`.
        let probe_database = if engine.is_mssql() { "master" } else { DATABASE };
        let probe_url = endpoint_url(engine, &host, port, probe_database);
        wait_until_ready(engine, &probe_url, spec.startup_timeout, cancel).await?;

        if engine.is_mssql() {
            create_mssql_database(engine, &probe_url, cancel).await?;
        }

        for script in &spec.init_scripts {
            let path = InstanceSpec::container_path(script);
            let command = ExecCommand::new(init_command(engine, &path))
                .with_cmd_ready_condition(CmdWaitFor::exit_code(0));

            let mut result = bounded(cancel, spec.startup_timeout, "init script", async {
                container.exec(command).await.map_err(|e| {
                    Error::Provisioning(format!("{}: init script {}: {}", engine, path, e))
                })
            })
            .await?;
            let stdout = result.stdout_to_vec().await.map_err(provisioning)?;
            let stderr = result.stderr_to_vec().await.map_err(provisioning)?;
            let exit_code = result.exit_code().await.map_err(provisioning)?;

            tracing::info!(
                engine = %engine,
                script = %path,
                exit_code = ?exit_code,
                output = %String::from_utf8_lossy(&stdout),
                "init script finished"
            );

            check_exit(engine, &path, exit_code, &stderr)?;
        }

        Ok(endpoint_url(engine, &host, port, DATABASE))
    }

    /// Engine running in this instance.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Connection url of the benchmark database.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop and remove the container.
    pub async fn shutdown(self) {
        remove(self.engine, self.container).await;
    }
}

impl std::fmt::Debug for EphemeralInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralInstance")
            .field("engine", &self.engine)
            .field("container", &self.container.id())
            .finish()
    }
}

async fn remove(engine: Engine, container: ContainerAsync<GenericImage>) {
    let id = container.id().to_string();
    match container.rm().await {
        Ok(()) => tracing::info!(engine = %engine, container = %id, "ephemeral instance removed"),
        Err(e) => tracing::warn!(engine = %engine, container = %id, error = %e, "failed to remove container"),
    }
}

/// Fail unless an init script exited cleanly.
fn check_exit(engine: Engine, path: &str, exit_code: Option<i64>, stderr: &[u8]) -> Result<()> {
    match exit_code {
        Some(0) => Ok(()),
        code => Err(Error::Provisioning(format!(
            "{}: init script {} exited with {}: {}",
            engine,
            path,
            code.map(|c| c.to_string()).unwrap_or_else(|| "no exit code".to_string()),
            String::from_utf8_lossy(stderr).trim()
        ))),
    }
}

/// Poll connect + ping until the server answers or the deadline passes.
async fn wait_until_ready(
    engine: Engine,
    url: &str,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let conn = backends::connect(engine, url, &PoolSettings::new(1)).await?;
        let result = ping(conn.as_ref(), cancel, PROBE_TIMEOUT).await;
        conn.close().await;

        match result {
            Ok(()) => {
                tracing::debug!(engine = %engine, attempt, "readiness probe succeeded");
                return Ok(());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if start.elapsed() >= deadline => {
                return Err(Error::Provisioning(format!(
                    "{} not ready after {:?} ({} attempts): {}",
                    engine, deadline, attempt, e
                )));
            }
            Err(e) => {
                tracing::debug!(engine = %engine, attempt, error = %e, "readiness probe failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(PROBE_INTERVAL) => {}
        }
    }
}

async fn create_mssql_database(engine: Engine, url: &str, cancel: &CancellationToken) -> Result<()> {
    let conn = backends::connect(engine, url, &PoolSettings::new(1)).await?;
    let script = format!(
        "IF DB_ID('{db}') IS NULL CREATE DATABASE {db};",
        db = DATABASE
    );
    let result = bounded(
        cancel,
        Duration::from_secs(60),
        "create database",
        conn.execute_script(&script),
    )
    .await;
    conn.close().await;
    result
}
