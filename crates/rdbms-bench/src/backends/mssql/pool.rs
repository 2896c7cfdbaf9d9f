//! Connection pooling for SQL Server clients.
//!
//! The pool bounds the number of open clients with a semaphore and keeps up to
//! `max_idle` returned clients for reuse. Clients are created on demand.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiberius::Client;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::PoolSettings;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// A SQL Server client over a tokio TCP stream.
pub type MsSqlClient = Client<Compat<TcpStream>>;

/// Configuration for the client pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Engine the pool connects to, for error messages.
    pub engine: Engine,
    /// Maximum number of clients open at once.
    pub max_open: usize,
    /// Maximum number of idle clients kept for reuse.
    pub max_idle: usize,
    /// Maximum age of a client before it is discarded on return.
    pub max_lifetime: Option<Duration>,
    /// Timeout for acquiring a client from the pool.
    pub acquire_timeout: Duration,
    /// Driver configuration for creating new clients.
    pub client_config: tiberius::Config,
}

impl PoolConfig {
    /// Create a pool configuration from shared pool settings.
    pub fn new(engine: Engine, client_config: tiberius::Config, settings: &PoolSettings) -> Self {
        Self {
            engine,
            max_open: settings.max_open.max(1) as usize,
            max_idle: settings.max_idle as usize,
            max_lifetime: settings.max_lifetime,
            acquire_timeout: settings.acquire_timeout,
            client_config,
        }
    }
}

struct IdleClient {
    client: MsSqlClient,
    created: Instant,
}

/// A pooled client that returns itself to the pool when dropped.
///
/// A client dropped between [`PooledClient::begin_request`] and
/// [`PooledClient::end_request`] may have unread response tokens on the wire, so it is
/// closed instead of being reused.
pub struct PooledClient {
    client: Option<IdleClient>,
    pool: Arc<ClientPoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    in_flight: bool,
}

impl PooledClient {
    /// Mark a request as sent. Call before issuing a query.
    pub fn begin_request(&mut self) {
        self.in_flight = true;
    }

    /// Mark the response as fully read.
    pub fn end_request(&mut self) {
        self.in_flight = false;
    }

    /// Drop the client instead of returning it, e.g. after a driver error.
    pub fn discard(mut self) {
        self.client = None;
    }
}

impl Deref for PooledClient {
    type Target = MsSqlClient;

    fn deref(&self) -> &Self::Target {
        match &self.client {
            Some(idle) => &idle.client,
            None => unreachable!("pooled client used after discard"),
        }
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.client {
            Some(idle) => &mut idle.client,
            None => unreachable!("pooled client used after discard"),
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let permit = self.permit.take();
        if let Some(client) = self.client.take() {
            if !self.pool.reusable(client.created, self.in_flight) {
                tracing::debug!(
                    engine = %self.pool.config.engine,
                    in_flight = self.in_flight,
                    "discarding SQL Server connection"
                );
                return;
            }
            // The permit is held until the client is back in the idle list.
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.return_client(client).await;
                drop(permit);
            });
        }
    }
}

/// Internal pool state.
struct ClientPoolInner {
    config: PoolConfig,
    idle: Mutex<Vec<IdleClient>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

impl ClientPoolInner {
    fn new(config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_open));
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            semaphore,
            closed: AtomicBool::new(false),
        }
    }

    async fn acquire(&self) -> Result<IdleClient> {
        // Try to reuse an idle client
        {
            let mut idle = self.idle.lock().await;
            while let Some(client) = idle.pop() {
                if !self.expired(client.created) {
                    return Ok(client);
                }
            }
        }

        let client = establish(&self.config.client_config)
            .await
            .map_err(|e| Error::connectivity(self.config.engine, e))?;
        tracing::debug!(engine = %self.config.engine, "opened SQL Server connection");

        Ok(IdleClient {
            client,
            created: Instant::now(),
        })
    }

    async fn return_client(&self, client: IdleClient) {
        if !self.reusable(client.created, false) {
            return;
        }
        let mut idle = self.idle.lock().await;
        if idle.len() < self.config.max_idle {
            idle.push(client);
        }
        // If the idle list is full, the client is dropped
    }

    /// Whether a client handed back to the pool may be kept for reuse.
    fn reusable(&self, created: Instant, in_flight: bool) -> bool {
        !in_flight && !self.closed.load(Ordering::SeqCst) && !self.expired(created)
    }

    fn expired(&self, created: Instant) -> bool {
        self.config
            .max_lifetime
            .map(|lifetime| created.elapsed() >= lifetime)
            .unwrap_or(false)
    }
}

/// A pool of SQL Server clients.
pub struct ClientPool {
    inner: Arc<ClientPoolInner>,
}

impl ClientPool {
    /// Create an empty pool. Clients are opened on first use.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(ClientPoolInner::new(config)),
        }
    }

    /// Acquire a client from the pool.
    pub async fn acquire(&self) -> Result<PooledClient> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::connectivity(self.inner.config.engine, "pool is closed"));
        }

        // Wait for a permit (limits open clients)
        let permit = tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("acquire {} connection", self.inner.config.engine),
                self.inner.config.acquire_timeout,
            )
        })?
        .map_err(|_| Error::connectivity(self.inner.config.engine, "pool is closed"))?;

        let client = self.inner.acquire().await?;

        Ok(PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
            permit: Some(permit),
            in_flight: false,
        })
    }

    /// Close all idle clients and refuse new acquisitions.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();
        let mut idle = self.inner.idle.lock().await;
        for idle_client in idle.drain(..) {
            if let Err(e) = idle_client.client.close().await {
                tracing::debug!(engine = %self.inner.config.engine, error = %e, "error closing connection");
            }
        }
    }

    /// Get the current number of idle clients.
    pub async fn idle_clients(&self) -> usize {
        self.inner.idle.lock().await.len()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("engine", &self.inner.config.engine)
            .field("max_open", &self.inner.config.max_open)
            .field("max_idle", &self.inner.config.max_idle)
            .finish()
    }
}

/// Open a new client.
async fn establish(config: &tiberius::Config) -> std::result::Result<MsSqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config.clone(), tcp.compat_write()).await
}
