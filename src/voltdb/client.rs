use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::DbError;
use crate::voltdb::limiter::RateLimiter;
use crate::voltdb::wire::{self, ClientResponse, Param, ResponseStatus};

pub const DEFAULT_PORT: u16 = 21212;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host:port` addresses; one connection is opened to each.
    pub servers: Vec<String>,
    pub user: String,
    pub password: String,
    /// Zero means unlimited.
    pub max_transactions_per_second: u32,
}

/// Invokes stored procedures on a cluster. Implementations must allow
/// concurrent calls from many workers.
#[async_trait]
pub trait ProcedureClient: Send + Sync {
    async fn call_procedure(
        &self,
        procedure: &str,
        params: Vec<Param>,
    ) -> Result<ClientResponse, DbError>;

    /// Waits until no invocation is outstanding.
    async fn drain(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;
}

/// Builds a connected client on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ProcedureClient>, DbError>;
}

pub struct VoltConnector {
    config: ClientConfig,
}

impl VoltConnector {
    pub fn new(config: ClientConfig) -> Self {
        VoltConnector { config }
    }
}

#[async_trait]
impl Connector for VoltConnector {
    async fn connect(&self) -> Result<Arc<dyn ProcedureClient>, DbError> {
        Ok(Arc::new(VoltClient::connect(&self.config).await?))
    }
}

type Reader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// Reply slots of one connection, keyed by client handle. Once shut, no
/// slot is accepted and every waiting caller sees its sender dropped.
struct Pending {
    open: bool,
    slots: HashMap<i64, oneshot::Sender<ClientResponse>>,
}

impl Pending {
    fn new() -> Self {
        Pending {
            open: true,
            slots: HashMap::new(),
        }
    }

    fn register(
        &mut self,
        handle: i64,
        tx: oneshot::Sender<ClientResponse>,
    ) -> Result<(), DbError> {
        if !self.open {
            return Err(DbError::ConnectionLost);
        }
        self.slots.insert(handle, tx);
        Ok(())
    }

    fn shut(&mut self) {
        self.open = false;
        self.slots.clear();
    }
}

struct Connection {
    host: String,
    writer: Mutex<Writer>,
    pending: Arc<Mutex<Pending>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// Outstanding invocation counter that wakes drainers when it reaches zero.
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

struct OutstandingGuard<'a>(&'a Outstanding);

impl Outstanding {
    fn enter(&self) -> OutstandingGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        OutstandingGuard(self)
    }
}

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// TCP client for the VoltDB native protocol.
pub struct VoltClient {
    connections: Vec<Connection>,
    next_connection: AtomicUsize,
    next_handle: AtomicI64,
    limiter: RateLimiter,
    outstanding: Outstanding,
    closed: AtomicBool,
}

impl VoltClient {
    /// Opens and authenticates a connection to every configured server.
    /// Servers that cannot be reached are skipped as long as one succeeds.
    pub async fn connect(config: &ClientConfig) -> Result<VoltClient, DbError> {
        let mut connections = Vec::with_capacity(config.servers.len());
        let mut first_error = None;
        for host in &config.servers {
            match Self::open(host, &config.user, &config.password).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    warn!("failed to connect to {}: {}", host, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if connections.is_empty() {
            return Err(first_error.unwrap_or_else(|| DbError::Connection {
                host: String::new(),
                reason: "no servers configured".to_string(),
            }));
        }
        Ok(VoltClient {
            connections,
            next_connection: AtomicUsize::new(0),
            next_handle: AtomicI64::new(1),
            limiter: RateLimiter::new(config.max_transactions_per_second),
            outstanding: Outstanding {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            },
            closed: AtomicBool::new(false),
        })
    }

    async fn open(host: &str, user: &str, password: &str) -> Result<Connection, DbError> {
        let connection_error = |reason: String| DbError::Connection {
            host: host.to_string(),
            reason,
        };
        let stream = TcpStream::connect(host)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, wire::codec());
        let mut writer = FramedWrite::new(writer, wire::codec());

        writer.send(wire::encode_login(user, password)).await?;
        let reply = match reader.next().await {
            Some(frame) => frame?.freeze(),
            None => return Err(connection_error("closed during login".to_string())),
        };
        let login = match wire::decode_login_response(reply)? {
            Ok(login) => login,
            Err(code) => {
                return Err(DbError::Authentication {
                    host: host.to_string(),
                    code,
                })
            }
        };
        info!(
            "connected to {} (host id {}, connection id {}, leader {}, build {})",
            host, login.host_id, login.connection_id, login.leader, login.build
        );
        debug!("cluster at {} started at {} ms", host, login.cluster_start_millis);

        let pending = Arc::new(Mutex::new(Pending::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(
            host.to_string(),
            reader,
            pending.clone(),
            alive.clone(),
        ));
        Ok(Connection {
            host: host.to_string(),
            writer: Mutex::new(writer),
            pending,
            alive,
            reader,
        })
    }

    fn pick_connection(&self) -> Option<&Connection> {
        let n = self.connections.len();
        let start = self.next_connection.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|i| &self.connections[start.wrapping_add(i) % n])
            .find(|c| c.alive.load(Ordering::Acquire))
    }
}

#[async_trait]
impl ProcedureClient for VoltClient {
    async fn call_procedure(
        &self,
        procedure: &str,
        params: Vec<Param>,
    ) -> Result<ClientResponse, DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        let _outstanding = self.outstanding.enter();
        self.limiter.acquire().await;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let frame = wire::encode_invocation(procedure, handle, &params)?;
        let conn = self.pick_connection().ok_or(DbError::ConnectionLost)?;

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.register(handle, tx)?;
        let written = conn.writer.lock().await.send(frame).await;
        if let Err(e) = written {
            conn.pending.lock().await.slots.remove(&handle);
            return Err(e.into());
        }

        let response = rx.await.map_err(|_| DbError::ConnectionLost)?;
        trace!(
            "{} on {}: {:?} in {} ms, app status {} {}",
            procedure,
            conn.host,
            response.status,
            response.cluster_round_trip_ms,
            response.app_status,
            response.app_status_string.as_deref().unwrap_or("")
        );
        if response.status != ResponseStatus::Success {
            return Err(DbError::Procedure {
                procedure: procedure.to_string(),
                status: response.status,
                message: response.status_string.unwrap_or_default(),
            });
        }
        Ok(response)
    }

    async fn drain(&self) -> Result<(), DbError> {
        loop {
            let idle = self.outstanding.idle.notified();
            if self.outstanding.count.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            idle.await;
        }
    }

    async fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for conn in &self.connections {
            {
                let mut pending = conn.pending.lock().await;
                conn.alive.store(false, Ordering::Release);
                pending.shut();
            }
            conn.reader.abort();
            let mut writer = conn.writer.lock().await;
            if let Err(e) = <Writer as SinkExt<Bytes>>::close(&mut *writer).await {
                debug!("shutdown of {} failed: {}", conn.host, e);
            }
        }
        info!("closed {} connection(s)", self.connections.len());
        Ok(())
    }
}

async fn read_responses(
    host: String,
    mut reader: Reader,
    pending: Arc<Mutex<Pending>>,
    alive: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame.freeze(),
            Err(e) => {
                warn!("read from {} failed: {}", host, e);
                break;
            }
        };
        match wire::decode_response(frame) {
            Ok((handle, response)) => match pending.lock().await.slots.remove(&handle) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => warn!("{} answered unknown handle {}", host, handle),
            },
            Err(e) => {
                warn!("undecodable response from {}: {}", host, e);
                break;
            }
        }
    }
    let mut pending = pending.lock().await;
    if alive.swap(false, Ordering::AcqRel) {
        warn!("connection to {} lost", host);
    }
    pending.shut();
}
