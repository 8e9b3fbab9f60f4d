//! In-memory cluster implementing the user procedures, reachable directly as a
//! `ProcedureClient` or over TCP through a fake server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use crate::db::Fields;
use crate::error::DbError;
use crate::voltdb::client::{Connector, ProcedureClient};
use crate::voltdb::procedures::{UserProcedures, FIELD_COUNT};
use crate::voltdb::table::{Column, ColumnType, Value, VoltTable};
use crate::voltdb::wire::{self, ClientResponse, Param, ResponseStatus};

/// `field0="a"` through `field9="j"`.
pub fn lettered_fields() -> Fields {
    UserProcedures::V1
        .fields
        .iter()
        .zip("abcdefghij".chars())
        .map(|(f, c)| (f.to_string(), c.to_string()))
        .collect()
}

#[derive(Default)]
pub struct MemoryCluster {
    rows: Mutex<BTreeMap<String, Vec<String>>>,
    calls: Mutex<Vec<(String, Vec<Param>)>>,
    closed: AtomicUsize,
    drained: AtomicUsize,
    duplicate_selects: AtomicBool,
    failing_teardown: AtomicBool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `SelectUser` return every matching row twice.
    pub fn duplicate_selects(&self) {
        self.duplicate_selects.store(true, Ordering::SeqCst);
    }

    /// Makes `drain` and `close` report a lost connection after counting the attempt.
    pub fn fail_teardown(&self) {
        self.failing_teardown.store(true, Ordering::SeqCst);
    }

    fn teardown_result(&self) -> Result<(), DbError> {
        if self.failing_teardown.load(Ordering::SeqCst) {
            return Err(DbError::ConnectionLost);
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<(String, Vec<Param>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn drain_count(&self) -> usize {
        self.drained.load(Ordering::SeqCst)
    }

    pub fn stored(&self, key: &str) -> Option<Vec<String>> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn execute(&self, procedure: &str, params: &[Param]) -> ClientResponse {
        self.calls
            .lock()
            .unwrap()
            .push((procedure.to_string(), params.to_vec()));
        let procs = &UserProcedures::V1;
        let mut rows = self.rows.lock().unwrap();
        let result = match procedure {
            p if p == procs.insert => match row_params(params) {
                Some((key, values)) if !rows.contains_key(&key) => {
                    rows.insert(key, values);
                    Ok(modified(1))
                }
                Some(_) => Err((ResponseStatus::GracefulFailure, "constraint violation")),
                None => Err((ResponseStatus::GracefulFailure, "bad parameters")),
            },
            p if p == procs.update => match row_params(params) {
                Some((key, values)) => match rows.get_mut(&key) {
                    Some(row) => {
                        *row = values;
                        Ok(modified(1))
                    }
                    None => Ok(modified(0)),
                },
                None => Err((ResponseStatus::GracefulFailure, "bad parameters")),
            },
            p if p == procs.select => match params {
                [Param::String(key)] => {
                    let mut table = user_table();
                    if let Some(values) = rows.get(key) {
                        table.add_row(user_row(key, values)).unwrap();
                        if self.duplicate_selects.load(Ordering::SeqCst) {
                            table.add_row(user_row(key, values)).unwrap();
                        }
                    }
                    Ok(table)
                }
                _ => Err((ResponseStatus::GracefulFailure, "bad parameters")),
            },
            p if p == procs.delete => match params {
                [Param::String(key)] => Ok(modified(rows.remove(key).map_or(0, |_| 1))),
                _ => Err((ResponseStatus::GracefulFailure, "bad parameters")),
            },
            p if p == procs.scan => match params {
                [Param::String(start), Param::Integer(count)] => {
                    let mut table = user_table();
                    for (key, values) in rows.range(start.clone()..).take(*count as usize) {
                        table.add_row(user_row(key, values)).unwrap();
                    }
                    Ok(table)
                }
                _ => Err((ResponseStatus::GracefulFailure, "bad parameters")),
            },
            _ => Err((ResponseStatus::UnexpectedFailure, "procedure not found")),
        };
        match result {
            Ok(table) => ClientResponse::success(vec![table]),
            Err((status, message)) => ClientResponse {
                status,
                status_string: Some(message.to_string()),
                results: vec![],
                ..ClientResponse::success(vec![])
            },
        }
    }
}

fn row_params(params: &[Param]) -> Option<(String, Vec<String>)> {
    if params.len() != FIELD_COUNT + 1 {
        return None;
    }
    let mut strings = params.iter().map(|p| match p {
        Param::String(s) => Some(s.clone()),
        _ => None,
    });
    let key = strings.next()??;
    let values: Option<Vec<String>> = strings.collect();
    Some((key, values?))
}

fn string_column(name: &str) -> Column {
    Column {
        name: name.to_string(),
        column_type: ColumnType::String,
    }
}

fn user_table() -> VoltTable {
    let mut columns = vec![string_column("KEY")];
    columns.extend((0..FIELD_COUNT).map(|i| string_column(&format!("FIELD{}", i))));
    VoltTable::new(columns)
}

fn user_row(key: &str, values: &[String]) -> Vec<Value> {
    let mut row = vec![Value::String(key.to_string())];
    row.extend(values.iter().cloned().map(Value::String));
    row
}

fn modified(n: i64) -> VoltTable {
    let mut table = VoltTable::new(vec![Column {
        name: "modified_tuples".to_string(),
        column_type: ColumnType::BigInt,
    }]);
    table.add_row(vec![Value::BigInt(n)]).unwrap();
    table
}

#[async_trait]
impl ProcedureClient for MemoryCluster {
    async fn call_procedure(
        &self,
        procedure: &str,
        params: Vec<Param>,
    ) -> Result<ClientResponse, DbError> {
        if self.close_count() > 0 {
            return Err(DbError::Closed);
        }
        let response = self.execute(procedure, &params);
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
        self.drained.fetch_add(1, Ordering::SeqCst);
        self.teardown_result()
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.teardown_result()
    }
}

/// Hands out fresh in-memory clusters and remembers every one it built.
#[derive(Default)]
pub struct MemoryConnector {
    pub built: Mutex<Vec<Arc<MemoryCluster>>>,
    pub fail: bool,
    pub failing_teardown: bool,
}

impl MemoryConnector {
    pub fn connects(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<MemoryCluster> {
        self.built.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Connector for Arc<MemoryConnector> {
    async fn connect(&self) -> Result<Arc<dyn ProcedureClient>, DbError> {
        if self.fail {
            return Err(DbError::Connection {
                host: "localhost:21212".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let cluster = Arc::new(MemoryCluster::new());
        if self.failing_teardown {
            cluster.fail_teardown();
        }
        self.built.lock().unwrap().push(cluster.clone());
        Ok(cluster)
    }
}

/// Procedure name that makes the fake server drop the connection unanswered.
pub const HANG_UP: &str = "HangUp";

/// Serves the VoltDB protocol on a loopback port. Logins as `intruder` are
/// rejected with code 2, and a call to [`HANG_UP`] closes the connection.
pub async fn spawn_fake_server(cluster: Arc<MemoryCluster>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let cluster = cluster.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, wire::codec());
                let login = match framed.next().await {
                    Some(Ok(login)) => login,
                    _ => return,
                };
                let rejected = login.windows(8).any(|w| w == b"intruder");
                let code = if rejected { 2 } else { 0 };
                let reply = wire::server::encode_login_response(code, 0);
                if framed.send(reply).await.is_err() || rejected {
                    return;
                }
                while let Some(Ok(frame)) = framed.next().await {
                    let (name, handle, params) = wire::server::decode_invocation(frame.freeze());
                    if name == HANG_UP {
                        return;
                    }
                    let response = cluster.execute(&name, &params);
                    let out = wire::server::encode_response(handle, &response);
                    if framed.send(out).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}
