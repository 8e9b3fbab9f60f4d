use crate::error::DbError;
use crate::properties::Properties;
use crate::voltdb::{SharedConnection, VoltConnector, VoltDb, FIELD_COUNT};

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Field name to value, used both for operation input and output.
pub type Fields = HashMap<String, String>;

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Outcome of a single operation as reported to the harness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    NotFound,
    BadRequest,
    ServiceUnavailable,
}

impl Status {
    pub fn of<T>(result: &DbResult<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    /// Zero on success, one on any failure.
    pub fn code(&self) -> i32 {
        match self {
            Status::Ok => 0,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::BadRequest => "BAD_REQUEST",
            Status::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait DB: Send + Sync {
    async fn init(&mut self) -> DbResult<()>;
    async fn cleanup(&mut self) -> DbResult<()>;
    async fn insert(&self, table: &str, key: &str, values: &Fields) -> DbResult<()>;
    async fn update(&self, table: &str, key: &str, values: &Fields) -> DbResult<()>;
    async fn read(&self, table: &str, key: &str, result: &mut Fields) -> DbResult<()>;
    async fn delete(&self, table: &str, key: &str) -> DbResult<()>;
    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
        result: &mut Vec<Fields>,
    ) -> DbResult<()>;
}

/// Process-wide state behind a database name; hands out one `DB` per worker.
pub enum Backend {
    VoltDb(Arc<SharedConnection>),
}

impl Backend {
    pub fn from_name(db: &str, props: &Properties) -> Result<Backend> {
        match db {
            "voltdb" => {
                if props.field_count != FIELD_COUNT as u64 {
                    bail!(
                        "voltdb stores exactly {} fields per record, fieldcount is {}",
                        FIELD_COUNT,
                        props.field_count
                    );
                }
                let connector = VoltConnector::new(props.voltdb.client_config()?);
                Ok(Backend::VoltDb(Arc::new(SharedConnection::new(connector))))
            }
            db => Err(anyhow!("{} is an invalid database name", db)),
        }
    }

    pub fn create_db(&self) -> Box<dyn DB> {
        match self {
            Backend::VoltDb(shared) => Box::new(VoltDb::new(shared.clone())),
        }
    }
}
