//! VoltDB binding: maps the harness operations onto the user stored procedures.

mod client;
mod limiter;
mod pool;
mod procedures;
mod table;
mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    ClientConfig, Connector, ProcedureClient, VoltClient, VoltConnector, DEFAULT_PORT,
};
pub use pool::SharedConnection;
pub use procedures::{UserProcedures, FIELD_COUNT};
pub use table::{Row, VoltTable};
pub use wire::{ClientResponse, Param, ResponseStatus};

use async_trait::async_trait;
use log::{debug, trace, warn};
use std::sync::Arc;

use crate::db::{DbResult, Fields, DB};
use crate::error::DbError;

pub struct VoltDb {
    shared: Arc<SharedConnection>,
    client: Option<Arc<dyn ProcedureClient>>,
    procedures: &'static UserProcedures,
}

impl VoltDb {
    pub fn new(shared: Arc<SharedConnection>) -> Self {
        VoltDb {
            shared,
            client: None,
            procedures: &UserProcedures::V1,
        }
    }

    fn client(&self) -> DbResult<&Arc<dyn ProcedureClient>> {
        self.client.as_ref().ok_or(DbError::NotConnected)
    }

    /// Fields of a row keyed by lower-cased column name, without the key column.
    fn row_fields(&self, row: Row<'_>) -> Fields {
        row.iter()
            .filter(|(name, _)| !self.procedures.is_key_column(name))
            .filter_map(|(name, value)| value.as_string().map(|v| (name.to_ascii_lowercase(), v)))
            .collect()
    }

    async fn select(&self, key: &str) -> DbResult<ClientResponse> {
        let procs = self.procedures;
        self.client()?
            .call_procedure(procs.select, procs.key_args(key))
            .await
    }

    async fn do_insert(&self, key: &str, values: &Fields) -> DbResult<()> {
        let procs = self.procedures;
        let args = procs.insert_args(key, values)?;
        self.client()?.call_procedure(procs.insert, args).await?;
        Ok(())
    }

    async fn do_delete(&self, key: &str) -> DbResult<()> {
        let procs = self.procedures;
        self.client()?
            .call_procedure(procs.delete, procs.key_args(key))
            .await?;
        Ok(())
    }

    async fn do_read(&self, key: &str, result: &mut Fields) -> DbResult<()> {
        let response = self.select(key).await?;
        let table = response.first_result(self.procedures.select)?;
        result.clear();
        match table.row_count() {
            1 => {}
            0 => {
                return Err(DbError::NotFound {
                    key: key.to_string(),
                })
            }
            rows => {
                return Err(DbError::UnexpectedRowCount {
                    procedure: self.procedures.select.to_string(),
                    rows,
                })
            }
        }
        if let Some(row) = table.row(0) {
            result.extend(self.row_fields(row));
        }
        Ok(())
    }

    async fn do_update(&self, key: &str, values: &Fields) -> DbResult<()> {
        let procs = self.procedures;
        let mut merged = values.clone();
        let response = self.select(key).await?;
        let table = response.first_result(procs.select)?;
        let current = if table.row_count() == 1 { table.row(0) } else { None };
        match current {
            Some(row) => {
                for field in procs.fields {
                    if merged.contains_key(field) {
                        continue;
                    }
                    if let Some(stored) = row.get_string_by_name(field) {
                        merged.insert(field.to_string(), stored);
                    }
                }
            }
            None => {
                if procs.fields.iter().any(|f| !merged.contains_key(*f)) {
                    return Err(DbError::NotFound {
                        key: key.to_string(),
                    });
                }
            }
        }
        let args = procs.update_args(key, &merged)?;
        self.client()?.call_procedure(procs.update, args).await?;
        Ok(())
    }

    async fn do_scan(&self, start_key: &str, count: usize, result: &mut Vec<Fields>) -> DbResult<()> {
        let procs = self.procedures;
        let response = self
            .client()?
            .call_procedure(procs.scan, procs.scan_args(start_key, count))
            .await?;
        let table = response.first_result(procs.scan)?;
        debug!("scan from {} returned {} rows", start_key, table.row_count());
        result.clear();
        result.extend(table.rows().map(|row| self.row_fields(row)));
        Ok(())
    }
}

fn log_outcome(op: &str, key: &str, result: &DbResult<()>) {
    match result {
        Ok(()) => {}
        Err(e @ DbError::NotFound { .. }) => debug!("{} {}: {}", op, key, e),
        Err(e) => warn!("{} {} failed: {}", op, key, e),
    }
}

#[async_trait]
impl DB for VoltDb {
    async fn init(&mut self) -> DbResult<()> {
        if self.client.is_none() {
            self.client = Some(self.shared.acquire().await?);
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> DbResult<()> {
        if self.client.take().is_some() {
            self.shared.release().await;
        }
        Ok(())
    }

    async fn insert(&self, table: &str, key: &str, values: &Fields) -> DbResult<()> {
        trace!("insert into {} key {}", table, key);
        let result = self.do_insert(key, values).await;
        log_outcome("insert", key, &result);
        result
    }

    async fn update(&self, table: &str, key: &str, values: &Fields) -> DbResult<()> {
        trace!("update {} key {}", table, key);
        let result = self.do_update(key, values).await;
        log_outcome("update", key, &result);
        result
    }

    async fn read(&self, table: &str, key: &str, result: &mut Fields) -> DbResult<()> {
        trace!("read {} key {}", table, key);
        let outcome = self.do_read(key, result).await;
        log_outcome("read", key, &outcome);
        outcome
    }

    async fn delete(&self, table: &str, key: &str) -> DbResult<()> {
        trace!("delete from {} key {}", table, key);
        let result = self.do_delete(key).await;
        log_outcome("delete", key, &result);
        result
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
        result: &mut Vec<Fields>,
    ) -> DbResult<()> {
        trace!("scan {} from {} count {}", table, start_key, count);
        let outcome = self.do_scan(start_key, count, result).await;
        log_outcome("scan", start_key, &outcome);
        outcome
    }
}
