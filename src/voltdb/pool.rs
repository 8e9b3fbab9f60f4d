use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::voltdb::client::{Connector, ProcedureClient};

/// One cluster client shared by every adapter built from the same backend.
///
/// The client is created lazily by the first `acquire` and torn down
/// (drained, then closed) by the `release` that brings the count to zero.
pub struct SharedConnection {
    connector: Box<dyn Connector>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    client: Option<Arc<dyn ProcedureClient>>,
    refs: usize,
}

impl SharedConnection {
    pub fn new(connector: impl Connector + 'static) -> Self {
        SharedConnection {
            connector: Box::new(connector),
            state: Mutex::new(State::default()),
        }
    }

    /// Failed connection attempts are not counted.
    pub async fn acquire(&self) -> Result<Arc<dyn ProcedureClient>, DbError> {
        let mut state = self.state.lock().await;
        let client = match &state.client {
            Some(client) => client.clone(),
            None => {
                let client = self.connector.connect().await.map_err(|e| {
                    error!("failed to open cluster connection: {}", e);
                    e
                })?;
                info!("opened shared cluster connection");
                state.client = Some(client.clone());
                client
            }
        };
        state.refs += 1;
        Ok(client)
    }

    /// Drain and close failures are logged, never returned.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.refs = state.refs.saturating_sub(1);
        if state.refs > 0 {
            return;
        }
        if let Some(client) = state.client.take() {
            if let Err(e) = client.drain().await {
                warn!("drain before close failed: {}", e);
            }
            if let Err(e) = client.close().await {
                warn!("closing cluster connection failed: {}", e);
                return;
            }
            info!("closed shared cluster connection");
        }
    }

    #[cfg(test)]
    pub async fn ref_count(&self) -> usize {
        self.state.lock().await.refs
    }

    #[cfg(test)]
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.client.is_some()
    }
}
