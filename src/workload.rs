mod core_workload;

pub use core_workload::CoreWorkload;

use crate::db::{Status, DB};
use async_trait::async_trait;
use rand::rngs::SmallRng;

#[async_trait]
pub trait Workload: Sync + Send {
    /// One load-phase insert.
    async fn do_insert(&self, db: &dyn DB, rng: &mut SmallRng) -> Status;

    /// One run-phase operation picked by the configured mix.
    async fn do_transaction(&self, db: &dyn DB, rng: &mut SmallRng) -> Status;
}
