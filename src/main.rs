use crate::db::{Backend, DB};
use crate::measurement::Measurements;
use crate::voltdb::UserProcedures;
use crate::workload::Workload;
use anyhow::{anyhow, bail, Result};
use log::{error, info};
use properties::Properties;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use workload::CoreWorkload;

pub mod db;
pub mod error;
pub mod generator;
pub mod measurement;
pub mod properties;
pub mod voltdb;
pub mod workload;

#[derive(StructOpt, Debug)]
#[structopt(name = "ycsb-voltdb")]
struct Opt {
    /// load, run, or ddl
    #[structopt(name = "COMMANDS")]
    commands: Vec<String>,
    #[structopt(short, long, default_value = "voltdb")]
    database: String,
    /// TOML workload file
    #[structopt(short, long)]
    workload: Option<String>,
    #[structopt(short, long, default_value = "1")]
    threads: usize,
    /// key=value override, may be repeated
    #[structopt(short = "p", long = "property")]
    properties: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Load,
    Run,
}

/// Splits `total` across `threads` workers, spreading the remainder over the first ones.
fn share(total: u64, threads: usize, index: usize) -> u64 {
    let threads = threads as u64;
    let index = index as u64;
    total / threads + u64::from(index < total % threads)
}

async fn load(wl: &CoreWorkload, db: &dyn DB, operation_count: u64, rng: &mut SmallRng) {
    for _ in 0..operation_count {
        wl.do_insert(db, rng).await;
    }
}

async fn run(wl: &CoreWorkload, db: &dyn DB, operation_count: u64, rng: &mut SmallRng) {
    for _ in 0..operation_count {
        wl.do_transaction(db, rng).await;
    }
}

async fn execute(
    phase: Phase,
    props: &Properties,
    backend: Arc<Backend>,
    threads: usize,
) -> Result<()> {
    let measurements = Arc::new(Measurements::new());
    let wl = Arc::new(CoreWorkload::new(props, measurements.clone())?);
    let total = match phase {
        Phase::Load => props.record_count,
        Phase::Run => props.operation_count,
    };
    info!("{:?} phase: {} operations on {} threads", phase, total, threads);

    let start = Instant::now();
    let mut tasks = vec![];
    for index in 0..threads {
        let backend = backend.clone();
        let wl = wl.clone();
        let count = share(total, threads, index);
        tasks.push(tokio::spawn(async move {
            let mut db = backend.create_db();
            db.init().await?;
            let mut rng = SmallRng::from_entropy();
            match phase {
                Phase::Load => load(&wl, db.as_ref(), count, &mut rng).await,
                Phase::Run => run(&wl, db.as_ref(), count, &mut rng).await,
            }
            db.cleanup().await?;
            Ok::<(), error::DbError>(())
        }));
    }

    let mut failed = 0;
    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("worker failed: {}", e);
                failed += 1;
            }
            Err(e) => {
                error!("worker panicked: {}", e);
                failed += 1;
            }
        }
    }
    let runtime = start.elapsed().as_millis();

    println!("[OVERALL], ThreadCount, {}", threads);
    println!("[OVERALL], RunTime(ms), {}", runtime);
    let throughput = measurements.operations() as f64 / (runtime.max(1) as f64 / 1000.0);
    println!("[OVERALL], Throughput(ops/sec), {}", throughput);
    println!("[OVERALL], Failures, {}", measurements.failures());
    print!("{}", measurements.report());

    if failed > 0 {
        bail!("{} of {} workers failed", failed, threads);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::from_args();

    if opt.commands.is_empty() {
        bail!("no command specified");
    }
    if opt.threads == 0 {
        bail!("thread count must be positive");
    }

    let props = Properties::load(opt.workload.as_deref(), &opt.properties)?;
    let backend = Arc::new(Backend::from_name(&opt.database, &props)?);

    for cmd in &opt.commands {
        match &cmd[..] {
            "load" => execute(Phase::Load, &props, backend.clone(), opt.threads).await?,
            "run" => execute(Phase::Run, &props, backend.clone(), opt.threads).await?,
            "ddl" => print!("{}", UserProcedures::V1.ddl()),
            cmd => return Err(anyhow!("invalid command: {}", cmd)),
        }
    }

    Ok(())
}
