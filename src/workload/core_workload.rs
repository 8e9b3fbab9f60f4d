use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Instant;

use crate::db::{Fields, Status, DB};
use crate::generator::{Counter, Discrete, Generator, Uniform, Zipfian};
use crate::measurement::Measurements;
use crate::properties::Properties;
use crate::workload::Workload;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Read,
    Update,
    Insert,
    Scan,
    Delete,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Read => "READ",
            Operation::Update => "UPDATE",
            Operation::Insert => "INSERT",
            Operation::Scan => "SCAN",
            Operation::Delete => "DELETE",
        }
    }
}

pub struct CoreWorkload {
    table: String,
    field_names: Vec<String>,
    field_length: usize,
    zero_padding: usize,
    ordered_inserts: bool,
    key_sequence: Counter,
    transaction_insert_sequence: Counter,
    key_chooser: Box<dyn Generator<u64>>,
    scan_length: Uniform,
    operations: Discrete<Operation>,
    measurements: Arc<Measurements>,
}

impl CoreWorkload {
    pub fn new(props: &Properties, measurements: Arc<Measurements>) -> Result<Self> {
        if props.record_count == 0 {
            bail!("recordcount must be positive");
        }
        let key_chooser: Box<dyn Generator<u64>> = match &props.request_distribution[..] {
            "uniform" => Box::new(Uniform::new(0, props.record_count - 1)),
            "zipfian" => Box::new(Zipfian::new_from_count(props.record_count)),
            other => bail!("invalid requestdistribution: {}", other),
        };
        let ordered_inserts = match &props.insert_order[..] {
            "ordered" => true,
            "hashed" => false,
            other => bail!("invalid insertorder: {}", other),
        };
        let field_names = (0..props.field_count)
            .map(|i| format!("field{}", i))
            .collect();
        let operations = Discrete::new(vec![
            (props.read_proportion, Operation::Read),
            (props.update_proportion, Operation::Update),
            (props.insert_proportion, Operation::Insert),
            (props.scan_proportion, Operation::Scan),
            (props.delete_proportion, Operation::Delete),
        ]);
        if operations.is_empty() {
            bail!("no operation has a positive proportion");
        }
        Ok(CoreWorkload {
            table: props.table.clone(),
            field_names,
            field_length: props.field_length as usize,
            zero_padding: props.zero_padding,
            ordered_inserts,
            key_sequence: Counter::new(0),
            transaction_insert_sequence: Counter::new(props.record_count),
            key_chooser,
            scan_length: Uniform::new(1, props.max_scan_length),
            operations,
            measurements,
        })
    }

    fn build_key(&self, n: u64) -> String {
        let keynum = if self.ordered_inserts {
            n
        } else {
            let mut hasher = DefaultHasher::new();
            hasher.write_u64(n);
            hasher.finish()
        }
        .to_string();
        let mut key = String::from("user");
        for _ in keynum.len()..self.zero_padding {
            key.push('0');
        }
        key.push_str(&keynum);
        key
    }

    fn random_value(&self, rng: &mut SmallRng) -> String {
        (0..self.field_length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }

    fn build_values(&self, rng: &mut SmallRng) -> Fields {
        self.field_names
            .iter()
            .map(|name| (name.clone(), self.random_value(rng)))
            .collect()
    }

    /// A single random field, leaving the rest to be kept by the binding.
    fn build_update(&self, rng: &mut SmallRng) -> Fields {
        let mut values = Fields::new();
        if !self.field_names.is_empty() {
            let idx = rng.gen_range(0..self.field_names.len());
            values.insert(self.field_names[idx].clone(), self.random_value(rng));
        }
        values
    }

    fn next_key(&self, rng: &mut SmallRng) -> String {
        let n = self.key_chooser.next_value(rng);
        self.build_key(n)
    }
}

#[async_trait]
impl Workload for CoreWorkload {
    async fn do_insert(&self, db: &dyn DB, rng: &mut SmallRng) -> Status {
        let key = self.build_key(self.key_sequence.next());
        let values = self.build_values(rng);
        let start = Instant::now();
        let status = Status::of(&db.insert(&self.table, &key, &values).await);
        self.measurements
            .record(Operation::Insert.name(), start.elapsed(), status);
        status
    }

    async fn do_transaction(&self, db: &dyn DB, rng: &mut SmallRng) -> Status {
        let op = match self.operations.next_value(rng) {
            Some(op) => op,
            None => return Status::BadRequest,
        };
        let start = Instant::now();
        let status = match op {
            Operation::Read => {
                let key = self.next_key(rng);
                let mut result = Fields::new();
                Status::of(&db.read(&self.table, &key, &mut result).await)
            }
            Operation::Update => {
                let key = self.next_key(rng);
                let values = self.build_update(rng);
                Status::of(&db.update(&self.table, &key, &values).await)
            }
            Operation::Insert => {
                let key = self.build_key(self.transaction_insert_sequence.next());
                let values = self.build_values(rng);
                Status::of(&db.insert(&self.table, &key, &values).await)
            }
            Operation::Scan => {
                let key = self.next_key(rng);
                let len = self.scan_length.next_value(rng) as usize;
                let mut result = Vec::new();
                Status::of(&db.scan(&self.table, &key, len, &mut result).await)
            }
            Operation::Delete => {
                let key = self.next_key(rng);
                Status::of(&db.delete(&self.table, &key).await)
            }
        };
        self.measurements.record(op.name(), start.elapsed(), status);
        status
    }
}
