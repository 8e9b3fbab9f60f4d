use hdrhistogram::Histogram;
use log::warn;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::db::Status;

struct OpMeasurement {
    histogram: Histogram<u64>,
    returns: BTreeMap<&'static str, u64>,
    failed: u64,
}

/// Latency histograms (microseconds) and return-code counts per operation.
#[derive(Default)]
pub struct Measurements {
    ops: Mutex<BTreeMap<&'static str, OpMeasurement>>,
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: &'static str, latency: Duration, status: Status) {
        let mut ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        let m = match ops.entry(op) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => match Histogram::new(3) {
                Ok(histogram) => e.insert(OpMeasurement {
                    histogram,
                    returns: BTreeMap::new(),
                    failed: 0,
                }),
                Err(err) => {
                    warn!("cannot create histogram for {}: {}", op, err);
                    return;
                }
            },
        };
        if let Err(err) = m.histogram.record(latency.as_micros() as u64) {
            warn!("dropping {} latency sample: {}", op, err);
        }
        *m.returns.entry(status.name()).or_insert(0) += 1;
        if status.code() != 0 {
            m.failed += 1;
        }
    }

    pub fn operations(&self) -> u64 {
        let ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        ops.values().map(|m| m.returns.values().sum::<u64>()).sum()
    }

    /// Operations whose return code was non-zero.
    pub fn failures(&self) -> u64 {
        let ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        ops.values().map(|m| m.failed).sum()
    }

    #[cfg(test)]
    pub fn count(&self, op: &str, status: Status) -> u64 {
        let ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        ops.get(op)
            .and_then(|m| m.returns.get(status.name()).copied())
            .unwrap_or(0)
    }

    /// YCSB-style summary, one `[OP], Metric, value` line per entry.
    pub fn report(&self) -> String {
        let ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for (op, m) in ops.iter() {
            let h = &m.histogram;
            let _ = writeln!(out, "[{}], Operations, {}", op, h.len());
            let _ = writeln!(out, "[{}], AverageLatency(us), {:.2}", op, h.mean());
            let _ = writeln!(out, "[{}], MinLatency(us), {}", op, h.min());
            let _ = writeln!(out, "[{}], MaxLatency(us), {}", op, h.max());
            let _ = writeln!(
                out,
                "[{}], 95thPercentileLatency(us), {}",
                op,
                h.value_at_quantile(0.95)
            );
            let _ = writeln!(
                out,
                "[{}], 99thPercentileLatency(us), {}",
                op,
                h.value_at_quantile(0.99)
            );
            for (status, count) in &m.returns {
                let _ = writeln!(out, "[{}], Return={}, {}", op, status, count);
            }
        }
        out
    }
}
