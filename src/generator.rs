use rand::rngs::SmallRng;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Generator<T>: Send + Sync {
    fn next_value(&self, rng: &mut SmallRng) -> T;
}

/// Shared monotonically increasing sequence.
pub struct Counter {
    counter: AtomicU64,
}

impl Counter {
    pub fn new(start: u64) -> Self {
        Counter {
            counter: AtomicU64::new(start),
        }
    }

    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Generator<u64> for Counter {
    fn next_value(&self, _: &mut SmallRng) -> u64 {
        self.next()
    }
}

/// Uniform over the inclusive range `[lower, upper]`.
pub struct Uniform {
    lower: u64,
    upper: u64,
}

impl Uniform {
    pub fn new(lower: u64, upper: u64) -> Self {
        Uniform {
            lower: lower.min(upper),
            upper: lower.max(upper),
        }
    }
}

impl Generator<u64> for Uniform {
    fn next_value(&self, rng: &mut SmallRng) -> u64 {
        rng.gen_range(self.lower..=self.upper)
    }
}

const ZIPFIAN_CONSTANT: f64 = 0.99;

/// Zipfian over `[base, base + items)`; small values are the popular ones.
pub struct Zipfian {
    items: u64,
    base: u64,
    alpha: f64,
    zetan: f64,
    eta: f64,
    theta: f64,
}

impl Zipfian {
    pub fn new_from_count(items: u64) -> Zipfian {
        Self::new(0, items.max(1), ZIPFIAN_CONSTANT)
    }

    pub fn new(base: u64, items: u64, theta: f64) -> Zipfian {
        let zetan = Self::zeta(items, theta);
        let zeta2theta = Self::zeta(2, theta);
        let eta = if items > 2 {
            (1.0 - (2.0 / items as f64).powf(1.0 - theta)) / (1.0 - zeta2theta / zetan)
        } else {
            0.0
        };
        Zipfian {
            items,
            base,
            alpha: 1.0 / (1.0 - theta),
            zetan,
            eta,
            theta,
        }
    }

    fn zeta(n: u64, theta: f64) -> f64 {
        (0..n).map(|i| 1.0 / ((i + 1) as f64).powf(theta)).sum()
    }
}

impl Generator<u64> for Zipfian {
    fn next_value(&self, rng: &mut SmallRng) -> u64 {
        let u: f64 = rng.gen();
        let uz = u * self.zetan;
        if uz < 1.0 || self.items < 2 {
            return self.base;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return self.base + 1;
        }
        let offset = ((self.items as f64) * (self.eta * u - self.eta + 1.0).powf(self.alpha)) as u64;
        self.base + offset.min(self.items - 1)
    }
}

/// Picks one of several values with the given relative weights.
pub struct Discrete<T> {
    values: Vec<(f64, T)>,
    total: f64,
}

impl<T: Clone + Send + Sync> Discrete<T> {
    /// Zero and negative weights are dropped.
    pub fn new(weighted: Vec<(f64, T)>) -> Self {
        let values: Vec<(f64, T)> = weighted.into_iter().filter(|(w, _)| *w > 0.0).collect();
        let total = values.iter().map(|(w, _)| w).sum();
        Discrete { values, total }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Clone + Send + Sync> Generator<Option<T>> for Discrete<T> {
    fn next_value(&self, rng: &mut SmallRng) -> Option<T> {
        let mut pick = rng.gen::<f64>() * self.total;
        for (weight, value) in &self.values {
            if pick < *weight {
                return Some(value.clone());
            }
            pick -= weight;
        }
        self.values.last().map(|(_, v)| v.clone())
    }
}
