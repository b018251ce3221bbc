//! Atomic counters and gauges with Prometheus exposition.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Instrument {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Instrument {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, kind: &str, out: &mut String) {
        let _ = write!(
            out,
            "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n",
            name = self.name,
            help = self.help,
            kind = kind,
            value = self.get()
        );
    }
}

/// A monotonically increasing count of balancer events.
#[derive(Debug)]
pub struct Counter(Instrument);

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self(Instrument::new(name, help))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Append this counter in exposition format.
    pub fn render(&self, out: &mut String) {
        self.0.render("counter", out);
    }
}

/// The last value sampled at the start of a round.
#[derive(Debug)]
pub struct Gauge(Instrument);

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self(Instrument::new(name, help))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn set(&self, value: u64) {
        self.0.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Append this gauge in exposition format.
    pub fn render(&self, out: &mut String) {
        self.0.render("gauge", out);
    }
}
