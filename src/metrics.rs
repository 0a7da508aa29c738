//! Prometheus metrics for migration runs
//!
//! All metrics live in one crate-wide [`METRICS`] registry. Callers expose them however they
//! like; [`render`] produces the text exposition format.

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub static METRICS: Lazy<TidemarkMetrics> = Lazy::new(TidemarkMetrics::init);

pub struct TidemarkMetrics {
    pub registry: Registry,
    /// Migrations executed, by `direction` and `outcome`
    pub migrations_total: IntCounterVec,
    /// Wall time of each migration step, body and bookkeeping included
    pub step_duration: Histogram,
    pub checksum_mismatches: IntCounter,
}

impl TidemarkMetrics {
    pub fn init() -> Self {
        let registry = Registry::new_custom(Some("tidemark".to_string()), None)
            .expect("failed to build prometheus registry");

        let migrations_total = IntCounterVec::new(
            Opts::new("migrations_total", "Migrations executed"),
            &["direction", "outcome"],
        )
        .expect("valid migrations_total metric");

        let step_duration = Histogram::with_opts(HistogramOpts::new(
            "migration_step_duration_seconds",
            "Duration of migration steps",
        ))
        .expect("valid migration_step_duration_seconds metric");

        let checksum_mismatches = IntCounter::new(
            "checksum_mismatches_total",
            "Applied migrations found modified after being applied",
        )
        .expect("valid checksum_mismatches_total metric");

        registry
            .register(Box::new(migrations_total.clone()))
            .expect("register migrations_total");
        registry
            .register(Box::new(step_duration.clone()))
            .expect("register migration_step_duration_seconds");
        registry
            .register(Box::new(checksum_mismatches.clone()))
            .expect("register checksum_mismatches_total");

        Self {
            registry,
            migrations_total,
            step_duration,
            checksum_mismatches,
        }
    }

    pub fn record_step(&self, direction: &str, outcome: &str, elapsed: Duration) {
        self.migrations_total
            .with_label_values(&[direction, outcome])
            .inc();
        self.step_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_checksum_mismatch(&self) {
        self.checksum_mismatches.inc();
    }
}

/// Render every metric in the Prometheus text format
///
/// # Errors
///
/// Returns the encoder error.
pub fn render() -> Result<String, prometheus::Error> {
    TextEncoder::new().encode_to_string(&METRICS.registry.gather())
}
