//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the credit ledger.
//!
//! # Metrics
//!
//! - `credit_packs_created_total` - Packs created
//! - `credit_positions_shifted_total` - Packs moved up to make room for inserts
//! - `credit_consume_requests_total` - Persisted consumption requests
//! - `credit_units_consumed_total` - Units drawn from packs
//! - `credit_units_unmet_total` - Units requested that no pack could cover
//! - `credit_guard_rejections_total` - Guarded executions stopped by a guard
//! - `credit_effects_applied_total` - Guarded executions that ran their effect
//! - `credit_command_duration_seconds` - Time spent on the writer per command

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Packs created
    pub packs_created: IntCounter,

    /// Positions shifted by inserts
    pub positions_shifted: IntCounter,

    /// Persisted consumption requests
    pub consume_requests: IntCounter,

    /// Units drawn
    pub units_consumed: IntCounter,

    /// Units left unmet
    pub units_unmet: IntCounter,

    /// Guard rejections
    pub guard_rejections: IntCounter,

    /// Effects applied
    pub effects_applied: IntCounter,

    /// Writer command latency
    pub command_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let packs_created = counter("credit_packs_created_total", "Packs created")?;
        let positions_shifted = counter(
            "credit_positions_shifted_total",
            "Packs moved up to make room for inserts",
        )?;
        let consume_requests = counter(
            "credit_consume_requests_total",
            "Persisted consumption requests",
        )?;
        let units_consumed = counter("credit_units_consumed_total", "Units drawn from packs")?;
        let units_unmet = counter(
            "credit_units_unmet_total",
            "Units requested that no pack could cover",
        )?;
        let guard_rejections = counter(
            "credit_guard_rejections_total",
            "Guarded executions stopped by a guard",
        )?;
        let effects_applied = counter(
            "credit_effects_applied_total",
            "Guarded executions that ran their effect",
        )?;

        let command_duration = Histogram::with_opts(
            HistogramOpts::new(
                "credit_command_duration_seconds",
                "Time spent on the writer per command",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        Ok(Self {
            packs_created,
            positions_shifted,
            consume_requests,
            units_consumed,
            units_unmet,
            guard_rejections,
            effects_applied,
            command_duration,
            registry,
        })
    }

    /// Record pack creation
    pub fn record_pack_created(&self, shifted: usize) {
        self.packs_created.inc();
        self.positions_shifted.inc_by(shifted as u64);
    }

    /// Record a persisted consumption
    pub fn record_consumption(&self, consumed: u64, unmet: u64) {
        self.consume_requests.inc();
        self.units_consumed.inc_by(consumed);
        self.units_unmet.inc_by(unmet);
    }

    /// Record guard rejection
    pub fn record_guard_rejection(&self) {
        self.guard_rejections.inc();
    }

    /// Record effect application
    pub fn record_effect_applied(&self) {
        self.effects_applied.inc();
    }

    /// Record command duration
    pub fn record_command_duration(&self, duration_seconds: f64) {
        self.command_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
