//! Metric declarations for the modem session.
//!
//! Every metric is declared once as a [`Metric`] constant; call
//! [`describe_metrics`] at startup to register descriptions with the
//! installed recorder. Without a recorder the macros are no-ops.

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing counter.
    Counter,
    /// Distribution of observed values.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name.
    pub name: &'static str,
    /// Counter or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: Unit::Count,
            labels: &[],
        }
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: Unit::Seconds,
            labels: &[],
        }
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Set the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metrics emitted by this crate.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Command session
    // ========================================================================

    /// Commands written to the modem.
    pub const COMMANDS_SENT: Metric = Metric::counter("sim800.command.sent")
        .with_description("AT commands written to the modem");

    /// Command outcomes, labelled `ok`, `error` or `timeout`.
    pub const COMMAND_OUTCOMES: Metric = Metric::counter("sim800.command.outcomes")
        .with_description("Command outcomes by class")
        .with_labels(&["outcome"]);

    /// Time from write to terminator or timeout.
    pub const COMMAND_LATENCY: Metric = Metric::histogram("sim800.command.latency")
        .with_description("Command round trip time")
        .with_unit(Unit::Seconds);

    /// Unsolicited result codes seen on the link.
    pub const URCS_RECEIVED: Metric = Metric::counter("sim800.urc.received")
        .with_description("Unsolicited result codes received");

    // ========================================================================
    // Chains
    // ========================================================================

    /// Chains started, labelled with the chain name.
    pub const CHAINS_STARTED: Metric = Metric::counter("sim800.chain.started")
        .with_description("Command chains started")
        .with_labels(&["chain"]);

    /// Chains that ended with an error, labelled with the chain name.
    pub const CHAIN_ABORTS: Metric = Metric::counter("sim800.chain.aborts")
        .with_description("Command chains aborted or cancelled")
        .with_labels(&["chain"]);

    /// Step retries.
    pub const STEP_RETRIES: Metric = Metric::counter("sim800.chain.step_retries")
        .with_description("Chain steps re-executed after a failure");

    /// Cleanup commands that failed.
    pub const CLEANUP_FAILURES: Metric = Metric::counter("sim800.chain.cleanup_failures")
        .with_description("Cleanup commands that did not succeed");

    // ========================================================================
    // Boot
    // ========================================================================

    /// Boot attempts, labelled `ready` or `failed`.
    pub const BOOT_ATTEMPTS: Metric = Metric::counter("sim800.boot.attempts")
        .with_description("Boot sequences run")
        .with_labels(&["result"]);

    /// All metric definitions.
    pub const ALL: &[Metric] = &[
        COMMANDS_SENT,
        COMMAND_OUTCOMES,
        COMMAND_LATENCY,
        URCS_RECEIVED,
        CHAINS_STARTED,
        CHAIN_ABORTS,
        STEP_RETRIES,
        CLEANUP_FAILURES,
        BOOT_ATTEMPTS,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::metric_defs::*;
    use super::*;

    #[test]
    fn test_metric_names_are_unique() {
        let mut names: Vec<_> = ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_labelled_metrics() {
        assert_eq!(COMMAND_OUTCOMES.labels, &["outcome"]);
        assert_eq!(COMMAND_LATENCY.kind, MetricKind::Histogram);
        // No recorder installed: describing is a no-op.
        describe_metrics();
    }
}
