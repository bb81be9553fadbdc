//! Metrics for the animal gate controller.
//!
//! Every metric the controller emits is declared here as a const [`Metric`],
//! so names, units and label keys live in one place. The `metrics` facade is
//! re-exported; without an installed recorder all emissions are no-ops. With
//! the `prometheus` feature, [`install_prometheus`] serves them over HTTP.
//!
//! # Example
//!
//! ```rust,ignore
//! use gate_metrics::{describe_metrics, metric_defs};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::LINES_RECEIVED.name, "mode" => "hardware").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use gate_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const OPENINGS: Metric = Metric::counter("gate.openings")
///     .with_description("Times the gate opened")
///     .with_unit(Unit::Count);
///
/// assert_eq!(OPENINGS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "gate.lines.received").
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the gate controller.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Label carried by every pipeline metric: `simulated` or `hardware`.
    pub const MODE_LABELS: &[&str] = &["mode"];

    // ========================================================================
    // Protocol Pipeline
    // ========================================================================

    /// Complete lines that entered the parser.
    pub const LINES_RECEIVED: Metric = Metric::counter("gate.lines.received")
        .with_description("Lines received from the active message source")
        .with_unit(Unit::Count)
        .with_labels(MODE_LABELS);

    /// Lines that were neither a status report nor an event.
    pub const LINES_UNRECOGNIZED: Metric = Metric::counter("gate.lines.unrecognized")
        .with_description("Lines that could not be classified")
        .with_unit(Unit::Count)
        .with_labels(MODE_LABELS);

    /// Status tokens skipped because they could not be decoded.
    pub const FIELDS_MALFORMED: Metric = Metric::counter("gate.fields.malformed")
        .with_description("Status fields skipped as malformed")
        .with_unit(Unit::Count)
        .with_labels(MODE_LABELS);

    // ========================================================================
    // Gate Activity
    // ========================================================================

    /// Animal events appended to the log.
    ///
    /// Labels: mode, direction, trigger
    pub const ANIMAL_EVENTS: Metric = Metric::counter("gate.animal_events")
        .with_description("Animal passages recorded")
        .with_unit(Unit::Count)
        .with_labels(&["mode", "direction", "trigger"]);

    /// Closes issued by the auto-close timer.
    pub const AUTO_CLOSES: Metric = Metric::counter("gate.auto_closes")
        .with_description("Gate closes triggered by the auto-close timer")
        .with_unit(Unit::Count);

    /// 1 while the gate is open, 0 otherwise.
    pub const GATE_OPEN: Metric = Metric::gauge("gate.open")
        .with_description("Whether the gate is currently open");

    /// Last reported battery level.
    pub const BATTERY_LEVEL: Metric = Metric::gauge("gate.battery_level")
        .with_description("Battery level of the gate controller")
        .with_unit(Unit::Percent);

    // ========================================================================
    // Transport
    // ========================================================================

    /// Commands written to the device.
    pub const COMMANDS_SENT: Metric = Metric::counter("gate.commands.sent")
        .with_description("Commands written to the hardware transport")
        .with_unit(Unit::Count);

    /// Hardware sessions that ended in a read or write error.
    pub const TRANSPORT_FAILURES: Metric = Metric::counter("gate.transport.failures")
        .with_description("Hardware sessions terminated by a transport error")
        .with_unit(Unit::Count);

    /// All metric definitions, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &LINES_RECEIVED,
        &LINES_UNRECOGNIZED,
        &FIELDS_MALFORMED,
        &ANIMAL_EVENTS,
        &AUTO_CLOSES,
        &GATE_OPEN,
        &BATTERY_LEVEL,
        &COMMANDS_SENT,
        &TRANSPORT_FAILURES,
    ];
}

/// Describes all metrics. Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder scraping at `http://{addr}/metrics` and
/// describe every metric. Must be called inside a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::LINES_RECEIVED.name, "gate.lines.received");
        assert_eq!(metric_defs::LINES_RECEIVED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::LINES_RECEIVED.labels, &["mode"]);
        assert_eq!(metric_defs::BATTERY_LEVEL.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::BATTERY_LEVEL.unit, Some(Unit::Percent));
    }

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::gauge("minimal");

        assert_eq!(MINIMAL.name, "minimal");
        assert_eq!(MINIMAL.kind, MetricKind::Gauge);
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }

    #[test]
    fn test_describe_without_recorder_is_noop() {
        describe_metrics();
    }
}
