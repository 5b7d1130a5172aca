use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use swarm_core::simulation::TickOutcome;

/// Prometheus collectors for the simulator.
///
/// Shared behind an `Arc` between the scheduler, the transport tasks and the
/// HTTP endpoint.
pub struct Metrics {
    pub registry: Registry,
    pub ticks_total: IntCounter,
    /// Detection reports handed to the transport.
    pub reports_emitted_total: IntCounter,
    /// State snapshots actually written to the operator.
    pub snapshots_sent_total: IntCounter,
    pub commands_applied_total: IntCounter,
    /// Commands that decoded fine but had no effect on the simulation.
    pub commands_ignored_total: IntCounter,
    /// Inbound lines discarded because they failed to decode.
    pub protocol_errors_total: IntCounter,
    pub partition_recomputes_total: IntCounterVec,
    pub drones_active: IntGauge,
    pub regions_explored: IntGauge,
    pub tick_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("swarm_sim".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            ticks_total: reg!(IntCounter::new(
                "ticks_total",
                "Total number of simulation ticks executed"
            )?),
            reports_emitted_total: reg!(IntCounter::new(
                "reports_emitted_total",
                "Total number of POI detection reports emitted"
            )?),
            snapshots_sent_total: reg!(IntCounter::new(
                "snapshots_sent_total",
                "Total number of state snapshots written to the operator"
            )?),
            commands_applied_total: reg!(IntCounter::new(
                "commands_applied_total",
                "Total number of operator commands that changed the simulation"
            )?),
            commands_ignored_total: reg!(IntCounter::new(
                "commands_ignored_total",
                "Total number of operator commands that had no effect"
            )?),
            protocol_errors_total: reg!(IntCounter::new(
                "protocol_errors_total",
                "Total number of malformed inbound lines discarded"
            )?),
            partition_recomputes_total: reg!(IntCounterVec::new(
                Opts::new(
                    "partition_recomputes_total",
                    "Total number of region partition recomputes by method"
                ),
                &["method"]
            )?),
            drones_active: reg!(IntGauge::new(
                "drones_active",
                "Number of drones currently exploring with power left"
            )?),
            regions_explored: reg!(IntGauge::new(
                "regions_explored",
                "Number of regions explored in the current coverage pass"
            )?),
            tick_duration_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new(
                    "tick_duration_seconds",
                    "Wall time spent computing a single tick"
                )
                .buckets(vec![0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025])
            )?),
            registry,
        })
    }

    /// Folds the counters of one tick in.
    pub fn record_tick(&self, outcome: &TickOutcome, reports: usize) {
        self.ticks_total.inc();
        self.reports_emitted_total.inc_by(reports as u64);
        self.commands_applied_total.inc_by(outcome.commands_applied as u64);
        self.commands_ignored_total.inc_by(outcome.commands_ignored as u64);
        if let Some(method) = outcome.recomputed {
            self.partition_recomputes_total
                .with_label_values(&[method.as_str()])
                .inc();
        }
    }

    pub fn update_population(&self, active: usize, explored: usize) {
        self.drones_active.set(active as i64);
        self.regions_explored.set(explored as i64);
    }

    /// Creates an `axum::Router` that serves the metrics on the `/metrics` endpoint.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    let encoder = TextEncoder::new();
                    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                        tracing::error!(error = %e, "Failed to encode metrics");
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    match String::from_utf8(buffer) {
                        Ok(body) => body.into_response(),
                        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                    }
                }
            }),
        )
    }
}
