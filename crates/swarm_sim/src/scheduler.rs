use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use crate::transport::OperatorQueues;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use swarm_core::protocol::{Command, Outbound, ReportEvent, StateSnapshot};
use swarm_core::{Simulation, TickOutcome};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// The scheduler's ends of the queues shared with the transport.
pub struct SimQueues {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub reports: mpsc::UnboundedSender<ReportEvent>,
    pub snapshots: watch::Sender<Option<StateSnapshot>>,
}

/// Creates the inbound command queue, the report queue and the snapshot slot.
pub fn queues() -> (SimQueues, OperatorQueues) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    (
        SimQueues {
            commands: command_rx,
            reports: report_tx,
            snapshots: snapshot_tx,
        },
        OperatorQueues {
            commands: command_tx,
            reports: report_rx,
            snapshots: snapshot_rx,
        },
    )
}

/// Drives the simulation at its fixed tick until shutdown.
pub async fn run(mut sim: Simulation, mut queues: SimQueues, metrics: Arc<Metrics>, shutdown: Shutdown) {
    let mut interval = tokio::time::interval(sim.config().tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(tick_ms = sim.config().tick.as_millis() as u64, "Starting simulation loop...");
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => {}
        }
        if shutdown.is_triggered() {
            break;
        }
        tick_once(&mut sim, &mut queues, &metrics);
    }
    tracing::info!(tick = sim.tick(), "Simulation loop stopped");
}

/// Drains pending commands, advances one tick and routes what it produced.
pub fn tick_once(sim: &mut Simulation, queues: &mut SimQueues, metrics: &Metrics) -> TickOutcome {
    let pending = drain(&mut queues.commands);

    let started = Instant::now();
    let mut outcome = sim.step(pending, Utc::now());
    metrics
        .tick_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    let mut reports = 0;
    for message in std::mem::take(&mut outcome.outbound) {
        match message {
            Outbound::Report(report) => {
                reports += 1;
                // A closed queue means the writer is gone and shutdown is underway.
                let _ = queues.reports.send(report);
            }
            Outbound::State(state) => {
                queues.snapshots.send_replace(Some(state));
            }
        }
    }

    metrics.record_tick(&outcome, reports);
    metrics.update_population(
        sim.drones().iter().filter(|d| d.is_active()).count(),
        sim.explored().len(),
    );
    outcome
}

fn drain(commands: &mut mpsc::UnboundedReceiver<Command>) -> Vec<Command> {
    let mut pending = Vec::new();
    loop {
        match commands.try_recv() {
            Ok(command) => pending.push(command),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return pending,
        }
    }
}
