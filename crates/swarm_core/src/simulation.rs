use crate::avoidance;
use crate::config::SimConfig;
use crate::drone::{Drone, DroneId, DroneStatus, PowerEvent};
use crate::environment::{Disposition, Environment, PoiIndex};
use crate::error::ConfigError;
use crate::partition::{self, Assignments, Generator, PartitionMethod, RecomputePolicy};
use crate::protocol::{Command, DroneView, Outbound, PoiView, ReportEvent, StateSnapshot};
use crate::region::{RegionGrid, RegionId};
use chrono::{DateTime, Utc};
use glam::DVec2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;
use std::time::Duration;

/// What a single tick produced.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub tick: u64,
    /// Reports and (when due) a state snapshot, in emission order.
    pub outbound: Vec<Outbound>,
    pub commands_applied: usize,
    pub commands_ignored: usize,
    /// Set when the region partition was recomputed this tick.
    pub recomputed: Option<PartitionMethod>,
    pub deaths: usize,
}

/// The whole mutable simulation state, owned by the scheduler.
///
/// Nothing in here performs I/O; [`Simulation::step`] advances one fixed tick
/// and hands back the messages to deliver.
pub struct Simulation {
    config: SimConfig,
    grid: RegionGrid,
    env: Environment,
    drones: Vec<Drone>,
    explored: BTreeSet<RegionId>,
    assignments: Assignments,
    policy: RecomputePolicy,
    tick: u64,
    since_snapshot: Duration,
    rng: StdRng,
}

impl Simulation {
    /// Random POIs and random drone start positions.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let size = config.env_size;
        let env = Environment::random(size, config.poi_count, &mut rng);
        let positions: Vec<DVec2> = (0..config.n_drones)
            .map(|_| DVec2::new(rng.gen_range(0.0..=size), rng.gen_range(0.0..=size)))
            .collect();
        Ok(Self::assemble(config, env, positions, rng))
    }

    /// A simulation over a given environment with drones at the given
    /// positions; ids follow the iteration order. `env_size`, `n_drones` and
    /// `poi_count` in `config` are overridden from the arguments.
    pub fn with_layout(
        mut config: SimConfig,
        env: Environment,
        positions: impl IntoIterator<Item = DVec2>,
    ) -> Result<Self, ConfigError> {
        let positions: Vec<DVec2> = positions.into_iter().collect();
        config.env_size = env.size();
        config.poi_count = env.pois().len();
        config.n_drones = u32::try_from(positions.len()).map_err(|_| ConfigError::NoDrones)?;
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self::assemble(config, env, positions, rng))
    }

    fn assemble(config: SimConfig, env: Environment, positions: Vec<DVec2>, rng: StdRng) -> Self {
        let drones = positions
            .into_iter()
            .zip(0..)
            .map(|(p, id)| Drone::new(id, env.clamp(p), config.initial_power))
            .collect();
        let grid = RegionGrid::new(config.env_size, config.region_div);
        let policy = RecomputePolicy::new(config.voronoi_update_interval, config.movement_threshold);
        tracing::info!(
            drones = config.n_drones,
            pois = env.pois().len(),
            regions = grid.len(),
            partition_mode = config.partition_mode.as_str(),
            "Simulation initialized"
        );
        Self {
            // The first tick always carries a snapshot.
            since_snapshot: config.snapshot_interval.saturating_sub(config.tick),
            config,
            grid,
            env,
            drones,
            explored: BTreeSet::new(),
            assignments: Assignments::new(),
            policy,
            tick: 0,
            rng,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid(&self) -> &RegionGrid {
        &self.grid
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn drones(&self) -> &[Drone] {
        &self.drones
    }

    pub fn drone(&self, id: DroneId) -> Option<&Drone> {
        self.drones.get(id as usize)
    }

    pub fn drone_mut(&mut self, id: DroneId) -> Option<&mut Drone> {
        self.drones.get_mut(id as usize)
    }

    pub fn explored(&self) -> &BTreeSet<RegionId> {
        &self.explored
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn active_generators(&self) -> Vec<Generator> {
        self.drones
            .iter()
            .filter(|d| d.is_active())
            .map(|d| Generator {
                id: d.id,
                position: d.position,
            })
            .collect()
    }

    pub fn unexplored(&self) -> Vec<RegionId> {
        self.grid
            .regions()
            .filter(|r| !self.explored.contains(r))
            .collect()
    }

    /// Applies one operator command. Returns `false` when it had no effect
    /// (unknown ids, unmet preconditions, dead drones).
    pub fn apply(&mut self, command: &Command) -> bool {
        match *command {
            Command::Confirm { drone, poi } => self.resolve(drone, poi, Disposition::Confirmed),
            Command::Reject { drone, poi } => self.resolve(drone, poi, Disposition::Rejected),
            Command::RequestManualControl { drone } => {
                let taken = self
                    .drone_mut(drone)
                    .is_some_and(|d| d.request_manual_control());
                if taken {
                    tracing::info!(drone_id = drone, "Operator took manual control");
                }
                taken
            }
            Command::StopManual { drone } => {
                let released = self.drone_mut(drone).is_some_and(|d| d.stop_manual());
                if released {
                    tracing::info!(drone_id = drone, "Manual control released");
                }
                released
            }
            Command::MoveDelta { drone, dx, dy } => {
                if !(dx.is_finite() && dy.is_finite()) {
                    return false;
                }
                let size = self.env.size();
                match self.drone_mut(drone) {
                    Some(d) if !d.is_dead() => {
                        d.position = (d.position + DVec2::new(dx, dy)).clamp(DVec2::ZERO, DVec2::splat(size));
                        true
                    }
                    _ => false,
                }
            }
            Command::SetManualInput {
                drone,
                direction,
                held,
            } => match self.drone_mut(drone) {
                Some(d) if !d.is_dead() => {
                    d.manual_input.set(direction, held);
                    true
                }
                _ => false,
            },
        }
    }

    fn resolve(&mut self, drone: DroneId, poi: PoiIndex, disposition: Disposition) -> bool {
        if !self.env.set_disposition(poi, disposition) {
            return false;
        }
        tracing::info!(drone_id = drone, poi_idx = poi, disposition = ?disposition, "POI resolved by operator");
        if let Some(d) = self.drone_mut(drone) {
            d.resolve_report();
        }
        true
    }

    /// Advances the simulation by one tick.
    pub fn step<I>(&mut self, commands: I, now: DateTime<Utc>) -> TickOutcome
    where
        I: IntoIterator<Item = Command>,
    {
        let mut outcome = TickOutcome::default();
        for command in commands {
            if self.apply(&command) {
                outcome.commands_applied += 1;
            } else {
                outcome.commands_ignored += 1;
                tracing::debug!(command = ?command, "Command had no effect");
            }
        }

        self.tick += 1;
        outcome.tick = self.tick;
        outcome.recomputed = self.repartition_if_due();
        self.steer();
        self.avoid();
        outcome.deaths = self.integrate();
        self.detect(now, &mut outcome.outbound);

        let interval = self.config.snapshot_interval;
        self.since_snapshot += self.config.tick;
        if self.since_snapshot >= interval {
            self.since_snapshot -= interval;
            // Ticks slower than the snapshot cadence send one per tick, no backlog.
            if self.since_snapshot >= interval {
                self.since_snapshot = Duration::ZERO;
            }
            outcome.outbound.push(Outbound::State(self.snapshot(now)));
        }
        outcome
    }

    fn repartition_if_due(&mut self) -> Option<PartitionMethod> {
        let unexplored = self.unexplored();
        if unexplored.is_empty() {
            return None;
        }
        let generators = self.active_generators();
        if !self.policy.is_due(self.tick, &generators) {
            return None;
        }
        let partition = partition::partition(
            &generators,
            &unexplored,
            &self.grid,
            self.config.partition_mode,
        );
        self.assignments = partition.assignments;
        self.policy.record(self.tick, &generators);
        tracing::debug!(
            tick = self.tick,
            method = partition.method.as_str(),
            active = generators.len(),
            unexplored = unexplored.len(),
            "Region partition recomputed"
        );
        Some(partition.method)
    }

    /// Region pick, seek/wander velocity and dwell bookkeeping.
    fn steer(&mut self) {
        let cfg = &self.config;
        let dt = cfg.dt();
        let mut held: BTreeSet<RegionId> =
            self.drones.iter().filter_map(|d| d.assigned_region).collect();

        for drone in &mut self.drones {
            match drone.status {
                DroneStatus::Exploring if drone.power > 0.0 => {}
                DroneStatus::ManualControl => {
                    drone.velocity = drone.manual_input.heading() * cfg.manual_speed;
                    continue;
                }
                _ => {
                    drone.velocity = DVec2::ZERO;
                    continue;
                }
            }

            if drone.assigned_region.is_none() {
                let owned = self
                    .assignments
                    .get(&drone.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let picked = partition::pick_region(drone.position, owned, &self.grid, |r| {
                    !self.explored.contains(&r) && !held.contains(&r)
                });
                if let Some(region) = picked {
                    held.insert(region);
                    drone.assign(region);
                }
            }

            let Some(region) = drone.assigned_region else {
                drone.velocity = DVec2::ZERO;
                continue;
            };

            let to_center = self.grid.center(region) - drone.position;
            drone.velocity = if to_center.length() > cfg.arrival_radius {
                to_center.normalize() * cfg.drone_speed + jitter(&mut self.rng, cfg.seek_jitter)
            } else {
                jitter(&mut self.rng, cfg.wander_speed)
            };

            if self.grid.contains(region, drone.position) {
                drone.region_timer += dt;
            }
            if drone.region_timer >= cfg.explore_time {
                self.explored.insert(region);
                held.remove(&region);
                drone.release_region();
                tracing::debug!(drone_id = drone.id, region = ?region, "Region explored");
                if self.explored.len() >= self.grid.len() {
                    tracing::info!(
                        regions = self.grid.len(),
                        tick = self.tick,
                        "All regions explored, restarting coverage"
                    );
                    self.explored.clear();
                }
            }
        }
    }

    fn avoid(&mut self) {
        let generators = self.active_generators();
        let pushes =
            avoidance::repulsion(&generators, self.config.min_distance, self.config.avoidance_force);
        for (g, push) in generators.iter().zip(pushes) {
            if let Some(d) = self.drones.get_mut(g.id as usize) {
                d.velocity = (d.velocity + push).clamp_length_max(self.config.max_speed);
            }
        }
    }

    /// Moves exploring and manually controlled drones and drains their power.
    fn integrate(&mut self) -> usize {
        let dt = self.config.dt();
        let mut deaths = 0;
        for drone in &mut self.drones {
            if !matches!(
                drone.status,
                DroneStatus::Exploring | DroneStatus::ManualControl
            ) {
                continue;
            }
            drone.position = self.env.clamp(drone.position + drone.velocity * dt);
            match drone.drain_power(self.config.power_per_tick, self.config.low_power_threshold) {
                PowerEvent::Depleted => {
                    deaths += 1;
                    tracing::warn!(
                        drone_id = drone.id,
                        x = drone.position.x,
                        y = drone.position.y,
                        "Drone ran out of power"
                    );
                }
                PowerEvent::LowPower => {
                    tracing::warn!(drone_id = drone.id, power = drone.power, "Drone low on power");
                }
                PowerEvent::Nominal => {}
            }
        }
        deaths
    }

    fn detect(&mut self, now: DateTime<Utc>, outbound: &mut Vec<Outbound>) {
        let radius = self.config.detect_radius;
        for drone in &mut self.drones {
            if drone.status != DroneStatus::Exploring || drone.reported_poi.is_some() {
                continue;
            }
            let Some(poi) = self.env.detect(drone.position, radius) else {
                continue;
            };
            if drone.halt_for_report(poi) {
                tracing::info!(
                    drone_id = drone.id,
                    poi_idx = poi,
                    power = drone.power,
                    "POI detected, drone halted for operator"
                );
                outbound.push(Outbound::Report(ReportEvent {
                    drone_id: drone.id,
                    poi_idx: poi,
                    drone_x: drone.position.x,
                    drone_y: drone.position.y,
                    time: epoch_secs(now),
                }));
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            time: epoch_secs(now),
            env_size: self.env.size(),
            poi: self
                .env
                .pois()
                .iter()
                .enumerate()
                .map(|(idx, p)| PoiView {
                    x: p.position().x,
                    y: p.position().y,
                    status: p.disposition,
                    idx,
                })
                .collect(),
            drones: self
                .drones
                .iter()
                .map(|d| DroneView {
                    id: d.id,
                    x: d.position.x,
                    y: d.position.y,
                    status: d.status,
                    power: d.power,
                    assigned_region: d.assigned_region,
                    reported_poi: d.reported_poi,
                })
                .collect(),
            explored_regions: self.explored.iter().copied().collect(),
            tick: self.tick,
            total_regions: self.grid.len(),
            active_drones: self.drones.iter().filter(|d| d.is_active()).count(),
        }
    }
}

fn jitter<R: Rng>(rng: &mut R, amplitude: f64) -> DVec2 {
    if amplitude <= 0.0 {
        return DVec2::ZERO;
    }
    DVec2::new(
        rng.gen_range(-amplitude..=amplitude),
        rng.gen_range(-amplitude..=amplitude),
    )
}

fn epoch_secs(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}
