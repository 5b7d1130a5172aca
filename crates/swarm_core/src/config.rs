use crate::error::ConfigError;
use std::time::Duration;

pub const MIN_ENV_SIZE: f64 = 10.0;

/// Which partitioner the simulation uses when recomputing region ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Nearest-generator tessellation, falling back to greedy when it cannot be built.
    #[default]
    Tessellation,
    /// Always use the greedy nearest-k assignment.
    Greedy,
}

impl PartitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionMode::Tessellation => "tessellation",
            PartitionMode::Greedy => "greedy",
        }
    }
}

/// Every tunable of the simulation engine.
///
/// Speeds are in area units per second; `tick` is both the wall-clock cadence
/// of the scheduler and the fixed integration step.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub n_drones: u32,
    pub env_size: f64,
    pub poi_count: usize,
    pub region_div: u16,
    pub detect_radius: f64,
    pub initial_power: f64,
    pub power_per_tick: f64,
    pub low_power_threshold: f64,
    pub drone_speed: f64,
    pub manual_speed: f64,
    pub max_speed: f64,
    /// Amplitude of the random perturbation added to the seek velocity.
    pub seek_jitter: f64,
    /// Amplitude of the wander velocity once a drone sits on its region center.
    pub wander_speed: f64,
    pub arrival_radius: f64,
    /// Seconds a drone must dwell inside a region before it counts as explored.
    pub explore_time: f64,
    pub tick: Duration,
    pub snapshot_interval: Duration,
    pub min_distance: f64,
    pub avoidance_force: f64,
    pub voronoi_update_interval: u64,
    pub movement_threshold: f64,
    pub partition_mode: PartitionMode,
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            n_drones: 20,
            env_size: 50.0,
            poi_count: 3,
            region_div: 10,
            detect_radius: 2.0,
            initial_power: 1000.0,
            power_per_tick: 0.1,
            low_power_threshold: 200.0,
            drone_speed: 5.0,
            manual_speed: 10.0,
            max_speed: 10.0,
            seek_jitter: 1.0,
            wander_speed: 3.0,
            arrival_radius: 0.5,
            explore_time: 5.0,
            tick: Duration::from_millis(100),
            snapshot_interval: Duration::from_millis(500),
            min_distance: 1.5,
            avoidance_force: 3.0,
            voronoi_update_interval: 20,
            movement_threshold: 3.0,
            partition_mode: PartitionMode::Tessellation,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Integration step in seconds.
    pub fn dt(&self) -> f64 {
        self.tick.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.env_size.is_finite() {
            return Err(ConfigError::NotPositive("env_size"));
        }
        if !(self.env_size >= MIN_ENV_SIZE) {
            return Err(ConfigError::EnvTooSmall {
                min: MIN_ENV_SIZE,
                actual: self.env_size,
            });
        }
        if self.poi_count == 0 {
            return Err(ConfigError::NoPois);
        }
        if self.n_drones == 0 {
            return Err(ConfigError::NoDrones);
        }
        if self.region_div == 0 {
            return Err(ConfigError::NoRegions);
        }
        if self.tick.is_zero() {
            return Err(ConfigError::NotPositive("tick"));
        }
        if self.snapshot_interval.is_zero() {
            return Err(ConfigError::NotPositive("snapshot_interval"));
        }
        let positive = [
            ("detect_radius", self.detect_radius),
            ("initial_power", self.initial_power),
            ("drone_speed", self.drone_speed),
            ("manual_speed", self.manual_speed),
            ("max_speed", self.max_speed),
            ("explore_time", self.explore_time),
            ("min_distance", self.min_distance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive(name));
            }
        }
        let non_negative = [
            ("power_per_tick", self.power_per_tick),
            ("low_power_threshold", self.low_power_threshold),
            ("seek_jitter", self.seek_jitter),
            ("wander_speed", self.wander_speed),
            ("arrival_radius", self.arrival_radius),
            ("avoidance_force", self.avoidance_force),
            ("movement_threshold", self.movement_threshold),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Negative(name));
            }
        }
        Ok(())
    }
}
