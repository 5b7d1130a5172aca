use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use swarm_core::{PartitionMode, SimConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PartitionArg {
    /// Nearest-drone tessellation with greedy fallback.
    Tessellation,
    /// Greedy nearest-regions assignment only.
    Greedy,
}

impl From<PartitionArg> for PartitionMode {
    fn from(arg: PartitionArg) -> Self {
        match arg {
            PartitionArg::Tessellation => PartitionMode::Tessellation,
            PartitionArg::Greedy => PartitionMode::Greedy,
        }
    }
}

/// `swarm_sim` - drone swarm exploration simulator.
///
/// Simulates a swarm of drones exploring a square area for points of
/// interest. A single operator console connects over TCP, receives state
/// snapshots and detection reports as JSON lines, and sends back commands.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address the operator console connects to.
    #[arg(long, env = "SWARM_LISTEN_ADDR", default_value = "127.0.0.1:9999")]
    pub listen_addr: SocketAddr,

    /// Listen address for the Prometheus metrics endpoint. Disabled when unset.
    #[arg(long, env = "SWARM_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<SocketAddr>,

    #[arg(long, env = "SWARM_DRONES", default_value_t = 20)]
    pub drones: u32,

    /// Side length of the square area.
    #[arg(long, env = "SWARM_ENV_SIZE", default_value_t = 50.0)]
    pub env_size: f64,

    #[arg(long, env = "SWARM_POIS", default_value_t = 3)]
    pub pois: usize,

    /// Region grid divisions per side.
    #[arg(long, env = "SWARM_REGION_DIV", default_value_t = 10)]
    pub region_div: u16,

    #[arg(long, env = "SWARM_DETECT_RADIUS", default_value_t = 2.0)]
    pub detect_radius: f64,

    #[arg(long, env = "SWARM_INITIAL_POWER", default_value_t = 1000.0)]
    pub initial_power: f64,

    #[arg(long, env = "SWARM_POWER_PER_TICK", default_value_t = 0.1)]
    pub power_per_tick: f64,

    #[arg(long, env = "SWARM_LOW_POWER_THRESHOLD", default_value_t = 200.0)]
    pub low_power_threshold: f64,

    /// Autonomous seek speed, in units per second.
    #[arg(long, env = "SWARM_DRONE_SPEED", default_value_t = 5.0)]
    pub drone_speed: f64,

    /// Speed under manual control, in units per second.
    #[arg(long, env = "SWARM_MANUAL_SPEED", default_value_t = 10.0)]
    pub manual_speed: f64,

    #[arg(long, env = "SWARM_MAX_SPEED", default_value_t = 10.0)]
    pub max_speed: f64,

    /// Seconds of dwell that mark a region explored.
    #[arg(long, env = "SWARM_EXPLORE_TIME", default_value_t = 5.0)]
    pub explore_time: f64,

    #[arg(long, env = "SWARM_TICK_MS", default_value_t = 100)]
    pub tick_ms: u64,

    #[arg(long, env = "SWARM_SNAPSHOT_MS", default_value_t = 500)]
    pub snapshot_ms: u64,

    /// Drones closer than this repel each other.
    #[arg(long, env = "SWARM_MIN_DISTANCE", default_value_t = 1.5)]
    pub min_distance: f64,

    #[arg(long, env = "SWARM_AVOIDANCE_FORCE", default_value_t = 3.0)]
    pub avoidance_force: f64,

    /// Minimum ticks between region partition recomputes.
    #[arg(long, env = "SWARM_VORONOI_UPDATE_INTERVAL", default_value_t = 20)]
    pub voronoi_update_interval: u64,

    /// Drone displacement that justifies a recompute.
    #[arg(long, env = "SWARM_MOVEMENT_THRESHOLD", default_value_t = 3.0)]
    pub movement_threshold: f64,

    #[arg(long, env = "SWARM_PARTITION_MODE", value_enum, default_value_t = PartitionArg::Tessellation)]
    pub partition_mode: PartitionArg,

    /// RNG seed for reproducible runs.
    #[arg(long, env = "SWARM_SEED")]
    pub seed: Option<u64>,

    /// A single outbound write taking longer than this drops the operator.
    #[arg(long, env = "SWARM_WRITE_TIMEOUT_MS", default_value_t = 2000)]
    pub write_timeout_ms: u64,
}

impl Config {
    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            n_drones: self.drones,
            env_size: self.env_size,
            poi_count: self.pois,
            region_div: self.region_div,
            detect_radius: self.detect_radius,
            initial_power: self.initial_power,
            power_per_tick: self.power_per_tick,
            low_power_threshold: self.low_power_threshold,
            drone_speed: self.drone_speed,
            manual_speed: self.manual_speed,
            max_speed: self.max_speed,
            explore_time: self.explore_time,
            tick: self.tick(),
            snapshot_interval: Duration::from_millis(self.snapshot_ms),
            min_distance: self.min_distance,
            avoidance_force: self.avoidance_force,
            voronoi_update_interval: self.voronoi_update_interval,
            movement_threshold: self.movement_threshold,
            partition_mode: self.partition_mode.into(),
            seed: self.seed,
            ..SimConfig::default()
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
