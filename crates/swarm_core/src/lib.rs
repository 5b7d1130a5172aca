//! Simulation engine for a drone swarm exploring a bounded square area.
//!
//! Drones partition the unexplored part of a coarse region grid among
//! themselves, fly to their regions while keeping clear of each other, and halt
//! when they come across a point of interest until an operator confirms or
//! rejects it. Everything here is synchronous and free of I/O; the
//! `swarm_sim` binary drives [`Simulation::step`] on a fixed cadence and moves
//! [`protocol`] messages over TCP.

pub mod avoidance;
pub mod config;
pub mod drone;
pub mod environment;
pub mod error;
pub mod partition;
pub mod protocol;
pub mod region;
pub mod simulation;

pub use config::{PartitionMode, SimConfig};
pub use drone::{Direction, Drone, DroneId, DroneStatus};
pub use environment::{Disposition, Environment, PoiIndex};
pub use error::{ConfigError, PartitionError, ProtocolError};
pub use protocol::{Command, Outbound, ReportEvent, StateSnapshot};
pub use region::{RegionGrid, RegionId};
pub use simulation::{Simulation, TickOutcome};
