use crate::environment::PoiIndex;
use crate::region::RegionId;
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Dense drone identifier, `0..n_drones`.
pub type DroneId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    Exploring,
    HaltedForManual,
    ManualControl,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Held state of the four manual-control directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl ManualInput {
    pub fn set(&mut self, direction: Direction, held: bool) {
        match direction {
            Direction::Up => self.up = held,
            Direction::Down => self.down = held,
            Direction::Left => self.left = held,
            Direction::Right => self.right = held,
        }
    }

    /// Unit-less heading; `up` is towards smaller y.
    pub fn heading(&self) -> DVec2 {
        let axis = |neg: bool, pos: bool| f64::from(u8::from(pos)) - f64::from(u8::from(neg));
        DVec2::new(axis(self.left, self.right), axis(self.up, self.down))
    }
}

/// What happened to a drone's power budget during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Nominal,
    /// Power crossed the low-power threshold for the first time.
    LowPower,
    /// Power reached zero; the drone is now dead.
    Depleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drone {
    pub id: DroneId,
    pub position: DVec2,
    pub velocity: DVec2,
    pub power: f64,
    pub status: DroneStatus,
    pub assigned_region: Option<RegionId>,
    pub region_timer: f64,
    pub reported_poi: Option<PoiIndex>,
    pub manual_input: ManualInput,
    low_power_warned: bool,
}

impl Drone {
    pub fn new(id: DroneId, position: DVec2, power: f64) -> Self {
        Self {
            id,
            position,
            velocity: DVec2::ZERO,
            power,
            status: DroneStatus::Exploring,
            assigned_region: None,
            region_timer: 0.0,
            reported_poi: None,
            manual_input: ManualInput::default(),
            low_power_warned: false,
        }
    }

    /// Eligible for partitioning and avoidance.
    pub fn is_active(&self) -> bool {
        self.power > 0.0 && self.status == DroneStatus::Exploring
    }

    pub fn is_dead(&self) -> bool {
        self.status == DroneStatus::Dead
    }

    pub fn assign(&mut self, region: RegionId) {
        self.assigned_region = Some(region);
        self.region_timer = 0.0;
    }

    pub fn release_region(&mut self) {
        self.assigned_region = None;
        self.region_timer = 0.0;
    }

    /// `exploring -> halted_for_manual` on a detection. Ignored while a report
    /// is already pending or in any other status.
    pub fn halt_for_report(&mut self, poi: PoiIndex) -> bool {
        if self.status != DroneStatus::Exploring || self.reported_poi.is_some() {
            return false;
        }
        self.status = DroneStatus::HaltedForManual;
        self.reported_poi = Some(poi);
        self.velocity = DVec2::ZERO;
        true
    }

    /// `halted_for_manual -> manual_control`.
    pub fn request_manual_control(&mut self) -> bool {
        if self.status != DroneStatus::HaltedForManual {
            return false;
        }
        self.status = DroneStatus::ManualControl;
        true
    }

    /// Back to `exploring` after the operator resolved the report.
    pub fn resolve_report(&mut self) -> bool {
        match self.status {
            DroneStatus::Dead => false,
            DroneStatus::Exploring => {
                self.reported_poi = None;
                true
            }
            DroneStatus::HaltedForManual | DroneStatus::ManualControl => {
                self.status = DroneStatus::Exploring;
                self.reported_poi = None;
                self.velocity = DVec2::ZERO;
                self.release_region();
                true
            }
        }
    }

    pub fn stop_manual(&mut self) -> bool {
        if !self.resolve_report() {
            return false;
        }
        self.manual_input = ManualInput::default();
        true
    }

    /// Drains one tick of power and handles the transition to `dead`.
    pub fn drain_power(&mut self, amount: f64, low_threshold: f64) -> PowerEvent {
        if self.is_dead() {
            return PowerEvent::Nominal;
        }
        self.power = (self.power - amount).max(0.0);
        if self.power <= 0.0 {
            self.power = 0.0;
            self.status = DroneStatus::Dead;
            self.velocity = DVec2::ZERO;
            self.release_region();
            self.manual_input = ManualInput::default();
            return PowerEvent::Depleted;
        }
        if self.power < low_threshold && !self.low_power_warned {
            self.low_power_warned = true;
            return PowerEvent::LowPower;
        }
        PowerEvent::Nominal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone() -> Drone {
        Drone::new(0, DVec2::new(5.0, 5.0), 10.0)
    }

    #[test]
    fn detection_is_edge_triggered() {
        let mut d = drone();
        assert!(d.halt_for_report(0));
        assert_eq!(d.status, DroneStatus::HaltedForManual);
        assert!(!d.halt_for_report(1));
        assert_eq!(d.reported_poi, Some(0));
    }

    #[test]
    fn manual_control_requires_halt() {
        let mut d = drone();
        assert!(!d.request_manual_control());
        assert_eq!(d.status, DroneStatus::Exploring);
        d.halt_for_report(2);
        assert!(d.request_manual_control());
        assert_eq!(d.status, DroneStatus::ManualControl);
    }

    #[test]
    fn resolving_clears_report_and_region() {
        let mut d = drone();
        d.assign(RegionId::new(1, 1));
        d.halt_for_report(0);
        d.request_manual_control();
        d.manual_input.set(Direction::Up, true);
        assert!(d.stop_manual());
        assert_eq!(d.status, DroneStatus::Exploring);
        assert_eq!(d.reported_poi, None);
        assert_eq!(d.assigned_region, None);
        assert_eq!(d.manual_input, ManualInput::default());
    }

    #[test]
    fn resolving_an_exploring_drone_keeps_its_region() {
        let mut d = drone();
        d.assign(RegionId::new(3, 0));
        assert!(d.resolve_report());
        assert_eq!(d.assigned_region, Some(RegionId::new(3, 0)));
    }

    #[test]
    fn power_depletion_is_terminal() {
        let mut d = drone();
        d.halt_for_report(0);
        d.request_manual_control();
        assert_eq!(d.drain_power(4.0, 8.0), PowerEvent::LowPower);
        assert_eq!(d.drain_power(4.0, 8.0), PowerEvent::Nominal);
        assert_eq!(d.drain_power(4.0, 8.0), PowerEvent::Depleted);
        assert_eq!(d.power, 0.0);
        assert!(d.is_dead());
        assert!(!d.resolve_report());
        assert!(!d.stop_manual());
        assert!(!d.request_manual_control());
        assert_eq!(d.drain_power(4.0, 8.0), PowerEvent::Nominal);
        assert!(d.is_dead());
    }

    #[test]
    fn heading_combines_held_keys() {
        let mut input = ManualInput::default();
        input.set(Direction::Up, true);
        input.set(Direction::Right, true);
        assert_eq!(input.heading(), DVec2::new(1.0, -1.0));
        input.set(Direction::Down, true);
        assert_eq!(input.heading(), DVec2::new(1.0, 0.0));
    }
}
