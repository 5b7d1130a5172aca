//! Operator wire protocol: one UTF-8 JSON object per line, tagged by `type`.
//!
//! Inbound: `confirm`, `reject`, `manual_control`, `stop_manual`,
//! `move_command`, `manual_hold`. Outbound: `report`, `state`.

use crate::drone::{Direction, DroneId, DroneStatus};
use crate::environment::{Disposition, PoiIndex};
use crate::error::ProtocolError;
use crate::region::RegionId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A request from the operator, applied by the scheduler at the top of a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Confirm { drone: DroneId, poi: PoiIndex },
    Reject { drone: DroneId, poi: PoiIndex },
    RequestManualControl { drone: DroneId },
    StopManual { drone: DroneId },
    MoveDelta { drone: DroneId, dx: f64, dy: f64 },
    SetManualInput { drone: DroneId, direction: Direction, held: bool },
}

#[derive(Deserialize)]
struct DronePoiFields {
    drone_id: i64,
    poi_idx: i64,
}

#[derive(Deserialize)]
struct DroneFields {
    drone_id: i64,
}

#[derive(Deserialize)]
struct MoveFields {
    drone_id: i64,
    #[serde(default)]
    dx: f64,
    #[serde(default)]
    dy: f64,
}

#[derive(Deserialize)]
struct HoldFields {
    drone_id: i64,
    key: Direction,
    #[serde(default)]
    val: bool,
}

fn fields<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields {
        kind: kind.to_owned(),
        source,
    })
}

fn drone_id(value: i64) -> Result<DroneId, ProtocolError> {
    DroneId::try_from(value).map_err(|_| ProtocolError::IdOutOfRange {
        field: "drone_id",
        value,
    })
}

fn poi_idx(value: i64) -> Result<PoiIndex, ProtocolError> {
    PoiIndex::try_from(value).map_err(|_| ProtocolError::IdOutOfRange {
        field: "poi_idx",
        value,
    })
}

impl Command {
    /// Decodes one inbound line.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        match kind.as_str() {
            "confirm" => {
                let f: DronePoiFields = fields(&kind, value)?;
                Ok(Command::Confirm {
                    drone: drone_id(f.drone_id)?,
                    poi: poi_idx(f.poi_idx)?,
                })
            }
            "reject" => {
                let f: DronePoiFields = fields(&kind, value)?;
                Ok(Command::Reject {
                    drone: drone_id(f.drone_id)?,
                    poi: poi_idx(f.poi_idx)?,
                })
            }
            "manual_control" => {
                let f: DroneFields = fields(&kind, value)?;
                Ok(Command::RequestManualControl {
                    drone: drone_id(f.drone_id)?,
                })
            }
            "stop_manual" => {
                let f: DroneFields = fields(&kind, value)?;
                Ok(Command::StopManual {
                    drone: drone_id(f.drone_id)?,
                })
            }
            "move_command" => {
                let f: MoveFields = fields(&kind, value)?;
                Ok(Command::MoveDelta {
                    drone: drone_id(f.drone_id)?,
                    dx: f.dx,
                    dy: f.dy,
                })
            }
            "manual_hold" => {
                let f: HoldFields = fields(&kind, value)?;
                Ok(Command::SetManualInput {
                    drone: drone_id(f.drone_id)?,
                    direction: f.key,
                    held: f.val,
                })
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }

    /// Encodes the command as a wire line, newline included.
    pub fn encode(&self) -> String {
        let value = match *self {
            Command::Confirm { drone, poi } => {
                json!({ "type": "confirm", "drone_id": drone, "poi_idx": poi })
            }
            Command::Reject { drone, poi } => {
                json!({ "type": "reject", "drone_id": drone, "poi_idx": poi })
            }
            Command::RequestManualControl { drone } => {
                json!({ "type": "manual_control", "drone_id": drone })
            }
            Command::StopManual { drone } => json!({ "type": "stop_manual", "drone_id": drone }),
            Command::MoveDelta { drone, dx, dy } => {
                json!({ "type": "move_command", "drone_id": drone, "dx": dx, "dy": dy })
            }
            Command::SetManualInput {
                drone,
                direction,
                held,
            } => json!({ "type": "manual_hold", "drone_id": drone, "key": direction, "val": held }),
        };
        format!("{value}\n")
    }

    pub fn drone(&self) -> DroneId {
        match *self {
            Command::Confirm { drone, .. }
            | Command::Reject { drone, .. }
            | Command::RequestManualControl { drone }
            | Command::StopManual { drone }
            | Command::MoveDelta { drone, .. }
            | Command::SetManualInput { drone, .. } => drone,
        }
    }
}

/// Emitted once when a drone halts on a new detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub drone_id: DroneId,
    pub poi_idx: PoiIndex,
    pub drone_x: f64,
    pub drone_y: f64,
    /// Seconds since the Unix epoch.
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiView {
    pub x: f64,
    pub y: f64,
    pub status: Disposition,
    pub idx: PoiIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneView {
    pub id: DroneId,
    pub x: f64,
    pub y: f64,
    pub status: DroneStatus,
    pub power: f64,
    pub assigned_region: Option<RegionId>,
    pub reported_poi: Option<PoiIndex>,
}

/// Full read-only copy of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub time: f64,
    pub env_size: f64,
    pub poi: Vec<PoiView>,
    pub drones: Vec<DroneView>,
    pub explored_regions: Vec<RegionId>,
    #[serde(default)]
    pub tick: u64,
    #[serde(default)]
    pub total_regions: usize,
    #[serde(default)]
    pub active_drones: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Report(ReportEvent),
    State(StateSnapshot),
}

impl Outbound {
    /// Encodes the message as a wire line, newline included.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();
        match kind.as_str() {
            "report" | "state" => fields(&kind, value),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_inbound_kind() {
        let cases = [
            (
                r#"{"type":"confirm","drone_id":3,"poi_idx":0}"#,
                Command::Confirm { drone: 3, poi: 0 },
            ),
            (
                r#"{"type":"reject","drone_id":1,"poi_idx":2}"#,
                Command::Reject { drone: 1, poi: 2 },
            ),
            (
                r#"{"type":"manual_control","drone_id":5}"#,
                Command::RequestManualControl { drone: 5 },
            ),
            (
                r#"{"type":"stop_manual","drone_id":5}"#,
                Command::StopManual { drone: 5 },
            ),
            (
                r#"{"type":"move_command","drone_id":2,"dx":1.5,"dy":-2}"#,
                Command::MoveDelta {
                    drone: 2,
                    dx: 1.5,
                    dy: -2.0,
                },
            ),
            (
                r#"{"type":"manual_hold","drone_id":4,"key":"left","val":true}"#,
                Command::SetManualInput {
                    drone: 4,
                    direction: Direction::Left,
                    held: true,
                },
            ),
        ];
        for (line, expected) in cases {
            assert_eq!(Command::decode(line).unwrap(), expected, "{line}");
            assert_eq!(Command::decode(expected.encode().trim_end()).unwrap(), expected);
        }
    }

    #[test]
    fn move_defaults_missing_deltas() {
        let cmd = Command::decode(r#"{"type":"move_command","drone_id":2}"#).unwrap();
        assert_eq!(
            cmd,
            Command::MoveDelta {
                drone: 2,
                dx: 0.0,
                dy: 0.0
            }
        );
    }

    #[test]
    fn malformed_lines_are_classified() {
        assert!(matches!(
            Command::decode("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            Command::decode(r#"{"drone_id":1}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"self_destruct","drone_id":1}"#),
            Err(ProtocolError::UnknownType(t)) if t == "self_destruct"
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"confirm","drone_id":1}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"manual_hold","drone_id":1,"key":"sideways","val":true}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"stop_manual","drone_id":-1}"#),
            Err(ProtocolError::IdOutOfRange { field: "drone_id", value: -1 })
        ));
    }

    #[test]
    fn state_snapshot_survives_the_wire() {
        let snapshot = StateSnapshot {
            time: 1_700_000_000.25,
            env_size: 50.0,
            poi: vec![PoiView {
                x: 1.0,
                y: 2.0,
                status: Disposition::Confirmed,
                idx: 0,
            }],
            drones: vec![
                DroneView {
                    id: 0,
                    x: 3.0,
                    y: 4.0,
                    status: DroneStatus::HaltedForManual,
                    power: 99.5,
                    assigned_region: None,
                    reported_poi: Some(0),
                },
                DroneView {
                    id: 1,
                    x: 30.0,
                    y: 40.0,
                    status: DroneStatus::Exploring,
                    power: 12.0,
                    assigned_region: Some(RegionId::new(6, 8)),
                    reported_poi: None,
                },
            ],
            explored_regions: vec![RegionId::new(0, 1), RegionId::new(2, 2)],
            tick: 17,
            total_regions: 100,
            active_drones: 1,
        };
        let line = Outbound::State(snapshot.clone()).encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["drones"][0]["status"], "halted_for_manual");
        assert_eq!(value["drones"][1]["assigned_region"], json!([6, 8]));
        assert_eq!(value["explored_regions"], json!([[0, 1], [2, 2]]));

        match Outbound::decode(&line).unwrap() {
            Outbound::State(back) => {
                assert_eq!(back.drones.len(), snapshot.drones.len());
                assert_eq!(back.poi.len(), snapshot.poi.len());
                assert_eq!(back.explored_regions, snapshot.explored_regions);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn decodes_minimal_state_from_older_peers() {
        let line = r#"{"type":"state","time":1.0,"env_size":300,"poi":[],"drones":[],"explored_regions":[]}"#;
        let Outbound::State(s) = Outbound::decode(line).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(s.tick, 0);
        assert_eq!(s.env_size, 300.0);
    }

    #[test]
    fn report_line_carries_its_tag() {
        let line = Outbound::Report(ReportEvent {
            drone_id: 2,
            poi_idx: 1,
            drone_x: 10.0,
            drone_y: 11.0,
            time: 5.0,
        })
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "report");
        assert_eq!(value["poi_idx"], 1);
    }
}
