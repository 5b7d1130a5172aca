use crate::partition::Generator;
use glam::DVec2;
use rstar::RTree;

/// Keeps the repulsion finite for nearly coincident drones.
pub const DISTANCE_EPS: f64 = 0.1;

/// Repulsive velocity corrections for every drone in `agents`, index-aligned.
///
/// Each pair closer than `min_distance` pushes both drones apart along the
/// line joining them with magnitude `force / (distance + DISTANCE_EPS)`.
/// Contributions from all neighbours add up. Exactly coincident drones have no
/// defined direction and exert nothing on each other.
pub fn repulsion(agents: &[Generator], min_distance: f64, force: f64) -> Vec<DVec2> {
    if agents.len() < 2 {
        return vec![DVec2::ZERO; agents.len()];
    }
    let tree = RTree::bulk_load(agents.to_vec());
    let radius_2 = min_distance * min_distance;

    agents
        .iter()
        .map(|me| {
            tree.locate_within_distance(me.position.to_array(), radius_2)
                .filter(|other| other.id != me.id)
                .fold(DVec2::ZERO, |push, other| {
                    let away = me.position - other.position;
                    let distance = away.length();
                    if distance <= 0.0 || distance >= min_distance {
                        return push;
                    }
                    push + away / distance * (force / (distance + DISTANCE_EPS))
                })
        })
        .collect()
}
