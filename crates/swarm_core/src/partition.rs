//! Region ownership for the active swarm.
//!
//! Unexplored regions are handed to the drone whose position is nearest to the
//! region center. This is the membership rule of the Voronoi cell generated by
//! that drone, evaluated per region center instead of by polygon containment.
//! Below [`MIN_GENERATORS`] drones, or when the generators are degenerate, each
//! drone instead gets its [`GREEDY_NEIGHBORS`] nearest regions.

use crate::config::PartitionMode;
use crate::drone::DroneId;
use crate::error::PartitionError;
use crate::region::{RegionGrid, RegionId};
use glam::DVec2;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::BTreeMap;

/// A planar tessellation is only well-defined from this many generators on.
pub const MIN_GENERATORS: usize = 4;
/// Regions handed to each drone by the greedy fallback.
pub const GREEDY_NEIGHBORS: usize = 5;

const DEGENERATE_EPS: f64 = 1e-9;

/// Owned regions per active drone, fully rebuilt on each recompute.
pub type Assignments = BTreeMap<DroneId, Vec<RegionId>>;

/// An active drone's position, used as a tessellation generator point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Generator {
    pub id: DroneId,
    pub position: DVec2,
}

impl RTreeObject for Generator {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position.to_array())
    }
}

impl PointDistance for Generator {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.position.distance_squared(DVec2::from_array(*point))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMethod {
    /// Nothing to partition (no active drones or no unexplored regions).
    Skipped,
    Greedy,
    Tessellation,
}

impl PartitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionMethod::Skipped => "skipped",
            PartitionMethod::Greedy => "greedy",
            PartitionMethod::Tessellation => "tessellation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub method: PartitionMethod,
    pub assignments: Assignments,
}

/// Assigns `unexplored` regions to the drones in `generators`.
pub fn partition(
    generators: &[Generator],
    unexplored: &[RegionId],
    grid: &RegionGrid,
    mode: PartitionMode,
) -> Partition {
    if generators.is_empty() || unexplored.is_empty() {
        return Partition {
            method: PartitionMethod::Skipped,
            assignments: Assignments::new(),
        };
    }

    if mode == PartitionMode::Greedy || generators.len() < MIN_GENERATORS {
        return Partition {
            method: PartitionMethod::Greedy,
            assignments: greedy(generators, unexplored, grid),
        };
    }

    match tessellate(generators, unexplored, grid) {
        Ok(assignments) => Partition {
            method: PartitionMethod::Tessellation,
            assignments,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Tessellation failed, falling back to greedy assignment");
            Partition {
                method: PartitionMethod::Greedy,
                assignments: greedy(generators, unexplored, grid),
            }
        }
    }
}

/// Nearest-generator assignment; ties go to the lowest drone id.
pub fn tessellate(
    generators: &[Generator],
    unexplored: &[RegionId],
    grid: &RegionGrid,
) -> Result<Assignments, PartitionError> {
    if generators.len() < MIN_GENERATORS {
        return Err(PartitionError::TooFewGenerators {
            required: MIN_GENERATORS,
            actual: generators.len(),
        });
    }
    if let Some(g) = generators.iter().find(|g| !g.position.is_finite()) {
        return Err(PartitionError::NonFiniteGenerator(g.id));
    }
    check_spread(generators)?;

    let tree = RTree::bulk_load(generators.to_vec());
    let mut assignments: Assignments = generators.iter().map(|g| (g.id, Vec::new())).collect();

    for &region in unexplored {
        let center = grid.center(region).to_array();
        let mut nearest = tree.nearest_neighbor_iter_with_distance_2(&center);
        let Some((first, best)) = nearest.next() else {
            continue;
        };
        let owner = nearest
            .take_while(|(_, d2)| *d2 <= best)
            .fold(first.id, |id, (g, _)| id.min(g.id));
        assignments.entry(owner).or_default().push(region);
    }

    let owning = assignments.values().filter(|r| !r.is_empty()).count();
    tracing::debug!(
        drones_with_regions = owning,
        regions = unexplored.len(),
        "Tessellation assignment built"
    );
    Ok(assignments)
}

/// Each drone gets its [`GREEDY_NEIGHBORS`] nearest regions; lists may overlap.
pub fn greedy(generators: &[Generator], unexplored: &[RegionId], grid: &RegionGrid) -> Assignments {
    generators
        .iter()
        .map(|g| {
            let mut ranked: Vec<(f64, RegionId)> = unexplored
                .iter()
                .map(|&r| (grid.center(r).distance(g.position), r))
                .collect();
            ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let nearest = ranked
                .into_iter()
                .take(GREEDY_NEIGHBORS)
                .map(|(_, r)| r)
                .collect();
            (g.id, nearest)
        })
        .collect()
}

/// Rejects generator sets whose affine hull is a point or a line.
fn check_spread(generators: &[Generator]) -> Result<(), PartitionError> {
    let origin = generators[0].position;
    let far = generators
        .iter()
        .map(|g| g.position)
        .max_by(|a, b| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)))
        .unwrap_or(origin);
    let axis = far - origin;
    let len = axis.length();
    if len <= DEGENERATE_EPS {
        return Err(PartitionError::Degenerate);
    }
    let spread = generators
        .iter()
        .map(|g| axis.perp_dot(g.position - origin).abs() / len)
        .fold(0.0, f64::max);
    if spread <= DEGENERATE_EPS {
        return Err(PartitionError::Degenerate);
    }
    Ok(())
}

/// Nearest usable region from a drone's owned list.
///
/// `is_free` filters out regions that are already explored or held by another
/// drone.
pub fn pick_region(
    position: DVec2,
    owned: &[RegionId],
    grid: &RegionGrid,
    is_free: impl Fn(RegionId) -> bool,
) -> Option<RegionId> {
    owned
        .iter()
        .copied()
        .filter(|&r| is_free(r))
        .min_by(|&a, &b| {
            let da = grid.center(a).distance_squared(position);
            let db = grid.center(b).distance_squared(position);
            da.total_cmp(&db).then(a.cmp(&b))
        })
}

/// Decides when recomputing the partition is worth it.
///
/// A recompute is due once `interval` ticks have passed since the last one and
/// either the active set changed or some drone moved more than
/// `movement_threshold` since the positions recorded then.
#[derive(Debug, Clone)]
pub struct RecomputePolicy {
    interval: u64,
    movement_threshold: f64,
    last_tick: Option<u64>,
    snapshot: BTreeMap<DroneId, DVec2>,
}

impl RecomputePolicy {
    pub fn new(interval: u64, movement_threshold: f64) -> Self {
        Self {
            interval,
            movement_threshold,
            last_tick: None,
            snapshot: BTreeMap::new(),
        }
    }

    pub fn is_due(&self, tick: u64, generators: &[Generator]) -> bool {
        let Some(last) = self.last_tick else {
            return true;
        };
        if tick.saturating_sub(last) < self.interval {
            return false;
        }
        if generators.len() != self.snapshot.len() {
            return true;
        }
        self.max_displacement(generators) > self.movement_threshold
    }

    pub fn record(&mut self, tick: u64, generators: &[Generator]) {
        self.last_tick = Some(tick);
        self.snapshot = generators.iter().map(|g| (g.id, g.position)).collect();
    }

    /// A drone missing from the snapshot counts as an unbounded move.
    fn max_displacement(&self, generators: &[Generator]) -> f64 {
        generators
            .iter()
            .map(|g| match self.snapshot.get(&g.id) {
                Some(p) => p.distance(g.position),
                None => f64::INFINITY,
            })
            .fold(0.0, f64::max)
    }
}
