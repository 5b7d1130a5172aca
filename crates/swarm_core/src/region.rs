use glam::DVec2;
use serde::{Deserialize, Serialize};

/// A cell of the coarse exploration grid, identified by `(col, row)`.
///
/// Ordering is column-major, which is also the region index order used to
/// break distance ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[u16; 2]", into = "[u16; 2]")]
pub struct RegionId {
    pub col: u16,
    pub row: u16,
}

impl RegionId {
    pub const fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }
}

impl From<[u16; 2]> for RegionId {
    fn from([col, row]: [u16; 2]) -> Self {
        Self { col, row }
    }
}

impl From<RegionId> for [u16; 2] {
    fn from(r: RegionId) -> Self {
        [r.col, r.row]
    }
}

/// Geometry of the `div × div` region grid laid over a `size × size` area.
#[derive(Debug, Clone, Copy)]
pub struct RegionGrid {
    div: u16,
    cell: f64,
}

impl RegionGrid {
    pub fn new(size: f64, div: u16) -> Self {
        let div = div.max(1);
        Self {
            div,
            cell: size / f64::from(div),
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.div) * usize::from(self.div)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index of a region (column-major).
    pub fn index(&self, region: RegionId) -> usize {
        usize::from(region.col) * usize::from(self.div) + usize::from(region.row)
    }

    /// All regions in index order.
    pub fn regions(&self) -> impl Iterator<Item = RegionId> + '_ {
        (0..self.div).flat_map(move |col| (0..self.div).map(move |row| RegionId::new(col, row)))
    }

    pub fn origin(&self, region: RegionId) -> DVec2 {
        DVec2::new(f64::from(region.col), f64::from(region.row)) * self.cell
    }

    pub fn center(&self, region: RegionId) -> DVec2 {
        self.origin(region) + DVec2::splat(self.cell / 2.0)
    }

    /// Whether `p` lies inside the region's cell (edges inclusive).
    pub fn contains(&self, region: RegionId, p: DVec2) -> bool {
        let min = self.origin(region);
        let max = min + DVec2::splat(self.cell);
        p.cmpge(min).all() && p.cmple(max).all()
    }
}
