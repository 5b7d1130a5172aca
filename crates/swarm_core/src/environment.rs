use glam::DVec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Stable index of a POI in [`Environment::pois`].
pub type PoiIndex = usize;

/// Operator verdict on a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Unknown,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct Poi {
    position: DVec2,
    pub disposition: Disposition,
}

impl Poi {
    pub fn position(&self) -> DVec2 {
        self.position
    }
}

/// The bounded `size × size` area and the POIs hidden in it.
///
/// POI positions are fixed at construction; only dispositions change.
#[derive(Debug, Clone)]
pub struct Environment {
    size: f64,
    pois: Vec<Poi>,
}

impl Environment {
    pub fn new(size: f64, positions: impl IntoIterator<Item = DVec2>) -> Self {
        let pois = positions
            .into_iter()
            .map(|position| Poi {
                position,
                disposition: Disposition::Unknown,
            })
            .collect();
        Self { size, pois }
    }

    /// Scatters `count` POIs uniformly over the area.
    pub fn random<R: Rng>(size: f64, count: usize, rng: &mut R) -> Self {
        let positions: Vec<DVec2> = (0..count)
            .map(|_| DVec2::new(rng.gen_range(0.0..=size), rng.gen_range(0.0..=size)))
            .collect();
        Self::new(size, positions)
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn pois(&self) -> &[Poi] {
        &self.pois
    }

    /// Records an operator verdict. Returns `false` for an unknown index.
    pub fn set_disposition(&mut self, idx: PoiIndex, disposition: Disposition) -> bool {
        match self.pois.get_mut(idx) {
            Some(poi) => {
                poi.disposition = disposition;
                true
            }
            None => false,
        }
    }

    /// First still-unknown POI within `radius` of `p`, lowest index first.
    pub fn detect(&self, p: DVec2, radius: f64) -> Option<PoiIndex> {
        self.pois.iter().position(|poi| {
            poi.disposition == Disposition::Unknown && poi.position.distance(p) <= radius
        })
    }

    pub fn clamp(&self, p: DVec2) -> DVec2 {
        p.clamp(DVec2::ZERO, DVec2::splat(self.size))
    }
}
