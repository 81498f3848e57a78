use crate::constants::{PROXIMITY_SIGMA, VISIBILITY_THRESHOLD};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProximityModel {
    pub sigma: f64,
    pub threshold: f64,
}

impl Default for ProximityModel {
    fn default() -> Self {
        Self {
            sigma: PROXIMITY_SIGMA,
            threshold: VISIBILITY_THRESHOLD,
        }
    }
}

impl ProximityModel {
    /// Gaussian falloff between two in-cell offsets, in (0, 1].
    pub fn proximity(&self, local: (f64, f64), hotspot: (f64, f64)) -> f64 {
        let dx = local.0 - hotspot.0;
        let dy = local.1 - hotspot.1;
        let sigma = self.sigma.max(f64::EPSILON);
        (-(dx * dx + dy * dy) / (sigma * sigma)).exp()
    }

    pub fn is_visible(&self, proximity: f64) -> bool {
        proximity >= self.threshold
    }
}
