use serde::{
    Deserialize,
    Serialize,
};

/// Relative mass accuracy with an absolute floor. The window around a mass
/// is `max(ppm * 1e-6 * mass, absolute)`, so small masses keep a usable
/// tolerance instead of collapsing to fractions of a millidalton.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub ppm: f64,
    pub absolute: f64,
}

impl Deviation {
    pub fn new(ppm: f64) -> Self {
        Self {
            ppm,
            absolute: ppm * 1e-6 * 100.0,
        }
    }

    pub fn with_absolute(ppm: f64, absolute: f64) -> Self {
        Self { ppm, absolute }
    }

    pub fn absolute_for(&self, mass: f64) -> f64 {
        (self.ppm * 1e-6 * mass).max(self.absolute)
    }

    pub fn in_error_window(&self, center: f64, value: f64) -> bool {
        (center - value).abs() <= self.absolute_for(center)
    }

    pub fn multiply(&self, scalar: f64) -> Self {
        Self {
            ppm: self.ppm * scalar,
            absolute: self.absolute * scalar,
        }
    }
}

impl Default for Deviation {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl std::fmt::Display for Deviation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ppm ({} m/z)", self.ppm, self.absolute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_floor_applies_to_small_masses() {
        let dev = Deviation::with_absolute(10.0, 0.002);
        // 10 ppm of 50 Da is 0.0005, below the floor
        assert!((dev.absolute_for(50.0) - 0.002).abs() < 1e-12);
        // 10 ppm of 500 Da is 0.005, above the floor
        assert!((dev.absolute_for(500.0) - 0.005).abs() < 1e-12);
    }

    #[test]
    fn error_window_is_symmetric() {
        let dev = Deviation::with_absolute(10.0, 0.001);
        assert!(dev.in_error_window(500.0, 500.004));
        assert!(dev.in_error_window(500.0, 499.996));
        assert!(!dev.in_error_window(500.0, 500.006));
    }

    #[test]
    fn multiply_scales_both_components() {
        let dev = Deviation::with_absolute(10.0, 0.002).multiply(2.0);
        assert!((dev.ppm - 20.0).abs() < 1e-12);
        assert!((dev.absolute - 0.004).abs() < 1e-12);
    }
}
