//! Solar array output over the lunar day/night cycle.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Solar irradiance at lunar distance, kW per m².
pub const SOLAR_CONSTANT_KW_M2: f64 = 1.361;

/// Synodic lunar day in one-hour steps (~29.5 Earth days).
pub const LUNAR_DAY_STEPS: u32 = 708;

/// Fraction of full sun reaching a horizontal panel at `step`.
///
/// The first half of each cycle is daylight following a half-sine; the
/// second half is night with zero output.
pub fn illumination(step: u64, day_length_steps: u32) -> f64 {
    if day_length_steps == 0 {
        return 1.0;
    }
    let phase = (step % day_length_steps as u64) as f64 / day_length_steps as f64;
    if phase >= 0.5 {
        0.0
    } else {
        (phase * 2.0 * PI).sin().max(0.0)
    }
}

/// A flat photovoltaic array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarPanel {
    pub area_m2: f64,
    /// Conversion efficiency, 0.0..=1.0.
    pub efficiency: f64,
}

impl SolarPanel {
    pub fn new(area_m2: f64, efficiency: f64) -> Self {
        Self {
            area_m2: area_m2.max(0.0),
            efficiency: efficiency.clamp(0.0, 1.0),
        }
    }

    /// Electrical output (kW) under the given illumination fraction.
    pub fn output_kw(&self, illumination: f64) -> f64 {
        SOLAR_CONSTANT_KW_M2 * self.area_m2 * self.efficiency * illumination.clamp(0.0, 1.0)
    }

    /// Peak output at full sun.
    pub fn peak_kw(&self) -> f64 {
        self.output_kw(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_night_half_is_dark() {
        let day = 100;
        for step in 50..100 {
            assert_eq!(illumination(step, day), 0.0);
        }
    }

    #[test]
    fn test_noon_is_full_sun() {
        assert!((illumination(25, 100) - 1.0).abs() < 1e-9);
        assert!((illumination(125, 100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_day_length_is_always_lit() {
        assert_eq!(illumination(12345, 0), 1.0);
    }

    #[test]
    fn test_panel_output() {
        let panel = SolarPanel::new(10.0, 0.3);
        assert!((panel.peak_kw() - 1.361 * 3.0).abs() < 1e-9);
        assert_eq!(panel.output_kw(0.0), 0.0);
        assert!((panel.output_kw(0.5) - panel.peak_kw() / 2.0).abs() < 1e-9);
    }
}
