//! Rocket propellant and flight-time formulas for Earth–Moon round trips.
//!
//! Round trips start on the lunar surface: the rocket lifts off carrying the
//! outbound payload plus the propellant for the return leg, and comes back
//! with the return payload. Propellant per leg follows the Tsiolkovsky
//! equation.

use serde::{Deserialize, Serialize};

/// Standard gravity, m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Static characteristics of a rocket class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocketSpec {
    pub dry_mass_kg: f64,
    pub payload_capacity_kg: f64,
    pub specific_impulse_s: f64,
    /// Delta-v budget for one leg, m/s.
    pub leg_delta_v: f64,
    /// Distance of one leg, km.
    pub distance_km: f64,
    /// Cruise speed, km per step.
    pub cruise_speed_km_per_step: f64,
    /// Steps spent at the far end loading the return payload.
    pub loading_steps: u32,
}

impl Default for RocketSpec {
    fn default() -> Self {
        Self {
            dry_mass_kg: 20_000.0,
            payload_capacity_kg: 10_000.0,
            specific_impulse_s: 450.0,
            leg_delta_v: 2_500.0,
            distance_km: 384_400.0,
            cruise_speed_km_per_step: 5_000.0,
            loading_steps: 24,
        }
    }
}

/// Mass ratio minus one for a leg: propellant per kg of final mass.
fn propellant_fraction(delta_v: f64, isp: f64) -> f64 {
    if isp <= 0.0 || delta_v <= 0.0 {
        return 0.0;
    }
    (delta_v / (isp * STANDARD_GRAVITY)).exp() - 1.0
}

/// Propellant (kg) to push `final_mass_kg` through `delta_v`.
pub fn propellant_for_leg(final_mass_kg: f64, delta_v: f64, isp: f64) -> f64 {
    final_mass_kg.max(0.0) * propellant_fraction(delta_v, isp)
}

/// Total propellant (kg) for a round trip that leaves with
/// `outbound_payload_kg` and returns with `return_payload_kg`.
pub fn round_trip_propellant(
    spec: &RocketSpec,
    outbound_payload_kg: f64,
    return_payload_kg: f64,
) -> f64 {
    let inbound = propellant_for_leg(
        spec.dry_mass_kg + return_payload_kg.max(0.0),
        spec.leg_delta_v,
        spec.specific_impulse_s,
    );
    let outbound = propellant_for_leg(
        spec.dry_mass_kg + outbound_payload_kg.max(0.0) + inbound,
        spec.leg_delta_v,
        spec.specific_impulse_s,
    );
    inbound + outbound
}

/// Steps for one leg, rounded up; never less than one.
pub fn one_way_steps(distance_km: f64, cruise_speed_km_per_step: f64) -> u32 {
    if cruise_speed_km_per_step <= 0.0 {
        return 1;
    }
    ((distance_km.max(0.0) / cruise_speed_km_per_step).ceil() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delta_v_needs_no_propellant() {
        assert_eq!(propellant_for_leg(1000.0, 0.0, 300.0), 0.0);
    }

    #[test]
    fn test_propellant_grows_with_payload() {
        let spec = RocketSpec::default();
        let light = round_trip_propellant(&spec, 0.0, 0.0);
        let heavy = round_trip_propellant(&spec, 5_000.0, 5_000.0);
        assert!(light > 0.0);
        assert!(heavy > light);
    }

    #[test]
    fn test_outbound_carries_return_propellant() {
        let spec = RocketSpec::default();
        let f = propellant_fraction(spec.leg_delta_v, spec.specific_impulse_s);
        let inbound = spec.dry_mass_kg * f;
        let expected = inbound + (spec.dry_mass_kg + inbound) * f;
        assert!((round_trip_propellant(&spec, 0.0, 0.0) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_one_way_steps() {
        assert_eq!(one_way_steps(384_400.0, 5_000.0), 77);
        assert_eq!(one_way_steps(10.0, 0.0), 1);
        assert_eq!(one_way_steps(0.0, 100.0), 1);
    }
}
