//! Battery model: bounded energy store with per-step rate limits.

use serde::{Deserialize, Serialize};

/// A rechargeable battery. All quantities in kWh (or kW per one-hour step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub capacity_kwh: f64,
    pub charge_kwh: f64,
    /// Maximum energy accepted in a single step.
    pub max_charge_rate: f64,
    /// Maximum energy delivered in a single step.
    pub max_discharge_rate: f64,
}

impl Battery {
    /// Create a battery at `initial_fraction` of capacity (clamped to 0..=1).
    pub fn new(
        capacity_kwh: f64,
        initial_fraction: f64,
        max_charge_rate: f64,
        max_discharge_rate: f64,
    ) -> Self {
        let capacity_kwh = capacity_kwh.max(0.0);
        Self {
            capacity_kwh,
            charge_kwh: capacity_kwh * initial_fraction.clamp(0.0, 1.0),
            max_charge_rate: max_charge_rate.max(0.0),
            max_discharge_rate: max_discharge_rate.max(0.0),
        }
    }

    /// State of charge in 0.0..=1.0. An empty-capacity battery reports 0.
    pub fn state_of_charge(&self) -> f64 {
        if self.capacity_kwh <= 0.0 {
            0.0
        } else {
            (self.charge_kwh / self.capacity_kwh).clamp(0.0, 1.0)
        }
    }

    /// Energy this battery could still accept this step.
    pub fn charge_headroom(&self) -> f64 {
        (self.capacity_kwh - self.charge_kwh)
            .max(0.0)
            .min(self.max_charge_rate)
    }

    /// Energy this battery could deliver this step.
    pub fn available_discharge(&self) -> f64 {
        self.charge_kwh.max(0.0).min(self.max_discharge_rate)
    }

    /// Offer energy to the battery; returns the amount actually stored.
    pub fn charge(&mut self, offered_kwh: f64) -> f64 {
        let accepted = offered_kwh.max(0.0).min(self.charge_headroom());
        self.charge_kwh += accepted;
        accepted
    }

    /// Draw energy from the battery; returns the amount actually delivered.
    pub fn discharge(&mut self, requested_kwh: f64) -> f64 {
        let delivered = requested_kwh.max(0.0).min(self.available_discharge());
        self.charge_kwh -= delivered;
        delivered
    }

    /// Drain a fixed load regardless of rate limits (e.g. a rover driving).
    /// Returns the energy actually drawn, which may be less than `load_kwh`.
    pub fn drain(&mut self, load_kwh: f64) -> f64 {
        let drawn = load_kwh.max(0.0).min(self.charge_kwh.max(0.0));
        self.charge_kwh -= drawn;
        drawn
    }

    pub fn is_full(&self) -> bool {
        self.charge_kwh >= self.capacity_kwh - f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_initial_fraction() {
        let b = Battery::new(100.0, 1.5, 10.0, 10.0);
        assert_eq!(b.charge_kwh, 100.0);
        let b = Battery::new(100.0, -1.0, 10.0, 10.0);
        assert_eq!(b.charge_kwh, 0.0);
    }

    #[test]
    fn test_charge_respects_rate_and_capacity() {
        let mut b = Battery::new(100.0, 0.95, 20.0, 20.0);
        let stored = b.charge(50.0);
        assert!((stored - 5.0).abs() < 1e-9);
        assert!(b.is_full());

        let mut b = Battery::new(100.0, 0.0, 20.0, 20.0);
        assert!((b.charge(50.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_respects_rate_and_charge() {
        let mut b = Battery::new(100.0, 0.1, 20.0, 20.0);
        assert!((b.discharge(50.0) - 10.0).abs() < 1e-9);
        assert_eq!(b.discharge(5.0), 0.0);
    }

    #[test]
    fn test_drain_ignores_rate_limit() {
        let mut b = Battery::new(100.0, 0.5, 1.0, 1.0);
        assert!((b.drain(30.0) - 30.0).abs() < 1e-9);
        assert!((b.state_of_charge() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity() {
        let mut b = Battery::new(0.0, 1.0, 10.0, 10.0);
        assert_eq!(b.state_of_charge(), 0.0);
        assert_eq!(b.charge(10.0), 0.0);
    }
}
