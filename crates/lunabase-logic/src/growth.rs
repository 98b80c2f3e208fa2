//! Receding-horizon fleet sizing.
//!
//! Sizes a fleet of producing agents so that aggregate output follows an
//! exponential growth target. Each control invocation:
//!
//! 1. derates nominal productivity by availability and throttling,
//! 2. projects the output target `H` steps ahead of now,
//! 3. converts it to a required fleet size,
//! 4. forecasts the fleet available at that point,
//! 5. orders the gap (plus safety margin), capped by pipeline capacity.

use serde::{Deserialize, Serialize};

/// Per-agent output after availability and throttling losses.
pub fn effective_productivity(nominal: f64, availability: f64, throttle: f64) -> f64 {
    let utilization = 1.0 - throttle.clamp(0.0, 1.0);
    nominal.max(0.0) * availability.clamp(0.0, 1.0) * utilization
}

/// Output expected `horizon` steps past `elapsed`, growing by a factor of
/// `growth_rate` every `growth_duration` steps from `baseline`.
pub fn target_output(
    baseline: f64,
    growth_rate: f64,
    elapsed: u64,
    horizon: u64,
    growth_duration: u64,
) -> f64 {
    if growth_duration == 0 {
        return baseline;
    }
    let exponent = (elapsed + horizon) as f64 / growth_duration as f64;
    baseline * growth_rate.max(0.0).powf(exponent)
}

/// Agents needed to hit `target` at `p_eff` each. Zero when `p_eff` is not
/// positive.
pub fn required_fleet(target: f64, p_eff: f64) -> u32 {
    if p_eff <= 0.0 || target <= 0.0 {
        return 0;
    }
    (target / p_eff).ceil() as u32
}

/// Fleet expected to exist once everything in the pipeline is delivered.
pub fn forecast_fleet(total_built: u32, expected_losses: u32, in_pipeline: u32) -> u32 {
    (total_built as i64 - expected_losses as i64 + in_pipeline as i64).max(0) as u32
}

/// Uncapped order: inflate the requirement by the safety margin, subtract
/// the forecast.
pub fn order_quantity(required: u32, safety_margin: f64, forecast: u32) -> u32 {
    let padded = ((1.0 + safety_margin.max(0.0)) * required as f64).ceil() as i64;
    (padded - forecast as i64).max(0) as u32
}

/// Observed per-step growth exponent `log2(current / baseline) / elapsed`.
/// Returns 0 whenever the ratio or elapsed time is not positive.
pub fn measured_growth_rate(current: f64, baseline: f64, elapsed: u64) -> f64 {
    if elapsed == 0 || current <= 0.0 || baseline <= 0.0 {
        return 0.0;
    }
    (current / baseline).log2() / elapsed as f64
}

/// Everything a single control invocation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthInputs {
    pub nominal_productivity: f64,
    pub availability: f64,
    pub throttle: f64,
    /// Output measured at the start of the growth window.
    pub baseline_output: f64,
    pub growth_rate: f64,
    pub growth_duration: u64,
    /// Steps since the start of the growth window.
    pub elapsed: u64,
    pub horizon: u64,
    pub total_built: u32,
    pub expected_losses: u32,
    pub in_pipeline: u32,
    pub max_pipeline: u32,
    pub safety_margin: f64,
}

/// Result of one control invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDecision {
    pub effective_productivity: f64,
    pub target_output: f64,
    pub required_fleet: u32,
    pub forecast_fleet: u32,
    /// Order before the pipeline cap.
    pub raw_order: u32,
    /// Order after the pipeline cap.
    pub order: u32,
}

impl OrderDecision {
    /// Units that could not be ordered because the pipeline is full.
    pub fn shortfall(&self) -> u32 {
        self.raw_order - self.order
    }
}

/// Run the full sizing pipeline.
pub fn plan_order(inputs: &GrowthInputs) -> OrderDecision {
    let p_eff = effective_productivity(
        inputs.nominal_productivity,
        inputs.availability,
        inputs.throttle,
    );
    let target = target_output(
        inputs.baseline_output,
        inputs.growth_rate,
        inputs.elapsed,
        inputs.horizon,
        inputs.growth_duration,
    );
    let required = required_fleet(target, p_eff);
    let forecast = forecast_fleet(inputs.total_built, inputs.expected_losses, inputs.in_pipeline);
    let raw_order = order_quantity(required, inputs.safety_margin, forecast);
    let capacity = inputs.max_pipeline.saturating_sub(inputs.in_pipeline);

    OrderDecision {
        effective_productivity: p_eff,
        target_output: target,
        required_fleet: required,
        forecast_fleet: forecast,
        raw_order,
        order: raw_order.min(capacity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> GrowthInputs {
        GrowthInputs {
            nominal_productivity: 10.0,
            availability: 1.0,
            throttle: 0.0,
            baseline_output: 100.0,
            growth_rate: 2.0,
            growth_duration: 100,
            elapsed: 0,
            horizon: 100,
            total_built: 10,
            expected_losses: 0,
            in_pipeline: 0,
            max_pipeline: 100,
            safety_margin: 0.0,
        }
    }

    #[test]
    fn test_effective_productivity_derates() {
        assert!((effective_productivity(10.0, 0.5, 0.2) - 4.0).abs() < 1e-9);
        assert_eq!(effective_productivity(10.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_target_doubles_per_duration() {
        assert!((target_output(100.0, 2.0, 0, 100, 100) - 200.0).abs() < 1e-9);
        assert!((target_output(100.0, 2.0, 100, 100, 100) - 400.0).abs() < 1e-9);
        assert_eq!(target_output(100.0, 2.0, 5, 5, 0), 100.0);
    }

    #[test]
    fn test_required_fleet_never_divides_by_zero() {
        assert_eq!(required_fleet(100.0, 0.0), 0);
        assert_eq!(required_fleet(100.0, -1.0), 0);
        assert_eq!(required_fleet(101.0, 10.0), 11);
    }

    #[test]
    fn test_forecast_floors_at_zero() {
        assert_eq!(forecast_fleet(2, 5, 1), 0);
        assert_eq!(forecast_fleet(10, 2, 3), 11);
    }

    #[test]
    fn test_order_quantity_with_margin() {
        assert_eq!(order_quantity(20, 0.5, 10), 20);
        assert_eq!(order_quantity(3, 0.25, 0), 4);
        assert_eq!(order_quantity(20, 0.0, 30), 0);
    }

    #[test]
    fn test_plan_order_doubling() {
        let decision = plan_order(&inputs());
        assert_eq!(decision.required_fleet, 20);
        assert_eq!(decision.forecast_fleet, 10);
        assert_eq!(decision.raw_order, 10);
        assert_eq!(decision.order, 10);
        assert_eq!(decision.shortfall(), 0);
    }

    #[test]
    fn test_plan_order_capped_by_pipeline() {
        let mut i = inputs();
        i.in_pipeline = 2;
        i.max_pipeline = 5;
        let decision = plan_order(&i);
        // forecast = 12, required = 20 -> raw 8, capacity 3
        assert_eq!(decision.raw_order, 8);
        assert_eq!(decision.order, 3);
        assert_eq!(decision.shortfall(), 5);
    }

    #[test]
    fn test_plan_order_with_no_productivity_orders_nothing() {
        let mut i = inputs();
        i.availability = 0.0;
        let decision = plan_order(&i);
        assert_eq!(decision.required_fleet, 0);
        assert_eq!(decision.order, 0);
    }

    #[test]
    fn test_measured_growth_rate_guards() {
        assert_eq!(measured_growth_rate(0.0, 10.0, 5), 0.0);
        assert_eq!(measured_growth_rate(10.0, 0.0, 5), 0.0);
        assert_eq!(measured_growth_rate(10.0, 5.0, 0), 0.0);
        assert!((measured_growth_rate(40.0, 10.0, 4) - 0.5).abs() < 1e-9);
    }
}
