//! Dust coverage throttle
//!
//! Slows dust-raising sectors down as dust coverage approaches its goal.
//! Below `target × start_ratio` nothing is throttled; from there the factor
//! ramps linearly to `max_throttle` at the target and stays there above it.

use super::{Policy, PolicyContext, PolicyError, PolicyOutcome};
use crate::evaluation::EvaluationResult;
use crate::sectors::SectorKind;

/// Throttle factor for `current` against a dust `target`.
pub fn throttle_for(current: f64, target: f64, start_ratio: f64, max_throttle: f64) -> f64 {
    let max_throttle = max_throttle.clamp(0.0, 1.0);
    let start = target * start_ratio;
    if current < start {
        return 0.0;
    }
    let band = target - start;
    if band <= 0.0 {
        return max_throttle;
    }
    (max_throttle * (current - start) / band).clamp(0.0, max_throttle)
}

pub struct DustThrottlePolicy {
    id: String,
    name: String,
    enabled: bool,
    metric_id: String,
    start_ratio: f64,
    max_throttle: f64,
    sectors: Vec<SectorKind>,
}

impl DustThrottlePolicy {
    pub fn new(
        id: &str,
        name: &str,
        enabled: bool,
        metric_id: &str,
        start_ratio: f64,
        max_throttle: f64,
        sectors: Vec<SectorKind>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled,
            metric_id: metric_id.to_string(),
            start_ratio,
            max_throttle,
            sectors,
        }
    }
}

impl Policy for DustThrottlePolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn apply(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        result: &EvaluationResult,
    ) -> Result<PolicyOutcome, PolicyError> {
        let current = result
            .current(&self.metric_id)
            .ok_or_else(|| PolicyError::MissingMetric(self.metric_id.clone()))?;
        let goal = result
            .goal(&self.metric_id)
            .ok_or_else(|| PolicyError::MissingGoal(self.metric_id.clone()))?;

        let factor = throttle_for(current, goal.target, self.start_ratio, self.max_throttle);
        let mut applied = Vec::with_capacity(self.sectors.len());
        for kind in &self.sectors {
            let Some(sector) = ctx.sectors.get_mut(*kind) else {
                log::warn!("{}: sector {} not registered", self.id, kind);
                continue;
            };
            match sector.as_throttleable() {
                Some(throttleable) => {
                    throttleable.set_throttle_factor(factor);
                    applied.push(*kind);
                }
                None => log::warn!("{}: sector {} cannot be throttled", self.id, kind),
            }
        }
        if factor > 0.0 {
            log::debug!("{}: dust {:.3} of {:.3}, throttle {:.2}", self.id, current, goal.target, factor);
        }
        Ok(PolicyOutcome::Throttle {
            factor,
            sectors: applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_ramp() {
        assert_eq!(throttle_for(0.69, 1.0, 0.7, 0.8), 0.0);
        assert!((throttle_for(1.0, 1.0, 0.7, 0.8) - 0.8).abs() < 1e-9);
        assert!((throttle_for(0.85, 1.0, 0.7, 0.8) - 0.4).abs() < 1e-9);
        assert!((throttle_for(3.0, 1.0, 0.7, 0.8) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_target_throttles_fully_at_any_dust() {
        assert_eq!(throttle_for(0.0, 0.0, 0.7, 0.5), 0.5);
    }
}
