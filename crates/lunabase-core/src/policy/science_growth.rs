//! Science fleet growth trigger
//!
//! Does not change any sector state itself. Every `cadence_steps` ticks it
//! asks the science sector to run its growth controller.

use super::{Policy, PolicyContext, PolicyError, PolicyOutcome};
use crate::evaluation::EvaluationResult;
use crate::sectors::SectorKind;

pub struct ScienceGrowthPolicy {
    id: String,
    name: String,
    enabled: bool,
    metric_id: String,
    cadence_steps: u64,
}

impl ScienceGrowthPolicy {
    pub fn new(id: &str, name: &str, enabled: bool, metric_id: &str, cadence_steps: u64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled,
            metric_id: metric_id.to_string(),
            cadence_steps: cadence_steps.max(1),
        }
    }

    fn is_due(&self, step: u64) -> bool {
        step % self.cadence_steps == 0
    }
}

impl Policy for ScienceGrowthPolicy {
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
        let output = result
            .current(&self.metric_id)
            .ok_or_else(|| PolicyError::MissingMetric(self.metric_id.clone()))?;
        if !self.is_due(ctx.step) {
            let next_step = (ctx.step / self.cadence_steps + 1) * self.cadence_steps;
            return Ok(PolicyOutcome::Idle { next_step });
        }

        let sector = ctx
            .sectors
            .get_mut(SectorKind::Science)
            .ok_or(PolicyError::MissingSector(SectorKind::Science))?;
        let controller = sector
            .as_growth_controlled()
            .ok_or(PolicyError::NotGrowthControlled(SectorKind::Science))?;
        let decision = controller.control_growth_rate();
        log::debug!(
            "{}: science output {:.1}, ordered {} rover(s)",
            self.id, output, decision.order
        );
        Ok(PolicyOutcome::GrowthControl { decision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sectors::SectorRegistry;
    use std::collections::BTreeMap;

    fn result_with(metric: &str, value: f64) -> EvaluationResult {
        EvaluationResult {
            step: 1,
            metrics: BTreeMap::from([(metric.to_string(), value)]),
            reports: BTreeMap::new(),
            deltas: BTreeMap::new(),
        }
    }

    #[test]
    fn test_waits_for_cadence() {
        let mut policy = ScienceGrowthPolicy::new("p", "p", true, "IND-SCI-OUT", 24);
        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 5, sectors: &mut sectors };
        assert_eq!(
            policy.apply(&mut ctx, &result_with("IND-SCI-OUT", 1.0)),
            Ok(PolicyOutcome::Idle { next_step: 24 })
        );
    }

    #[test]
    fn test_missing_science_sector_is_an_error() {
        let mut policy = ScienceGrowthPolicy::new("p", "p", true, "IND-SCI-OUT", 24);
        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 24, sectors: &mut sectors };
        assert_eq!(
            policy.apply(&mut ctx, &result_with("IND-SCI-OUT", 1.0)),
            Err(PolicyError::MissingSector(SectorKind::Science))
        );
    }

    #[test]
    fn test_missing_metric_is_an_error() {
        let mut policy = ScienceGrowthPolicy::new("p", "p", true, "IND-SCI-OUT", 24);
        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 24, sectors: &mut sectors };
        assert_eq!(
            policy.apply(&mut ctx, &result_with("IND-OTHER", 1.0)),
            Err(PolicyError::MissingMetric("IND-SCI-OUT".into()))
        );
    }
}
