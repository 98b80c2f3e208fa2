//! Policy engine - closed-loop control on top of the evaluation result
//!
//! Policies run once per tick, after evaluation, in registration order. Each
//! returns a [`PolicyOutcome`]; a policy that fails or panics is recorded as
//! a [`PolicyOutcome::Error`] entry and the remaining policies still run.

pub mod dust_throttle;
pub mod science_growth;

pub use dust_throttle::DustThrottlePolicy;
pub use science_growth::ScienceGrowthPolicy;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

use crate::config::PolicyConfig;
use crate::evaluation::EvaluationResult;
use crate::sectors::{SectorKind, SectorRegistry};
use lunabase_logic::growth::OrderDecision;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("metric {0} not present in evaluation result")]
    MissingMetric(String),
    #[error("no goal registered for metric {0}")]
    MissingGoal(String),
    #[error("sector {0} not registered")]
    MissingSector(SectorKind),
    #[error("sector {0} cannot be throttled")]
    NotThrottleable(SectorKind),
    #[error("sector {0} has no growth controller")]
    NotGrowthControlled(SectorKind),
}

/// What a policy did this tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyOutcome {
    Throttle {
        factor: f64,
        sectors: Vec<SectorKind>,
    },
    GrowthControl {
        decision: OrderDecision,
    },
    /// Nothing to do this tick
    Idle {
        next_step: u64,
    },
    Error {
        message: String,
    },
}

/// What a policy may touch while it runs
pub struct PolicyContext<'a> {
    /// Tick being evaluated
    pub step: u64,
    pub sectors: &'a mut SectorRegistry,
}

pub trait Policy {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
    fn apply(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        result: &EvaluationResult,
    ) -> Result<PolicyOutcome, PolicyError>;
}

#[derive(Default)]
pub struct PolicyEngine {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[PolicyConfig]) -> Self {
        let mut engine = Self::new();
        for config in configs {
            match config {
                PolicyConfig::DustThrottle {
                    id,
                    name,
                    enabled,
                    metric_id,
                    start_ratio,
                    max_throttle,
                    sectors,
                } => engine.register(Box::new(DustThrottlePolicy::new(
                    id,
                    name,
                    *enabled,
                    metric_id,
                    *start_ratio,
                    *max_throttle,
                    sectors.clone(),
                ))),
                PolicyConfig::ScienceGrowth {
                    id,
                    name,
                    enabled,
                    metric_id,
                    cadence_steps,
                } => engine.register(Box::new(ScienceGrowthPolicy::new(
                    id,
                    name,
                    *enabled,
                    metric_id,
                    *cadence_steps,
                ))),
            }
        }
        engine
    }

    pub fn register(&mut self, policy: Box<dyn Policy>) {
        self.policies.push(policy);
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.id().to_string()).collect()
    }

    /// Enable or disable a policy by id. Returns false for unknown ids.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.policies.iter_mut().find(|p| p.id() == id) {
            Some(policy) => {
                policy.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Run every enabled policy. Outcomes are keyed by policy id.
    pub fn apply_policies(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        result: &EvaluationResult,
    ) -> BTreeMap<String, PolicyOutcome> {
        let mut outcomes = BTreeMap::new();
        for policy in self.policies.iter_mut().filter(|p| p.enabled()) {
            let outcome = match catch_unwind(AssertUnwindSafe(|| policy.apply(ctx, result))) {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    log::warn!("Policy {} failed: {}", policy.id(), e);
                    PolicyOutcome::Error {
                        message: e.to_string(),
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::warn!("Policy {} panicked: {}", policy.id(), message);
                    PolicyOutcome::Error {
                        message: format!("panicked: {}", message),
                    }
                }
            };
            outcomes.insert(policy.id().to_string(), outcome);
        }
        outcomes
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Policy for Failing {
        fn id(&self) -> &str {
            "failing"
        }
        fn name(&self) -> &str {
            "Always fails"
        }
        fn enabled(&self) -> bool {
            true
        }
        fn set_enabled(&mut self, _enabled: bool) {}
        fn apply(
            &mut self,
            _ctx: &mut PolicyContext<'_>,
            _result: &EvaluationResult,
        ) -> Result<PolicyOutcome, PolicyError> {
            Err(PolicyError::MissingMetric("IND-NOPE".into()))
        }
    }

    struct Counter {
        runs: u32,
        enabled: bool,
    }

    impl Policy for Counter {
        fn id(&self) -> &str {
            "counter"
        }
        fn name(&self) -> &str {
            "Counts runs"
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
            _result: &EvaluationResult,
        ) -> Result<PolicyOutcome, PolicyError> {
            self.runs += 1;
            Ok(PolicyOutcome::Idle { next_step: ctx.step + 1 })
        }
    }

    fn empty_result() -> EvaluationResult {
        EvaluationResult {
            step: 1,
            metrics: BTreeMap::new(),
            reports: BTreeMap::new(),
            deltas: BTreeMap::new(),
        }
    }

    #[test]
    fn test_failing_policy_does_not_block_others() {
        let mut engine = PolicyEngine::new();
        engine.register(Box::new(Failing));
        engine.register(Box::new(Counter { runs: 0, enabled: true }));

        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 1, sectors: &mut sectors };
        let outcomes = engine.apply_policies(&mut ctx, &empty_result());

        assert!(matches!(outcomes["failing"], PolicyOutcome::Error { .. }));
        assert_eq!(outcomes["counter"], PolicyOutcome::Idle { next_step: 2 });
    }

    struct Panicky;

    impl Policy for Panicky {
        fn id(&self) -> &str {
            "panicky"
        }
        fn name(&self) -> &str {
            "Always panics"
        }
        fn enabled(&self) -> bool {
            true
        }
        fn set_enabled(&mut self, _enabled: bool) {}
        fn apply(
            &mut self,
            _ctx: &mut PolicyContext<'_>,
            _result: &EvaluationResult,
        ) -> Result<PolicyOutcome, PolicyError> {
            panic!("metric table corrupted");
        }
    }

    #[test]
    fn test_panicking_policy_does_not_block_others() {
        let mut engine = PolicyEngine::new();
        engine.register(Box::new(Panicky));
        engine.register(Box::new(Counter { runs: 0, enabled: true }));

        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 1, sectors: &mut sectors };
        let outcomes = engine.apply_policies(&mut ctx, &empty_result());

        match &outcomes["panicky"] {
            PolicyOutcome::Error { message } => assert!(message.contains("metric table corrupted")),
            other => panic!("expected an error outcome, got {:?}", other),
        }
        assert_eq!(outcomes["counter"], PolicyOutcome::Idle { next_step: 2 });
    }

    #[test]
    fn test_disabled_policy_is_skipped() {
        let mut engine = PolicyEngine::new();
        engine.register(Box::new(Counter { runs: 0, enabled: true }));
        assert!(engine.set_enabled("counter", false));
        assert!(!engine.set_enabled("missing", false));

        let mut sectors = SectorRegistry::new();
        let mut ctx = PolicyContext { step: 1, sectors: &mut sectors };
        assert!(engine.apply_policies(&mut ctx, &empty_result()).is_empty());
    }

    #[test]
    fn test_from_config_registers_in_order() {
        let config = crate::config::SimulationConfig::default();
        let engine = PolicyEngine::from_config(&config.policies);
        assert_eq!(engine.ids(), vec!["POL-DUST-THROTTLE", "POL-SCI-GROWTH"]);
    }
}
