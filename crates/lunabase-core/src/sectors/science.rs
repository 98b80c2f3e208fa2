//! Science sector - exploring rovers and fleet growth control
//!
//! Rovers alternate between exploring (producing science, draining their
//! battery) and charging at the base. The sector sizes its own fleet with a
//! receding-horizon controller: when triggered it projects the science
//! output target a few steps ahead and orders enough new rovers from
//! construction to meet it.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::{GrowthControlled, Sector, SectorKind, SectorMetrics, Throttleable};
use crate::config::{OrderBatching, RoverConfig, ScienceConfig};
use crate::evaluation::metric_ids;
use crate::event_bus::{Event, EventBus, EventType, Inbox, InboxOrder};
use lunabase_logic::battery::Battery;
use lunabase_logic::growth::{measured_growth_rate, plan_order, GrowthInputs, OrderDecision};

/// Smoothing applied to the per-step output before it enters the history
const OUTPUT_SMOOTHING: f64 = 1.0 / 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoverState {
    Exploring,
    Charging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rover {
    pub id: u32,
    pub battery: Battery,
    pub state: RoverState,
}

impl Rover {
    fn new(id: u32, config: &RoverConfig) -> Self {
        Self {
            id,
            battery: Battery::new(
                config.battery_capacity_kwh,
                1.0,
                config.charge_rate_kw,
                config.charge_rate_kw,
            ),
            state: RoverState::Exploring,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StepLedger {
    science: f64,
    dust: f64,
    charged: f64,
}

pub struct ScienceSector {
    config: ScienceConfig,
    bus: Arc<EventBus>,
    inbox: Inbox,
    rovers: Vec<Rover>,
    next_rover_id: u32,
    throttle: f64,
    rng: StdRng,
    step: u64,
    cumulative_output: f64,
    /// Smoothed output rate per step
    output_rate: Option<f64>,
    /// (step, smoothed output rate), windowed to twice the growth duration
    history: VecDeque<(u64, f64)>,
    growth_rate: f64,
    in_pipeline: u32,
    total_built: u32,
    ledger: StepLedger,
}

impl ScienceSector {
    pub fn new(config: &ScienceConfig, bus: Arc<EventBus>, seed: u64) -> Self {
        let inbox = Inbox::new();
        let rover_module = config.rover_module.clone();
        inbox.subscribe(&bus, EventType::ModuleCreated, move |event| {
            matches!(event, Event::ModuleCreated { requesting_sector: SectorKind::Science, module_type, .. }
                if *module_type == rover_module)
        });
        let rovers = (0..config.initial_rovers)
            .map(|id| Rover::new(id, &config.rover))
            .collect();
        Self {
            config: config.clone(),
            bus,
            inbox,
            rovers,
            next_rover_id: config.initial_rovers,
            throttle: 0.0,
            rng: SectorKind::Science.rng(seed),
            step: 0,
            cumulative_output: 0.0,
            output_rate: None,
            history: VecDeque::new(),
            growth_rate: 0.0,
            in_pipeline: 0,
            total_built: config.initial_rovers,
            ledger: StepLedger::default(),
        }
    }

    pub fn rovers(&self) -> &[Rover] {
        &self.rovers
    }

    pub fn in_pipeline(&self) -> u32 {
        self.in_pipeline
    }

    pub fn total_built(&self) -> u32 {
        self.total_built
    }

    pub fn cumulative_output(&self) -> f64 {
        self.cumulative_output
    }

    /// Latest measured growth exponent per step
    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    pub fn history(&self) -> &VecDeque<(u64, f64)> {
        &self.history
    }

    /// Fraction of the fleet out exploring
    pub fn availability(&self) -> f64 {
        if self.rovers.is_empty() {
            return 0.0;
        }
        let exploring = self
            .rovers
            .iter()
            .filter(|r| r.state == RoverState::Exploring)
            .count();
        exploring as f64 / self.rovers.len() as f64
    }

    fn add_rover(&mut self) {
        let rover = Rover::new(self.next_rover_id, &self.config.rover);
        self.next_rover_id += 1;
        self.rovers.push(rover);
    }

    fn handle_events(&mut self) {
        for event in self.inbox.drain(InboxOrder::Fifo) {
            if let Event::ModuleCreated { request_id, .. } = event {
                self.in_pipeline = self.in_pipeline.saturating_sub(1);
                self.total_built += 1;
                self.add_rover();
                log::info!(
                    "Rover delivered (request {}); fleet {} with {} on order",
                    request_id,
                    self.rovers.len(),
                    self.in_pipeline
                );
            }
        }
    }

    /// Baseline output at the start of the growth window, and the steps
    /// elapsed since then. The window opens `growth_duration` steps back, or
    /// at the oldest history entry early in a run.
    fn growth_window(&self) -> (f64, u64) {
        let duration = self.config.growth.growth_duration_steps;
        let start = self.step.saturating_sub(duration);
        match self.history.iter().find(|(step, _)| *step >= start) {
            Some((step, output)) => (*output, self.step - step),
            None => (0.0, 0),
        }
    }

    fn record_output(&mut self, produced: f64) {
        self.cumulative_output += produced;
        let rate = match self.output_rate {
            Some(rate) => rate + OUTPUT_SMOOTHING * (produced - rate),
            None => produced,
        };
        self.output_rate = Some(rate);
        self.history.push_back((self.step, rate));

        let keep = self.config.growth.growth_duration_steps.saturating_mul(2);
        while let Some((oldest, _)) = self.history.front() {
            if self.step - oldest > keep {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let (baseline, elapsed) = self.growth_window();
        self.growth_rate = measured_growth_rate(rate, baseline, elapsed);
    }

    fn place_order(&mut self, quantity: u32) {
        self.in_pipeline += quantity;
        let requests = match self.config.order_batching {
            OrderBatching::PerUnit => quantity,
            OrderBatching::SingleRequest => 1,
        };
        for _ in 0..requests {
            self.bus.publish(Event::ConstructionRequest {
                requesting_sector: SectorKind::Science,
                module_type: self.config.rover_module.clone(),
            });
        }
        log::info!(
            "Ordered {} rover(s) in {} request(s); {} in pipeline",
            quantity, requests, self.in_pipeline
        );
    }

    /// Restore counters and the fleet size from a snapshot.
    pub fn restore(&mut self, rovers: u32, total_built: u32, in_pipeline: u32, cumulative_output: f64) {
        self.rovers.clear();
        self.next_rover_id = 0;
        for _ in 0..rovers {
            self.add_rover();
        }
        self.total_built = total_built;
        self.in_pipeline = in_pipeline;
        self.cumulative_output = cumulative_output;
    }
}

impl Sector for ScienceSector {
    fn kind(&self) -> SectorKind {
        SectorKind::Science
    }

    fn power_demand(&self) -> f64 {
        self.rovers
            .iter()
            .filter(|r| r.state == RoverState::Charging)
            .map(|r| r.battery.charge_headroom())
            .sum()
    }

    fn step(&mut self, allocated_power: f64) -> f64 {
        self.ledger = StepLedger::default();
        self.handle_events();
        self.step += 1;

        let rover_config = &self.config.rover;
        let mut budget = allocated_power.max(0.0);
        for rover in &mut self.rovers {
            match rover.state {
                RoverState::Charging => {
                    let accepted = rover.battery.charge(budget);
                    budget -= accepted;
                    self.ledger.charged += accepted;
                    if rover.battery.is_full() {
                        rover.state = RoverState::Exploring;
                    }
                }
                RoverState::Exploring => {
                    if self.rng.gen::<f64>() < self.throttle {
                        continue;
                    }
                    let drawn = rover.battery.drain(rover_config.drive_draw_kwh);
                    if drawn + f64::EPSILON < rover_config.drive_draw_kwh {
                        rover.state = RoverState::Charging;
                        continue;
                    }
                    self.ledger.science += rover_config.productivity;
                    self.ledger.dust += rover_config.dust_per_step;
                    if rover.battery.state_of_charge() < rover_config.low_battery_fraction {
                        rover.state = RoverState::Charging;
                    }
                }
            }
        }

        let produced = self.ledger.science;
        self.record_output(produced);
        self.ledger.charged
    }

    fn metrics(&self) -> SectorMetrics {
        SectorMetrics::new(SectorKind::Science)
            .value("rovers", self.rovers.len() as f64)
            .value("availability", self.availability())
            .value("in_pipeline", self.in_pipeline as f64)
            .value("total_built", self.total_built as f64)
            .value("output_rate", self.output_rate.unwrap_or(0.0))
            .value("growth_rate", self.growth_rate)
            .value("throttle", self.throttle)
            .contribute(metric_ids::SCIENCE_OUTPUT, self.ledger.science)
            .contribute(metric_ids::DUST_COVERAGE, self.ledger.dust)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("rovers".to_string(), self.rovers.len() as f64),
            ("total_built".to_string(), self.total_built as f64),
            ("in_pipeline".to_string(), self.in_pipeline as f64),
            ("cumulative_output".to_string(), self.cumulative_output),
        ])
    }

    fn restore_levels(&mut self, levels: &BTreeMap<String, f64>) {
        let count = |key: &str| levels.get(key).copied().unwrap_or(0.0).max(0.0) as u32;
        self.restore(
            count("rovers"),
            count("total_built"),
            count("in_pipeline"),
            levels.get("cumulative_output").copied().unwrap_or(0.0),
        );
    }

    fn as_throttleable(&mut self) -> Option<&mut dyn Throttleable> {
        Some(self)
    }

    fn as_growth_controlled(&mut self) -> Option<&mut dyn GrowthControlled> {
        Some(self)
    }
}

impl Throttleable for ScienceSector {
    fn set_throttle_factor(&mut self, factor: f64) {
        self.throttle = factor.clamp(0.0, 1.0);
    }

    fn throttle_factor(&self) -> f64 {
        self.throttle
    }
}

impl GrowthControlled for ScienceSector {
    fn control_growth_rate(&mut self) -> OrderDecision {
        let growth = &self.config.growth;
        let (baseline, elapsed) = self.growth_window();
        let inputs = GrowthInputs {
            nominal_productivity: self.config.rover.productivity,
            availability: self.availability(),
            throttle: self.throttle,
            baseline_output: baseline,
            growth_rate: growth.growth_rate,
            growth_duration: growth.growth_duration_steps,
            elapsed,
            horizon: growth.horizon_steps,
            total_built: self.total_built,
            expected_losses: (self.total_built as f64 * growth.expected_loss_fraction).floor() as u32,
            in_pipeline: self.in_pipeline,
            max_pipeline: growth.max_pipeline,
            safety_margin: growth.safety_margin,
        };
        let decision = plan_order(&inputs);
        log::debug!(
            "Growth control: target {:.2}/step, need {} rovers, forecast {}",
            decision.target_output, decision.required_fleet, decision.forecast_fleet
        );
        if decision.shortfall() > 0 {
            log::warn!(
                "Rover pipeline full: {} of {} ordered rovers deferred",
                decision.shortfall(),
                decision.raw_order
            );
        }
        if decision.order > 0 {
            self.place_order(decision.order);
        }
        decision
    }
}
