//! Manufacturing sector - ISRU robots working against stock buffer targets
//!
//! Each step the sector first serves buffered resource requests from other
//! sectors, then staffs the production tasks whose outputs are furthest
//! below their buffer minimum, runs the staffed robots within the power
//! budget, and finally applies every queued stock flow in one pass.

use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::{Sector, SectorKind, SectorMetrics, Throttleable};
use crate::config::ManufacturingConfig;
use crate::evaluation::metric_ids;
use crate::event_bus::{Event, EventBus, EventType, Inbox, InboxOrder};
use crate::stock::{FlowQueue, ResourceStock, StockFlow};

/// An ISRU robot. `mode` is `None` while the robot is inactive.
#[derive(Debug, Clone, PartialEq)]
pub struct IsruRobot {
    pub id: u32,
    pub mode: Option<String>,
}

impl IsruRobot {
    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }
}

/// A resource request from another sector awaiting stock
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub requesting_sector: SectorKind,
    pub resource: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
struct StepLedger {
    produced: f64,
    dust: f64,
    power_used: f64,
    robots_working: u32,
    robots_throttled: u32,
    allocated: f64,
}

pub struct ManufacturingSector {
    config: ManufacturingConfig,
    bus: Arc<EventBus>,
    inbox: Inbox,
    stock: ResourceStock,
    flows: FlowQueue,
    pending: VecDeque<PendingRequest>,
    robots: Vec<IsruRobot>,
    throttle: f64,
    active: bool,
    rng: StdRng,
    ledger: StepLedger,
}

impl ManufacturingSector {
    pub fn new(config: &ManufacturingConfig, bus: Arc<EventBus>, seed: u64) -> Self {
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::ResourceRequest, |_| true);
        Self {
            config: config.clone(),
            bus,
            inbox,
            stock: ResourceStock::from_levels(&config.default_stock, &config.initial_stock),
            flows: FlowQueue::new(),
            pending: VecDeque::new(),
            robots: (0..config.robots)
                .map(|id| IsruRobot { id, mode: None })
                .collect(),
            throttle: 0.0,
            active: true,
            rng: SectorKind::Manufacturing.rng(seed),
            ledger: StepLedger::default(),
        }
    }

    pub fn stock(&self) -> &ResourceStock {
        &self.stock
    }

    pub fn robots(&self) -> &[IsruRobot] {
        &self.robots
    }

    pub fn pending_requests(&self) -> &VecDeque<PendingRequest> {
        &self.pending
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Overwrite stock levels, e.g. from a snapshot.
    pub fn restore_stock(&mut self, levels: &BTreeMap<String, f64>) {
        self.stock = ResourceStock::from_levels(levels, &BTreeMap::new());
    }

    /// Tasks below their buffer minimum, most deficient first
    pub fn task_deficiencies(&self) -> Vec<(String, f64)> {
        let mut deficiencies: Vec<(String, f64)> = self
            .config
            .tasks
            .iter()
            .filter_map(|task| {
                let output = task.primary_output.as_ref()?;
                let target = self.config.buffer_targets.get(output)?;
                let deficiency = target.deficiency(self.stock.get(output));
                (deficiency > 0.0).then(|| (task.id.clone(), deficiency))
            })
            .collect();
        deficiencies.sort_by(|a, b| b.1.total_cmp(&a.1));
        deficiencies
    }

    fn collect_requests(&mut self) {
        for event in self.inbox.drain(InboxOrder::Fifo) {
            if let Event::ResourceRequest {
                requesting_sector,
                resource,
                amount,
            } = event
            {
                if amount <= 0.0 {
                    log::warn!(
                        "Ignoring {} request for {} {}: amount must be positive",
                        requesting_sector, amount, resource
                    );
                    continue;
                }
                self.pending.push_back(PendingRequest {
                    requesting_sector,
                    resource,
                    amount,
                });
            }
        }
    }

    /// One fulfilment attempt per buffered request, oldest first. Returns
    /// the stock committed to allocations this step.
    fn fulfil_requests(&mut self) -> BTreeMap<String, f64> {
        let mut reserved: BTreeMap<String, f64> = BTreeMap::new();
        let mut waiting = VecDeque::new();
        for request in self.pending.drain(..) {
            let held = reserved.get(&request.resource).copied().unwrap_or(0.0);
            if self.stock.get(&request.resource) - held >= request.amount {
                *reserved.entry(request.resource.clone()).or_insert(0.0) += request.amount;
                self.flows.push(
                    StockFlow::new(format!("request:{}", request.requesting_sector)).allocate(
                        &request.resource,
                        request.requesting_sector,
                        request.amount,
                    ),
                );
            } else {
                log::debug!(
                    "Not enough {} for {} ({:.1} requested)",
                    request.resource, request.requesting_sector, request.amount
                );
                waiting.push_back(request);
            }
        }
        self.pending = waiting;
        reserved
    }

    /// One robot per deficient task, highest deficiency first; the rest idle.
    fn assign_tasks(&mut self) {
        let modes: Vec<String> = self
            .task_deficiencies()
            .into_iter()
            .filter_map(|(task_id, _)| {
                self.config
                    .tasks
                    .iter()
                    .find(|t| t.id == task_id)
                    .map(|t| t.mode.clone())
            })
            .collect();
        let mut modes = modes.into_iter();
        for robot in &mut self.robots {
            robot.mode = modes.next();
        }
    }

    fn deactivate_robots(&mut self) {
        for robot in &mut self.robots {
            robot.mode = None;
        }
    }

    fn apply_flows(&mut self) {
        let applied = self
            .flows
            .apply_all(&mut self.stock, &self.bus, SectorKind::Manufacturing);
        self.ledger.produced = applied.total_generated();
        self.ledger.allocated = applied.allocated.values().sum();
    }
}

impl Sector for ManufacturingSector {
    fn kind(&self) -> SectorKind {
        SectorKind::Manufacturing
    }

    fn power_demand(&self) -> f64 {
        if !self.active {
            return 0.0;
        }
        let deficient = self.task_deficiencies();
        deficient
            .iter()
            .take(self.robots.len())
            .filter_map(|(task_id, _)| {
                let task = self.config.tasks.iter().find(|t| &t.id == task_id)?;
                self.config.modes.get(&task.mode).map(|m| m.power_kw)
            })
            .sum()
    }

    fn step(&mut self, allocated_power: f64) -> f64 {
        self.ledger = StepLedger::default();
        self.collect_requests();
        let reserved = self.fulfil_requests();

        if allocated_power <= 0.0 || !self.active {
            self.deactivate_robots();
            // Allocations already promised still leave this step
            self.apply_flows();
            return 0.0;
        }

        self.assign_tasks();

        let mut budget = allocated_power;
        let mut committed = reserved;
        let mut robot_flows = Vec::new();
        for robot in &self.robots {
            let Some(mode_name) = &robot.mode else {
                continue;
            };
            if self.rng.gen::<f64>() < self.throttle {
                self.ledger.robots_throttled += 1;
                continue;
            }
            let Some(mode) = self.config.modes.get(mode_name) else {
                log::warn!("Robot {} assigned unknown mode {}", robot.id, mode_name);
                continue;
            };
            if mode.power_kw > budget {
                log::debug!(
                    "Robot {} skipped: needs {:.1} kW, {:.1} kW left",
                    robot.id, mode.power_kw, budget
                );
                continue;
            }
            let inputs_available = mode.consumes.iter().all(|(resource, amount)| {
                let held = committed.get(resource).copied().unwrap_or(0.0);
                self.stock.get(resource) - held >= *amount
            });
            if !inputs_available {
                log::debug!("Robot {} idle: inputs for {} unavailable", robot.id, mode_name);
                continue;
            }

            let mut flow = StockFlow::new(format!("isru-{}", robot.id));
            for (resource, amount) in &mode.consumes {
                *committed.entry(resource.clone()).or_insert(0.0) += amount;
                flow = flow.consume(resource, *amount);
            }
            for (resource, amount) in &mode.generates {
                flow = flow.generate(resource, *amount);
            }
            robot_flows.push(flow);
            budget -= mode.power_kw;
            self.ledger.dust += mode.dust_per_step;
            self.ledger.robots_working += 1;
        }
        for flow in robot_flows {
            self.flows.push(flow);
        }

        self.apply_flows();
        self.ledger.power_used = allocated_power - budget;
        self.ledger.power_used
    }

    fn metrics(&self) -> SectorMetrics {
        let mut metrics = SectorMetrics::new(SectorKind::Manufacturing)
            .value("robots_working", self.ledger.robots_working as f64)
            .value("robots_throttled", self.ledger.robots_throttled as f64)
            .value("power_used_kw", self.ledger.power_used)
            .value("allocated_out", self.ledger.allocated)
            .value("pending_requests", self.pending.len() as f64)
            .value("throttle", self.throttle);
        for (resource, amount) in self.stock.levels() {
            metrics = metrics.value(format!("stock.{}", resource), *amount);
        }
        metrics
            .contribute(metric_ids::RESOURCE_OUTPUT, self.ledger.produced)
            .contribute(metric_ids::DUST_COVERAGE, self.ledger.dust)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        self.stock.levels().clone()
    }

    fn restore_levels(&mut self, levels: &BTreeMap<String, f64>) {
        self.restore_stock(levels);
    }

    fn as_throttleable(&mut self) -> Option<&mut dyn Throttleable> {
        Some(self)
    }
}

impl Throttleable for ManufacturingSector {
    fn set_throttle_factor(&mut self, factor: f64) {
        self.throttle = factor.clamp(0.0, 1.0);
    }

    fn throttle_factor(&self) -> f64 {
        self.throttle
    }
}
