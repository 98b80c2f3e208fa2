//! Construction sector - shell printing and module assembly
//!
//! Printers turn regolith into shells, kept in a capacity-bounded buffer
//! shared by every project. Module requests arrive as
//! `ConstructionRequest` events and are worked in arrival order, at most
//! `max_concurrent_projects` at a time. A project starts once its shells
//! and equipment are on hand and an assembly robot is idle; starting
//! reserves all three together.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::{Replenisher, Sector, SectorKind, SectorMetrics, Throttleable};
use crate::config::{ConstructionConfig, ModuleSpec};
use crate::evaluation::metric_ids;
use crate::event_bus::{Event, EventBus, EventType, Inbox, InboxOrder};
use crate::stock::{FlowQueue, ResourceStock, StockFlow};

pub const REGOLITH: &str = "regolith";
pub const SHELL: &str = "shell";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("module {0} needs at least one shell")]
    ZeroShells(String),
    #[error("unknown module type {0}")]
    UnknownModule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructionRequest {
    pub id: u64,
    pub requesting_sector: SectorKind,
    pub module_type: String,
    pub shells_needed: u32,
    pub equipment_needed: BTreeMap<String, u32>,
    pub build_steps: u32,
    pub status: RequestStatus,
    /// Index of the assembly robot working this request
    pub assigned_robot: Option<usize>,
    /// Missing equipment has been requested for this request
    pub equipment_requested: bool,
}

impl ConstructionRequest {
    pub fn new(
        id: u64,
        requesting_sector: SectorKind,
        module_type: &str,
        spec: &ModuleSpec,
    ) -> Result<Self, ConstructionError> {
        if spec.shells == 0 {
            return Err(ConstructionError::ZeroShells(module_type.to_string()));
        }
        Ok(Self {
            id,
            requesting_sector,
            module_type: module_type.to_string(),
            shells_needed: spec.shells,
            equipment_needed: spec.equipment.clone(),
            build_steps: spec.build_steps.max(1),
            status: RequestStatus::Queued,
            assigned_robot: None,
            equipment_requested: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AssemblyJob {
    request_id: u64,
    remaining_steps: u32,
}

/// Assembles one module at a time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyRobot {
    job: Option<AssemblyJob>,
}

impl AssemblyRobot {
    pub fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    /// Take on `request_id`. Refused if already busy.
    pub fn begin(&mut self, request_id: u64, build_steps: u32) -> bool {
        if self.job.is_some() {
            return false;
        }
        self.job = Some(AssemblyJob {
            request_id,
            remaining_steps: build_steps.max(1),
        });
        true
    }

    /// Work one step. Returns the request id when the module is finished.
    pub fn advance(&mut self) -> Option<u64> {
        let job = self.job.as_mut()?;
        job.remaining_steps = job.remaining_steps.saturating_sub(1);
        if job.remaining_steps > 0 {
            return None;
        }
        let finished = job.request_id;
        self.job = None;
        Some(finished)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Printer {
    progress: u32,
}

#[derive(Debug, Clone, Default)]
struct StepLedger {
    modules_built: u32,
    shells_printed: f64,
    dust: f64,
    projects_started: u32,
}

pub struct ConstructionSector {
    config: ConstructionConfig,
    bus: Arc<EventBus>,
    inbox: Inbox,
    requests: Vec<ConstructionRequest>,
    next_request_id: u64,
    stock: ResourceStock,
    equipment: BTreeMap<String, u32>,
    flows: FlowQueue,
    replenisher: Replenisher,
    printers: Vec<Printer>,
    assemblers: Vec<AssemblyRobot>,
    throttle: f64,
    rng: StdRng,
    modules_completed: u64,
    ledger: StepLedger,
}

impl ConstructionSector {
    pub fn new(config: &ConstructionConfig, bus: Arc<EventBus>, seed: u64) -> Self {
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::ConstructionRequest, |_| true);
        inbox.subscribe(&bus, EventType::ResourceAllocated, |event| {
            matches!(event, Event::ResourceAllocated { recipient: SectorKind::Construction, .. })
        });
        inbox.subscribe(&bus, EventType::EquipmentAllocated, |event| {
            matches!(event, Event::EquipmentAllocated { recipient: SectorKind::Construction, .. })
        });
        let mut stock = ResourceStock::new();
        stock.set_capacity(SHELL, config.shell_capacity);
        stock.deposit(SHELL, config.initial_shells.min(config.shell_capacity));
        Self {
            config: config.clone(),
            bus,
            inbox,
            requests: Vec::new(),
            next_request_id: 1,
            stock,
            equipment: config.initial_equipment.clone(),
            flows: FlowQueue::new(),
            replenisher: Replenisher::new(),
            printers: vec![Printer::default(); config.printers as usize],
            assemblers: vec![AssemblyRobot::default(); config.assemblers as usize],
            throttle: 0.0,
            rng: SectorKind::Construction.rng(seed),
            modules_completed: 0,
            ledger: StepLedger::default(),
        }
    }

    pub fn stock(&self) -> &ResourceStock {
        &self.stock
    }

    pub fn equipment(&self, name: &str) -> u32 {
        self.equipment.get(name).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> &[ConstructionRequest] {
        &self.requests
    }

    pub fn modules_completed(&self) -> u64 {
        self.modules_completed
    }

    /// Queue a module build. Returns the request id.
    pub fn submit_request(
        &mut self,
        requesting_sector: SectorKind,
        module_type: &str,
    ) -> Result<u64, ConstructionError> {
        let spec = self
            .config
            .modules
            .get(module_type)
            .ok_or_else(|| ConstructionError::UnknownModule(module_type.to_string()))?;
        let request =
            ConstructionRequest::new(self.next_request_id, requesting_sector, module_type, spec)?;
        self.next_request_id += 1;
        log::debug!("Queued {} #{} for {}", module_type, request.id, requesting_sector);
        let id = request.id;
        self.requests.push(request);
        Ok(id)
    }

    /// Cancel a queued request. Projects already in progress run to completion.
    pub fn cancel_request(&mut self, request_id: u64) -> bool {
        match self.requests.iter_mut().find(|r| r.id == request_id) {
            Some(request) if request.status == RequestStatus::Queued => {
                request.status = RequestStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    fn handle_events(&mut self) {
        for event in self.inbox.drain(InboxOrder::Fifo) {
            match event {
                Event::ConstructionRequest {
                    requesting_sector,
                    module_type,
                } => {
                    if let Err(e) = self.submit_request(requesting_sector, &module_type) {
                        log::warn!(
                            "Rejected construction request from {}: {}",
                            requesting_sector,
                            e
                        );
                    }
                }
                Event::ResourceAllocated { resource, amount, .. } => {
                    self.stock.deposit(&resource, amount);
                    self.replenisher.on_allocated(&resource, amount);
                }
                Event::EquipmentAllocated { equipment, quantity, .. } => {
                    *self.equipment.entry(equipment).or_insert(0) += quantity;
                }
                _ => {}
            }
        }
    }

    fn in_progress(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::InProgress)
            .count()
    }

    fn throttled(&mut self) -> bool {
        self.throttle > 0.0 && self.rng.gen::<f64>() < self.throttle
    }

    /// Step every busy assembler within the power budget.
    fn advance_projects(&mut self, budget: &mut f64) {
        let power = self.config.assembler_power_kw;
        for index in 0..self.assemblers.len() {
            if self.assemblers[index].is_idle() {
                continue;
            }
            if self.throttled() {
                continue;
            }
            if *budget < power {
                log::debug!("Assembler {} idle: not enough power", index);
                continue;
            }
            *budget -= power;
            self.ledger.dust += self.config.dust_per_active_robot;
            if let Some(request_id) = self.assemblers[index].advance() {
                self.complete(request_id);
            }
        }
    }

    fn complete(&mut self, request_id: u64) {
        let Some(request) = self.requests.iter_mut().find(|r| r.id == request_id) else {
            log::warn!("Assembler finished unknown request {}", request_id);
            return;
        };
        request.status = RequestStatus::Completed;
        request.assigned_robot = None;
        self.modules_completed += 1;
        self.ledger.modules_built += 1;
        log::info!(
            "Module {} #{} completed for {}",
            request.module_type, request.id, request.requesting_sector
        );
        self.bus.publish(Event::ModuleCreated {
            requesting_sector: request.requesting_sector,
            module_type: request.module_type.clone(),
            request_id,
        });
    }

    /// Start queued requests in arrival order while project slots, an idle
    /// assembler, shells and equipment allow. Equipment earmarked by an
    /// earlier waiting request is not offered to later ones.
    fn start_projects(&mut self) {
        let mut active = self.in_progress();
        let mut claimed: BTreeMap<String, u32> = BTreeMap::new();
        let mut shells_claimed = 0.0;

        for index in 0..self.requests.len() {
            if active >= self.config.max_concurrent_projects {
                break;
            }
            if self.requests[index].status != RequestStatus::Queued {
                continue;
            }

            let request = &self.requests[index];
            let missing: Vec<(String, u32)> = request
                .equipment_needed
                .iter()
                .filter_map(|(name, needed)| {
                    let have = self
                        .equipment(name)
                        .saturating_sub(claimed.get(name).copied().unwrap_or(0));
                    (have < *needed).then(|| (name.clone(), needed - have))
                })
                .collect();
            let shells_needed = request.shells_needed as f64;
            let shells_ok = self.stock.get(SHELL) - shells_claimed >= shells_needed;

            if !missing.is_empty() {
                if !request.equipment_requested {
                    for (equipment, quantity) in &missing {
                        self.bus.publish(Event::EquipmentRequest {
                            requesting_sector: SectorKind::Construction,
                            equipment: equipment.clone(),
                            quantity: *quantity,
                        });
                    }
                    self.requests[index].equipment_requested = true;
                }
                self.claim(&mut claimed, &mut shells_claimed, index);
                continue;
            }
            if !shells_ok {
                log::debug!("Request #{} waiting for shells", self.requests[index].id);
                self.claim(&mut claimed, &mut shells_claimed, index);
                continue;
            }
            let Some(robot) = self.assemblers.iter().position(AssemblyRobot::is_idle) else {
                break;
            };
            if self.begin_project(index, robot) {
                active += 1;
            }
        }
    }

    fn claim(&self, claimed: &mut BTreeMap<String, u32>, shells: &mut f64, index: usize) {
        let request = &self.requests[index];
        for (name, quantity) in &request.equipment_needed {
            *claimed.entry(name.clone()).or_insert(0) += quantity;
        }
        *shells += request.shells_needed as f64;
    }

    /// Reserve shells and equipment and hand the request to `robot`,
    /// rolling the reservation back if the robot refuses.
    fn begin_project(&mut self, index: usize, robot: usize) -> bool {
        let request = &self.requests[index];
        let (id, shells, build_steps) =
            (request.id, request.shells_needed as f64, request.build_steps);
        let equipment = request.equipment_needed.clone();

        self.stock.withdraw(SHELL, shells);
        for (name, quantity) in &equipment {
            if let Some(have) = self.equipment.get_mut(name) {
                *have -= quantity;
            }
        }

        if !self.assemblers[robot].begin(id, build_steps) {
            self.stock.deposit(SHELL, shells);
            for (name, quantity) in &equipment {
                *self.equipment.entry(name.clone()).or_insert(0) += quantity;
            }
            log::warn!("Assembler {} refused request #{}", robot, id);
            return false;
        }

        let request = &mut self.requests[index];
        request.status = RequestStatus::InProgress;
        request.assigned_robot = Some(robot);
        self.ledger.projects_started += 1;
        log::info!("Started {} #{} on assembler {}", request.module_type, id, robot);
        true
    }

    /// Print shells into the shared buffer while capacity and regolith last.
    fn print_shells(&mut self, budget: &mut f64) {
        let power = self.config.printer_power_kw;
        let regolith_per_shell = self.config.regolith_per_shell;
        let mut shells_due = 0.0;
        let mut regolith_committed = 0.0;

        for index in 0..self.printers.len() {
            if self.stock.headroom(SHELL) - shells_due < 1.0 {
                break;
            }
            if self.stock.get(REGOLITH) - regolith_committed < regolith_per_shell {
                log::debug!("Printers waiting for regolith");
                break;
            }
            if self.throttled() || *budget < power {
                continue;
            }
            *budget -= power;
            self.ledger.dust += self.config.dust_per_active_robot;

            let printer = &mut self.printers[index];
            printer.progress += 1;
            if printer.progress >= self.config.steps_per_shell {
                printer.progress = 0;
                shells_due += 1.0;
                regolith_committed += regolith_per_shell;
                self.flows.push(
                    StockFlow::new(format!("printer-{}", index))
                        .consume(REGOLITH, regolith_per_shell)
                        .generate(SHELL, 1.0),
                );
            }
        }
    }

    /// Restore stocks and equipment from a snapshot.
    pub fn restore(&mut self, levels: &BTreeMap<String, f64>) {
        for (key, value) in levels {
            match key.strip_prefix("equipment.") {
                Some(name) => {
                    self.equipment.insert(name.to_string(), value.max(0.0) as u32);
                }
                None => self.stock.set(key, *value),
            }
        }
    }
}

impl Sector for ConstructionSector {
    fn kind(&self) -> SectorKind {
        SectorKind::Construction
    }

    fn power_demand(&self) -> f64 {
        let busy = self.assemblers.iter().filter(|a| !a.is_idle()).count();
        let queued = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Queued)
            .count();
        let idle = self.assemblers.len() - busy;
        let assemblers = busy + queued.min(idle);
        let printers = if self.stock.headroom(SHELL) >= 1.0 {
            self.printers.len()
        } else {
            0
        };
        assemblers as f64 * self.config.assembler_power_kw
            + printers as f64 * self.config.printer_power_kw
    }

    fn step(&mut self, allocated_power: f64) -> f64 {
        self.ledger = StepLedger::default();
        self.handle_events();

        let mut budget = allocated_power.max(0.0);
        self.advance_projects(&mut budget);
        self.start_projects();
        self.print_shells(&mut budget);

        let applied = self
            .flows
            .apply_all(&mut self.stock, &self.bus, SectorKind::Construction);
        self.ledger.shells_printed = applied.generated.get(SHELL).copied().unwrap_or(0.0);
        self.requests
            .retain(|r| !matches!(r.status, RequestStatus::Completed | RequestStatus::Cancelled));

        self.replenisher.request_if_low(
            &self.bus,
            SectorKind::Construction,
            REGOLITH,
            self.stock.get(REGOLITH),
            self.config.regolith_reorder_level,
            self.config.regolith_reorder_amount,
        );

        allocated_power.max(0.0) - budget
    }

    fn metrics(&self) -> SectorMetrics {
        let queued = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Queued)
            .count();
        let mut metrics = SectorMetrics::new(SectorKind::Construction)
            .value("shells", self.stock.get(SHELL))
            .value("regolith", self.stock.get(REGOLITH))
            .value("queued_requests", queued as f64)
            .value("projects_in_progress", self.in_progress() as f64)
            .value("projects_started", self.ledger.projects_started as f64)
            .value("shells_printed", self.ledger.shells_printed)
            .value("modules_completed", self.modules_completed as f64)
            .value("throttle", self.throttle);
        for (name, quantity) in &self.equipment {
            metrics = metrics.value(format!("equipment.{}", name), *quantity as f64);
        }
        metrics
            .contribute(metric_ids::MODULES_BUILT, self.ledger.modules_built as f64)
            .contribute(metric_ids::DUST_COVERAGE, self.ledger.dust)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        let mut levels = self.stock.levels().clone();
        for (name, quantity) in &self.equipment {
            levels.insert(format!("equipment.{}", name), *quantity as f64);
        }
        levels
    }

    fn restore_levels(&mut self, levels: &BTreeMap<String, f64>) {
        self.restore(levels);
    }

    fn as_throttleable(&mut self) -> Option<&mut dyn Throttleable> {
        Some(self)
    }
}

impl Throttleable for ConstructionSector {
    fn set_throttle_factor(&mut self, factor: f64) {
        self.throttle = factor.clamp(0.0, 1.0);
    }

    fn throttle_factor(&self) -> f64 {
        self.throttle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConstructionConfig {
        ConstructionConfig {
            max_concurrent_projects: 1,
            printers: 1,
            printer_power_kw: 5.0,
            steps_per_shell: 2,
            regolith_per_shell: 50.0,
            shell_capacity: 4.0,
            initial_shells: 2.0,
            assemblers: 1,
            assembler_power_kw: 8.0,
            initial_equipment: BTreeMap::from([("chassis".to_string(), 1)]),
            modules: BTreeMap::from([(
                "rover".to_string(),
                ModuleSpec {
                    shells: 2,
                    equipment: BTreeMap::from([("chassis".to_string(), 1)]),
                    build_steps: 3,
                },
            )]),
            regolith_reorder_level: 0.0,
            regolith_reorder_amount: 100.0,
            dust_per_active_robot: 0.001,
        }
    }

    fn sector(bus: &Arc<EventBus>) -> ConstructionSector {
        ConstructionSector::new(&config(), Arc::clone(bus), 1)
    }

    fn request_rover(bus: &EventBus) {
        bus.publish(Event::ConstructionRequest {
            requesting_sector: SectorKind::Science,
            module_type: "rover".into(),
        });
    }

    #[test]
    fn test_zero_shell_module_is_rejected() {
        let spec = ModuleSpec {
            shells: 0,
            equipment: BTreeMap::new(),
            build_steps: 1,
        };
        assert_eq!(
            ConstructionRequest::new(1, SectorKind::Science, "hab", &spec),
            Err(ConstructionError::ZeroShells("hab".into()))
        );
    }

    #[test]
    fn test_refused_start_returns_reservation() {
        let bus = Arc::new(EventBus::new());
        let two_crews = ConstructionConfig {
            max_concurrent_projects: 2,
            assemblers: 2,
            initial_shells: 4.0,
            initial_equipment: BTreeMap::from([("chassis".to_string(), 2)]),
            ..config()
        };
        let mut construction = ConstructionSector::new(&two_crews, Arc::clone(&bus), 1);
        let first = construction.submit_request(SectorKind::Science, "rover").unwrap();
        let second = construction.submit_request(SectorKind::Science, "rover").unwrap();
        assert!(construction.assemblers[0].begin(99, 5));

        assert!(!construction.begin_project(0, 0));
        assert_eq!(construction.stock().get(SHELL), 4.0);
        assert_eq!(construction.equipment("chassis"), 2);
        assert_eq!(construction.ledger.projects_started, 0);
        let queue: Vec<_> = construction
            .requests()
            .iter()
            .map(|r| (r.id, r.status, r.assigned_robot))
            .collect();
        assert_eq!(
            queue,
            vec![(first, RequestStatus::Queued, None), (second, RequestStatus::Queued, None)]
        );

        // The oldest request still goes first, on the idle assembler
        construction.start_projects();
        assert_eq!(construction.requests()[0].status, RequestStatus::InProgress);
        assert_eq!(construction.requests()[0].assigned_robot, Some(1));
        assert_eq!(construction.requests()[1].status, RequestStatus::Queued);
        assert_eq!(construction.stock().get(SHELL), 2.0);
        assert_eq!(construction.equipment("chassis"), 1);
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        let bus = Arc::new(EventBus::new());
        let mut construction = sector(&bus);
        assert_eq!(
            construction.submit_request(SectorKind::Science, "spaceport"),
            Err(ConstructionError::UnknownModule("spaceport".into()))
        );
    }

    #[test]
    fn test_module_built_and_announced() {
        let bus = Arc::new(EventBus::new());
        let created = Inbox::new();
        created.subscribe(&bus, EventType::ModuleCreated, |_| true);
        let mut construction = sector(&bus);
        request_rover(&bus);

        // Step 1 starts the project, reserving shells and equipment
        construction.step(100.0);
        assert_eq!(construction.requests()[0].status, RequestStatus::InProgress);
        assert_eq!(construction.stock().get(SHELL), 0.0);
        assert_eq!(construction.equipment("chassis"), 0);

        for _ in 0..3 {
            construction.step(100.0);
        }
        assert_eq!(construction.modules_completed(), 1);
        assert!(construction.requests().is_empty());
        assert_eq!(
            created.drain(InboxOrder::Fifo),
            vec![Event::ModuleCreated {
                requesting_sector: SectorKind::Science,
                module_type: "rover".into(),
                request_id: 1,
            }]
        );
        assert_eq!(construction.metrics().metric_contributions[metric_ids::MODULES_BUILT], 1.0);
    }

    #[test]
    fn test_missing_equipment_requested_once() {
        let bus = Arc::new(EventBus::new());
        let equipment_requests = Inbox::new();
        equipment_requests.subscribe(&bus, EventType::EquipmentRequest, |_| true);
        let mut cfg = config();
        cfg.initial_equipment.clear();
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        request_rover(&bus);

        for _ in 0..5 {
            construction.step(100.0);
        }
        assert_eq!(
            equipment_requests.drain(InboxOrder::Fifo),
            vec![Event::EquipmentRequest {
                requesting_sector: SectorKind::Construction,
                equipment: "chassis".into(),
                quantity: 1,
            }]
        );
        assert!(construction.requests()[0].equipment_requested);

        bus.publish(Event::EquipmentAllocated {
            recipient: SectorKind::Construction,
            equipment: "chassis".into(),
            quantity: 1,
        });
        construction.step(100.0);
        assert_eq!(construction.requests()[0].status, RequestStatus::InProgress);
    }

    #[test]
    fn test_waits_for_shells_without_requesting() {
        let bus = Arc::new(EventBus::new());
        let equipment_requests = Inbox::new();
        equipment_requests.subscribe(&bus, EventType::EquipmentRequest, |_| true);
        let mut cfg = config();
        cfg.initial_shells = 0.0;
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        request_rover(&bus);
        construction.step(100.0);
        assert_eq!(construction.requests()[0].status, RequestStatus::Queued);
        assert!(equipment_requests.is_empty());
    }

    #[test]
    fn test_concurrency_limit() {
        let bus = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.assemblers = 2;
        cfg.initial_shells = 4.0;
        cfg.initial_equipment.insert("chassis".into(), 2);
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        request_rover(&bus);
        request_rover(&bus);
        construction.step(100.0);
        let statuses: Vec<_> = construction.requests().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![RequestStatus::InProgress, RequestStatus::Queued]);
    }

    #[test]
    fn test_earlier_request_keeps_its_equipment_claim() {
        let bus = Arc::new(EventBus::new());
        let equipment_requests = Inbox::new();
        equipment_requests.subscribe(&bus, EventType::EquipmentRequest, |_| true);
        let mut cfg = config();
        cfg.initial_shells = 0.0;
        cfg.max_concurrent_projects = 2;
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        request_rover(&bus);
        request_rover(&bus);
        construction.step(0.0);
        // The first request waits on shells and holds the only chassis, so
        // the second asks for its own
        assert_eq!(equipment_requests.len(), 1);
    }

    #[test]
    fn test_printers_turn_regolith_into_shells() {
        let bus = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.initial_shells = 0.0;
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        bus.publish(Event::ResourceAllocated {
            source: SectorKind::Manufacturing,
            recipient: SectorKind::Construction,
            resource: REGOLITH.into(),
            amount: 120.0,
        });
        construction.step(5.0);
        assert_eq!(construction.stock().get(SHELL), 0.0);
        assert_eq!(construction.step(5.0), 5.0);
        assert_eq!(construction.stock().get(SHELL), 1.0);
        assert_eq!(construction.stock().get(REGOLITH), 70.0);
    }

    #[test]
    fn test_printing_stops_at_capacity() {
        let bus = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.initial_shells = 4.0;
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        construction.restore(&BTreeMap::from([(REGOLITH.to_string(), 500.0)]));
        assert_eq!(construction.step(5.0), 0.0);
        assert_eq!(construction.stock().get(SHELL), 4.0);
    }

    #[test]
    fn test_cancel_queued_request() {
        let bus = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.initial_shells = 0.0;
        let mut construction = ConstructionSector::new(&cfg, Arc::clone(&bus), 1);
        let id = construction.submit_request(SectorKind::Science, "rover").unwrap();
        assert!(construction.cancel_request(id));
        construction.step(0.0);
        assert!(construction.requests().is_empty());
    }

    #[test]
    fn test_assembler_refuses_second_job() {
        let mut robot = AssemblyRobot::default();
        assert!(robot.begin(1, 2));
        assert!(!robot.begin(2, 2));
        assert_eq!(robot.advance(), None);
        assert_eq!(robot.advance(), Some(1));
        assert!(robot.is_idle());
    }
}
