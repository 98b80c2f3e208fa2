//! Equipment manufacturing sector - fabrication, inventory and imports
//!
//! Other sectors ask for equipment with `EquipmentRequest` events, served
//! from physical stock. Stock is replenished two ways: fabricators build up
//! to the target level from raw materials supplied by manufacturing, and
//! when effective stock (physical plus in transit) falls below the minimum
//! an import is ordered through transportation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::{Replenisher, Sector, SectorKind, SectorMetrics};
use crate::config::EquipmentConfig;
use crate::evaluation::metric_ids;
use crate::event_bus::{Event, EventBus, EventType, Inbox, Leg};
use crate::stock::ResourceStock;

/// Stock of one equipment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentInventory {
    pub physical: u32,
    /// Ordered through transportation, not yet delivered
    pub pending: u32,
    pub minimum: u32,
    pub target: u32,
}

impl EquipmentInventory {
    pub fn effective(&self) -> u32 {
        self.physical + self.pending
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FabricationJob {
    equipment: String,
    remaining_steps: u32,
}

#[derive(Debug, Clone, Default)]
struct Fabricator {
    job: Option<FabricationJob>,
}

#[derive(Debug, Clone, PartialEq)]
struct WaitingRequest {
    recipient: SectorKind,
    equipment: String,
    quantity: u32,
}

#[derive(Debug, Clone, Default)]
struct StepLedger {
    fabricated: u32,
    delivered: u32,
    allocated: u32,
    imports_ordered: u32,
}

pub struct EquipmentSector {
    config: EquipmentConfig,
    bus: Arc<EventBus>,
    inbox: Inbox,
    inventory: BTreeMap<String, EquipmentInventory>,
    materials: ResourceStock,
    replenisher: Replenisher,
    fabricators: Vec<Fabricator>,
    waiting: VecDeque<WaitingRequest>,
    ledger: StepLedger,
}

impl EquipmentSector {
    pub fn new(config: &EquipmentConfig, bus: Arc<EventBus>) -> Self {
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::EquipmentRequest, |_| true);
        inbox.subscribe(&bus, EventType::PayloadDelivered, |_| true);
        inbox.subscribe(&bus, EventType::ResourceAllocated, |event| {
            matches!(event, Event::ResourceAllocated { recipient: SectorKind::EquipmentManufacturing, .. })
        });
        let inventory = config
            .inventory
            .iter()
            .map(|(name, levels)| {
                (
                    name.clone(),
                    EquipmentInventory {
                        physical: levels.initial,
                        pending: 0,
                        minimum: levels.minimum,
                        target: levels.target,
                    },
                )
            })
            .collect();
        Self {
            config: config.clone(),
            bus,
            inbox,
            inventory,
            materials: ResourceStock::new(),
            replenisher: Replenisher::new(),
            fabricators: vec![Fabricator::default(); config.fabricators as usize],
            waiting: VecDeque::new(),
            ledger: StepLedger::default(),
        }
    }

    pub fn inventory(&self, equipment: &str) -> Option<&EquipmentInventory> {
        self.inventory.get(equipment)
    }

    pub fn materials(&self) -> &ResourceStock {
        &self.materials
    }

    pub fn waiting_requests(&self) -> usize {
        self.waiting.len()
    }

    /// Order imports for every equipment type whose effective stock is
    /// below its minimum. The ordered quantity counts as pending at once,
    /// so repeated calls do not order twice. Returns the units ordered.
    pub fn check_and_request_resupply(&mut self) -> u32 {
        let mut ordered = 0;
        for (name, inventory) in &mut self.inventory {
            if inventory.effective() >= inventory.minimum {
                continue;
            }
            let quantity = inventory.minimum - inventory.effective();
            let unit_mass = self
                .config
                .recipes
                .get(name)
                .map_or(0.0, |r| r.import_mass_kg);
            self.bus.publish(Event::TransportRequest {
                requesting_sector: SectorKind::EquipmentManufacturing,
                cargo: name.clone(),
                quantity,
                mass_kg: unit_mass * quantity as f64,
            });
            inventory.pending += quantity;
            ordered += quantity;
            log::info!("Ordered import of {} x {}", quantity, name);
        }
        self.ledger.imports_ordered += ordered;
        ordered
    }

    /// Book a delivery of `quantity` units. Unknown equipment is dropped.
    pub fn receive_delivery(&mut self, equipment: &str, quantity: u32) {
        let Some(inventory) = self.inventory.get_mut(equipment) else {
            log::warn!("Dropping delivery of unknown equipment {}", equipment);
            return;
        };
        inventory.physical += quantity;
        inventory.pending = inventory.pending.saturating_sub(quantity);
        self.ledger.delivered += quantity;
    }

    fn handle_events(&mut self) {
        for event in self.inbox.drain(self.config.inbox_order) {
            match event {
                Event::EquipmentRequest {
                    requesting_sector,
                    equipment,
                    quantity,
                } => {
                    if !self.inventory.contains_key(&equipment) {
                        log::warn!("{} requested unknown equipment {}", requesting_sector, equipment);
                        continue;
                    }
                    self.waiting.push_back(WaitingRequest {
                        recipient: requesting_sector,
                        equipment,
                        quantity,
                    });
                }
                Event::PayloadDelivered {
                    leg: Leg::Return,
                    cargo,
                    ..
                } => {
                    for item in cargo {
                        if item.recipient == Some(SectorKind::EquipmentManufacturing) {
                            self.receive_delivery(&item.item, item.quantity);
                        }
                    }
                }
                Event::ResourceAllocated { resource, amount, .. } => {
                    self.materials.deposit(&resource, amount);
                    self.replenisher.on_allocated(&resource, amount);
                }
                _ => {}
            }
        }
    }

    /// Serve waiting requests from physical stock, oldest first.
    fn serve_requests(&mut self) {
        let mut still_waiting = VecDeque::new();
        for request in self.waiting.drain(..) {
            match self.inventory.get_mut(&request.equipment) {
                Some(inventory) if inventory.physical >= request.quantity => {
                    inventory.physical -= request.quantity;
                    self.ledger.allocated += request.quantity;
                    self.bus.publish(Event::EquipmentAllocated {
                        recipient: request.recipient,
                        equipment: request.equipment.clone(),
                        quantity: request.quantity,
                    });
                }
                _ => still_waiting.push_back(request),
            }
        }
        self.waiting = still_waiting;
    }

    fn in_fabrication(&self, equipment: &str) -> u32 {
        self.fabricators
            .iter()
            .filter(|f| f.job.as_ref().is_some_and(|j| j.equipment == equipment))
            .count() as u32
    }

    /// First equipment type below target whose materials are on hand
    fn next_job(&self) -> Option<String> {
        self.inventory.iter().find_map(|(name, inventory)| {
            let recipe = self.config.recipes.get(name)?;
            let short = inventory.physical + self.in_fabrication(name) < inventory.target;
            let stocked = recipe
                .materials
                .iter()
                .all(|(material, amount)| self.materials.has(material, *amount));
            (short && stocked).then(|| name.clone())
        })
    }

    fn fabricate(&mut self, allocated_power: f64) -> f64 {
        let power = self.config.fabricator_power_kw;
        let mut budget = allocated_power;
        for index in 0..self.fabricators.len() {
            if budget < power {
                break;
            }
            if self.fabricators[index].job.is_none() {
                let Some(name) = self.next_job() else {
                    continue;
                };
                let Some(recipe) = self.config.recipes.get(&name) else {
                    continue;
                };
                for (material, amount) in &recipe.materials {
                    self.materials.withdraw(material, *amount);
                }
                log::debug!("Fabricator {} starts {}", index, name);
                self.fabricators[index].job = Some(FabricationJob {
                    equipment: name,
                    remaining_steps: recipe.build_steps,
                });
            }

            let Some(job) = self.fabricators[index].job.as_mut() else {
                continue;
            };
            budget -= power;
            job.remaining_steps = job.remaining_steps.saturating_sub(1);
            if job.remaining_steps == 0 {
                let finished = job.equipment.clone();
                self.fabricators[index].job = None;
                if let Some(inventory) = self.inventory.get_mut(&finished) {
                    inventory.physical += 1;
                }
                self.ledger.fabricated += 1;
            }
        }
        allocated_power - budget
    }

    /// Keep each recipe material stocked for at least one build.
    fn request_materials(&mut self) {
        let mut needs: BTreeMap<&str, f64> = BTreeMap::new();
        for recipe in self.config.recipes.values() {
            for (material, amount) in &recipe.materials {
                let need = needs.entry(material.as_str()).or_insert(0.0);
                *need = need.max(*amount);
            }
        }
        for (material, level) in needs {
            self.replenisher.request_if_low(
                &self.bus,
                SectorKind::EquipmentManufacturing,
                material,
                self.materials.get(material),
                level,
                self.config.material_reorder_amount,
            );
        }
    }

    /// Restore physical stock levels from a snapshot.
    pub fn restore(&mut self, levels: &BTreeMap<String, f64>) {
        for (key, value) in levels {
            match key.strip_prefix("equipment.") {
                Some(name) => match self.inventory.get_mut(name) {
                    Some(inventory) => inventory.physical = value.max(0.0) as u32,
                    None => log::warn!("Unknown equipment {} in snapshot", name),
                },
                None => self.materials.set(key, *value),
            }
        }
    }
}

impl Sector for EquipmentSector {
    fn kind(&self) -> SectorKind {
        SectorKind::EquipmentManufacturing
    }

    fn power_demand(&self) -> f64 {
        let busy = self.fabricators.iter().filter(|f| f.job.is_some()).count();
        let startable = if self.next_job().is_some() {
            self.fabricators.len() - busy
        } else {
            0
        };
        (busy + startable) as f64 * self.config.fabricator_power_kw
    }

    fn step(&mut self, allocated_power: f64) -> f64 {
        self.ledger = StepLedger::default();
        self.handle_events();
        self.serve_requests();
        let used = self.fabricate(allocated_power.max(0.0));
        self.check_and_request_resupply();
        self.request_materials();
        used
    }

    fn metrics(&self) -> SectorMetrics {
        let mut metrics = SectorMetrics::new(SectorKind::EquipmentManufacturing)
            .value("fabricated", self.ledger.fabricated as f64)
            .value("allocated", self.ledger.allocated as f64)
            .value("delivered", self.ledger.delivered as f64)
            .value("imports_ordered", self.ledger.imports_ordered as f64)
            .value("waiting_requests", self.waiting.len() as f64);
        for (name, inventory) in &self.inventory {
            metrics = metrics
                .value(format!("equipment.{}", name), inventory.physical as f64)
                .value(format!("pending.{}", name), inventory.pending as f64);
        }
        metrics.contribute(metric_ids::EQUIPMENT_BUILT, self.ledger.fabricated as f64)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        let mut levels = self.materials.levels().clone();
        for (name, inventory) in &self.inventory {
            levels.insert(format!("equipment.{}", name), inventory.physical as f64);
        }
        levels
    }

    fn restore_levels(&mut self, levels: &BTreeMap<String, f64>) {
        self.restore(levels);
    }
}
