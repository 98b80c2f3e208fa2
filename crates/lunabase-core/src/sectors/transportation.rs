//! Transportation sector - rocket round trips between the settlement and Earth
//!
//! Each rocket is a small state machine. While available it sits on the
//! pad; once committed to a round trip it flies outbound, loads at the far
//! end, and flies back:
//!
//! ```text
//! available ──commit──▶ outbound ──eta 0──▶ loading ──eta 0──▶ inbound ──eta 0──▶ available
//!                                   (outbound cargo delivered)       (return cargo delivered)
//! ```
//!
//! Feasibility (`calculate_round_trip`) and commitment (`commit_round_trip`)
//! are separate so that checking a trip never touches rocket or fuel state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::{Replenisher, Sector, SectorKind, SectorMetrics};
use crate::config::TransportationConfig;
use crate::evaluation::metric_ids;
use crate::event_bus::{Cargo, Event, EventBus, EventType, Inbox, InboxOrder, Leg};
use crate::stock::ResourceStock;
use lunabase_logic::rocket::{self, RocketSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Outbound,
    Loading,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub phase: MissionPhase,
    /// Steps left in the current phase
    pub eta: u32,
    pub outbound_cargo: Vec<Cargo>,
    pub return_cargo: Vec<Cargo>,
}

/// Result of a feasibility check. Computing one changes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTripPlan {
    pub outbound_mass_kg: f64,
    pub return_mass_kg: f64,
    pub fuel_required: f64,
    pub duration_steps: u32,
    /// Both payloads fit within the rocket's capacity
    pub within_capacity: bool,
}

/// Phase change produced by one [`Rocket::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Arrived,
    Departed,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rocket {
    pub id: u32,
    pub spec: RocketSpec,
    pub one_way_steps: u32,
    pub is_available: bool,
    pub mission: Option<Mission>,
}

fn total_mass(cargo: &[Cargo]) -> f64 {
    cargo.iter().map(|c| c.mass_kg).sum()
}

impl Rocket {
    pub fn new(id: u32, spec: RocketSpec, one_way_steps: u32) -> Self {
        Self {
            id,
            spec,
            one_way_steps: one_way_steps.max(1),
            is_available: true,
            mission: None,
        }
    }

    pub fn phase(&self) -> Option<MissionPhase> {
        self.mission.as_ref().map(|m| m.phase)
    }

    pub fn calculate_round_trip(&self, outbound: &[Cargo], inbound: &[Cargo]) -> RoundTripPlan {
        let outbound_mass_kg = total_mass(outbound);
        let return_mass_kg = total_mass(inbound);
        RoundTripPlan {
            outbound_mass_kg,
            return_mass_kg,
            fuel_required: rocket::round_trip_propellant(
                &self.spec,
                outbound_mass_kg,
                return_mass_kg,
            ),
            duration_steps: self.one_way_steps * 2 + self.spec.loading_steps,
            within_capacity: outbound_mass_kg <= self.spec.payload_capacity_kg
                && return_mass_kg <= self.spec.payload_capacity_kg,
        }
    }

    /// Start a round trip. Refused while another mission is active. The
    /// caller has already checked fuel against [`Self::calculate_round_trip`].
    pub fn commit_round_trip(&mut self, outbound: Vec<Cargo>, inbound: Vec<Cargo>) -> bool {
        if !self.is_available || self.mission.is_some() {
            return false;
        }
        self.is_available = false;
        self.mission = Some(Mission {
            phase: MissionPhase::Outbound,
            eta: self.one_way_steps,
            outbound_cargo: outbound,
            return_cargo: inbound,
        });
        true
    }

    /// Advance the active mission by one step, publishing deliveries.
    pub fn step(&mut self, bus: &EventBus) -> Option<Transition> {
        let mission = self.mission.as_mut()?;
        mission.eta = mission.eta.saturating_sub(1);
        if mission.eta > 0 {
            return None;
        }
        match mission.phase {
            MissionPhase::Outbound => {
                mission.phase = MissionPhase::Loading;
                mission.eta = self.spec.loading_steps.max(1);
                let cargo = std::mem::take(&mut mission.outbound_cargo);
                log::info!("Rocket {} arrived at Earth, loading", self.id);
                bus.publish(Event::PayloadDelivered {
                    rocket_id: self.id,
                    leg: Leg::Outbound,
                    cargo,
                });
                Some(Transition::Arrived)
            }
            MissionPhase::Loading => {
                mission.phase = MissionPhase::Inbound;
                mission.eta = self.one_way_steps;
                log::info!("Rocket {} departed Earth", self.id);
                Some(Transition::Departed)
            }
            MissionPhase::Inbound => {
                let cargo = std::mem::take(&mut mission.return_cargo);
                self.mission = None;
                self.is_available = true;
                log::info!("Rocket {} landed with {} cargo item(s)", self.id, cargo.len());
                bus.publish(Event::PayloadDelivered {
                    rocket_id: self.id,
                    leg: Leg::Return,
                    cargo,
                });
                Some(Transition::Returned)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StepLedger {
    launches: u32,
    cargo_delivered: u32,
    fuel_burned: f64,
}

pub struct TransportationSector {
    config: TransportationConfig,
    bus: Arc<EventBus>,
    inbox: Inbox,
    rockets: Vec<Rocket>,
    fuel: ResourceStock,
    replenisher: Replenisher,
    queue: VecDeque<Cargo>,
    ledger: StepLedger,
}

impl TransportationSector {
    pub fn new(config: &TransportationConfig, bus: Arc<EventBus>) -> Self {
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::TransportRequest, |_| true);
        inbox.subscribe(&bus, EventType::ResourceAllocated, |event| {
            matches!(event, Event::ResourceAllocated { recipient: SectorKind::Transportation, .. })
        });
        let one_way = config.one_way_steps.unwrap_or_else(|| {
            rocket::one_way_steps(config.rocket.distance_km, config.rocket.cruise_speed_km_per_step)
        });
        let mut fuel = ResourceStock::new();
        fuel.deposit(&config.fuel_resource, config.initial_fuel);
        Self {
            config: config.clone(),
            bus,
            inbox,
            rockets: (0..config.rockets)
                .map(|id| Rocket::new(id, config.rocket.clone(), one_way))
                .collect(),
            fuel,
            replenisher: Replenisher::new(),
            queue: VecDeque::new(),
            ledger: StepLedger::default(),
        }
    }

    pub fn rockets(&self) -> &[Rocket] {
        &self.rockets
    }

    pub fn fuel(&self) -> f64 {
        self.fuel.get(&self.config.fuel_resource)
    }

    pub fn queued_cargo(&self) -> &VecDeque<Cargo> {
        &self.queue
    }

    fn handle_events(&mut self) {
        for event in self.inbox.drain(InboxOrder::Fifo) {
            match event {
                Event::TransportRequest {
                    requesting_sector,
                    cargo,
                    quantity,
                    mass_kg,
                } => {
                    if quantity == 0 {
                        log::warn!("{} requested zero units of {}", requesting_sector, cargo);
                        continue;
                    }
                    self.queue.push_back(Cargo {
                        item: cargo,
                        quantity,
                        mass_kg,
                        recipient: Some(requesting_sector),
                    });
                }
                Event::ResourceAllocated { resource, amount, .. } => {
                    self.fuel.deposit(&resource, amount);
                    self.replenisher.on_allocated(&resource, amount);
                }
                _ => {}
            }
        }
    }

    /// Take queued cargo, oldest first, up to the payload capacity.
    /// Cargo heavier than any rocket can carry is dropped.
    fn load_manifest(&mut self, capacity_kg: f64) -> Vec<Cargo> {
        let mut manifest = Vec::new();
        let mut mass = 0.0;
        while let Some(next) = self.queue.front() {
            if next.mass_kg > capacity_kg {
                log::warn!(
                    "Dropping {} x {}: {:.0} kg exceeds rocket capacity",
                    next.quantity, next.item, next.mass_kg
                );
                self.queue.pop_front();
                continue;
            }
            if mass + next.mass_kg > capacity_kg {
                break;
            }
            mass += next.mass_kg;
            if let Some(cargo) = self.queue.pop_front() {
                manifest.push(cargo);
            }
        }
        manifest
    }

    /// Launch the first available rocket with as much queued cargo as fits,
    /// if the fuel for the round trip is on hand.
    fn dispatch(&mut self) -> bool {
        let Some(index) = self.rockets.iter().position(|r| r.is_available) else {
            return false;
        };
        let manifest = self.load_manifest(self.rockets[index].spec.payload_capacity_kg);
        if manifest.is_empty() {
            return false;
        }

        let plan = self.rockets[index].calculate_round_trip(&[], &manifest);
        if !self.fuel.has(&self.config.fuel_resource, plan.fuel_required) {
            log::debug!(
                "Rocket {} waiting for fuel: {:.0} kg needed, {:.0} kg on hand",
                self.rockets[index].id,
                plan.fuel_required,
                self.fuel()
            );
            for cargo in manifest.into_iter().rev() {
                self.queue.push_front(cargo);
            }
            return false;
        }

        if !self.rockets[index].commit_round_trip(Vec::new(), manifest) {
            return false;
        }
        self.fuel.withdraw(&self.config.fuel_resource, plan.fuel_required);
        self.ledger.launches += 1;
        self.ledger.fuel_burned += plan.fuel_required;
        log::info!(
            "Rocket {} launched, {:.0} kg return payload, {} steps round trip",
            self.rockets[index].id,
            plan.return_mass_kg,
            plan.duration_steps
        );
        true
    }

    /// Restore fuel from a snapshot.
    pub fn restore_fuel(&mut self, amount: f64) {
        self.fuel = ResourceStock::new();
        self.fuel.deposit(&self.config.fuel_resource, amount);
    }
}

impl Sector for TransportationSector {
    fn kind(&self) -> SectorKind {
        SectorKind::Transportation
    }

    /// Pad power is only drawn when a launch could happen this step.
    fn power_demand(&self) -> f64 {
        let launch_ready = self.rockets.iter().any(|r| r.is_available);
        if launch_ready && (!self.queue.is_empty() || !self.inbox.is_empty()) {
            self.config.pad_power_kw
        } else {
            0.0
        }
    }

    fn step(&mut self, allocated_power: f64) -> f64 {
        self.ledger = StepLedger::default();
        self.handle_events();

        for rocket in &mut self.rockets {
            let aboard: u32 = rocket
                .mission
                .as_ref()
                .map_or(0, |m| m.return_cargo.iter().map(|c| c.quantity).sum());
            if matches!(rocket.step(&self.bus), Some(Transition::Returned)) {
                self.ledger.cargo_delivered += aboard;
            }
        }

        let mut used = 0.0;
        if !self.queue.is_empty() {
            if allocated_power + f64::EPSILON >= self.config.pad_power_kw {
                if self.dispatch() {
                    used = self.config.pad_power_kw;
                }
            } else {
                log::debug!("Launch pad lacks power ({:.1} kW)", allocated_power);
            }
        }

        self.replenisher.request_if_low(
            &self.bus,
            SectorKind::Transportation,
            &self.config.fuel_resource,
            self.fuel(),
            self.config.fuel_reorder_level,
            self.config.fuel_reorder_amount,
        );
        used
    }

    fn metrics(&self) -> SectorMetrics {
        let available = self.rockets.iter().filter(|r| r.is_available).count();
        SectorMetrics::new(SectorKind::Transportation)
            .value("fuel", self.fuel())
            .value("rockets_available", available as f64)
            .value("queued_cargo", self.queue.len() as f64)
            .value("launches", self.ledger.launches as f64)
            .value("fuel_burned", self.ledger.fuel_burned)
            .contribute(metric_ids::CARGO_DELIVERED, self.ledger.cargo_delivered as f64)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        self.fuel.levels().clone()
    }

    fn restore_levels(&mut self, levels: &BTreeMap<String, f64>) {
        if let Some(fuel) = levels.get(&self.config.fuel_resource) {
            self.restore_fuel(*fuel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cargo(mass_kg: f64) -> Cargo {
        Cargo {
            item: "drill".into(),
            quantity: 1,
            mass_kg,
            recipient: Some(SectorKind::EquipmentManufacturing),
        }
    }

    fn config(initial_fuel: f64) -> TransportationConfig {
        TransportationConfig {
            one_way_steps: Some(10),
            initial_fuel,
            ..Default::default()
        }
    }

    fn request(bus: &EventBus, mass_kg: f64) {
        bus.publish(Event::TransportRequest {
            requesting_sector: SectorKind::EquipmentManufacturing,
            cargo: "drill".into(),
            quantity: 1,
            mass_kg,
        });
    }

    #[test]
    fn test_calculate_round_trip_is_pure() {
        let rocket = Rocket::new(0, RocketSpec::default(), 10);
        let before = rocket.clone();
        let plan = rocket.calculate_round_trip(&[cargo(100.0)], &[cargo(200.0)]);
        assert_eq!(rocket, before);
        assert!(plan.fuel_required > 0.0);
        assert_eq!(plan.duration_steps, 10 + 24 + 10);
        assert!(plan.within_capacity);
    }

    #[test]
    fn test_commit_refused_while_busy() {
        let mut rocket = Rocket::new(0, RocketSpec::default(), 10);
        assert!(rocket.commit_round_trip(vec![], vec![]));
        assert!(!rocket.is_available);
        assert!(!rocket.commit_round_trip(vec![], vec![]));
    }

    #[test]
    fn test_heavier_return_needs_more_fuel() {
        let rocket = Rocket::new(0, RocketSpec::default(), 10);
        let light = rocket.calculate_round_trip(&[], &[cargo(100.0)]);
        let heavy = rocket.calculate_round_trip(&[], &[cargo(1_000.0)]);
        assert!(heavy.fuel_required > light.fuel_required);
    }

    #[test]
    fn test_dispatch_loads_queue_and_burns_fuel() {
        let bus = Arc::new(EventBus::new());
        let mut sector = TransportationSector::new(&config(10_000.0), Arc::clone(&bus));
        // Together these exceed the 2000 kg payload capacity
        request(&bus, 800.0);
        request(&bus, 1_300.0);
        assert_eq!(sector.power_demand(), 20.0);

        assert_eq!(sector.step(20.0), 20.0);
        let rocket = &sector.rockets()[0];
        assert_eq!(rocket.phase(), Some(MissionPhase::Outbound));
        assert_eq!(rocket.mission.as_ref().map(|m| m.return_cargo.len()), Some(1));
        assert_eq!(sector.queued_cargo().len(), 1);
        assert!(sector.fuel() < 10_000.0);
    }

    #[test]
    fn test_no_fuel_no_launch() {
        let bus = Arc::new(EventBus::new());
        let mut sector = TransportationSector::new(&config(0.0), Arc::clone(&bus));
        let fuel_requests = Inbox::new();
        fuel_requests.subscribe(&bus, EventType::ResourceRequest, |_| true);
        request(&bus, 500.0);

        assert_eq!(sector.step(20.0), 0.0);
        assert!(sector.rockets()[0].is_available);
        assert_eq!(sector.queued_cargo().len(), 1);
        assert_eq!(fuel_requests.len(), 1);
    }

    #[test]
    fn test_no_pad_power_no_launch() {
        let bus = Arc::new(EventBus::new());
        let mut sector = TransportationSector::new(&config(10_000.0), Arc::clone(&bus));
        request(&bus, 500.0);
        assert_eq!(sector.step(5.0), 0.0);
        assert!(sector.rockets()[0].is_available);
    }

    #[test]
    fn test_oversized_cargo_dropped() {
        let bus = Arc::new(EventBus::new());
        let mut sector = TransportationSector::new(&config(10_000.0), Arc::clone(&bus));
        request(&bus, 50_000.0);
        sector.step(20.0);
        assert!(sector.queued_cargo().is_empty());
        assert!(sector.rockets()[0].is_available);
    }

    #[test]
    fn test_return_delivery_counts_cargo() {
        let bus = Arc::new(EventBus::new());
        let mut sector = TransportationSector::new(&config(10_000.0), Arc::clone(&bus));
        request(&bus, 500.0);
        sector.step(20.0);
        let mut delivered = 0.0;
        for _ in 0..(10 + 24 + 10) {
            sector.step(0.0);
            delivered += sector
                .metrics()
                .metric_contributions
                .get(metric_ids::CARGO_DELIVERED)
                .copied()
                .unwrap_or(0.0);
        }
        assert_eq!(delivered, 1.0);
        assert!(sector.rockets()[0].is_available);
    }

    #[test]
    fn test_cargo_delivered_only_on_landing_step() {
        let bus = Arc::new(EventBus::new());
        let mut quick = TransportationConfig {
            one_way_steps: Some(0),
            initial_fuel: 10_000.0,
            ..Default::default()
        };
        quick.rocket.loading_steps = 1;
        let mut sector = TransportationSector::new(&quick, Arc::clone(&bus));
        request(&bus, 500.0);
        sector.step(20.0);
        assert_eq!(sector.ledger.launches, 1);
        assert_eq!(sector.ledger.cargo_delivered, 0);

        // Zero-length legs are clamped to one step: arrive, depart, land
        let mut per_step = Vec::new();
        for _ in 0..4 {
            sector.step(0.0);
            per_step.push((sector.ledger.cargo_delivered, sector.rockets()[0].is_available));
        }
        assert_eq!(per_step, vec![(0, false), (0, false), (1, true), (0, true)]);
    }
}
