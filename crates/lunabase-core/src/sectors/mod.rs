//! Sectors - the independently modelled subsystems of the settlement
//!
//! Each sector owns its agents and stocks and exposes the same three
//! operations to the orchestrator: report a power demand, step with an
//! allocation, and report metrics. Optional capabilities (throttling,
//! growth control) are opted into through [`Throttleable`] and
//! [`GrowthControlled`].

pub mod construction;
pub mod energy;
pub mod equipment;
pub mod manufacturing;
pub mod science;
pub mod transportation;

pub use construction::ConstructionSector;
pub use energy::EnergySector;
pub use equipment::EquipmentSector;
pub use manufacturing::ManufacturingSector;
pub use science::ScienceSector;
pub use transportation::TransportationSector;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::event_bus::{Event, EventBus};
use lunabase_logic::growth::OrderDecision;

/// Sector identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorKind {
    Energy,
    Science,
    Manufacturing,
    EquipmentManufacturing,
    Transportation,
    Construction,
}

impl SectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SectorKind::Energy => "energy",
            SectorKind::Science => "science",
            SectorKind::Manufacturing => "manufacturing",
            SectorKind::EquipmentManufacturing => "equipment_manufacturing",
            SectorKind::Transportation => "transportation",
            SectorKind::Construction => "construction",
        }
    }

    /// Sectors that implement [`Throttleable`]
    pub fn is_throttleable(&self) -> bool {
        matches!(
            self,
            SectorKind::Science | SectorKind::Manufacturing | SectorKind::Construction
        )
    }

    /// Independent, reproducible random stream for this sector
    pub fn rng(&self, seed: u64) -> StdRng {
        let offset = (*self as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(seed ^ offset)
    }
}

impl fmt::Display for SectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metrics reported by a sector after its step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorMetrics {
    pub sector: SectorKind,
    /// Sector-specific observations (stock levels, agent counts, ...)
    pub values: BTreeMap<String, f64>,
    /// Deltas to global performance metrics, keyed by metric id
    pub metric_contributions: BTreeMap<String, f64>,
}

impl SectorMetrics {
    pub fn new(sector: SectorKind) -> Self {
        Self {
            sector,
            values: BTreeMap::new(),
            metric_contributions: BTreeMap::new(),
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Add `delta` to a global metric. Zero deltas are not recorded.
    pub fn contribute(mut self, metric_id: &str, delta: f64) -> Self {
        if delta != 0.0 {
            *self.metric_contributions.entry(metric_id.to_string()).or_insert(0.0) += delta;
        }
        self
    }
}

/// A simulation sector
pub trait Sector {
    fn kind(&self) -> SectorKind;

    /// Power (kW) this sector would use this step if fully supplied
    fn power_demand(&self) -> f64;

    /// Advance one step with `allocated_power`; returns the power consumed
    fn step(&mut self, allocated_power: f64) -> f64;

    fn metrics(&self) -> SectorMetrics;

    /// Current stock levels, for snapshots
    fn stock_levels(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Reset stock levels from a snapshot taken with `stock_levels`
    fn restore_levels(&mut self, _levels: &BTreeMap<String, f64>) {}

    fn as_throttleable(&mut self) -> Option<&mut dyn Throttleable> {
        None
    }

    fn as_growth_controlled(&mut self) -> Option<&mut dyn GrowthControlled> {
        None
    }
}

/// Sectors whose agents can be throttled. The factor is the per-agent
/// probability of sitting out a step.
pub trait Throttleable {
    fn set_throttle_factor(&mut self, factor: f64);
    fn throttle_factor(&self) -> f64;
}

/// Sectors that size their own fleet through a growth-control loop
pub trait GrowthControlled {
    /// Run one control invocation, placing orders as needed
    fn control_growth_rate(&mut self) -> OrderDecision;
}

/// Sectors in stepping order, looked up by kind
#[derive(Default)]
pub struct SectorRegistry {
    sectors: Vec<Box<dyn Sector>>,
}

impl SectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sector. A second sector of the same kind is rejected.
    pub fn register(&mut self, sector: Box<dyn Sector>) -> bool {
        if self.get(sector.kind()).is_some() {
            log::warn!("Sector {} already registered", sector.kind());
            return false;
        }
        self.sectors.push(sector);
        true
    }

    pub fn get(&self, kind: SectorKind) -> Option<&dyn Sector> {
        self.sectors
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, kind: SectorKind) -> Option<&mut (dyn Sector + 'static)> {
        self.sectors
            .iter_mut()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Sector> {
        self.sectors.iter().map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Sector>> {
        self.sectors.iter_mut()
    }

    pub fn kinds(&self) -> Vec<SectorKind> {
        self.sectors.iter().map(|s| s.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

/// Tracks resources requested from manufacturing but not yet allocated,
/// so a low stock triggers one request rather than one per step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Replenisher {
    outstanding: BTreeMap<String, f64>,
}

impl Replenisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self, resource: &str) -> f64 {
        self.outstanding.get(resource).copied().unwrap_or(0.0)
    }

    /// Request `amount` of `resource` if `current` plus anything already
    /// requested is below `reorder_level`. Returns whether a request went out.
    pub fn request_if_low(
        &mut self,
        bus: &EventBus,
        sector: SectorKind,
        resource: &str,
        current: f64,
        reorder_level: f64,
        amount: f64,
    ) -> bool {
        if amount <= 0.0 || current + self.outstanding(resource) >= reorder_level {
            return false;
        }
        log::debug!("{} requests {:.1} {}", sector, amount, resource);
        bus.publish(Event::ResourceRequest {
            requesting_sector: sector,
            resource: resource.to_string(),
            amount,
        });
        *self.outstanding.entry(resource.to_string()).or_insert(0.0) += amount;
        true
    }

    /// Record an allocation against the outstanding requests.
    pub fn on_allocated(&mut self, resource: &str, amount: f64) {
        if let Some(pending) = self.outstanding.get_mut(resource) {
            *pending -= amount;
            if *pending <= f64::EPSILON {
                self.outstanding.remove(resource);
            }
        }
    }
}
