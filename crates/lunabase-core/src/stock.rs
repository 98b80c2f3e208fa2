//! Resource stocks and stock flows
//!
//! A [`ResourceStock`] is a sector's ledger of named, non-negative
//! quantities. Production steps never mutate it directly: they queue
//! [`StockFlow`]s, and the owning sector applies the whole queue in one pass
//! at the end of its step. Allocations to other sectors are withdrawn and
//! announced with a `ResourceAllocated` event during that same pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event_bus::{Event, EventBus};
use crate::sectors::SectorKind;

/// Named resource quantities with optional per-resource capacity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStock {
    quantities: BTreeMap<String, f64>,
    capacities: BTreeMap<String, f64>,
}

impl ResourceStock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stock from defaults, with `overrides` taking precedence.
    pub fn from_levels(defaults: &BTreeMap<String, f64>, overrides: &BTreeMap<String, f64>) -> Self {
        let mut stock = Self::new();
        for (resource, amount) in defaults.iter().chain(overrides.iter()) {
            stock.quantities.insert(resource.clone(), amount.max(0.0));
        }
        stock
    }

    /// Cap `resource` at `capacity`. Producers consult [`Self::headroom`]
    /// before producing; deposits themselves are never refused.
    pub fn set_capacity(&mut self, resource: &str, capacity: f64) {
        self.capacities.insert(resource.to_string(), capacity.max(0.0));
    }

    pub fn capacity(&self, resource: &str) -> Option<f64> {
        self.capacities.get(resource).copied()
    }

    pub fn get(&self, resource: &str) -> f64 {
        self.quantities.get(resource).copied().unwrap_or(0.0)
    }

    pub fn has(&self, resource: &str, amount: f64) -> bool {
        self.get(resource) >= amount
    }

    /// Room left before `resource` reaches capacity (infinite if unbounded).
    pub fn headroom(&self, resource: &str) -> f64 {
        match self.capacity(resource) {
            Some(cap) => (cap - self.get(resource)).max(0.0),
            None => f64::INFINITY,
        }
    }

    pub fn deposit(&mut self, resource: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        *self.quantities.entry(resource.to_string()).or_insert(0.0) += amount;
    }

    /// Remove up to `amount`; returns what was actually removed. The stored
    /// quantity never goes below zero.
    pub fn withdraw(&mut self, resource: &str, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        let Some(current) = self.quantities.get_mut(resource) else {
            return 0.0;
        };
        let taken = amount.min(*current);
        *current -= taken;
        taken
    }

    /// Overwrite the level of `resource`, e.g. from a snapshot.
    pub fn set(&mut self, resource: &str, amount: f64) {
        self.quantities.insert(resource.to_string(), amount.max(0.0));
    }

    pub fn levels(&self) -> &BTreeMap<String, f64> {
        &self.quantities
    }
}

/// Bounds a resource level should be kept within
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferTarget {
    pub min: f64,
    pub max: f64,
}

impl BufferTarget {
    pub fn is_valid(&self) -> bool {
        self.min >= 0.0 && self.max >= 0.0 && self.min <= self.max
    }

    /// How far `current` sits below the minimum
    pub fn deficiency(&self, current: f64) -> f64 {
        (self.min - current).max(0.0)
    }
}

/// Resource handed to another sector as part of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub recipient: SectorKind,
    pub amount: f64,
}

/// One intended stock change, applied exactly once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockFlow {
    /// Robot, request or task that produced this flow
    pub source: String,
    pub consumed: BTreeMap<String, f64>,
    pub generated: BTreeMap<String, f64>,
    pub allocations: BTreeMap<String, Allocation>,
}

impl StockFlow {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn consume(mut self, resource: &str, amount: f64) -> Self {
        *self.consumed.entry(resource.to_string()).or_insert(0.0) += amount;
        self
    }

    pub fn generate(mut self, resource: &str, amount: f64) -> Self {
        *self.generated.entry(resource.to_string()).or_insert(0.0) += amount;
        self
    }

    pub fn allocate(mut self, resource: &str, recipient: SectorKind, amount: f64) -> Self {
        self.allocations
            .insert(resource.to_string(), Allocation { recipient, amount });
        self
    }
}

/// Totals moved by one [`FlowQueue::apply_all`] pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedFlows {
    pub flows: usize,
    pub consumed: BTreeMap<String, f64>,
    pub generated: BTreeMap<String, f64>,
    pub allocated: BTreeMap<String, f64>,
}

impl AppliedFlows {
    pub fn total_generated(&self) -> f64 {
        self.generated.values().sum()
    }
}

/// Flows queued during a step, awaiting the end-of-step apply pass
#[derive(Debug, Clone, Default)]
pub struct FlowQueue {
    pending: Vec<StockFlow>,
}

impl FlowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flow: StockFlow) {
        self.pending.push(flow);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every pending flow to `stock` and publish one
    /// `ResourceAllocated` event per allocation, emptying the queue.
    pub fn apply_all(&mut self, stock: &mut ResourceStock, bus: &EventBus, owner: SectorKind) -> AppliedFlows {
        let mut applied = AppliedFlows::default();
        for flow in self.pending.drain(..) {
            for (resource, amount) in &flow.consumed {
                let taken = stock.withdraw(resource, *amount);
                *applied.consumed.entry(resource.clone()).or_insert(0.0) += taken;
            }
            for (resource, amount) in &flow.generated {
                stock.deposit(resource, *amount);
                *applied.generated.entry(resource.clone()).or_insert(0.0) += amount.max(0.0);
            }
            for (resource, allocation) in &flow.allocations {
                let taken = stock.withdraw(resource, allocation.amount);
                if taken <= 0.0 {
                    log::warn!(
                        "{}: allocation of {} to {} found empty stock",
                        flow.source, resource, allocation.recipient
                    );
                    continue;
                }
                *applied.allocated.entry(resource.clone()).or_insert(0.0) += taken;
                bus.publish(Event::ResourceAllocated {
                    source: owner,
                    recipient: allocation.recipient,
                    resource: resource.clone(),
                    amount: taken,
                });
            }
            applied.flows += 1;
        }
        applied
    }
}
