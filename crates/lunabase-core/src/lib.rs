//! Lunabase Core - Lunar Settlement Economy Engine
//!
//! Simulates the economy of a lunar settlement as a set of production and
//! consumption sectors (energy, science, manufacturing, equipment
//! manufacturing, transportation, construction) driven by a discrete-time
//! step loop.
//!
//! # Architecture
//!
//! Every tick the [`world::WorldSystem`] runs the same fixed sequence:
//! - **Demand**: every sector reports its power demand
//! - **Allocation**: the energy sector splits available power across demands
//! - **Stepping**: sectors step in registration order with their allocation
//! - **Evaluation**: sector metric contributions are aggregated and scored
//! - **Policies**: enabled policies react to the scores and adjust sectors
//!
//! Sectors never call each other. Cross-sector traffic (resource requests,
//! equipment, cargo, construction orders) goes through the
//! [`event_bus::EventBus`] and lands in per-sector inboxes that are drained
//! at the start of the owning sector's next step.
//!
//! # Example
//!
//! ```rust,no_run
//! use lunabase_core::prelude::*;
//!
//! let config = SimulationConfig::default();
//! let mut world = WorldSystem::new(&config).expect("valid config");
//!
//! for _ in 0..100 {
//!     let report = world.step();
//!     println!("step {} score {:.2}", report.step, report.overall_score);
//! }
//! ```

pub mod config;
pub mod evaluation;
pub mod event_bus;
pub mod persistence;
pub mod policy;
pub mod sectors;
pub mod stock;
pub mod world;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::config::{SetupError, SimulationConfig};
    pub use crate::evaluation::{EvaluationEngine, EvaluationResult, GoalDirection, MetricStatus};
    pub use crate::event_bus::{Event, EventBus, EventType};
    pub use crate::persistence::{DocumentStore, MemoryStore, WorldSnapshot};
    pub use crate::sectors::{Sector, SectorKind, SectorMetrics, Throttleable};
    pub use crate::world::{RunState, SimulationCommand, StepReport, WorldSystem};
}
