//! World system - owns every sector and drives the tick loop

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SetupError, SimulationConfig};
use crate::evaluation::{EvaluationEngine, EvaluationResult};
use crate::event_bus::EventBus;
use crate::persistence::{
    self, DocumentStore, SaveError, WorldSnapshot, METRICS_COLLECTION, SNAPSHOT_VERSION,
    STATE_COLLECTION,
};
use crate::policy::{PolicyContext, PolicyEngine, PolicyOutcome};
use crate::sectors::energy::PowerLedger;
use crate::sectors::{
    ConstructionSector, EnergySector, EquipmentSector, ManufacturingSector, ScienceSector,
    Sector, SectorKind, SectorMetrics, SectorRegistry, TransportationSector,
};

/// Control surface consumed between ticks by [`WorldSystem::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationCommand {
    StartContinuous,
    /// Run this many more steps, then stop
    StartLimited(u64),
    Pause,
    Resume,
    Stop,
    /// Wall-clock pause between ticks
    SetDelay(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started yet
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Everything that happened in one tick
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub world_id: String,
    pub step: u64,
    pub overall_score: f64,
    pub power: PowerLedger,
    /// Power handed to each sector
    pub allocations: BTreeMap<SectorKind, f64>,
    /// Power each sector actually used
    pub consumed: BTreeMap<SectorKind, f64>,
    pub evaluation: EvaluationResult,
    pub policy_outcomes: BTreeMap<String, PolicyOutcome>,
}

pub struct WorldSystem {
    config: SimulationConfig,
    bus: Arc<EventBus>,
    /// Kept apart from the registry because it allocates power to the others
    energy: EnergySector,
    sectors: SectorRegistry,
    evaluation: EvaluationEngine,
    policies: PolicyEngine,
    store: Option<Box<dyn DocumentStore>>,
    step: u64,
    state: RunState,
    delay: Duration,
    stop_at: Option<u64>,
    last_report: Option<StepReport>,
}

impl WorldSystem {
    /// Validate `config` and build every sector, the evaluator and the
    /// policies. Invalid configuration is the only fatal error.
    pub fn new(config: &SimulationConfig) -> Result<Self, SetupError> {
        let config = config.clone().validated()?;
        let bus = Arc::new(EventBus::new());
        let seed = config.seed;

        let mut sectors = SectorRegistry::new();
        sectors.register(Box::new(ScienceSector::new(&config.science, bus.clone(), seed)));
        sectors.register(Box::new(ManufacturingSector::new(
            &config.manufacturing,
            bus.clone(),
            seed,
        )));
        sectors.register(Box::new(EquipmentSector::new(&config.equipment, bus.clone())));
        sectors.register(Box::new(TransportationSector::new(
            &config.transportation,
            bus.clone(),
        )));
        sectors.register(Box::new(ConstructionSector::new(
            &config.construction,
            bus.clone(),
            seed,
        )));

        let evaluation = EvaluationEngine::new(&config.metrics, &config.goals, &config.environment);
        let policies = PolicyEngine::from_config(&config.policies);

        log::info!(
            "World {} ready: {} sectors, {} goals, {} policies",
            config.world_id,
            sectors.len() + 1,
            config.goals.len(),
            policies.len()
        );

        Ok(Self {
            energy: EnergySector::new(&config.energy),
            config,
            bus,
            sectors,
            evaluation,
            policies,
            store: None,
            step: 0,
            state: RunState::Idle,
            delay: Duration::ZERO,
            stop_at: None,
            last_report: None,
        })
    }

    /// Attach a document store; every step is then logged to it.
    pub fn with_store(mut self, store: Box<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&dyn DocumentStore> {
        self.store.as_deref()
    }

    pub fn take_store(&mut self) -> Option<Box<dyn DocumentStore>> {
        self.store.take()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world_id(&self) -> &str {
        &self.config.world_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn energy(&self) -> &EnergySector {
        &self.energy
    }

    pub fn sectors(&self) -> &SectorRegistry {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut SectorRegistry {
        &mut self.sectors
    }

    pub fn evaluation(&self) -> &EvaluationEngine {
        &self.evaluation
    }

    pub fn policies_mut(&mut self) -> &mut PolicyEngine {
        &mut self.policies
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    /// Run one tick: demand, allocation, stepping, evaluation, policies.
    pub fn step(&mut self) -> StepReport {
        self.step += 1;

        let demands: Vec<(SectorKind, f64)> = self
            .sectors
            .iter()
            .map(|s| (s.kind(), s.power_demand().max(0.0)))
            .collect();
        let allocations = self.energy.allocate_power(&demands);

        let mut consumed = BTreeMap::new();
        for sector in self.sectors.iter_mut() {
            let kind = sector.kind();
            let allocated = allocations.get(&kind).copied().unwrap_or(0.0);
            let used = sector.step(allocated).clamp(0.0, allocated);
            self.energy.return_unused(allocated - used);
            consumed.insert(kind, used);
        }
        self.energy.step(0.0);

        let metrics: Vec<SectorMetrics> = std::iter::once(self.energy.metrics())
            .chain(self.sectors.iter().map(|s| s.metrics()))
            .collect();
        let evaluation = self
            .evaluation
            .evaluate(&metrics, self.config.environment.dust_decay_per_step);

        let mut ctx = PolicyContext {
            step: self.step,
            sectors: &mut self.sectors,
        };
        let policy_outcomes = self.policies.apply_policies(&mut ctx, &evaluation);

        let report = StepReport {
            world_id: self.config.world_id.clone(),
            step: self.step,
            overall_score: evaluation.overall_score(),
            power: self.energy.ledger().clone(),
            allocations,
            consumed,
            evaluation,
            policy_outcomes,
        };
        log::debug!("Step {} score {:.3}", report.step, report.overall_score);

        self.persist(&report);
        self.last_report = Some(report.clone());
        report
    }

    /// Step `count` times, returning the last report.
    pub fn run_steps(&mut self, count: u64) -> Option<StepReport> {
        let mut last = None;
        for _ in 0..count {
            last = Some(self.step());
        }
        last
    }

    fn persist(&mut self, report: &StepReport) {
        if self.store.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match serde_json::to_value(report) {
            Ok(doc) => {
                store.insert(METRICS_COLLECTION, doc);
            }
            Err(e) => log::warn!("Could not encode step {} metrics: {}", report.step, e),
        }
        match serde_json::to_value(&snapshot) {
            Ok(doc) => store.upsert(STATE_COLLECTION, &self.config.world_id, doc),
            Err(e) => log::warn!("Could not encode world state: {}", e),
        }
    }

    pub fn apply_command(&mut self, command: SimulationCommand) {
        log::debug!("Command {:?} in state {:?}", command, self.state);
        match command {
            SimulationCommand::StartContinuous => {
                self.stop_at = None;
                self.state = RunState::Running;
            }
            SimulationCommand::StartLimited(steps) => {
                self.stop_at = Some(self.step + steps);
                self.state = RunState::Running;
            }
            SimulationCommand::Pause => {
                if self.state == RunState::Running {
                    self.state = RunState::Paused;
                    log::info!("Paused after step {}", self.step);
                }
            }
            SimulationCommand::Resume => {
                if self.state == RunState::Paused {
                    self.state = RunState::Running;
                    log::info!("Resuming at step {}", self.step + 1);
                } else {
                    log::warn!("Resume ignored in state {:?}", self.state);
                }
            }
            SimulationCommand::Stop => self.state = RunState::Stopped,
            SimulationCommand::SetDelay(delay) => self.delay = delay,
        }
    }

    /// Drive the world from a command queue until it is stopped, a limited
    /// run completes, or the queue closes while nothing is running.
    ///
    /// Pending commands are applied between ticks, never during one. While
    /// idle or paused the loop blocks on the queue. Returns the number of
    /// steps run by this call.
    pub fn run(&mut self, commands: &Receiver<SimulationCommand>) -> u64 {
        let mut steps_run = 0;
        loop {
            while let Ok(command) = commands.try_recv() {
                self.apply_command(command);
            }

            match self.state {
                RunState::Stopped => break,
                RunState::Idle | RunState::Paused => match commands.recv() {
                    Ok(command) => self.apply_command(command),
                    Err(_) => break,
                },
                RunState::Running => {
                    if self.stop_at.is_some_and(|limit| self.step >= limit) {
                        log::info!("Limited run finished at step {}", self.step);
                        self.state = RunState::Stopped;
                        break;
                    }
                    self.step();
                    steps_run += 1;
                    if !self.delay.is_zero() {
                        match commands.recv_timeout(self.delay) {
                            Ok(command) => self.apply_command(command),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(self.delay),
                        }
                    }
                }
            }
        }
        steps_run
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            version: SNAPSHOT_VERSION,
            world_id: self.config.world_id.clone(),
            step: self.step,
            metrics: self.evaluation.metrics().clone(),
            energy_stored_kwh: self.energy.stored_energy(),
            sectors: self
                .sectors
                .iter()
                .map(|s| (s.kind(), s.stock_levels()))
                .collect(),
        }
    }

    /// Put the world back at the step and levels of `snapshot`.
    pub fn restore(&mut self, snapshot: &WorldSnapshot) {
        if snapshot.world_id != self.config.world_id {
            log::warn!(
                "Restoring snapshot of {} into world {}",
                snapshot.world_id,
                self.config.world_id
            );
        }
        self.step = snapshot.step;
        self.evaluation.set_step(snapshot.step);
        for (metric_id, value) in &snapshot.metrics {
            self.evaluation.set_metric(metric_id, *value);
        }
        self.energy.restore(snapshot.step, snapshot.energy_stored_kwh);
        for (kind, levels) in &snapshot.sectors {
            match self.sectors.get_mut(*kind) {
                Some(sector) => sector.restore_levels(levels),
                None => log::warn!("Snapshot has levels for unregistered sector {}", kind),
            }
        }
        self.last_report = None;
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<(), SaveError> {
        persistence::save_snapshot(writer, &self.snapshot())
    }

    pub fn load<R: Read>(&mut self, reader: R) -> Result<(), SaveError> {
        let snapshot = persistence::load_snapshot(reader)?;
        self.restore(&snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::metric_ids;
    use crate::persistence::MemoryStore;
    use std::sync::mpsc;

    fn world() -> WorldSystem {
        WorldSystem::new(&SimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = SimulationConfig::default();
        config.goals[0].weight = -1.0;
        assert!(matches!(WorldSystem::new(&config), Err(SetupError::Invalid(_))));
    }

    #[test]
    fn test_throttleable_kinds_match_sectors() {
        let config = SimulationConfig::default();
        let mut world = WorldSystem::new(&config).unwrap();
        let mut energy = EnergySector::new(&config.energy);
        assert_eq!(
            energy.as_throttleable().is_some(),
            SectorKind::Energy.is_throttleable()
        );
        for kind in world.sectors().kinds() {
            let sector = world.sectors_mut().get_mut(kind).unwrap();
            assert_eq!(
                sector.as_throttleable().is_some(),
                kind.is_throttleable(),
                "{} disagrees",
                kind
            );
        }
    }

    #[test]
    fn test_step_counts_and_reports_every_sector() {
        let mut world = world();
        let report = world.step();
        assert_eq!(report.step, 1);
        assert_eq!(report.evaluation.step, 1);
        assert_eq!(report.allocations.len(), 5);
        assert!((0.0..=1.0).contains(&report.overall_score));
        for (kind, used) in &report.consumed {
            assert!(*used <= report.allocations[kind] + 1e-9);
        }
    }

    #[test]
    fn test_policies_run_every_step() {
        let mut world = world();
        let report = world.step();
        assert!(report.policy_outcomes.contains_key("POL-DUST-THROTTLE"));
        assert_eq!(
            report.policy_outcomes["POL-SCI-GROWTH"],
            PolicyOutcome::Idle { next_step: 24 }
        );
    }

    #[test]
    fn test_store_receives_metrics_and_latest_state() {
        let mut world = world().with_store(Box::new(MemoryStore::new()));
        world.run_steps(3);
        let store = world.store().unwrap();
        assert_eq!(store.count(METRICS_COLLECTION), 3);
        assert_eq!(store.count(STATE_COLLECTION), 1);
        let state = store.get(STATE_COLLECTION, "lunar-base-alpha").unwrap();
        assert_eq!(state["step"], 3);
    }

    #[test]
    fn test_limited_run_stops_at_limit() {
        let mut world = world();
        let (tx, rx) = mpsc::channel();
        tx.send(SimulationCommand::StartLimited(5)).unwrap();
        assert_eq!(world.run(&rx), 5);
        assert_eq!(world.current_step(), 5);
        assert_eq!(world.state(), RunState::Stopped);
    }

    #[test]
    fn test_closed_queue_ends_idle_run() {
        let mut world = world();
        let (tx, rx) = mpsc::channel::<SimulationCommand>();
        drop(tx);
        assert_eq!(world.run(&rx), 0);
        assert_eq!(world.state(), RunState::Idle);
    }

    #[test]
    fn test_resume_only_from_pause() {
        let mut world = world();
        world.apply_command(SimulationCommand::Resume);
        assert_eq!(world.state(), RunState::Idle);
        world.apply_command(SimulationCommand::StartContinuous);
        world.apply_command(SimulationCommand::Pause);
        assert_eq!(world.state(), RunState::Paused);
        world.apply_command(SimulationCommand::Resume);
        assert_eq!(world.state(), RunState::Running);
    }

    #[test]
    fn test_save_and_load_restores_step_and_metrics() {
        let mut world = world();
        world.run_steps(10);
        let mut buf = Vec::new();
        world.save(&mut buf).unwrap();
        let dust = world.evaluation().metric(metric_ids::DUST_COVERAGE);

        let mut restored = self::world();
        restored.load(buf.as_slice()).unwrap();
        assert_eq!(restored.current_step(), 10);
        assert_eq!(restored.evaluation().metric(metric_ids::DUST_COVERAGE), dust);
        let (a, b) = (restored.snapshot(), world.snapshot());
        assert_eq!(a.sectors, b.sectors);
        assert_eq!(a.metrics, b.metrics);
        assert!((a.energy_stored_kwh - b.energy_stored_kwh).abs() < 1e-6);
        assert_eq!(restored.step().step, 11);
    }
}
