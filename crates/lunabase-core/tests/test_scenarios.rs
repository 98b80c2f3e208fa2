//! Reference scenarios for the core building blocks.
//!
//! Each test drives one component through its public API only: scoring,
//! task selection, equipment resupply, the rocket state machine and the
//! dust throttle ramp as seen by the throttled sectors.

use std::collections::BTreeMap;
use std::sync::Arc;

use lunabase_core::config::{
    EnvironmentConfig, EquipmentConfig, InventoryLevels, ManufacturingConfig, TaskDefinition,
};
use lunabase_core::evaluation::{
    metric_ids, EvaluationEngine, MetricDefinition, MetricKind, MetricStatus, PerformanceGoal,
};
use lunabase_core::event_bus::{Event, EventBus, EventType, Inbox, InboxOrder, Leg};
use lunabase_core::config::SimulationConfig;
use lunabase_core::policy::dust_throttle::throttle_for;
use lunabase_core::policy::{DustThrottlePolicy, Policy, PolicyContext, PolicyOutcome};
use lunabase_core::sectors::transportation::{MissionPhase, Rocket};
use lunabase_core::sectors::{EquipmentSector, ManufacturingSector, Sector, SectorKind};
use lunabase_core::world::WorldSystem;
use lunabase_core::stock::BufferTarget;
use lunabase_logic::rocket::RocketSpec;

// ── Helpers ────────────────────────────────────────────────────────────

fn dust_engine(target: f64) -> EvaluationEngine {
    let definition = MetricDefinition {
        id: metric_ids::DUST_COVERAGE.into(),
        name: "Dust coverage".into(),
        unit: "fraction".into(),
        kind: MetricKind::Indicator,
        initial_value: 0.0,
        thresholds: None,
    };
    let goal = PerformanceGoal::new("GOAL-DUST", metric_ids::DUST_COVERAGE, target, "minimize", 1.0)
        .unwrap();
    EvaluationEngine::new(&[definition], &[goal], &EnvironmentConfig::default())
}

fn he3_only_manufacturing() -> ManufacturingConfig {
    ManufacturingConfig {
        robots: 1,
        tasks: vec![TaskDefinition {
            id: "produce_he3".into(),
            mode: "he3_mining".into(),
            primary_output: Some("he3".into()),
        }],
        buffer_targets: BTreeMap::from([(
            "he3".to_string(),
            BufferTarget { min: 20.0, max: 300.0 },
        )]),
        default_stock: BTreeMap::from([("he3".to_string(), 0.0)]),
        initial_stock: BTreeMap::new(),
        ..ManufacturingConfig::default()
    }
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[test]
fn scenario_a_dust_goal_scoring() {
    let mut engine = dust_engine(0.2);

    engine.set_metric(metric_ids::DUST_COVERAGE, 0.2);
    assert_eq!(engine.calculate_score(metric_ids::DUST_COVERAGE), Some(1.0));
    assert_eq!(
        engine.determine_metric_status(metric_ids::DUST_COVERAGE),
        MetricStatus::Within
    );

    engine.set_metric(metric_ids::DUST_COVERAGE, 0.4);
    assert_eq!(engine.calculate_score(metric_ids::DUST_COVERAGE), Some(0.0));
    assert_eq!(
        engine.determine_metric_status(metric_ids::DUST_COVERAGE),
        MetricStatus::Outside
    );
}

#[test]
fn scenario_b_he3_deficiency_drives_task_selection() {
    let bus = Arc::new(EventBus::new());
    let mut sector = ManufacturingSector::new(&he3_only_manufacturing(), bus, 7);
    assert_eq!(sector.task_deficiencies(), vec![("produce_he3".to_string(), 20.0)]);

    sector.step(10.0);

    assert!((sector.stock().get("he3") - 5.0).abs() < 1e-9);
    assert_eq!(sector.task_deficiencies(), vec![("produce_he3".to_string(), 15.0)]);
}

#[test]
fn scenario_c_equipment_resupply_is_idempotent() {
    let bus = Arc::new(EventBus::new());
    let requests = Inbox::new();
    requests.subscribe(&bus, EventType::TransportRequest, |_| true);

    let config = EquipmentConfig {
        fabricators: 0,
        inventory: BTreeMap::from([(
            "rover_chassis".to_string(),
            InventoryLevels { initial: 0, minimum: 1, target: 1 },
        )]),
        ..EquipmentConfig::default()
    };
    let mut sector = EquipmentSector::new(&config, Arc::clone(&bus));

    assert_eq!(sector.check_and_request_resupply(), 1);
    let inventory = sector.inventory("rover_chassis").copied().unwrap();
    assert_eq!((inventory.physical, inventory.pending), (0, 1));

    assert_eq!(sector.check_and_request_resupply(), 0);
    assert_eq!(requests.drain(InboxOrder::Fifo).len(), 1);
}

#[test]
fn scenario_d_rocket_round_trip() {
    let bus = EventBus::new();
    let deliveries = Inbox::new();
    deliveries.subscribe(&bus, EventType::PayloadDelivered, |_| true);

    let spec = RocketSpec {
        loading_steps: 24,
        ..RocketSpec::default()
    };
    let mut rocket = Rocket::new(0, spec, 10);
    assert!(rocket.commit_round_trip(Vec::new(), Vec::new()));
    assert!(!rocket.is_available);

    for _ in 0..10 {
        rocket.step(&bus);
    }
    assert_eq!(rocket.phase(), Some(MissionPhase::Loading));

    for _ in 0..24 {
        rocket.step(&bus);
    }
    assert_eq!(rocket.phase(), Some(MissionPhase::Inbound));

    for _ in 0..10 {
        rocket.step(&bus);
    }
    assert!(rocket.mission.is_none());
    assert!(rocket.is_available);

    let legs: Vec<Leg> = deliveries
        .drain(InboxOrder::Fifo)
        .into_iter()
        .filter_map(|event| match event {
            Event::PayloadDelivered { leg, .. } => Some(leg),
            _ => None,
        })
        .collect();
    assert_eq!(legs, vec![Leg::Outbound, Leg::Return]);
}

#[test]
fn scenario_e_dust_throttle_ramp() {
    assert_eq!(throttle_for(0.69, 1.0, 0.7, 0.8), 0.0);
    assert!((throttle_for(1.0, 1.0, 0.7, 0.8) - 0.8).abs() < 1e-9);
    assert!((throttle_for(0.85, 1.0, 0.7, 0.8) - 0.4).abs() < 1e-9);
}

#[test]
fn scenario_e_throttle_reaches_each_dusty_sector() {
    let dusty = [SectorKind::Manufacturing, SectorKind::Science, SectorKind::Construction];
    let mut world = WorldSystem::new(&SimulationConfig::default()).unwrap();
    let mut engine = dust_engine(1.0);
    let mut policy = DustThrottlePolicy::new(
        "POL-DUST",
        "Dust throttle",
        true,
        metric_ids::DUST_COVERAGE,
        0.7,
        0.8,
        dusty.to_vec(),
    );

    // Halfway through the ramp, then back below where it starts
    for (dust, expected) in [(0.85, 0.4), (0.5, 0.0)] {
        engine.set_metric(metric_ids::DUST_COVERAGE, dust);
        let result = engine.evaluate(&[], 0.0);
        let mut ctx = PolicyContext { step: result.step, sectors: world.sectors_mut() };
        match policy.apply(&mut ctx, &result).unwrap() {
            PolicyOutcome::Throttle { factor, sectors } => {
                assert!((factor - expected).abs() < 1e-9, "dust {} gave {}", dust, factor);
                assert_eq!(sectors, dusty.to_vec());
            }
            other => panic!("expected a throttle outcome, got {:?}", other),
        }
        for kind in dusty {
            let sector = world.sectors_mut().get_mut(kind).unwrap();
            let applied = sector.as_throttleable().unwrap().throttle_factor();
            assert!((applied - expected).abs() < 1e-9, "{} at {} for dust {}", kind, applied, dust);
        }
    }
}

#[test]
fn rocket_busy_with_a_mission_refuses_another() {
    let mut rocket = Rocket::new(3, RocketSpec::default(), 2);
    assert!(rocket.commit_round_trip(Vec::new(), Vec::new()));
    assert!(!rocket.commit_round_trip(Vec::new(), Vec::new()));
    assert_eq!(rocket.phase(), Some(MissionPhase::Outbound));
    assert_eq!(SectorKind::Transportation.name(), "transportation");
}
