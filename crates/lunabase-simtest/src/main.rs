//! Lunabase Headless Simulation Harness
//!
//! Validates the pure component models and runs a full settlement world
//! through the command queue, in-process with an in-memory document store.
//!
//! Usage:
//!   cargo run -p lunabase-simtest
//!   cargo run -p lunabase-simtest -- --verbose --steps 720
//!   cargo run -p lunabase-simtest -- --config path/to/base.json
//!
//! Logging follows `RUST_LOG` (default `warn`).

use std::collections::BTreeMap;
use std::sync::mpsc;

use lunabase_core::config::{SetupError, SimulationConfig};
use lunabase_core::evaluation::metric_ids;
use lunabase_core::persistence::{MemoryStore, METRICS_COLLECTION, STATE_COLLECTION};
use lunabase_core::policy::PolicyOutcome;
use lunabase_core::sectors::{EnergySector, SectorKind};
use lunabase_core::world::{RunState, SimulationCommand, StepReport, WorldSystem};
use lunabase_logic::growth::{self, GrowthInputs};
use lunabase_logic::rocket::{self, RocketSpec};
use lunabase_logic::solar;
use tracing_subscriber::EnvFilter;

// ── Base configuration (same document the experiments load) ────────────
const BASE_CONFIG_JSON: &str = include_str!("../../../data/lunar_base.json");

const DEFAULT_STEPS: u64 = 360;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

struct Args {
    verbose: bool,
    steps: u64,
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        verbose: false,
        steps: DEFAULT_STEPS,
        config_path: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" => args.verbose = true,
            "--steps" => {
                if let Some(n) = iter.next().and_then(|v| v.parse().ok()) {
                    args.steps = n;
                }
            }
            "--config" => args.config_path = iter.next(),
            other => log::warn!("Ignoring unknown argument {}", other),
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<SimulationConfig, String> {
    let json = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?,
        None => BASE_CONFIG_JSON.to_string(),
    };
    SimulationConfig::from_json(&json).map_err(|e| e.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = parse_args();
    println!("=== Lunabase Simulation Harness ===\n");

    let config = match load_config(args.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ config_load: {}", e);
            std::process::exit(1);
        }
    };

    let mut results = Vec::new();

    // 1. Configuration validation
    results.extend(validate_config(&config, args.verbose));

    // 2. Solar and battery power balance
    results.extend(validate_energy(&config, args.verbose));

    // 3. Growth-control sizing
    results.extend(validate_growth_logic(args.verbose));

    // 4. Rocket propellant and timing
    results.extend(validate_rocket_logic(&config, args.verbose));

    // 5. Full world run through the command queue
    results.extend(validate_world_run(&config, args.steps, args.verbose));

    // 6. Dust throttle closed loop
    results.extend(validate_dust_loop(&config, args.verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || args.verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

// ── 1. Configuration ────────────────────────────────────────────────────

fn validate_config(config: &SimulationConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Configuration ---");
    let mut results = Vec::new();

    results.push(TestResult {
        name: "config_goals_present".into(),
        passed: !config.goals.is_empty(),
        detail: format!("{} goals, {} metrics", config.goals.len(), config.metrics.len()),
    });

    let goal_metrics_defined = config
        .goals
        .iter()
        .all(|g| config.metrics.iter().any(|m| m.id == g.metric_id));
    results.push(TestResult {
        name: "config_goal_metrics_defined".into(),
        passed: goal_metrics_defined,
        detail: "every goal tracks a defined metric".into(),
    });

    // A broken copy must be refused with every violation listed
    let mut broken = config.clone();
    if let Some(goal) = broken.goals.first_mut() {
        goal.weight = -1.0;
    }
    broken.construction.regolith_reorder_amount = 0.0;
    let rejected = match broken.validated() {
        Err(SetupError::Invalid(errors)) => errors.len(),
        _ => 0,
    };
    results.push(TestResult {
        name: "config_invalid_rejected".into(),
        passed: rejected >= 2,
        detail: format!("{} violations reported", rejected),
    });

    if verbose {
        println!("  World {} (seed {})", config.world_id, config.seed);
        for goal in &config.goals {
            println!(
                "    {:14} {:?} {} (weight {})",
                goal.id, goal.direction, goal.target, goal.weight
            );
        }
    }

    results
}

// ── 2. Energy ───────────────────────────────────────────────────────────

fn validate_energy(config: &SimulationConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Energy ---");
    let mut results = Vec::new();
    let day = config.energy.day_length_steps;

    let noon = solar::illumination(day as u64 / 4, day);
    let midnight = solar::illumination(day as u64 * 3 / 4, day);
    results.push(TestResult {
        name: "energy_day_night_cycle".into(),
        passed: (noon - 1.0).abs() < 1e-6 && midnight == 0.0,
        detail: format!("noon {:.3}, midnight {:.3}", noon, midnight),
    });

    // Demand far above supply: every sector gets the same fraction
    let mut energy = EnergySector::new(&config.energy);
    let huge = energy.storage_capacity();
    let allocations = energy.allocate_power(&[
        (SectorKind::Science, huge),
        (SectorKind::Manufacturing, huge * 3.0),
    ]);
    let science = allocations.get(&SectorKind::Science).copied().unwrap_or(0.0);
    let manufacturing = allocations.get(&SectorKind::Manufacturing).copied().unwrap_or(0.0);
    let proportional = science > 0.0 && ((manufacturing / science) - 3.0).abs() < 1e-6;
    results.push(TestResult {
        name: "energy_proportional_rationing".into(),
        passed: proportional && energy.ledger().shortfall > 0.0,
        detail: format!(
            "science {:.1} kW, manufacturing {:.1} kW, short {:.1} kW",
            science,
            manufacturing,
            energy.ledger().shortfall
        ),
    });

    if verbose {
        println!(
            "  Storage {:.0} kWh, stored {:.0} kWh",
            energy.storage_capacity(),
            energy.stored_energy()
        );
    }

    results
}

// ── 3. Growth control ───────────────────────────────────────────────────

fn validate_growth_logic(verbose: bool) -> Vec<TestResult> {
    println!("--- Growth Control ---");
    let mut results = Vec::new();

    let inputs = GrowthInputs {
        nominal_productivity: 1.0,
        availability: 0.8,
        throttle: 0.0,
        baseline_output: 4.0,
        growth_rate: 2.0,
        growth_duration: 240,
        elapsed: 240,
        horizon: 48,
        total_built: 4,
        expected_losses: 0,
        in_pipeline: 0,
        max_pipeline: 6,
        safety_margin: 0.1,
    };
    let decision = growth::plan_order(&inputs);
    results.push(TestResult {
        name: "growth_orders_for_doubling".into(),
        passed: decision.order > 0 && decision.order <= inputs.max_pipeline,
        detail: format!(
            "target {:.2}, required {}, forecast {}, order {}",
            decision.target_output, decision.required_fleet, decision.forecast_fleet, decision.order
        ),
    });

    let full = growth::plan_order(&GrowthInputs {
        in_pipeline: 6,
        ..inputs.clone()
    });
    results.push(TestResult {
        name: "growth_pipeline_cap".into(),
        passed: full.order == 0,
        detail: format!("full pipeline orders {} (shortfall {})", full.order, full.shortfall()),
    });

    let throttled = growth::plan_order(&GrowthInputs {
        throttle: 1.0,
        ..inputs
    });
    results.push(TestResult {
        name: "growth_fully_throttled_orders_nothing".into(),
        passed: throttled.order == 0,
        detail: format!("p_eff {:.2}", throttled.effective_productivity),
    });

    if verbose {
        println!("  Decision: {:?}", decision);
    }

    results
}

// ── 4. Rockets ──────────────────────────────────────────────────────────

fn validate_rocket_logic(config: &SimulationConfig, _verbose: bool) -> Vec<TestResult> {
    println!("--- Rockets ---");
    let mut results = Vec::new();
    let spec: &RocketSpec = &config.transportation.rocket;

    let empty = rocket::round_trip_propellant(spec, 0.0, 0.0);
    let loaded = rocket::round_trip_propellant(spec, 0.0, spec.payload_capacity_kg);
    results.push(TestResult {
        name: "rocket_payload_costs_fuel".into(),
        passed: empty > 0.0 && loaded > empty,
        detail: format!("empty {:.0} kg, full return {:.0} kg", empty, loaded),
    });

    results.push(TestResult {
        name: "rocket_initial_fuel_covers_empty_trip".into(),
        passed: config.transportation.initial_fuel >= empty,
        detail: format!(
            "{:.0} kg on hand for a {:.0} kg trip",
            config.transportation.initial_fuel, empty
        ),
    });

    let leg = rocket::one_way_steps(spec.distance_km, spec.cruise_speed_km_per_step);
    results.push(TestResult {
        name: "rocket_leg_duration".into(),
        passed: leg >= 1,
        detail: format!("{} steps per leg from distance and speed", leg),
    });

    results
}

// ── 5. World run ────────────────────────────────────────────────────────

fn validate_world_run(config: &SimulationConfig, steps: u64, verbose: bool) -> Vec<TestResult> {
    println!("--- World Run ({} steps) ---", steps);
    let mut results = Vec::new();

    let mut world = match WorldSystem::new(config) {
        Ok(world) => world.with_store(Box::new(MemoryStore::new())),
        Err(e) => {
            results.push(TestResult {
                name: "world_setup".into(),
                passed: false,
                detail: e.to_string(),
            });
            return results;
        }
    };

    let (tx, rx) = mpsc::channel();
    let queued = tx.send(SimulationCommand::StartLimited(steps)).is_ok();
    drop(tx);
    let ran = if queued { world.run(&rx) } else { 0 };
    results.push(TestResult {
        name: "world_limited_run".into(),
        passed: ran == steps && world.state() == RunState::Stopped,
        detail: format!("{} steps run, state {:?}", ran, world.state()),
    });

    let (metric_docs, has_state) = world
        .store()
        .map(|s| (s.count(METRICS_COLLECTION), s.get(STATE_COLLECTION, world.world_id()).is_some()))
        .unwrap_or((0, false));
    results.push(TestResult {
        name: "world_persisted".into(),
        passed: metric_docs as u64 == steps && has_state,
        detail: format!("{} metrics documents, latest state {}", metric_docs, has_state),
    });

    let negative: Vec<String> = world
        .sectors()
        .iter()
        .flat_map(|s| {
            let kind = s.kind();
            s.stock_levels()
                .into_iter()
                .filter(|(_, level)| *level < 0.0)
                .map(move |(resource, _)| format!("{}.{}", kind, resource))
        })
        .collect();
    results.push(TestResult {
        name: "world_stocks_non_negative".into(),
        passed: negative.is_empty(),
        detail: if negative.is_empty() {
            "all stocks non-negative".into()
        } else {
            format!("negative: {}", negative.join(", "))
        },
    });

    let score = world.last_report().map_or(-1.0, |r| r.overall_score);
    results.push(TestResult {
        name: "world_score_in_range".into(),
        passed: (0.0..=1.0).contains(&score),
        detail: format!("overall score {:.3}", score),
    });

    // Snapshot, keep going, restore: the step counter comes back
    let mut buf = Vec::new();
    let saved = world.save(&mut buf);
    let saved_step = world.current_step();
    world.run_steps(5);
    let restored = saved.and_then(|_| world.load(buf.as_slice()));
    results.push(TestResult {
        name: "world_snapshot_restore".into(),
        passed: restored.is_ok() && world.current_step() == saved_step,
        detail: match restored {
            Ok(()) => format!("{} bytes, back at step {}", buf.len(), world.current_step()),
            Err(e) => e.to_string(),
        },
    });

    if verbose {
        if let Some(report) = world.last_report() {
            print_report(report);
        } else {
            print_metrics(world.evaluation().metrics());
        }
    }

    results
}

fn print_metrics(metrics: &BTreeMap<String, f64>) {
    println!("  Metrics:");
    for (id, value) in metrics {
        println!("    {:14}: {:.3}", id, value);
    }
}

fn print_report(report: &StepReport) {
    println!("  Step {} score {:.3}", report.step, report.overall_score);
    println!(
        "  Power: generated {:.1} kW, delivered {:.1} kW, short {:.1} kW",
        report.power.generated, report.power.delivered, report.power.shortfall
    );
    print_metrics(&report.evaluation.metrics);
    match serde_json::to_string_pretty(&report.policy_outcomes) {
        Ok(json) => println!("  Policies: {}", json),
        Err(e) => log::warn!("Could not render policy outcomes: {}", e),
    }
}

// ── 6. Dust throttle loop ───────────────────────────────────────────────

fn validate_dust_loop(config: &SimulationConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Dust Throttle ---");
    let mut results = Vec::new();

    // Tight dust goal and no recovery: activity alone must trip the throttle
    let mut tight = config.clone();
    tight.environment.dust_decay_per_step = 0.0;
    for goal in &mut tight.goals {
        if goal.metric_id == metric_ids::DUST_COVERAGE {
            goal.target = 0.001;
        }
    }

    let mut world = match WorldSystem::new(&tight) {
        Ok(world) => world,
        Err(e) => {
            results.push(TestResult {
                name: "dust_setup".into(),
                passed: false,
                detail: e.to_string(),
            });
            return results;
        }
    };

    let throttles: Vec<f64> = (0..48)
        .map(|_| world.step())
        .filter_map(|report| {
            report
                .policy_outcomes
                .values()
                .find_map(|outcome| match outcome {
                    PolicyOutcome::Throttle { factor, .. } => Some(*factor),
                    _ => None,
                })
        })
        .collect();
    let peak = throttles.iter().copied().fold(0.0, f64::max);
    results.push(TestResult {
        name: "dust_throttle_engages".into(),
        passed: peak > 0.0,
        detail: format!("peak throttle {:.2} over {} steps", peak, throttles.len()),
    });

    let dust = world.evaluation().metric(metric_ids::DUST_COVERAGE).unwrap_or(0.0);
    if verbose {
        println!("  Dust coverage after 48 steps: {:.4}", dust);
    }

    results
}
