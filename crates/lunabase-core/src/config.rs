//! Simulation configuration
//!
//! The whole simulation is described by one [`SimulationConfig`] document,
//! parsed and validated once at startup. Components receive the part they
//! need by reference and keep an owned copy; nothing mutates configuration
//! after construction. Every field has a default so partial documents work.
//!
//! ```
//! use lunabase_core::config::{validate_config, SimulationConfig};
//!
//! let config = SimulationConfig::default();
//! assert!(validate_config(&config).is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeBounds;
use thiserror::Error;

use crate::evaluation::{metric_ids, GoalDirection, MetricDefinition, MetricKind, PerformanceGoal};
use crate::event_bus::InboxOrder;
use crate::persistence::{DocumentStore, CONFIG_COLLECTION};
use crate::sectors::SectorKind;
use crate::stock::BufferTarget;
use lunabase_logic::rocket::RocketSpec;
use lunabase_logic::solar::LUNAR_DAY_STEPS;

/// A single configuration violation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid goal direction '{0}' (expected 'minimize' or 'maximize')")]
    InvalidGoalDirection(String),
    #[error("goal {goal} has negative weight {weight}")]
    NegativeGoalWeight { goal: String, weight: f64 },
    #[error("more than one goal targets metric {0}")]
    DuplicateGoal(String),
    #[error("duplicate id {0}")]
    DuplicateId(String),
    #[error("{what} has negative capacity {value}")]
    NegativeCapacity { what: String, value: f64 },
    #[error("buffer target for {resource} is invalid (min {min}, max {max})")]
    InvalidBufferTarget { resource: String, min: f64, max: f64 },
    #[error("{what} must request a positive amount, got {value}")]
    NonPositiveRequestAmount { what: String, value: f64 },
    #[error("module {0} needs zero shells")]
    NonPositiveShells(String),
    #[error("{0} must be at least one step")]
    ZeroDuration(String),
    #[error("task {task} uses unknown mode {mode}")]
    UnknownMode { task: String, mode: String },
    #[error("{what} references unknown equipment {equipment}")]
    UnknownEquipment { what: String, equipment: String },
    #[error("policy {policy} targets sector {sector}, which cannot be throttled")]
    NotThrottleable { policy: String, sector: SectorKind },
    #[error("{what} must lie in {range}, got {value}")]
    OutOfRange { what: String, range: &'static str, value: f64 },
    #[error("science sector orders unknown module type {0}")]
    UnknownModule(String),
}

/// Errors that stop the simulation from starting
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration document {0} not found")]
    MissingDocument(String),
    #[error("invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<ConfigError>),
}

fn format_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Top level ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub world_id: String,
    /// Seed for every sector's random stream
    pub seed: u64,
    pub environment: EnvironmentConfig,
    pub energy: EnergyConfig,
    pub science: ScienceConfig,
    pub manufacturing: ManufacturingConfig,
    pub equipment: EquipmentConfig,
    pub transportation: TransportationConfig,
    pub construction: ConstructionConfig,
    pub metrics: Vec<MetricDefinition>,
    pub goals: Vec<PerformanceGoal>,
    pub policies: Vec<PolicyConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_id: "lunar-base-alpha".to_string(),
            seed: 42,
            environment: EnvironmentConfig::default(),
            energy: EnergyConfig::default(),
            science: ScienceConfig::default(),
            manufacturing: ManufacturingConfig::default(),
            equipment: EquipmentConfig::default(),
            transportation: TransportationConfig::default(),
            construction: ConstructionConfig::default(),
            metrics: default_metrics(),
            goals: default_goals(),
            policies: default_policies(),
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SetupError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validated()
    }

    /// Load the document `id` from the configuration collection of `store`.
    pub fn from_store(store: &dyn DocumentStore, id: &str) -> Result<Self, SetupError> {
        let doc = store
            .get(CONFIG_COLLECTION, id)
            .ok_or_else(|| SetupError::MissingDocument(id.to_string()))?;
        let config: SimulationConfig = serde_json::from_value(doc)?;
        config.validated()
    }

    /// Return `self` if it passes validation.
    pub fn validated(self) -> Result<Self, SetupError> {
        let errors = validate_config(&self);
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(SetupError::Invalid(errors))
        }
    }
}

// ── Environment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Metric that recovers on its own every step
    pub dust_metric: String,
    /// Amount the dust metric recovers per step
    pub dust_decay_per_step: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dust_metric: metric_ids::DUST_COVERAGE.to_string(),
            dust_decay_per_step: 0.002,
        }
    }
}

// ── Energy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarArrayConfig {
    pub area_m2: f64,
    pub efficiency: f64,
    #[serde(default = "one")]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub capacity_kwh: f64,
    #[serde(default = "one_f64")]
    pub initial_fraction: f64,
    pub max_charge_rate: f64,
    pub max_discharge_rate: f64,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

fn one_f64() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub solar_arrays: Vec<SolarArrayConfig>,
    pub batteries: Vec<BatteryConfig>,
    /// Length of a full lunar day/night cycle
    pub day_length_steps: u32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            solar_arrays: vec![SolarArrayConfig {
                area_m2: 500.0,
                efficiency: 0.3,
                count: 4,
            }],
            batteries: vec![BatteryConfig {
                capacity_kwh: 25_000.0,
                initial_fraction: 0.8,
                max_charge_rate: 400.0,
                max_discharge_rate: 400.0,
                count: 4,
            }],
            day_length_steps: LUNAR_DAY_STEPS,
        }
    }
}

// ── Science ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoverConfig {
    pub battery_capacity_kwh: f64,
    /// Energy accepted per step while charging
    pub charge_rate_kw: f64,
    /// Energy drained per exploring step
    pub drive_draw_kwh: f64,
    /// State of charge below which a rover returns to charge
    pub low_battery_fraction: f64,
    /// Science units produced per exploring step
    pub productivity: f64,
    /// Dust coverage added per exploring step
    pub dust_per_step: f64,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            battery_capacity_kwh: 100.0,
            charge_rate_kw: 10.0,
            drive_draw_kwh: 5.0,
            low_battery_fraction: 0.2,
            productivity: 1.0,
            dust_per_step: 0.0002,
        }
    }
}

/// How a growth-control order is turned into construction requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBatching {
    /// One construction request per ordered rover
    #[default]
    PerUnit,
    /// One construction request per ordering decision, whatever its size
    SingleRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Output multiplier per `growth_duration_steps`
    pub growth_rate: f64,
    pub growth_duration_steps: u64,
    pub horizon_steps: u64,
    pub safety_margin: f64,
    pub max_pipeline: u32,
    /// Fraction of built rovers expected to be lost
    pub expected_loss_fraction: f64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            growth_rate: 2.0,
            growth_duration_steps: 240,
            horizon_steps: 48,
            safety_margin: 0.1,
            max_pipeline: 6,
            expected_loss_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScienceConfig {
    pub initial_rovers: u32,
    pub rover: RoverConfig,
    pub growth: GrowthConfig,
    pub order_batching: OrderBatching,
    /// Module type requested from construction for a new rover
    pub rover_module: String,
}

impl Default for ScienceConfig {
    fn default() -> Self {
        Self {
            initial_rovers: 4,
            rover: RoverConfig::default(),
            growth: GrowthConfig::default(),
            order_batching: OrderBatching::default(),
            rover_module: "science_rover".to_string(),
        }
    }
}

// ── Manufacturing ──────────────────────────────────────────────────────

/// What an ISRU robot does in one operating mode, per step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationMode {
    pub power_kw: f64,
    pub consumes: BTreeMap<String, f64>,
    pub generates: BTreeMap<String, f64>,
    pub dust_per_step: f64,
}

/// A production task: staff `mode` to raise `primary_output`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub mode: String,
    pub primary_output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManufacturingConfig {
    pub robots: u32,
    pub modes: BTreeMap<String, OperationMode>,
    pub tasks: Vec<TaskDefinition>,
    pub buffer_targets: BTreeMap<String, BufferTarget>,
    pub default_stock: BTreeMap<String, f64>,
    pub initial_stock: BTreeMap<String, f64>,
}

fn mode(
    power_kw: f64,
    consumes: &[(&str, f64)],
    generates: &[(&str, f64)],
    dust: f64,
) -> OperationMode {
    let to_map = |items: &[(&str, f64)]| -> BTreeMap<String, f64> {
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    };
    OperationMode {
        power_kw,
        consumes: to_map(consumes),
        generates: to_map(generates),
        dust_per_step: dust,
    }
}

fn task(id: &str, mode: &str, output: &str) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        mode: mode.to_string(),
        primary_output: Some(output.to_string()),
    }
}

impl Default for ManufacturingConfig {
    fn default() -> Self {
        let modes = BTreeMap::from([
            ("ice_mining".to_string(), mode(8.0, &[], &[("water", 80.0)], 0.0004)),
            (
                "regolith_excavation".to_string(),
                mode(6.0, &[], &[("regolith", 60.0)], 0.0008),
            ),
            (
                "metal_refining".to_string(),
                mode(12.0, &[("regolith", 40.0)], &[("metals", 8.0)], 0.0002),
            ),
            (
                "electrolysis".to_string(),
                mode(15.0, &[("water", 70.0)], &[("lox_lh2", 60.0)], 0.0),
            ),
            ("he3_mining".to_string(), mode(10.0, &[], &[("he3", 5.0)], 0.001)),
        ]);
        let tasks = vec![
            task("produce_water", "ice_mining", "water"),
            task("produce_regolith", "regolith_excavation", "regolith"),
            task("produce_metals", "metal_refining", "metals"),
            task("produce_fuel", "electrolysis", "lox_lh2"),
            task("produce_he3", "he3_mining", "he3"),
        ];
        let buffer_targets = BTreeMap::from([
            ("water".to_string(), BufferTarget { min: 500.0, max: 5_000.0 }),
            ("regolith".to_string(), BufferTarget { min: 800.0, max: 10_000.0 }),
            ("metals".to_string(), BufferTarget { min: 150.0, max: 2_000.0 }),
            ("lox_lh2".to_string(), BufferTarget { min: 6_000.0, max: 20_000.0 }),
            ("he3".to_string(), BufferTarget { min: 20.0, max: 300.0 }),
        ]);
        let default_stock = BTreeMap::from([
            ("water".to_string(), 300.0),
            ("regolith".to_string(), 500.0),
            ("metals".to_string(), 60.0),
            ("lox_lh2".to_string(), 2_000.0),
            ("he3".to_string(), 0.0),
        ]);
        Self {
            robots: 6,
            modes,
            tasks,
            buffer_targets,
            default_stock,
            initial_stock: BTreeMap::new(),
        }
    }
}

// ── Equipment manufacturing ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentRecipe {
    pub materials: BTreeMap<String, f64>,
    pub build_steps: u32,
    /// Mass of one unit when shipped in instead of built
    pub import_mass_kg: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InventoryLevels {
    pub initial: u32,
    /// Effective stock below this triggers an import
    pub minimum: u32,
    /// Fabricators build up to this level
    pub target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentConfig {
    pub fabricators: u32,
    pub fabricator_power_kw: f64,
    pub recipes: BTreeMap<String, EquipmentRecipe>,
    pub inventory: BTreeMap<String, InventoryLevels>,
    /// Raw materials requested per reorder
    pub material_reorder_amount: f64,
    pub inbox_order: InboxOrder,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            fabricators: 2,
            fabricator_power_kw: 10.0,
            recipes: BTreeMap::from([
                (
                    "rover_chassis".to_string(),
                    EquipmentRecipe {
                        materials: BTreeMap::from([("metals".to_string(), 20.0)]),
                        build_steps: 10,
                        import_mass_kg: 800.0,
                    },
                ),
                (
                    "instrument_pack".to_string(),
                    EquipmentRecipe {
                        materials: BTreeMap::from([("metals".to_string(), 5.0)]),
                        build_steps: 8,
                        import_mass_kg: 150.0,
                    },
                ),
            ]),
            inventory: BTreeMap::from([
                (
                    "rover_chassis".to_string(),
                    InventoryLevels { initial: 2, minimum: 1, target: 3 },
                ),
                (
                    "instrument_pack".to_string(),
                    InventoryLevels { initial: 2, minimum: 1, target: 3 },
                ),
            ]),
            material_reorder_amount: 60.0,
            // Newest requests are served first
            inbox_order: InboxOrder::Lifo,
        }
    }
}

// ── Transportation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportationConfig {
    pub rockets: u32,
    pub rocket: RocketSpec,
    /// Overrides the leg duration derived from distance and speed
    pub one_way_steps: Option<u32>,
    pub fuel_resource: String,
    pub initial_fuel: f64,
    pub fuel_reorder_level: f64,
    pub fuel_reorder_amount: f64,
    /// Launch pad draw while dispatching
    pub pad_power_kw: f64,
}

impl Default for TransportationConfig {
    fn default() -> Self {
        Self {
            rockets: 1,
            rocket: RocketSpec {
                dry_mass_kg: 2_000.0,
                payload_capacity_kg: 2_000.0,
                specific_impulse_s: 450.0,
                leg_delta_v: 1_800.0,
                distance_km: 384_400.0,
                cruise_speed_km_per_step: 5_000.0,
                loading_steps: 24,
            },
            one_way_steps: None,
            fuel_resource: "lox_lh2".to_string(),
            initial_fuel: 4_000.0,
            fuel_reorder_level: 4_000.0,
            fuel_reorder_amount: 3_000.0,
            pad_power_kw: 20.0,
        }
    }
}

// ── Construction ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub shells: u32,
    #[serde(default)]
    pub equipment: BTreeMap<String, u32>,
    pub build_steps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructionConfig {
    pub max_concurrent_projects: usize,
    pub printers: u32,
    pub printer_power_kw: f64,
    pub steps_per_shell: u32,
    pub regolith_per_shell: f64,
    pub shell_capacity: f64,
    pub initial_shells: f64,
    pub assemblers: u32,
    pub assembler_power_kw: f64,
    pub initial_equipment: BTreeMap<String, u32>,
    pub modules: BTreeMap<String, ModuleSpec>,
    pub regolith_reorder_level: f64,
    pub regolith_reorder_amount: f64,
    /// Dust added per working printer or assembler per step
    pub dust_per_active_robot: f64,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_projects: 2,
            printers: 2,
            printer_power_kw: 5.0,
            steps_per_shell: 6,
            regolith_per_shell: 50.0,
            shell_capacity: 20.0,
            initial_shells: 4.0,
            assemblers: 2,
            assembler_power_kw: 8.0,
            initial_equipment: BTreeMap::new(),
            modules: BTreeMap::from([(
                "science_rover".to_string(),
                ModuleSpec {
                    shells: 2,
                    equipment: BTreeMap::from([
                        ("rover_chassis".to_string(), 1),
                        ("instrument_pack".to_string(), 1),
                    ]),
                    build_steps: 12,
                },
            )]),
            regolith_reorder_level: 200.0,
            regolith_reorder_amount: 300.0,
            dust_per_active_robot: 0.0003,
        }
    }
}

// ── Policies ───────────────────────────────────────────────────────────

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    DustThrottle {
        id: String,
        name: String,
        #[serde(default = "enabled")]
        enabled: bool,
        metric_id: String,
        /// Fraction of the target at which throttling starts
        start_ratio: f64,
        max_throttle: f64,
        sectors: Vec<SectorKind>,
    },
    ScienceGrowth {
        id: String,
        name: String,
        #[serde(default = "enabled")]
        enabled: bool,
        metric_id: String,
        cadence_steps: u64,
    },
}

impl PolicyConfig {
    pub fn id(&self) -> &str {
        match self {
            PolicyConfig::DustThrottle { id, .. } | PolicyConfig::ScienceGrowth { id, .. } => id,
        }
    }
}

// ── Default metric/goal/policy sets ────────────────────────────────────

fn metric(id: &str, name: &str, unit: &str, kind: MetricKind) -> MetricDefinition {
    MetricDefinition {
        id: id.to_string(),
        name: name.to_string(),
        unit: unit.to_string(),
        kind,
        initial_value: 0.0,
        thresholds: None,
    }
}

fn default_metrics() -> Vec<MetricDefinition> {
    vec![
        metric(metric_ids::DUST_COVERAGE, "Dust coverage", "fraction", MetricKind::Indicator),
        metric(metric_ids::SCIENCE_OUTPUT, "Science output", "units", MetricKind::Cumulative),
        metric(metric_ids::MODULES_BUILT, "Modules built", "modules", MetricKind::Cumulative),
        metric(metric_ids::POWER_SHORTFALL, "Unmet power demand", "kWh", MetricKind::Cumulative),
        metric(metric_ids::RESOURCE_OUTPUT, "ISRU output", "kg", MetricKind::Cumulative),
        metric(
            metric_ids::EQUIPMENT_BUILT,
            "Equipment fabricated",
            "units",
            MetricKind::Cumulative,
        ),
        metric(metric_ids::CARGO_DELIVERED, "Cargo delivered", "units", MetricKind::Cumulative),
    ]
}

fn goal(
    id: &str,
    metric_id: &str,
    target: f64,
    direction: GoalDirection,
    weight: f64,
) -> PerformanceGoal {
    PerformanceGoal {
        id: id.to_string(),
        metric_id: metric_id.to_string(),
        target,
        direction,
        weight,
    }
}

fn default_goals() -> Vec<PerformanceGoal> {
    vec![
        goal("GOAL-DUST", metric_ids::DUST_COVERAGE, 0.3, GoalDirection::Minimize, 1.0),
        goal("GOAL-SCIENCE", metric_ids::SCIENCE_OUTPUT, 2_000.0, GoalDirection::Maximize, 1.0),
        goal("GOAL-MODULES", metric_ids::MODULES_BUILT, 10.0, GoalDirection::Maximize, 0.5),
        goal("GOAL-POWER", metric_ids::POWER_SHORTFALL, 0.0, GoalDirection::Minimize, 0.5),
    ]
}

fn default_policies() -> Vec<PolicyConfig> {
    vec![
        PolicyConfig::DustThrottle {
            id: "POL-DUST-THROTTLE".to_string(),
            name: "Dust coverage throttle".to_string(),
            enabled: true,
            metric_id: metric_ids::DUST_COVERAGE.to_string(),
            start_ratio: 0.7,
            max_throttle: 0.8,
            sectors: vec![
                SectorKind::Manufacturing,
                SectorKind::Science,
                SectorKind::Construction,
            ],
        },
        PolicyConfig::ScienceGrowth {
            id: "POL-SCI-GROWTH".to_string(),
            name: "Science fleet growth control".to_string(),
            enabled: true,
            metric_id: metric_ids::SCIENCE_OUTPUT.to_string(),
            cadence_steps: 24,
        },
    ]
}

// ── Validation ─────────────────────────────────────────────────────────

fn check_capacity(errors: &mut Vec<ConfigError>, what: &str, value: f64) {
    if value < 0.0 {
        errors.push(ConfigError::NegativeCapacity {
            what: what.to_string(),
            value,
        });
    }
}

fn check_amount(errors: &mut Vec<ConfigError>, what: &str, value: f64) {
    if value <= 0.0 {
        errors.push(ConfigError::NonPositiveRequestAmount {
            what: what.to_string(),
            value,
        });
    }
}

fn check_steps(errors: &mut Vec<ConfigError>, what: &str, value: u64) {
    if value == 0 {
        errors.push(ConfigError::ZeroDuration(what.to_string()));
    }
}

fn check_range(
    errors: &mut Vec<ConfigError>,
    what: &str,
    value: f64,
    bounds: impl RangeBounds<f64>,
    range: &'static str,
) {
    if !bounds.contains(&value) {
        errors.push(ConfigError::OutOfRange {
            what: what.to_string(),
            range,
            value,
        });
    }
}

/// Collect every violation in `config`. Empty means valid.
pub fn validate_config(config: &SimulationConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    // Goals
    let mut goal_ids = std::collections::BTreeSet::new();
    let mut goal_metrics = std::collections::BTreeSet::new();
    for g in &config.goals {
        if g.weight < 0.0 {
            errors.push(ConfigError::NegativeGoalWeight {
                goal: g.id.clone(),
                weight: g.weight,
            });
        }
        if !goal_ids.insert(g.id.as_str()) {
            errors.push(ConfigError::DuplicateId(g.id.clone()));
        }
        if !goal_metrics.insert(g.metric_id.as_str()) {
            errors.push(ConfigError::DuplicateGoal(g.metric_id.clone()));
        }
    }
    let mut metric_ids = std::collections::BTreeSet::new();
    for m in &config.metrics {
        if !metric_ids.insert(m.id.as_str()) {
            errors.push(ConfigError::DuplicateId(m.id.clone()));
        }
    }

    // Energy
    for (i, battery) in config.energy.batteries.iter().enumerate() {
        check_capacity(&mut errors, &format!("battery bank {}", i), battery.capacity_kwh);
    }
    for (i, array) in config.energy.solar_arrays.iter().enumerate() {
        check_capacity(&mut errors, &format!("solar array {} area", i), array.area_m2);
    }

    // Science
    let science = &config.science;
    check_range(
        &mut errors,
        "rover low battery fraction",
        science.rover.low_battery_fraction,
        0.0..=1.0,
        "[0, 1]",
    );
    check_capacity(&mut errors, "rover battery", science.rover.battery_capacity_kwh);
    check_steps(&mut errors, "growth duration", science.growth.growth_duration_steps);
    if !config.construction.modules.contains_key(&science.rover_module) {
        errors.push(ConfigError::UnknownModule(science.rover_module.clone()));
    }

    // Manufacturing
    let manufacturing = &config.manufacturing;
    for (resource, target) in &manufacturing.buffer_targets {
        if !target.is_valid() {
            errors.push(ConfigError::InvalidBufferTarget {
                resource: resource.clone(),
                min: target.min,
                max: target.max,
            });
        }
    }
    for t in &manufacturing.tasks {
        if !manufacturing.modes.contains_key(&t.mode) {
            errors.push(ConfigError::UnknownMode {
                task: t.id.clone(),
                mode: t.mode.clone(),
            });
        }
    }

    // Equipment
    let equipment = &config.equipment;
    for (name, recipe) in &equipment.recipes {
        check_steps(&mut errors, &format!("recipe {} build time", name), recipe.build_steps as u64);
    }
    for (name, levels) in &equipment.inventory {
        if !equipment.recipes.contains_key(name) {
            errors.push(ConfigError::UnknownEquipment {
                what: "equipment inventory".to_string(),
                equipment: name.clone(),
            });
        }
        if levels.minimum > levels.target {
            errors.push(ConfigError::InvalidBufferTarget {
                resource: name.clone(),
                min: levels.minimum as f64,
                max: levels.target as f64,
            });
        }
    }
    check_amount(&mut errors, "equipment material reorder", equipment.material_reorder_amount);

    // Transportation
    let transport = &config.transportation;
    check_capacity(&mut errors, "rocket payload", transport.rocket.payload_capacity_kg);
    check_amount(&mut errors, "fuel reorder", transport.fuel_reorder_amount);
    check_steps(&mut errors, "rocket loading", transport.rocket.loading_steps as u64);
    if let Some(steps) = transport.one_way_steps {
        check_steps(&mut errors, "rocket one-way leg", steps as u64);
    }

    // Construction
    let construction = &config.construction;
    check_capacity(&mut errors, "shell storage", construction.shell_capacity);
    check_amount(&mut errors, "regolith reorder", construction.regolith_reorder_amount);
    check_steps(&mut errors, "shell printing", construction.steps_per_shell as u64);
    for (name, module) in &construction.modules {
        if module.shells == 0 {
            errors.push(ConfigError::NonPositiveShells(name.clone()));
        }
        check_steps(&mut errors, &format!("module {} build time", name), module.build_steps as u64);
        for equipment_name in module.equipment.keys() {
            if !equipment.recipes.contains_key(equipment_name) {
                errors.push(ConfigError::UnknownEquipment {
                    what: format!("module {}", name),
                    equipment: equipment_name.clone(),
                });
            }
        }
    }

    // Policies
    let mut policy_ids = std::collections::BTreeSet::new();
    for policy in &config.policies {
        if !policy_ids.insert(policy.id()) {
            errors.push(ConfigError::DuplicateId(policy.id().to_string()));
        }
        match policy {
            PolicyConfig::DustThrottle {
                id,
                start_ratio,
                max_throttle,
                sectors,
                ..
            } => {
                let start = format!("{} start ratio", id);
                check_range(&mut errors, &start, *start_ratio, 0.0..1.0, "[0, 1)");
                let max = format!("{} max throttle", id);
                check_range(&mut errors, &max, *max_throttle, 0.0..=1.0, "[0, 1]");
                for sector in sectors {
                    if !sector.is_throttleable() {
                        errors.push(ConfigError::NotThrottleable {
                            policy: id.clone(),
                            sector: *sector,
                        });
                    }
                }
            }
            PolicyConfig::ScienceGrowth { id, cadence_steps, .. } => {
                check_steps(&mut errors, &format!("{} cadence", id), *cadence_steps);
            }
        }
    }

    errors
}
