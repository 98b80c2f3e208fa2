//! Energy sector - solar generation, battery storage and power allocation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Sector, SectorKind, SectorMetrics};
use crate::config::EnergyConfig;
use crate::evaluation::metric_ids;
use lunabase_logic::battery::Battery;
use lunabase_logic::solar::{illumination, SolarPanel};

/// Power bookkeeping for the current step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerLedger {
    pub generated: f64,
    pub demanded: f64,
    pub delivered: f64,
    pub from_batteries: f64,
    pub stored: f64,
    pub shortfall: f64,
}

pub struct EnergySector {
    config: EnergyConfig,
    panels: Vec<SolarPanel>,
    batteries: Vec<Battery>,
    step: u64,
    ledger: PowerLedger,
}

impl EnergySector {
    pub fn new(config: &EnergyConfig) -> Self {
        let panels = config
            .solar_arrays
            .iter()
            .flat_map(|a| (0..a.count).map(move |_| SolarPanel::new(a.area_m2, a.efficiency)))
            .collect();
        let batteries = config
            .batteries
            .iter()
            .flat_map(|b| {
                (0..b.count).map(move |_| {
                    Battery::new(
                        b.capacity_kwh,
                        b.initial_fraction,
                        b.max_charge_rate,
                        b.max_discharge_rate,
                    )
                })
            })
            .collect();
        Self {
            config: config.clone(),
            panels,
            batteries,
            step: 0,
            ledger: PowerLedger::default(),
        }
    }

    pub fn illumination(&self) -> f64 {
        illumination(self.step, self.config.day_length_steps)
    }

    /// Solar output available this step (kW)
    pub fn generation(&self) -> f64 {
        let sun = self.illumination();
        self.panels.iter().map(|p| p.output_kw(sun)).sum()
    }

    pub fn stored_energy(&self) -> f64 {
        self.batteries.iter().map(|b| b.charge_kwh).sum()
    }

    pub fn storage_capacity(&self) -> f64 {
        self.batteries.iter().map(|b| b.capacity_kwh).sum()
    }

    pub fn ledger(&self) -> &PowerLedger {
        &self.ledger
    }

    fn charge_batteries(&mut self, mut offered: f64) -> f64 {
        let mut stored = 0.0;
        for battery in &mut self.batteries {
            if offered <= 0.0 {
                break;
            }
            let accepted = battery.charge(offered);
            offered -= accepted;
            stored += accepted;
        }
        stored
    }

    fn discharge_batteries(&mut self, mut needed: f64) -> f64 {
        let mut drawn = 0.0;
        for battery in &mut self.batteries {
            if needed <= 0.0 {
                break;
            }
            let delivered = battery.discharge(needed);
            needed -= delivered;
            drawn += delivered;
        }
        drawn
    }

    /// Split this step's power across `demands`.
    ///
    /// Every demand is met in full when solar output covers the total, and
    /// the surplus goes to the batteries. Otherwise the batteries make up
    /// what they can and every sector receives the same fraction of its
    /// demand.
    pub fn allocate_power(&mut self, demands: &[(SectorKind, f64)]) -> BTreeMap<SectorKind, f64> {
        let demanded: f64 = demands.iter().map(|(_, d)| d.max(0.0)).sum();
        let generated = self.generation();
        let mut ledger = PowerLedger {
            generated,
            demanded,
            ..Default::default()
        };

        let ratio = if generated >= demanded {
            ledger.stored = self.charge_batteries(generated - demanded);
            1.0
        } else {
            ledger.from_batteries = self.discharge_batteries(demanded - generated);
            let supply = generated + ledger.from_batteries;
            ledger.shortfall = (demanded - supply).max(0.0);
            if demanded > 0.0 {
                supply / demanded
            } else {
                0.0
            }
        };
        if ledger.shortfall > 0.0 {
            log::debug!(
                "Power short by {:.1} kW ({:.0}% of demand met)",
                ledger.shortfall,
                ratio * 100.0
            );
        }

        let allocations: BTreeMap<SectorKind, f64> = demands
            .iter()
            .map(|(kind, demand)| (*kind, demand.max(0.0) * ratio))
            .collect();
        ledger.delivered = allocations.values().sum();
        self.ledger = ledger;
        allocations
    }

    /// Bank power that was allocated but not used. Returns the amount stored.
    pub fn return_unused(&mut self, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        let stored = self.charge_batteries(amount);
        self.ledger.delivered -= amount;
        self.ledger.stored += stored;
        stored
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// Restore the position in the day/night cycle and the battery charge.
    pub fn restore(&mut self, step: u64, stored_kwh: f64) {
        self.step = step;
        let mut remaining = stored_kwh.max(0.0);
        for battery in &mut self.batteries {
            battery.charge_kwh = remaining.min(battery.capacity_kwh);
            remaining -= battery.charge_kwh;
        }
    }
}

impl Sector for EnergySector {
    fn kind(&self) -> SectorKind {
        SectorKind::Energy
    }

    fn power_demand(&self) -> f64 {
        0.0
    }

    /// Advances the day/night clock. Allocation happens in
    /// [`EnergySector::allocate_power`], so the power argument is unused.
    fn step(&mut self, _allocated_power: f64) -> f64 {
        self.step += 1;
        0.0
    }

    fn metrics(&self) -> SectorMetrics {
        SectorMetrics::new(SectorKind::Energy)
            .value("generated_kw", self.ledger.generated)
            .value("demanded_kw", self.ledger.demanded)
            .value("delivered_kw", self.ledger.delivered)
            .value("battery_draw_kw", self.ledger.from_batteries)
            .value("stored_kwh", self.stored_energy())
            .value("illumination", illumination(self.step.saturating_sub(1), self.config.day_length_steps))
            .contribute(metric_ids::POWER_SHORTFALL, self.ledger.shortfall)
    }

    fn stock_levels(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([("stored_kwh".to_string(), self.stored_energy())])
    }
}
