//! Pure component models for the lunar settlement economy.
//!
//! This crate contains the physical calculators the sectors lean on. They
//! take plain data and return results, with no event bus, no stocks and no
//! randomness, so they can be unit-tested in isolation and reused by the
//! engine and the headless harness alike.
//!
//! One simulation step is one hour, so power in kW and energy in kWh are
//! interchangeable per step.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`battery`] | Rate-limited battery charge/discharge |
//! | [`growth`] | Receding-horizon fleet sizing math (targets, forecasts, orders) |
//! | [`rocket`] | Propellant requirements and flight durations |
//! | [`solar`] | Lunar illumination cycle and panel output |

pub mod battery;
pub mod growth;
pub mod rocket;
pub mod solar;
