//! # Tank Farm Radar Simulator
//!
//! Simulates a fleet of storage tanks and the radar gauges mounted on them, and
//! exposes the gauges over Modbus TCP and a line-delimited JSON telemetry stream.
//! Intended for exercising monitoring dashboards and alarms without real hardware.
//!
//! ## Features
//!
//! - **Strapping tables**: per-tank level/volume curves for standard, floating roof
//!   and conical bottom tanks
//! - **Operation state machine**: tanks rest, fill and drain with randomized but
//!   reproducible timing
//! - **Radar measurement model**: calibration offsets, jittered level error and
//!   sensor noise
//! - **Register map**: deterministic Modbus blocks with writable calibration
//! - **Seeded fleets**: one seed reproduces the fleet and its whole trajectory
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tankfarm::{Config, FleetFactory, RegisterMap, SimulationScheduler};
//!
//! let config = Config::default();
//! let fleet = Arc::new(FleetFactory::with_seed(&config, 42).build().unwrap());
//! let mut scheduler = SimulationScheduler::new(Arc::clone(&fleet), &config);
//! scheduler.run_ticks(10);
//!
//! let map = RegisterMap::from_config(&config.modbus);
//! let words = map.read(&fleet, config.modbus.tank_base_address, 12);
//! assert_eq!(words.len(), 12);
//! ```
//!
//! ## Architecture
//!
//! - [`strapping`] - Level/volume calibration curves
//! - [`tank`] - Tank physics and the IDLE/FILLING/DRAINING machine
//! - [`radar`] - Radar calibration and measurements
//! - [`factory`] - Seeded fleet construction
//! - [`fleet`] - Shared tank/radar collection with lookups
//! - [`scheduler`] - Simulated clock and parallel ticks
//! - [`registers`] - Register block encoding and calibration writes
//! - [`modbus`] - Modbus TCP service
//! - [`telemetry`] - Snapshots and the JSON line stream
//! - [`daemon`] - Task wiring for the simulator binary

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod factory;
pub mod fleet;
pub mod modbus;
pub mod radar;
pub mod registers;
pub mod scheduler;
pub mod strapping;
pub mod tank;
pub mod telemetry;

// Re-export main public types for convenience
pub use config::Config;
pub use error::{ConfigurationError, DaemonError, RegisterError};
pub use factory::FleetFactory;
pub use fleet::Fleet;
pub use radar::{Calibration, RadarEntity, RadarSnapshot};
pub use registers::RegisterMap;
pub use scheduler::SimulationScheduler;
pub use strapping::{StrappingTable, TankType};
pub use tank::{Product, TankEntity, TankState};
pub use telemetry::{FleetSnapshot, TankSnapshot};
