use crate::config::RadarConfig;
use crate::tank::{gaussian, TankEntity};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_TEMPERATURE_SENSORS: usize = 16;

/// Nominal mounting point above the tank top, in mm.
pub const INSTALLATION_CLEARANCE_MM: f64 = 200.0;

// Multiplicative jitter applied to the configured error every tick
const ERROR_JITTER_MIN: f64 = 0.8;
const ERROR_JITTER_MAX: f64 = 1.2;

pub type Temperatures = heapless::Vec<f64, MAX_TEMPERATURE_SENSORS>;

/// Calibration change requested through the register surface. `None` leaves the
/// parameter as it is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    /// mm
    pub installation_height: Option<f64>,
    /// mm
    pub fine_adjustment: Option<f64>,
}

/// Immutable copy of everything a radar reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarSnapshot {
    pub id: String,
    pub tank_id: String,
    pub address: u16,
    /// mm
    pub installation_height: f64,
    pub nominal_installation_height: f64,
    pub fine_adjustment: f64,
    pub measurement_error: f64,
    /// Measured level in mm.
    pub level: f64,
    /// °C
    pub temperatures: Temperatures,
    /// kPa
    pub pressure: f64,
}

#[derive(Debug, Clone)]
pub struct RadarEntity {
    id: String,
    // Resolved through the fleet's tank index, never owned here
    tank_id: String,
    address: u16,

    nominal_installation_height: f64,
    installation_height: f64,
    fine_adjustment: f64,

    configured_error: f64,
    temperature_noise: f64,
    pressure_noise: f64,
    sensor_count: usize,

    measurement_error: f64,
    level: f64,
    temperatures: Temperatures,
    pressure: f64,
}

impl RadarEntity {
    /// Radar mounted at the nominal height above a tank `tank_height` meters tall.
    pub fn new(tank_id: &str, address: u16, tank_height: f64, config: &RadarConfig) -> Self {
        let nominal = tank_height * 1000.0 + INSTALLATION_CLEARANCE_MM;
        Self {
            id: format!("{tank_id}-RD"),
            tank_id: tank_id.to_string(),
            address,
            nominal_installation_height: nominal,
            installation_height: nominal,
            fine_adjustment: 0.0,
            configured_error: config.measurement_error,
            temperature_noise: config.temperature_noise,
            pressure_noise: config.pressure_noise,
            sensor_count: config.sensor_count.clamp(1, MAX_TEMPERATURE_SENSORS),
            measurement_error: config.measurement_error,
            level: 0.0,
            temperatures: Temperatures::new(),
            pressure: 0.0,
        }
    }

    /// Take one reading of `tank` with the current calibration.
    pub fn measure<R: Rng + ?Sized>(&mut self, tank: &TankEntity, rng: &mut R) {
        debug_assert_eq!(tank.id(), self.tank_id, "radar measured the wrong tank");

        self.measurement_error = self.configured_error * rng.gen_range(ERROR_JITTER_MIN..=ERROR_JITTER_MAX);

        let bias = self.installation_height - self.nominal_installation_height;
        let level = tank.level() * 1000.0 + bias + self.fine_adjustment + gaussian(rng, self.measurement_error);
        self.level = level.max(0.0);

        self.temperatures.clear();
        for _ in 0..self.sensor_count {
            let reading = tank.temperature() + gaussian(rng, self.temperature_noise);
            // Capacity is MAX_TEMPERATURE_SENSORS and sensor_count is clamped to it
            let _ = self.temperatures.push(reading);
        }

        self.pressure = (tank.pressure() + gaussian(rng, self.pressure_noise)).max(0.0);
    }

    /// Takes effect on the next measurement. Non-finite values are ignored.
    pub fn update_installation_height(&mut self, value: f64) {
        if value.is_finite() {
            self.installation_height = value;
        }
    }

    /// Takes effect on the next measurement. Non-finite values are ignored.
    pub fn update_fine_adjustment(&mut self, value: f64) {
        if value.is_finite() {
            self.fine_adjustment = value;
        }
    }

    pub fn apply(&mut self, calibration: Calibration) {
        if let Some(height) = calibration.installation_height {
            self.update_installation_height(height);
        }
        if let Some(adjustment) = calibration.fine_adjustment {
            self.update_fine_adjustment(adjustment);
        }
        debug!(
            "{} calibration: installation_height={:.1}mm fine_adjustment={:.1}mm",
            self.id, self.installation_height, self.fine_adjustment
        );
    }

    pub fn snapshot(&self) -> RadarSnapshot {
        RadarSnapshot {
            id: self.id.clone(),
            tank_id: self.tank_id.clone(),
            address: self.address,
            installation_height: self.installation_height,
            nominal_installation_height: self.nominal_installation_height,
            fine_adjustment: self.fine_adjustment,
            measurement_error: self.measurement_error,
            level: self.level,
            temperatures: self.temperatures.clone(),
            pressure: self.pressure,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tank_id(&self) -> &str {
        &self.tank_id
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn installation_height(&self) -> f64 {
        self.installation_height
    }

    pub fn nominal_installation_height(&self) -> f64 {
        self.nominal_installation_height
    }

    pub fn fine_adjustment(&self) -> f64 {
        self.fine_adjustment
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }
}
