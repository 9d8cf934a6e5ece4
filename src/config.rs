//! YAML configuration for the simulator.
//!
//! Every section and field has a default, so an empty file (or no file at all)
//! yields the standard 131-tank fleet. [`Config::validate`] runs before anything is
//! built and rejects inconsistent settings with a [`ConfigurationError`].

use crate::error::ConfigurationError;
use crate::radar::MAX_TEMPERATURE_SENSORS;
use crate::registers::{MAX_REGISTERS_PER_TANK, MIN_REGISTERS_PER_TANK};
use crate::strapping::{
    TankKind, TankType, DEFAULT_CONE_ANGLE_DEG, DEFAULT_ROOF_LANDING_FRACTION, STRAPPING_RESOLUTION_M,
};
use crate::tank::Product;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Shortest tick or publish period accepted, in seconds.
pub const MIN_PERIOD_SECONDS: f64 = 0.001;
/// Longest tick or publish period accepted, in seconds.
pub const MAX_PERIOD_SECONDS: f64 = SECONDS_PER_DAY;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub environment: EnvironmentConfig,
    pub operations: OperationsConfig,
    pub radar: RadarConfig,
    pub fleet: FleetConfig,
    pub modbus: ModbusConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate YAML text. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        // An empty document deserializes to unit, not to an empty mapping
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.simulation.validate()?;
        self.environment.validate()?;
        self.operations.validate()?;
        self.radar.validate()?;
        self.fleet.validate()?;
        self.modbus.validate(self.fleet.total_tanks())?;
        self.telemetry.validate()?;
        Ok(())
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), ConfigurationError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigurationError::invalid(message()))
    }
}

fn finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

// Also keeps the value inside what `Duration::from_secs_f64` and `time::interval` accept
fn valid_period(seconds: f64) -> bool {
    (MIN_PERIOD_SECONDS..=MAX_PERIOD_SECONDS).contains(&seconds)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulated seconds per tick; the daemon also ticks at this wall-clock period.
    pub tick_seconds: f64,
    /// Master seed. `None` draws one from the clock at startup.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60.0,
            seed: None,
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(valid_period(self.tick_seconds), || {
            format!(
                "simulation.tick_seconds must be in [{}, {}], got {}",
                MIN_PERIOD_SECONDS, MAX_PERIOD_SECONDS, self.tick_seconds
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// °C
    pub ambient_temperature: f64,
    /// Amplitude in °C of the daily temperature swing.
    pub daily_variation: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            ambient_temperature: 28.0,
            daily_variation: 5.0,
        }
    }
}

impl EnvironmentConfig {
    /// Offset in °C of the daily cycle at simulated time `now` (seconds).
    pub fn daily_swing(&self, now: f64) -> f64 {
        let phase = (now % SECONDS_PER_DAY) / SECONDS_PER_DAY * core::f64::consts::TAU;
        self.daily_variation * phase.sin()
    }

    pub fn ambient_at(&self, now: f64) -> f64 {
        self.ambient_temperature + self.daily_swing(now)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(self.ambient_temperature.is_finite(), || {
            "environment.ambient_temperature must be finite".to_string()
        })?;
        ensure(self.daily_variation.is_finite() && self.daily_variation >= 0.0, || {
            format!("environment.daily_variation must be >= 0, got {}", self.daily_variation)
        })
    }
}

/// Flow rates in barrels per hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowRateRange {
    pub min_fill: f64,
    pub max_fill: f64,
    pub min_drain: f64,
    pub max_drain: f64,
}

impl FlowRateRange {
    pub fn default_for(product: Product) -> Self {
        let (min, max) = match product {
            Product::Crude => (2000.0, 5000.0),
            Product::Gasoline | Product::Diesel => (1000.0, 3000.0),
            Product::JetFuel => (800.0, 2500.0),
            Product::Asphalt => (500.0, 1500.0),
        };
        Self {
            min_fill: min,
            max_fill: max,
            min_drain: min,
            max_drain: max,
        }
    }
}

/// Bulk temperature target range in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    pub fn default_for(product: Product) -> Self {
        let (min, max) = match product {
            Product::Crude => (30.0, 45.0),
            Product::Gasoline => (15.0, 30.0),
            Product::Diesel => (15.0, 35.0),
            Product::JetFuel => (10.0, 30.0),
            Product::Asphalt => (120.0, 160.0),
        };
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Seconds
    pub min_rest_time: f64,
    pub max_rest_time: f64,
    pub min_operation_time: f64,
    pub max_operation_time: f64,
    /// °C per hour
    pub max_temperature_rate: f64,
    pub flow_rates: BTreeMap<Product, FlowRateRange>,
    pub temperature_ranges: BTreeMap<Product, TemperatureRange>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            min_rest_time: 1800.0,
            max_rest_time: 7200.0,
            min_operation_time: 1800.0,
            max_operation_time: 14_400.0,
            max_temperature_rate: 2.0,
            flow_rates: Product::ALL.iter().map(|&p| (p, FlowRateRange::default_for(p))).collect(),
            temperature_ranges: Product::ALL
                .iter()
                .map(|&p| (p, TemperatureRange::default_for(p)))
                .collect(),
        }
    }
}

impl OperationsConfig {
    pub fn flow_rate(&self, product: Product) -> FlowRateRange {
        self.flow_rates
            .get(&product)
            .copied()
            .unwrap_or_else(|| FlowRateRange::default_for(product))
    }

    pub fn temperature_range(&self, product: Product) -> TemperatureRange {
        self.temperature_ranges
            .get(&product)
            .copied()
            .unwrap_or_else(|| TemperatureRange::default_for(product))
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(
            finite_positive(self.min_rest_time) && self.min_rest_time <= self.max_rest_time,
            || {
                format!(
                    "operations rest time range [{}, {}] must be positive and ordered",
                    self.min_rest_time, self.max_rest_time
                )
            },
        )?;
        ensure(
            finite_positive(self.min_operation_time)
                && self.min_operation_time <= self.max_operation_time
                && self.max_operation_time.is_finite(),
            || {
                format!(
                    "operations operation time range [{}, {}] must be positive and ordered",
                    self.min_operation_time, self.max_operation_time
                )
            },
        )?;
        ensure(finite_positive(self.max_temperature_rate), || {
            "operations.max_temperature_rate must be positive".to_string()
        })?;

        for product in Product::ALL {
            let rates = self.flow_rates.get(&product).ok_or_else(|| {
                ConfigurationError::invalid(format!("operations.flow_rates is missing {}", product.as_str()))
            })?;
            ensure(
                finite_positive(rates.min_fill)
                    && rates.min_fill <= rates.max_fill
                    && finite_positive(rates.min_drain)
                    && rates.min_drain <= rates.max_drain
                    && rates.max_fill.is_finite()
                    && rates.max_drain.is_finite(),
                || format!("operations.flow_rates.{} must be positive and ordered", product.as_str()),
            )?;

            let temps = self.temperature_ranges.get(&product).ok_or_else(|| {
                ConfigurationError::invalid(format!(
                    "operations.temperature_ranges is missing {}",
                    product.as_str()
                ))
            })?;
            ensure(
                temps.min.is_finite() && temps.max.is_finite() && temps.min <= temps.max,
                || format!("operations.temperature_ranges.{} must be ordered", product.as_str()),
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Nominal level error in mm before the per-tick jitter.
    pub measurement_error: f64,
    pub sensor_count: usize,
    /// °C
    pub temperature_noise: f64,
    /// kPa
    pub pressure_noise: f64,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            measurement_error: 1.0,
            sensor_count: 6,
            temperature_noise: 0.2,
            pressure_noise: 0.05,
        }
    }
}

impl RadarConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(
            (1..=MAX_TEMPERATURE_SENSORS).contains(&self.sensor_count),
            || {
                format!(
                    "radar.sensor_count must be in [1, {}], got {}",
                    MAX_TEMPERATURE_SENSORS, self.sensor_count
                )
            },
        )?;
        for (name, value) in [
            ("measurement_error", self.measurement_error),
            ("temperature_noise", self.temperature_noise),
            ("pressure_noise", self.pressure_noise),
        ] {
            ensure(value.is_finite() && value >= 0.0, || {
                format!("radar.{name} must be >= 0, got {value}")
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 3] = [SizeCategory::Small, SizeCategory::Medium, SizeCategory::Large];

    pub fn as_str(self) -> &'static str {
        match self {
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
        }
    }
}

/// Relative weights of the size categories within a patio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeMix {
    pub small: f64,
    pub medium: f64,
    pub large: f64,
}

impl SizeMix {
    pub fn weight(&self, category: SizeCategory) -> f64 {
        match category {
            SizeCategory::Small => self.small,
            SizeCategory::Medium => self.medium,
            SizeCategory::Large => self.large,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatioConfig {
    pub name: String,
    pub prefix: String,
    pub count: usize,
    pub tank_sizes: SizeMix,
}

/// Capacity in barrels and height in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min_capacity: f64,
    pub max_capacity: f64,
    pub min_height: f64,
    pub max_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankTypeConfig {
    pub probability: f64,
    pub deformation_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roof_landing_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cone_angle_deg: Option<f64>,
}

impl TankTypeConfig {
    fn new(probability: f64, deformation_factor: f64) -> Self {
        Self {
            probability,
            deformation_factor,
            roof_landing_fraction: None,
            cone_angle_deg: None,
        }
    }

    pub fn tank_type(&self, kind: TankKind) -> TankType {
        match kind {
            TankKind::Standard => TankType::Standard {
                deformation_factor: self.deformation_factor,
            },
            TankKind::FloatingRoof => TankType::FloatingRoof {
                deformation_factor: self.deformation_factor,
                roof_landing_fraction: self.roof_landing_fraction.unwrap_or(DEFAULT_ROOF_LANDING_FRACTION),
            },
            TankKind::ConicalBottom => TankType::ConicalBottom {
                deformation_factor: self.deformation_factor,
                cone_angle_deg: self.cone_angle_deg.unwrap_or(DEFAULT_CONE_ANGLE_DEG),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub patios: Vec<PatioConfig>,
    pub tank_size_ranges: BTreeMap<SizeCategory, SizeRange>,
    /// Relative product weights, not required to sum to one.
    pub product_distribution: BTreeMap<Product, f64>,
    pub tank_types: BTreeMap<TankKind, TankTypeConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let patio = |name: &str, prefix: &str, count, small, medium, large| PatioConfig {
            name: name.to_string(),
            prefix: prefix.to_string(),
            count,
            tank_sizes: SizeMix { small, medium, large },
        };
        let size = |min_capacity, max_capacity, min_height, max_height| SizeRange {
            min_capacity,
            max_capacity,
            min_height,
            max_height,
        };

        Self {
            patios: vec![
                patio("North", "PN", 40, 0.3, 0.5, 0.2),
                patio("South", "PS", 45, 0.2, 0.5, 0.3),
                patio("East", "PE", 46, 0.4, 0.4, 0.2),
            ],
            tank_size_ranges: BTreeMap::from([
                (SizeCategory::Small, size(50_000.0, 100_000.0, 10.0, 14.0)),
                (SizeCategory::Medium, size(100_000.0, 250_000.0, 14.0, 18.0)),
                (SizeCategory::Large, size(250_000.0, 500_000.0, 18.0, 22.0)),
            ]),
            product_distribution: BTreeMap::from([
                (Product::Crude, 0.40),
                (Product::Gasoline, 0.20),
                (Product::Diesel, 0.20),
                (Product::JetFuel, 0.15),
                (Product::Asphalt, 0.05),
            ]),
            tank_types: BTreeMap::from([
                (TankKind::Standard, TankTypeConfig::new(0.6, 0.05)),
                (TankKind::FloatingRoof, TankTypeConfig::new(0.3, 0.1)),
                (TankKind::ConicalBottom, TankTypeConfig::new(0.1, 0.3)),
            ]),
        }
    }
}

impl FleetConfig {
    pub fn total_tanks(&self) -> usize {
        self.patios.iter().map(|p| p.count).sum()
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(!self.patios.is_empty(), || "fleet.patios must not be empty".to_string())?;

        let mut prefixes = HashSet::new();
        for patio in &self.patios {
            ensure(!patio.name.is_empty() && !patio.prefix.is_empty(), || {
                "fleet.patios entries need a name and a prefix".to_string()
            })?;
            ensure(prefixes.insert(patio.prefix.as_str()), || {
                format!("fleet.patios prefix {} is used twice", patio.prefix)
            })?;
            let mix = patio.tank_sizes;
            let weights_valid = SizeCategory::ALL
                .iter()
                .all(|&c| mix.weight(c).is_finite() && mix.weight(c) >= 0.0);
            ensure(weights_valid && mix.small + mix.medium + mix.large > 0.0, || {
                format!("patio {} tank_sizes weights must be >= 0 with a positive sum", patio.name)
            })?;
        }

        for category in SizeCategory::ALL {
            let range = self.tank_size_ranges.get(&category).ok_or_else(|| {
                ConfigurationError::invalid(format!("fleet.tank_size_ranges is missing {}", category.as_str()))
            })?;
            ensure(
                finite_positive(range.min_capacity)
                    && range.min_capacity <= range.max_capacity
                    && range.max_capacity.is_finite()
                    && range.min_height >= STRAPPING_RESOLUTION_M
                    && range.min_height <= range.max_height
                    && range.max_height.is_finite(),
                || {
                    format!(
                        "fleet.tank_size_ranges.{} must be ordered with capacity > 0 and height >= {} m",
                        category.as_str(),
                        STRAPPING_RESOLUTION_M
                    )
                },
            )?;
        }

        validate_weights("fleet.product_distribution", self.product_distribution.values().copied())?;
        validate_weights(
            "fleet.tank_types",
            self.tank_types.values().map(|t| t.probability),
        )?;

        for (kind, tank_type) in &self.tank_types {
            ensure(
                (0.0..1.0).contains(&tank_type.deformation_factor),
                || format!("fleet.tank_types.{} deformation_factor must be in [0, 1)", kind.as_str()),
            )?;
            if let Some(fraction) = tank_type.roof_landing_fraction {
                ensure((0.0..1.0).contains(&fraction), || {
                    format!("fleet.tank_types.{} roof_landing_fraction must be in [0, 1)", kind.as_str())
                })?;
            }
            if let Some(angle) = tank_type.cone_angle_deg {
                ensure(angle > 0.0 && angle < 90.0, || {
                    format!("fleet.tank_types.{} cone_angle_deg must be in (0, 90)", kind.as_str())
                })?;
            }
        }
        Ok(())
    }
}

fn validate_weights(name: &str, weights: impl Iterator<Item = f64>) -> Result<(), ConfigurationError> {
    let mut total = 0.0;
    for weight in weights {
        ensure(weight.is_finite() && weight >= 0.0, || format!("{name} weights must be >= 0"))?;
        total += weight;
    }
    ensure(total > 0.0, || format!("{name} weights must have a positive sum"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    /// Unit answered by the server; 255 ("unit not used") is answered too.
    pub unit_id: u8,
    /// First register of the block for protocol address 1.
    pub tank_base_address: u16,
    pub registers_per_tank: u16,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1".to_string(),
            port: 5020,
            unit_id: 1,
            tank_base_address: 1000,
            registers_per_tank: 20,
        }
    }
}

impl ModbusConfig {
    fn validate(&self, total_tanks: usize) -> Result<(), ConfigurationError> {
        ensure(
            (MIN_REGISTERS_PER_TANK..=MAX_REGISTERS_PER_TANK).contains(&self.registers_per_tank),
            || {
                format!(
                    "modbus.registers_per_tank must be in [{}, {}], got {}",
                    MIN_REGISTERS_PER_TANK, MAX_REGISTERS_PER_TANK, self.registers_per_tank
                )
            },
        )?;
        let last = self.tank_base_address as u64 + total_tanks as u64 * self.registers_per_tank as u64;
        ensure(last <= u16::MAX as u64 + 1, || {
            format!(
                "{} tanks of {} registers from {} do not fit the 16-bit register space",
                total_tanks, self.registers_per_tank, self.tank_base_address
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    pub publish_interval_seconds: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1".to_string(),
            port: 8080,
            publish_interval_seconds: 10.0,
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        ensure(valid_period(self.publish_interval_seconds), || {
            format!(
                "telemetry.publish_interval_seconds must be in [{}, {}], got {}",
                MIN_PERIOD_SECONDS, MAX_PERIOD_SECONDS, self.publish_interval_seconds
            )
        })
    }
}
