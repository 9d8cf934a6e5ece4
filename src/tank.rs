use crate::config::{EnvironmentConfig, OperationsConfig};
use crate::radar::RadarSnapshot;
use crate::strapping::{diameter_for, StrappingTable, TankType};
use crate::telemetry::TankSnapshot;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ATMOSPHERIC_PRESSURE_KPA: f64 = 101.325;
const PRESSURE_NOISE_KPA: f64 = 0.05;

// Initial fill is drawn in this band so a fresh fleet is neither empty nor full
const MIN_INITIAL_FILL: f64 = 0.10;
const MAX_INITIAL_FILL: f64 = 0.90;

// Fill fraction thresholds and the fill probability applied below/above them
const LOW_FILL_THRESHOLD: f64 = 0.20;
const HIGH_FILL_THRESHOLD: f64 = 0.80;
const LOW_FILL_FILL_PROBABILITY: f64 = 0.875;
const HIGH_FILL_FILL_PROBABILITY: f64 = 0.125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    Crude,
    Gasoline,
    Diesel,
    JetFuel,
    Asphalt,
}

impl Product {
    pub const ALL: [Product; 5] = [
        Product::Crude,
        Product::Gasoline,
        Product::Diesel,
        Product::JetFuel,
        Product::Asphalt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Product::Crude => "crude",
            Product::Gasoline => "gasoline",
            Product::Diesel => "diesel",
            Product::JetFuel => "jet_fuel",
            Product::Asphalt => "asphalt",
        }
    }

    /// Pressure rise in kPa over atmospheric for a completely full tank.
    pub fn head_coefficient(self) -> f64 {
        match self {
            Product::Crude => 12.0,
            Product::Gasoline => 8.0,
            Product::Diesel => 10.0,
            Product::JetFuel => 9.0,
            Product::Asphalt => 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankState {
    Idle,
    Filling,
    Draining,
}

impl TankState {
    pub fn as_str(self) -> &'static str {
        match self {
            TankState::Idle => "idle",
            TankState::Filling => "filling",
            TankState::Draining => "draining",
        }
    }
}

/// Zero-mean gaussian sample. A non-positive sigma yields no noise at all.
pub(crate) fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if sigma.is_nan() || sigma <= 0.0 {
        return 0.0;
    }
    let z: f64 = rng.sample(StandardNormal);
    z * sigma
}

/// Static description of a tank as drawn by the fleet factory.
#[derive(Debug, Clone, PartialEq)]
pub struct TankSpec {
    pub id: String,
    pub patio: String,
    pub product: Product,
    pub tank_type: TankType,
    /// Meters.
    pub height: f64,
    /// Barrels.
    pub capacity: f64,
}

#[derive(Debug, Clone)]
pub struct TankEntity {
    id: String,
    patio: String,
    product: Product,
    tank_type: TankType,
    height: f64,
    diameter: f64,
    capacity: f64,
    strapping: StrappingTable,

    state: TankState,
    level: f64,
    temperature: f64,
    temperature_target: f64,
    pressure: f64,
    flow_rate: f64,

    // Simulated seconds
    next_operation_due: f64,
    operation_end: f64,
}

impl TankEntity {
    /// Create an idle, empty tank at ambient-neutral conditions. Use
    /// [`TankEntity::initialize`] to draw a randomized starting point.
    pub fn new(spec: TankSpec) -> Self {
        let strapping = StrappingTable::new(spec.height, spec.capacity, spec.tank_type);
        Self {
            diameter: diameter_for(spec.capacity, spec.height),
            id: spec.id,
            patio: spec.patio,
            product: spec.product,
            tank_type: spec.tank_type,
            height: spec.height,
            capacity: spec.capacity,
            strapping,
            state: TankState::Idle,
            level: 0.0,
            temperature: 20.0,
            temperature_target: 20.0,
            pressure: ATMOSPHERIC_PRESSURE_KPA,
            flow_rate: 0.0,
            next_operation_due: 0.0,
            operation_end: 0.0,
        }
    }

    /// Draw the starting level, temperature and first operation time.
    pub fn initialize<R: Rng + ?Sized>(&mut self, ops: &OperationsConfig, rng: &mut R) {
        let fill = rng.gen_range(MIN_INITIAL_FILL..=MAX_INITIAL_FILL);
        self.set_level(self.strapping.level_at(fill * self.capacity));

        self.temperature_target = self.draw_temperature_target(ops, rng);
        self.temperature = self.temperature_target;
        self.state = TankState::Idle;
        self.flow_rate = 0.0;
        self.next_operation_due = rng.gen_range(0.0..=ops.max_rest_time);
        self.update_pressure(rng);
    }

    /// Advance one tick ending at `now`. Returns the new state when a transition
    /// happened during this tick.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        ops: &OperationsConfig,
        env: &EnvironmentConfig,
        now: f64,
        dt: f64,
        rng: &mut R,
    ) -> Option<TankState> {
        let transition = self.update_state(ops, now, rng);
        self.update_level(dt);
        self.update_temperature(env, ops, now, dt);
        self.update_pressure(rng);

        debug_assert!(
            (0.0..=self.height).contains(&self.level),
            "Tank {} level {} outside [0, {}]",
            self.id, self.level, self.height
        );

        transition
    }

    fn update_state<R: Rng + ?Sized>(&mut self, ops: &OperationsConfig, now: f64, rng: &mut R) -> Option<TankState> {
        match self.state {
            TankState::Idle => {
                if now >= self.next_operation_due {
                    self.start_operation(ops, now, rng);
                    return Some(self.state);
                }
            }
            TankState::Filling => {
                if self.level >= self.height || now >= self.operation_end {
                    self.finish_operation(ops, now, rng);
                    return Some(self.state);
                }
            }
            TankState::Draining => {
                if self.level <= 0.0 || now >= self.operation_end {
                    self.finish_operation(ops, now, rng);
                    return Some(self.state);
                }
            }
        }
        None
    }

    fn start_operation<R: Rng + ?Sized>(&mut self, ops: &OperationsConfig, now: f64, rng: &mut R) {
        let fill = self.fill_fraction();
        let filling = if self.level <= 0.0 {
            true
        } else if self.level >= self.height {
            false
        } else if fill < LOW_FILL_THRESHOLD {
            rng.gen_bool(LOW_FILL_FILL_PROBABILITY)
        } else if fill > HIGH_FILL_THRESHOLD {
            rng.gen_bool(HIGH_FILL_FILL_PROBABILITY)
        } else {
            rng.gen_bool(0.5)
        };

        let rates = ops.flow_rate(self.product);
        let (state, flow_rate, room) = if filling {
            let rate = rng.gen_range(rates.min_fill..=rates.max_fill);
            (TankState::Filling, rate, self.capacity - self.volume())
        } else {
            let rate = rng.gen_range(rates.min_drain..=rates.max_drain);
            (TankState::Draining, rate, self.volume())
        };

        // Never shorter than the minimum even if the boundary is reached first
        let time_to_boundary = room / flow_rate * 3600.0;
        let longest = ops.max_operation_time.min(time_to_boundary).max(ops.min_operation_time);
        let duration = rng.gen_range(ops.min_operation_time..=longest);

        self.state = state;
        self.flow_rate = flow_rate;
        self.operation_end = now + duration;
        self.temperature_target = self.draw_temperature_target(ops, rng);

        debug!(
            "{} -> {} at {:.0} bbl/h for {:.0}s (fill {:.1}%)",
            self.id,
            state.as_str(),
            flow_rate,
            duration,
            fill * 100.0
        );
    }

    fn finish_operation<R: Rng + ?Sized>(&mut self, ops: &OperationsConfig, now: f64, rng: &mut R) {
        let rest = rng.gen_range(ops.min_rest_time..=ops.max_rest_time);
        debug!("{} {} complete, resting {:.0}s", self.id, self.state.as_str(), rest);

        self.state = TankState::Idle;
        self.flow_rate = 0.0;
        self.next_operation_due = now + rest;
    }

    /// Force an operation, bypassing the randomized choice. An `Idle` request rests
    /// the tank for `duration` seconds.
    pub fn begin_operation(&mut self, state: TankState, flow_rate: f64, duration: f64, now: f64) {
        self.state = state;
        match state {
            TankState::Idle => {
                self.flow_rate = 0.0;
                self.next_operation_due = now + duration;
            }
            TankState::Filling | TankState::Draining => {
                self.flow_rate = flow_rate.max(0.0);
                self.operation_end = now + duration;
            }
        }
    }

    fn update_level(&mut self, dt: f64) {
        let delta = self.flow_rate * dt / 3600.0;
        let volume = match self.state {
            TankState::Idle => return,
            TankState::Filling => (self.volume() + delta).min(self.capacity),
            TankState::Draining => (self.volume() - delta).max(0.0),
        };
        self.set_level(self.strapping.level_at(volume));
    }

    fn update_temperature(&mut self, env: &EnvironmentConfig, ops: &OperationsConfig, now: f64, dt: f64) {
        let goal = self.temperature_target + env.daily_swing(now);
        let max_step = ops.max_temperature_rate * dt / 3600.0;
        self.temperature += (goal - self.temperature).clamp(-max_step, max_step);
    }

    fn update_pressure<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let base = ATMOSPHERIC_PRESSURE_KPA + self.product.head_coefficient() * self.fill_fraction();
        self.pressure = (base + gaussian(rng, PRESSURE_NOISE_KPA)).max(0.0);
    }

    fn draw_temperature_target<R: Rng + ?Sized>(&self, ops: &OperationsConfig, rng: &mut R) -> f64 {
        let range = ops.temperature_range(self.product);
        rng.gen_range(range.min..=range.max)
    }

    /// Set the level in meters, clamped to `[0, height]`.
    pub fn set_level(&mut self, level: f64) {
        self.level = level.max(0.0).min(self.height);
    }

    /// Published view of this tank together with its radar's latest readings.
    pub fn snapshot(&self, radar: RadarSnapshot) -> TankSnapshot {
        TankSnapshot::new(self, radar)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn patio(&self) -> &str {
        &self.patio
    }

    pub fn product(&self) -> Product {
        self.product
    }

    pub fn tank_type(&self) -> TankType {
        self.tank_type
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn strapping(&self) -> &StrappingTable {
        &self.strapping
    }

    pub fn state(&self) -> TankState {
        self.state
    }

    /// Level in meters.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Volume in barrels, always the strapping evaluation of the current level.
    pub fn volume(&self) -> f64 {
        self.strapping.volume_at(self.level)
    }

    pub fn fill_fraction(&self) -> f64 {
        self.volume() / self.capacity
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn flow_rate(&self) -> f64 {
        self.flow_rate
    }

    pub fn next_operation_due(&self) -> f64 {
        self.next_operation_due
    }

    pub fn operation_end(&self) -> f64 {
        self.operation_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_tank() -> TankEntity {
        TankEntity::new(TankSpec {
            id: "PN-TK-01".into(),
            patio: "North".into(),
            product: Product::Diesel,
            tank_type: TankType::standard(),
            height: 13.0,
            capacity: 80_000.0,
        })
    }

    #[test]
    fn test_new_tank_is_idle_and_empty() {
        let tank = small_tank();
        assert_eq!(tank.state(), TankState::Idle);
        assert_eq!(tank.level(), 0.0);
        assert_eq!(tank.volume(), 0.0);
    }

    #[test]
    fn test_initialize_draws_level_within_fill_band() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let mut tank = small_tank();
            tank.initialize(&config.operations, &mut rng);
            let fill = tank.fill_fraction();
            assert!((0.099..=0.901).contains(&fill), "fill {fill}");
            assert_eq!(tank.state(), TankState::Idle);
            assert!(tank.next_operation_due() <= config.operations.max_rest_time);
        }
    }

    #[test]
    fn test_filling_scenario_advances_one_tick_of_flow() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut tank = small_tank();
        tank.set_level(6.5);
        tank.begin_operation(TankState::Filling, 2000.0, 3600.0, 0.0);

        let expected = 2000.0 * 60.0 / 3600.0;
        let mut now = 0.0;
        let mut previous = tank.level();
        let mut previous_volume = tank.volume();
        for _ in 0..30 {
            now += 60.0;
            tank.step(&config.operations, &config.environment, now, 60.0, &mut rng);
            assert_eq!(tank.state(), TankState::Filling);
            assert!(tank.level() > previous);
            assert!((tank.volume() - previous_volume - expected).abs() < 1e-6);
            previous = tank.level();
            previous_volume = tank.volume();
        }
    }

    #[test]
    fn test_filling_stops_at_top() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut tank = small_tank();
        tank.set_level(12.99);
        tank.begin_operation(TankState::Filling, 5000.0, 100_000.0, 0.0);

        tank.step(&config.operations, &config.environment, 60.0, 60.0, &mut rng);
        assert_eq!(tank.level(), 13.0);
        assert_eq!(tank.volume(), 80_000.0);

        let transition = tank.step(&config.operations, &config.environment, 120.0, 60.0, &mut rng);
        assert_eq!(transition, Some(TankState::Idle));
        assert!(tank.next_operation_due() >= 120.0 + config.operations.min_rest_time);
    }

    #[test]
    fn test_draining_stops_at_bottom() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut tank = small_tank();
        tank.set_level(0.01);
        tank.begin_operation(TankState::Draining, 5000.0, 100_000.0, 0.0);

        tank.step(&config.operations, &config.environment, 60.0, 60.0, &mut rng);
        assert_eq!(tank.level(), 0.0);
        let transition = tank.step(&config.operations, &config.environment, 120.0, 60.0, &mut rng);
        assert_eq!(transition, Some(TankState::Idle));
    }

    #[test]
    fn test_empty_tank_always_fills() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..20 {
            let mut tank = small_tank();
            tank.begin_operation(TankState::Idle, 0.0, 0.0, 0.0);
            tank.step(&config.operations, &config.environment, 1.0, 1.0, &mut rng);
            assert_eq!(tank.state(), TankState::Filling);
        }
    }

    #[test]
    fn test_full_tank_always_drains() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            let mut tank = small_tank();
            tank.set_level(13.0);
            tank.step(&config.operations, &config.environment, 1.0, 1.0, &mut rng);
            assert_eq!(tank.state(), TankState::Draining);
        }
    }

    #[test]
    fn test_operation_reaches_idle_within_bounded_ticks() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let dt = 60.0;
        let bound = (config.operations.max_operation_time / dt).ceil() as usize + 1;

        let mut tank = small_tank();
        tank.initialize(&config.operations, &mut rng);
        let mut now = 0.0;
        let mut ticks_in_operation = 0;
        for _ in 0..20_000 {
            now += dt;
            tank.step(&config.operations, &config.environment, now, dt, &mut rng);
            if tank.state() == TankState::Idle {
                ticks_in_operation = 0;
            } else {
                ticks_in_operation += 1;
                assert!(ticks_in_operation <= bound, "operation exceeded {bound} ticks");
            }
        }
    }

    #[test]
    fn test_temperature_moves_by_bounded_step() {
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut tank = small_tank();
        tank.initialize(&config.operations, &mut rng);
        let max_step = config.operations.max_temperature_rate * 60.0 / 3600.0;
        let mut now = 0.0;
        for _ in 0..500 {
            let before = tank.temperature();
            now += 60.0;
            tank.step(&config.operations, &config.environment, now, 60.0, &mut rng);
            assert!((tank.temperature() - before).abs() <= max_step + 1e-9);
        }
    }

    #[test]
    fn test_pressure_tracks_fill_fraction() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut low = small_tank();
        low.set_level(1.0);
        low.update_pressure(&mut rng);
        let mut high = small_tank();
        high.set_level(12.0);
        high.update_pressure(&mut rng);
        assert!(high.pressure() > low.pressure());
        assert!(low.pressure() > ATMOSPHERIC_PRESSURE_KPA - 1.0);
    }
}
