use crate::config::{Config, EnvironmentConfig, OperationsConfig};
use crate::fleet::Fleet;
use crate::tank::TankState;
use crate::telemetry::FleetSnapshot;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Position of the simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimClock {
    /// Simulated seconds since start.
    pub now: f64,
    pub tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub total_transitions: u64,
    pub last_tick_micros: u64,
    pub idle: u32,
    pub filling: u32,
    pub draining: u32,
}

/// Advances every tank and radar of a [`Fleet`] on a simulated clock.
///
/// Tanks are independent within a tick and are stepped in parallel; each tank
/// draws only from its own random stream, so the trajectory depends on the seed
/// and not on thread scheduling.
#[derive(Debug)]
pub struct SimulationScheduler {
    fleet: Arc<Fleet>,
    operations: OperationsConfig,
    environment: EnvironmentConfig,
    tick_seconds: f64,
    clock: SimClock,
    stats: SchedulerStats,
}

impl SimulationScheduler {
    pub fn new(fleet: Arc<Fleet>, config: &Config) -> Self {
        debug_assert!(config.simulation.tick_seconds > 0.0, "tick length must be positive");
        Self {
            fleet,
            operations: config.operations.clone(),
            environment: config.environment.clone(),
            tick_seconds: config.simulation.tick_seconds,
            clock: SimClock::default(),
            stats: SchedulerStats::default(),
        }
    }

    /// Advance the clock by one tick and step every tank, then its radar.
    pub fn tick(&mut self) {
        let started = Instant::now();
        let dt = self.tick_seconds;
        let now = self.clock.now + dt;

        let fleet = &self.fleet;
        let ops = &self.operations;
        let env = &self.environment;
        let outcomes: Vec<(TankState, Option<TankState>)> = (0..fleet.len())
            .into_par_iter()
            .map(|index| fleet.step_member(index, ops, env, now, dt))
            .collect();

        self.clock.now = now;
        self.clock.tick += 1;

        let (mut idle, mut filling, mut draining, mut transitions) = (0, 0, 0, 0);
        for (state, transition) in outcomes {
            match state {
                TankState::Idle => idle += 1,
                TankState::Filling => filling += 1,
                TankState::Draining => draining += 1,
            }
            if transition.is_some() {
                transitions += 1;
            }
        }

        let elapsed = started.elapsed();
        self.stats.total_ticks = self.clock.tick;
        self.stats.total_transitions += transitions;
        self.stats.last_tick_micros = elapsed.as_micros() as u64;
        self.stats.idle = idle;
        self.stats.filling = filling;
        self.stats.draining = draining;

        debug!(
            "Tick {} at t={:.0}s: {} idle, {} filling, {} draining, {} transitions in {:?}",
            self.clock.tick, now, idle, filling, draining, transitions, elapsed
        );
        if elapsed.as_secs_f64() > self.tick_seconds {
            warn!("Tick {} took {:?}, longer than the {}s tick period", self.clock.tick, elapsed, self.tick_seconds);
        }
    }

    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Simulated seconds since start.
    pub fn now(&self) -> f64 {
        self.clock.now
    }

    pub fn tick_count(&self) -> u64 {
        self.clock.tick
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub fn tick_seconds(&self) -> f64 {
        self.tick_seconds
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot::capture(&self.fleet, self.clock, &self.environment)
    }
}
