use crate::config::Config;
use crate::error::DaemonError;
use crate::factory::FleetFactory;
use crate::fleet::Fleet;
use crate::modbus;
use crate::registers::RegisterMap;
use crate::scheduler::{SimClock, SimulationScheduler};
use crate::telemetry::{self, FleetSnapshot, TELEMETRY_BROADCAST_BUFFER_SIZE};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Owns the fleet and runs the tick loop alongside the Modbus and telemetry servers.
pub struct SimulatorDaemon {
    config: Config,
    fleet: Arc<Fleet>,
    seed: u64,
    modbus_listener: Option<TcpListener>,
    telemetry_listener: Option<TcpListener>,
}

impl SimulatorDaemon {
    /// Validate the configuration, build the fleet and bind the enabled listeners.
    pub async fn bind(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let factory = FleetFactory::new(&config);
        let seed = factory.seed();
        let fleet = Arc::new(factory.build()?);

        let modbus_listener = if config.modbus.enabled {
            Some(bind_listener("modbus", &config.modbus.address, config.modbus.port).await?)
        } else {
            None
        };
        let telemetry_listener = if config.telemetry.enabled {
            Some(bind_listener("telemetry", &config.telemetry.address, config.telemetry.port).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            fleet,
            seed,
            modbus_listener,
            telemetry_listener,
        })
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn modbus_addr(&self) -> Option<SocketAddr> {
        self.modbus_listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn telemetry_addr(&self) -> Option<SocketAddr> {
        self.telemetry_listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Tick until `shutdown` resolves, then stop the servers.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) -> Result<SimClock, DaemonError> {
        let SimulatorDaemon {
            config,
            fleet,
            seed,
            modbus_listener,
            telemetry_listener,
        } = self;

        info!(
            "Starting simulation of {} tanks (seed {}, {}s ticks)",
            fleet.len(),
            seed,
            config.simulation.tick_seconds
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let (clock_tx, clock_rx) = watch::channel(SimClock::default());

        if let Some(listener) = modbus_listener {
            let map = RegisterMap::from_config(&config.modbus);
            let modbus_fleet = Arc::clone(&fleet);
            let unit_id = config.modbus.unit_id;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = modbus::serve(listener, modbus_fleet, map, unit_id).await {
                    error!("Modbus server error: {}", e);
                }
            }));
        }

        if let Some(listener) = telemetry_listener {
            let (frames_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_BUFFER_SIZE);
            let server_tx = frames_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = telemetry::serve(listener, server_tx).await {
                    error!("Telemetry server error: {}", e);
                }
            }));
            tasks.push(tokio::spawn(publish_loop(
                Arc::clone(&fleet),
                config.clone(),
                clock_rx,
                frames_tx,
            )));
        }

        let mut scheduler = SimulationScheduler::new(Arc::clone(&fleet), &config);
        let mut interval = time::interval(Duration::from_secs_f64(config.simulation.tick_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick of an interval completes immediately; the fleet is already measured
        interval.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    // Ticks run one at a time on the blocking pool
                    scheduler = tokio::task::spawn_blocking(move || {
                        scheduler.tick();
                        scheduler
                    })
                    .await?;
                    // No receivers left only means telemetry is disabled
                    let _ = clock_tx.send(scheduler.clock());
                }
            }
        }

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        let stats = scheduler.stats();
        info!(
            "Simulation stopped after {} ticks ({:.0} simulated seconds, {} transitions)",
            stats.total_ticks,
            scheduler.now(),
            stats.total_transitions
        );
        Ok(scheduler.clock())
    }
}

async fn bind_listener(service: &'static str, address: &str, port: u16) -> Result<TcpListener, DaemonError> {
    TcpListener::bind((address, port))
        .await
        .map_err(|source| DaemonError::Bind {
            service,
            address: format!("{address}:{port}"),
            source,
        })
}

async fn publish_loop(
    fleet: Arc<Fleet>,
    config: Config,
    clock: watch::Receiver<SimClock>,
    frames: broadcast::Sender<Arc<str>>,
) {
    let mut interval = time::interval(Duration::from_secs_f64(config.telemetry.publish_interval_seconds));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let environment = config.environment;

    loop {
        interval.tick().await;
        if frames.receiver_count() == 0 {
            continue;
        }

        let fleet = Arc::clone(&fleet);
        let now = *clock.borrow();
        let environment = environment.clone();
        let frame = tokio::task::spawn_blocking(move || {
            FleetSnapshot::capture(&fleet, now, &environment).to_json_line()
        })
        .await;

        match frame {
            Ok(Ok(line)) => {
                debug!("Publishing telemetry for tick {} ({} bytes)", now.tick, line.len());
                if frames.send(Arc::from(line)).is_err() {
                    debug!("No telemetry subscribers");
                }
            }
            Ok(Err(e)) => warn!("Failed to encode telemetry: {}", e),
            Err(e) => error!("Telemetry snapshot task failed: {}", e),
        }
    }
}
