use clap::{App, Arg};
use std::path::Path;
use tankfarm::daemon::SimulatorDaemon;
use tankfarm::Config;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tankfarm-simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tank farm radar simulator with Modbus TCP and telemetry servers")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("YAML configuration file (defaults are used when omitted)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .value_name("SEED")
                .help("Master random seed, overrides the configuration")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be an unsigned integer".into()),
                }),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log filter when RUST_LOG is not set")
                .takes_value(true)
                .possible_values(&["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
        .get_matches();

    let level = matches.value_of("log-level").unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("Tank Farm Radar Simulator");
    println!("=========================");

    let mut config = match matches.value_of("config") {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Config::from_file(Path::new(path))?
        }
        None => {
            warn!("No configuration file given, using defaults");
            Config::default()
        }
    };
    if let Some(seed) = matches.value_of("seed") {
        config.simulation.seed = Some(seed.parse()?);
    }

    let daemon = match SimulatorDaemon::bind(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to start simulator: {}", e);
            return Err(e.into());
        }
    };

    if let Some(addr) = daemon.modbus_addr() {
        println!("Modbus TCP:  {}", addr);
    }
    if let Some(addr) = daemon.telemetry_addr() {
        println!("Telemetry:   {}", addr);
    }
    println!("Tanks:       {} (seed {})", daemon.fleet().len(), daemon.seed());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            // Without a signal handler the simulator runs until killed
            std::future::pending::<()>().await;
        }
    };

    let clock = daemon.run(shutdown).await?;
    println!("Simulator stopped at tick {} ({:.0}s simulated)", clock.tick, clock.now);

    Ok(())
}
