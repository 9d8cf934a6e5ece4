use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::net::SocketAddr;
use tankfarm::registers::{
    decode_i16, decode_u16, decode_u32, encode_i16, encode_u32, RegisterMap, FINE_ADJUSTMENT_OFFSET,
    FINE_ADJUSTMENT_SCALE, FIELD_REGISTERS, LEVEL_OFFSET, PRESSURE_OFFSET, PRESSURE_SCALE, RADAR_HEIGHT_OFFSET,
    TEMPERATURE_OFFSET, TEMPERATURE_REGISTERS, TEMPERATURE_SCALE,
};
use tankfarm::telemetry::FleetSnapshot;
use tankfarm::TankState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_MODBUS_PORT: &str = "5020";
const DEFAULT_TELEMETRY_PORT: &str = "8080";
const DEFAULT_UNIT: &str = "1";
const DEFAULT_BASE: &str = "1000";
const DEFAULT_REGISTERS_PER_TANK: &str = "20";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Connection and register layout settings shared by every subcommand.
struct Target {
    host: String,
    modbus_port: u16,
    telemetry_port: u16,
    unit: u8,
    map: RegisterMap,
    format: String,
    verbose: bool,
}

fn number_validator<T: std::str::FromStr>(message: &'static str) -> impl Fn(String) -> Result<(), String> {
    move |v| v.parse::<T>().map(|_| ()).map_err(|_| message.to_string())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("tankfarm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tank Farm Systems Engineering Team")
        .about("Operator console for the tank farm radar simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("modbus-port")
                .long("modbus-port")
                .value_name("PORT")
                .help("Modbus TCP port")
                .takes_value(true)
                .default_value(DEFAULT_MODBUS_PORT)
                .validator(number_validator::<u16>("Port must be between 0 and 65535"))
                .global(true),
        )
        .arg(
            Arg::with_name("telemetry-port")
                .long("telemetry-port")
                .value_name("PORT")
                .help("Telemetry stream port")
                .takes_value(true)
                .default_value(DEFAULT_TELEMETRY_PORT)
                .validator(number_validator::<u16>("Port must be between 0 and 65535"))
                .global(true),
        )
        .arg(
            Arg::with_name("unit")
                .short("u")
                .long("unit")
                .value_name("UNIT")
                .help("Modbus unit id")
                .takes_value(true)
                .default_value(DEFAULT_UNIT)
                .validator(number_validator::<u8>("Unit id must be between 0 and 255"))
                .global(true),
        )
        .arg(
            Arg::with_name("base")
                .long("base")
                .value_name("REGISTER")
                .help("First register of the block for radar 1")
                .takes_value(true)
                .default_value(DEFAULT_BASE)
                .validator(number_validator::<u16>("Base register must be between 0 and 65535"))
                .global(true),
        )
        .arg(
            Arg::with_name("registers-per-tank")
                .long("registers-per-tank")
                .value_name("COUNT")
                .help("Registers per radar block (12-64)")
                .takes_value(true)
                .default_value(DEFAULT_REGISTERS_PER_TANK)
                .validator(|v| match v.parse::<u16>() {
                    Ok(n) if (12..=64).contains(&n) => Ok(()),
                    _ => Err("Registers per tank must be between 12 and 64".into()),
                })
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("Read the register block of one radar")
                .arg(address_arg()),
        )
        .subcommand(
            SubCommand::with_name("set-height")
                .about("Write a radar's installation height")
                .arg(address_arg())
                .arg(
                    Arg::with_name("mm")
                        .help("Installation height in mm")
                        .required(true)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(mm) if (0.0..=u32::MAX as f64).contains(&mm) => Ok(()),
                            _ => Err("Height must be a non-negative number of mm".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("set-adjustment")
                .about("Write a radar's fine adjustment")
                .arg(address_arg())
                .arg(
                    Arg::with_name("mm")
                        .help("Fine adjustment in mm (-3276.8 to 3276.7)")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(mm) if (-3276.8..=3276.7).contains(&mm) => Ok(()),
                            _ => Err("Adjustment must be between -3276.8 and 3276.7 mm".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("layout")
                .about("Print the register layout of one radar (offline)")
                .arg(address_arg()),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("Follow the telemetry stream")
                .arg(
                    Arg::with_name("tank")
                        .short("t")
                        .long("tank")
                        .value_name("TANK_ID")
                        .help("Only show this tank")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let target = Target::from_matches(&matches)?;
    if target.verbose {
        println!("{}", "tankfarm - radar simulator console".bright_blue().bold());
        println!(
            "{} {} (modbus {}, telemetry {})",
            "Target".dimmed(),
            target.host,
            target.modbus_port,
            target.telemetry_port
        );
    }

    match matches.subcommand() {
        ("read", Some(sub)) => handle_read(&target, parse_address(sub)?).await?,
        ("set-height", Some(sub)) => {
            let mm: f64 = sub.value_of("mm").unwrap_or("0").parse()?;
            handle_set_height(&target, parse_address(sub)?, mm).await?;
        }
        ("set-adjustment", Some(sub)) => {
            let mm: f64 = sub.value_of("mm").unwrap_or("0").parse()?;
            handle_set_adjustment(&target, parse_address(sub)?, mm).await?;
        }
        ("layout", Some(sub)) => handle_layout(&target, parse_address(sub)?)?,
        ("watch", Some(sub)) => handle_watch(&target, sub.value_of("tank")).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

fn address_arg() -> Arg<'static, 'static> {
    Arg::with_name("address")
        .help("Radar protocol address (1-based)")
        .required(true)
        .validator(|v| match v.parse::<u16>() {
            Ok(a) if a >= 1 => Ok(()),
            _ => Err("Address must be between 1 and 65535".into()),
        })
}

fn parse_address(matches: &ArgMatches<'_>) -> CliResult<u16> {
    Ok(matches.value_of("address").ok_or("address is required")?.parse()?)
}

impl Target {
    fn from_matches(matches: &ArgMatches<'_>) -> CliResult<Self> {
        let value = |name: &str| matches.value_of(name).ok_or(format!("--{name} is required"));
        Ok(Self {
            host: value("host")?.to_string(),
            modbus_port: value("modbus-port")?.parse()?,
            telemetry_port: value("telemetry-port")?.parse()?,
            unit: value("unit")?.parse()?,
            map: RegisterMap::new(value("base")?.parse()?, value("registers-per-tank")?.parse()?),
            format: value("format")?.to_string(),
            verbose: matches.is_present("verbose"),
        })
    }

    async fn connect(&self) -> CliResult<Context> {
        let addr: SocketAddr = tokio::net::lookup_host((self.host.as_str(), self.modbus_port))
            .await?
            .next()
            .ok_or_else(|| format!("cannot resolve {}", self.host))?;
        if self.verbose {
            println!("{} {} (unit {})", "Connecting to".dimmed(), addr, self.unit);
        }
        Ok(tcp::connect_slave(addr, Slave(self.unit)).await?)
    }

    fn block_start(&self, address: u16) -> CliResult<u16> {
        Ok(self
            .map
            .block_start(address)
            .ok_or(format!("radar {address} lies outside the register space"))?)
    }
}

async fn handle_read(target: &Target, address: u16) -> CliResult<()> {
    let start = target.block_start(address)?;
    let mut ctx = target.connect().await?;
    let words = ctx.read_holding_registers(start, FIELD_REGISTERS).await??;

    let word = |offset: u16| words.get(offset as usize).copied().unwrap_or(0);
    let level = decode_u32([word(LEVEL_OFFSET), word(LEVEL_OFFSET + 1)]);
    let temperatures: Vec<f64> = (0..TEMPERATURE_REGISTERS)
        .map(|i| decode_i16(word(TEMPERATURE_OFFSET + i), TEMPERATURE_SCALE))
        .collect();
    let pressure = decode_u16(word(PRESSURE_OFFSET), PRESSURE_SCALE);
    let height = decode_u32([word(RADAR_HEIGHT_OFFSET), word(RADAR_HEIGHT_OFFSET + 1)]);
    let adjustment = decode_i16(word(FINE_ADJUSTMENT_OFFSET), FINE_ADJUSTMENT_SCALE);

    match target.format.as_str() {
        "json" => {
            let value = serde_json::json!({
                "address": address,
                "start_register": start,
                "level_mm": level,
                "temperatures_c": temperatures,
                "pressure_kpa": pressure,
                "radar_height_mm": height,
                "fine_adjustment_mm": adjustment,
                "raw": words,
            });
            println!("{}", value);
        }
        "compact" => {
            println!(
                "[{}] level={}mm pressure={:.2}kPa height={}mm adj={:.1}mm",
                address, level, pressure, height, adjustment
            );
        }
        _ => {
            println!("{} {}", "Radar".bright_blue().bold(), address.to_string().bright_white().bold());
            println!("{} {}", "Registers:".bright_white(), format!("{}-{}", start, start + FIELD_REGISTERS - 1).dimmed());
            println!("{} {} mm", "Level:".bright_white(), level.to_string().bright_green());
            let temps: Vec<String> = temperatures.iter().map(|t| format!("{:.1}", t)).collect();
            println!("{} {} °C", "Temperatures:".bright_white(), temps.join(" "));
            println!("{} {:.2} kPa", "Pressure:".bright_white(), pressure);
            println!("{} {} mm", "Radar height:".bright_white(), height.to_string().bright_cyan());
            println!("{} {:.1} mm", "Fine adjustment:".bright_white(), adjustment);
        }
    }

    ctx.disconnect().await?;
    Ok(())
}

async fn handle_set_height(target: &Target, address: u16, mm: f64) -> CliResult<()> {
    let register = target.block_start(address)? + RADAR_HEIGHT_OFFSET;
    let mut ctx = target.connect().await?;
    ctx.write_multiple_registers(register, &encode_u32(mm)).await??;
    ctx.disconnect().await?;
    print_write_result(target, address, "Radar height", &format!("{:.0} mm", mm.round()));
    Ok(())
}

async fn handle_set_adjustment(target: &Target, address: u16, mm: f64) -> CliResult<()> {
    let register = target.block_start(address)? + FINE_ADJUSTMENT_OFFSET;
    let mut ctx = target.connect().await?;
    ctx.write_single_register(register, encode_i16(mm, FINE_ADJUSTMENT_SCALE))
        .await??;
    ctx.disconnect().await?;
    print_write_result(target, address, "Fine adjustment", &format!("{:.1} mm", mm));
    Ok(())
}

fn print_write_result(target: &Target, address: u16, field: &str, value: &str) {
    match target.format.as_str() {
        "json" => println!("{}", serde_json::json!({ "address": address, "field": field, "value": value, "status": "ok" })),
        "compact" => println!("{}", "OK".bright_green()),
        _ => println!("{} {} of radar {} set to {}", "✅".green(), field, address, value.bright_white().bold()),
    }
}

fn handle_layout(target: &Target, address: u16) -> CliResult<()> {
    let rows = target
        .map
        .layout(address)
        .ok_or(format!("radar {address} lies outside the register space"))?;

    match target.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            println!("{}", format!("Register layout for radar {}", address).bright_blue().bold());
            for row in rows {
                let access = if row.writable { "RW".bright_yellow() } else { "R ".normal() };
                let span = if row.width > 1 {
                    format!("{}-{}", row.address, row.address + row.width - 1)
                } else {
                    row.address.to_string()
                };
                println!("  {:<12} {} {:<16} {}", span, access, row.name, row.encoding.dimmed());
            }
        }
    }
    Ok(())
}

async fn handle_watch(target: &Target, tank: Option<&str>) -> CliResult<()> {
    let stream = TcpStream::connect((target.host.as_str(), target.telemetry_port)).await?;
    println!("{}", "Watching tank telemetry (Press Ctrl+C to stop)...".bright_blue().bold());

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if target.format == "json" {
            println!("{}", line);
            continue;
        }

        let frame = match FleetSnapshot::from_json_line(&line) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("{} {}", "Unreadable telemetry frame:".yellow(), e);
                continue;
            }
        };

        let compact = target.format == "compact";
        if !compact {
            println!(
                "{} tick {} t={:.0}s ambient {:.1}°C",
                "──".bright_white(),
                frame.tick,
                frame.sim_time,
                frame.ambient_temperature
            );
        }
        for snapshot in frame.tanks.iter().filter(|t| tank.map_or(true, |id| t.id == id)) {
            let state = match snapshot.state {
                TankState::Idle => "IDLE    ".normal(),
                TankState::Filling => "FILLING ".bright_green(),
                TankState::Draining => "DRAINING".bright_yellow(),
            };
            if compact {
                println!("[{}] {} {} {:.1}%", frame.tick, snapshot.id, snapshot.state.as_str(), snapshot.fill_percentage);
            } else {
                println!(
                    "  {:<10} {} {:>7.3} m {:>10.0} bbl {:>5.1}% {:>6.1}°C {:>7.2} kPa",
                    snapshot.id,
                    state,
                    snapshot.level,
                    snapshot.volume,
                    snapshot.fill_percentage,
                    snapshot.average_temperature,
                    snapshot.pressure
                );
            }
        }
    }

    Ok(())
}
