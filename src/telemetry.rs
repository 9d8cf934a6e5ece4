use crate::config::EnvironmentConfig;
use crate::fleet::Fleet;
use crate::radar::{RadarSnapshot, Temperatures};
use crate::scheduler::SimClock;
use crate::strapping::{StrappingPoint, TankType};
use crate::tank::{Product, TankEntity, TankState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Snapshots buffered per subscriber before a slow one starts losing them.
pub const TELEMETRY_BROADCAST_BUFFER_SIZE: usize = 16;

/// One tank and its radar as published on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankSnapshot {
    pub id: String,
    pub patio: String,
    pub product: Product,
    pub tank_type: TankType,
    /// m
    pub height: f64,
    /// m
    pub diameter: f64,
    /// bbl
    pub capacity: f64,
    pub strapping_table: Vec<StrappingPoint>,
    /// True level in m.
    pub level: f64,
    /// bbl
    pub volume: f64,
    pub fill_percentage: f64,
    pub state: TankState,
    /// Sensor readings in °C.
    pub temperatures: Temperatures,
    pub average_temperature: f64,
    /// kPa
    pub pressure: f64,
    pub radar: RadarSnapshot,
}

impl TankSnapshot {
    pub fn new(tank: &TankEntity, radar: RadarSnapshot) -> Self {
        let temperatures = radar.temperatures.clone();
        let average_temperature = if temperatures.is_empty() {
            tank.temperature()
        } else {
            temperatures.iter().sum::<f64>() / temperatures.len() as f64
        };

        Self {
            id: tank.id().to_string(),
            patio: tank.patio().to_string(),
            product: tank.product(),
            tank_type: tank.tank_type(),
            height: tank.height(),
            diameter: tank.diameter(),
            capacity: tank.capacity(),
            strapping_table: tank.strapping().points().to_vec(),
            level: tank.level(),
            volume: tank.volume(),
            fill_percentage: tank.fill_fraction() * 100.0,
            state: tank.state(),
            temperatures,
            average_temperature,
            pressure: tank.pressure(),
            radar,
        }
    }
}

/// Whole-fleet telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Simulated seconds since start.
    pub sim_time: f64,
    pub tick: u64,
    /// °C, including the daily swing.
    pub ambient_temperature: f64,
    pub tanks: Vec<TankSnapshot>,
}

impl FleetSnapshot {
    pub fn capture(fleet: &Fleet, clock: SimClock, environment: &EnvironmentConfig) -> Self {
        Self {
            timestamp: unix_millis(),
            sim_time: clock.now,
            tick: clock.tick,
            ambient_temperature: environment.ambient_at(clock.now),
            tanks: fleet.snapshot(),
        }
    }

    /// One frame of the line-delimited stream, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Accept telemetry subscribers until the listener fails. Every subscriber gets
/// each published frame as one JSON line.
pub async fn serve(listener: TcpListener, frames: broadcast::Sender<Arc<str>>) -> std::io::Result<()> {
    info!("Telemetry server listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Telemetry subscriber connected: {}", addr);
                let rx = frames.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_subscriber(stream, rx).await {
                        warn!("Telemetry subscriber {} error: {}", addr, e);
                    }
                    info!("Telemetry subscriber {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept telemetry connection: {}", e);
            }
        }
    }
}

async fn handle_subscriber(stream: TcpStream, mut frames: broadcast::Receiver<Arc<str>>) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut discard = [0u8; 256];

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    writer.write_all(frame.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Telemetry subscriber lagging, skipped {} frames", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            // Subscribers have nothing to say; input only tells us they hung up.
            // A plain read is cancel-safe and takes any bytes.
            read = reader.read(&mut discard) => {
                let read = read?;
                if read == 0 {
                    return Ok(());
                }
                debug!("Ignoring {} bytes from telemetry subscriber", read);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::radar::RadarEntity;
    use crate::tank::TankSpec;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn snapshot() -> FleetSnapshot {
        let mut tank = TankEntity::new(TankSpec {
            id: "PE-TK-12".into(),
            patio: "East".into(),
            product: Product::JetFuel,
            tank_type: TankType::floating_roof(0.1),
            height: 15.0,
            capacity: 120_000.0,
        });
        tank.set_level(7.5);
        let mut radar = RadarEntity::new("PE-TK-12", 12, 15.0, &RadarConfig::default());
        radar.measure(&tank, &mut ChaCha8Rng::seed_from_u64(3));

        FleetSnapshot {
            timestamp: 1_700_000_000_000,
            sim_time: 600.0,
            tick: 10,
            ambient_temperature: 28.0,
            tanks: vec![TankSnapshot::new(&tank, radar.snapshot())],
        }
    }

    #[test]
    fn test_snapshot_json_has_documented_keys() {
        let value: serde_json::Value = serde_json::from_str(&snapshot().to_json_line().unwrap()).unwrap();
        for key in ["timestamp", "sim_time", "tick", "tanks"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let tank = &value["tanks"][0];
        for key in [
            "id",
            "patio",
            "product",
            "tank_type",
            "height",
            "diameter",
            "capacity",
            "strapping_table",
            "level",
            "volume",
            "fill_percentage",
            "state",
            "temperatures",
            "average_temperature",
            "pressure",
            "radar",
        ] {
            assert!(tank.get(key).is_some(), "missing tank key {key}");
        }
        assert_eq!(tank["product"], "jet_fuel");
        assert_eq!(tank["state"], "idle");
        assert_eq!(tank["tank_type"]["kind"], "floating_roof");
        assert_eq!(tank["radar"]["id"], "PE-TK-12-RD");
    }

    #[test]
    fn test_json_line_is_single_line_and_parses_back() {
        let original = snapshot();
        let line = original.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let parsed = FleetSnapshot::from_json_line(&line).unwrap();
        assert_eq!(parsed.tick, 10);
        assert_eq!(parsed.tanks[0].id, "PE-TK-12");
        assert_eq!(parsed.tanks[0].radar.temperatures.len(), 6);
    }

    #[test]
    fn test_average_temperature_is_mean_of_sensors() {
        let frame = snapshot();
        let tank = &frame.tanks[0];
        let mean = tank.temperatures.iter().sum::<f64>() / tank.temperatures.len() as f64;
        assert!((tank.average_temperature - mean).abs() < 1e-12);
        assert!((tank.fill_percentage - 50.0).abs() < 5.0);
    }

    #[tokio::test]
    async fn test_subscriber_survives_binary_input() {
        use std::time::Duration;
        use tokio::io::AsyncBufReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _keep) = broadcast::channel::<Arc<str>>(8);
        tokio::spawn(serve(listener, tx.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = tokio::io::BufReader::new(reader).lines();

        // Not UTF-8, and no newline at the end
        writer.write_all(&[0xff, 0xfe, 0x00, 0xc3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(Arc::from("hello")).unwrap();
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("frame arrives")
            .unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
    }
}
