use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tankfarm::config::{Config, PatioConfig, SizeMix};
use tankfarm::modbus;
use tankfarm::registers::{decode_u32, encode_i16, encode_u32, RegisterMap, FINE_ADJUSTMENT_SCALE};
use tankfarm::{Fleet, FleetFactory};
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::prelude::*;

/// Start a Modbus server on an OS-assigned port in the background
async fn start_test_server() -> Result<(SocketAddr, Arc<Fleet>, RegisterMap), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.fleet.patios = vec![PatioConfig {
        name: "North".into(),
        prefix: "PN".into(),
        count: 3,
        tank_sizes: SizeMix {
            small: 1.0,
            medium: 0.0,
            large: 0.0,
        },
    }];
    let fleet = Arc::new(FleetFactory::with_seed(&config, 3).build()?);
    let map = RegisterMap::from_config(&config.modbus);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;
    let server_fleet = Arc::clone(&fleet);
    tokio::spawn(async move {
        if let Err(e) = modbus::serve(listener, server_fleet, map, 1).await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(50)).await;
    Ok((socket_addr, fleet, map))
}

#[tokio::test]
async fn test_read_block_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, fleet, map) = start_test_server().await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(1)).await?;

    let start = map.block_start(2).unwrap();
    let data = ctx.read_holding_registers(start, 12).await??;
    let snapshot = fleet.radar_by_address(2).unwrap();
    assert_eq!(data.len(), 12);
    assert_eq!(decode_u32([data[9], data[10]]), snapshot.installation_height as u32);

    let input = ctx.read_input_registers(start, 12).await??;
    assert_eq!(input, data);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_calibration_writes_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, fleet, map) = start_test_server().await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(1)).await?;

    let start = map.block_start(1).unwrap();
    ctx.write_multiple_registers(start + 9, &encode_u32(11_111.0)).await??;
    ctx.write_single_register(start + 11, encode_i16(1.5, FINE_ADJUSTMENT_SCALE))
        .await??;

    let radar = fleet.radar_by_address(1).unwrap();
    assert_eq!(radar.installation_height, 11_111.0);
    assert_eq!(radar.fine_adjustment, 1.5);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_write_returns_exception() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, fleet, map) = start_test_server().await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(1)).await?;
    let before = fleet.radar_by_address(1).unwrap();

    let start = map.block_start(1).unwrap();
    let result = ctx.write_single_register(start, 42).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));

    // Only half of the radar height
    let result = ctx.write_single_register(start + 10, 42).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));

    assert_eq!(fleet.radar_by_address(1).unwrap(), before);
    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_oversized_read_returns_illegal_data_value() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _fleet, map) = start_test_server().await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(1)).await?;

    let start = map.block_start(1).unwrap();
    let result = ctx.read_holding_registers(start, modbus::MAX_READ_REGISTERS + 1).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataValue));

    // The connection stays usable afterwards
    let data = ctx.read_holding_registers(start, modbus::MAX_READ_REGISTERS).await??;
    assert_eq!(data.len(), usize::from(modbus::MAX_READ_REGISTERS));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_other_unit_gets_no_reply() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, fleet, map) = start_test_server().await?;
    let before = fleet.radar_by_address(1).unwrap();
    let start = map.block_start(1).unwrap();

    let mut ctx = tcp::connect_slave(socket_addr, Slave(42)).await?;
    let read = time::timeout(Duration::from_millis(300), ctx.read_holding_registers(start, 12)).await;
    assert!(read.is_err(), "unit 42 must not be answered");

    let mut ctx = tcp::connect_slave(socket_addr, Slave(42)).await?;
    let write = time::timeout(Duration::from_millis(300), ctx.write_single_register(start + 11, 99)).await;
    assert!(write.is_err(), "unit 42 must not be answered");
    assert_eq!(fleet.radar_by_address(1).unwrap(), before);

    // "Unit not used" is answered like the configured unit
    let mut ctx = tcp::connect_slave(socket_addr, Slave(modbus::UNIT_ID_NOT_USED)).await?;
    let data = ctx.read_holding_registers(start, 12).await??;
    assert_eq!(data.len(), 12);
    ctx.disconnect().await?;
    Ok(())
}
