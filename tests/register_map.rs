use tankfarm::config::{Config, PatioConfig, SizeMix};
use tankfarm::registers::{
    decode_i16, decode_u32, encode_i16, encode_u32, RegisterMap, FINE_ADJUSTMENT_OFFSET, FINE_ADJUSTMENT_SCALE,
    RADAR_HEIGHT_OFFSET, TEMPERATURE_OFFSET, TEMPERATURE_SCALE,
};
use tankfarm::{Fleet, FleetFactory, RegisterError};

fn fleet(config: &Config) -> Fleet {
    FleetFactory::with_seed(config, 8).build().unwrap()
}

fn config() -> Config {
    let mut config = Config::default();
    config.fleet.patios = vec![PatioConfig {
        name: "East".into(),
        prefix: "PE".into(),
        count: 4,
        tank_sizes: SizeMix {
            small: 1.0,
            medium: 1.0,
            large: 1.0,
        },
    }];
    config
}

#[test]
fn test_radar_height_round_trip() {
    let config = config();
    let fleet = fleet(&config);
    let map = RegisterMap::from_config(&config.modbus);
    let start = map.block_start(3).unwrap();

    map.write(&fleet, start + RADAR_HEIGHT_OFFSET, &encode_u32(12_345.0)).unwrap();

    let words = map.read(&fleet, start + RADAR_HEIGHT_OFFSET, 2);
    assert_eq!(decode_u32([words[0], words[1]]), 12_345);
    assert_eq!(fleet.radar_by_address(3).unwrap().installation_height, 12_345.0);
}

#[test]
fn test_negative_temperature_word() {
    assert_eq!(encode_i16(-15.0, TEMPERATURE_SCALE), 0xFF6A);
    assert_eq!(decode_i16(0xFF6A, TEMPERATURE_SCALE), -15.0);
}

#[test]
fn test_fine_adjustment_round_trip() {
    let config = config();
    let fleet = fleet(&config);
    let map = RegisterMap::from_config(&config.modbus);
    let register = map.block_start(1).unwrap() + FINE_ADJUSTMENT_OFFSET;

    map.write(&fleet, register, &[encode_i16(-3.7, FINE_ADJUSTMENT_SCALE)]).unwrap();
    let words = map.read(&fleet, register, 1);
    assert_eq!(decode_i16(words[0], FINE_ADJUSTMENT_SCALE), -3.7);
}

#[test]
fn test_level_write_rejected_without_side_effects() {
    let config = config();
    let fleet = fleet(&config);
    let map = RegisterMap::from_config(&config.modbus);
    let start = map.block_start(2).unwrap();
    let before = fleet.radar_by_address(2).unwrap();

    // Level words, then a valid radar height further along the same request
    let mut words = vec![0u16; 11];
    words[9..11].copy_from_slice(&encode_u32(9_999.0));
    let err = map.write(&fleet, start, &words).unwrap_err();
    assert!(matches!(err, RegisterError::ReadOnlyViolation { field: "level", .. }));

    assert_eq!(fleet.radar_by_address(2).unwrap(), before);
}

#[test]
fn test_out_of_block_reads_are_zero() {
    let config = config();
    let fleet = fleet(&config);
    let map = RegisterMap::from_config(&config.modbus);

    // Below the first block
    assert_eq!(map.read(&fleet, 0, 10), vec![0; 10]);
    // Reserved words of radar 1
    let start = map.block_start(1).unwrap();
    assert_eq!(map.read(&fleet, start + 12, 8), vec![0; 8]);
    // Block of a radar that does not exist
    let missing = map.block_start(5).unwrap();
    assert_eq!(map.read(&fleet, missing, 12), vec![0; 12]);
}

#[test]
fn test_read_spanning_two_blocks() {
    let config = config();
    let fleet = fleet(&config);
    let map = RegisterMap::from_config(&config.modbus);
    let second = map.block_start(2).unwrap();

    let words = map.read(&fleet, second - 8, 20);
    // Reserved tail of block 1 then block 2 from its level field
    assert!(words[..8].iter().all(|&w| w == 0));
    let snapshot = fleet.radar_by_address(2).unwrap();
    assert_eq!(decode_u32([words[8], words[9]]), snapshot.level.round() as u32);
    let first_temperature = decode_i16(words[8 + TEMPERATURE_OFFSET as usize], TEMPERATURE_SCALE);
    assert!((first_temperature - snapshot.temperatures[0]).abs() <= 0.05 + 1e-9);
}
