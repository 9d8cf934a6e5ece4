//! Register map: fixed-size blocks of 16-bit words, one block per radar.
//!
//! The block for protocol address `a` starts at
//! `tank_base_address + (a - 1) * registers_per_tank`. Within a block:
//!
//! | offset | field            | encoding                     | access |
//! |--------|------------------|------------------------------|--------|
//! | 0-1    | level            | u32 mm, high word first      | R      |
//! | 2-7    | temperature 1-6  | i16 °C x10                   | R      |
//! | 8      | pressure         | u16 kPa x100                 | R      |
//! | 9-10   | radar height     | u32 mm, high word first      | RW     |
//! | 11     | fine adjustment  | i16 mm x10                   | RW     |
//! | 12..   | reserved         | reads as zero                | -      |
//!
//! Values are rounded to the nearest unit and clamped to the field range.

use crate::config::ModbusConfig;
use crate::error::RegisterError;
use crate::fleet::Fleet;
use crate::radar::{Calibration, RadarSnapshot};
use arrayvec::ArrayVec;
use serde::Serialize;
use static_assertions::const_assert;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const LEVEL_OFFSET: u16 = 0;
pub const TEMPERATURE_OFFSET: u16 = 2;
pub const TEMPERATURE_REGISTERS: u16 = 6;
pub const PRESSURE_OFFSET: u16 = 8;
pub const RADAR_HEIGHT_OFFSET: u16 = 9;
pub const FINE_ADJUSTMENT_OFFSET: u16 = 11;

/// Words occupied by defined fields; the rest of a block is reserved.
pub const FIELD_REGISTERS: u16 = 12;
pub const MIN_REGISTERS_PER_TANK: u16 = FIELD_REGISTERS;
pub const MAX_REGISTERS_PER_TANK: u16 = 64;

pub const TEMPERATURE_SCALE: f64 = 10.0;
pub const PRESSURE_SCALE: f64 = 100.0;
pub const FINE_ADJUSTMENT_SCALE: f64 = 10.0;

const_assert!(LEVEL_OFFSET + 2 == TEMPERATURE_OFFSET);
const_assert!(TEMPERATURE_OFFSET + TEMPERATURE_REGISTERS == PRESSURE_OFFSET);
const_assert!(PRESSURE_OFFSET + 1 == RADAR_HEIGHT_OFFSET);
const_assert!(RADAR_HEIGHT_OFFSET + 2 == FINE_ADJUSTMENT_OFFSET);
const_assert!(FINE_ADJUSTMENT_OFFSET + 1 == FIELD_REGISTERS);
const_assert!(MIN_REGISTERS_PER_TANK <= MAX_REGISTERS_PER_TANK);

pub type RegisterBlock = ArrayVec<u16, { MAX_REGISTERS_PER_TANK as usize }>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Level,
    /// Sensor index 0-5.
    Temperature(u8),
    Pressure,
    RadarHeight,
    FineAdjustment,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Level,
        Field::Temperature(0),
        Field::Temperature(1),
        Field::Temperature(2),
        Field::Temperature(3),
        Field::Temperature(4),
        Field::Temperature(5),
        Field::Pressure,
        Field::RadarHeight,
        Field::FineAdjustment,
    ];

    pub fn offset(self) -> u16 {
        match self {
            Field::Level => LEVEL_OFFSET,
            Field::Temperature(i) => TEMPERATURE_OFFSET + i as u16,
            Field::Pressure => PRESSURE_OFFSET,
            Field::RadarHeight => RADAR_HEIGHT_OFFSET,
            Field::FineAdjustment => FINE_ADJUSTMENT_OFFSET,
        }
    }

    pub fn width(self) -> u16 {
        match self {
            Field::Level | Field::RadarHeight => 2,
            _ => 1,
        }
    }

    pub fn writable(self) -> bool {
        matches!(self, Field::RadarHeight | Field::FineAdjustment)
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Level => "level",
            Field::Temperature(_) => "temperature",
            Field::Pressure => "pressure",
            Field::RadarHeight => "radar_height",
            Field::FineAdjustment => "fine_adjustment",
        }
    }

    pub fn encoding(self) -> &'static str {
        match self {
            Field::Level | Field::RadarHeight => "u32 mm (high word first)",
            Field::Temperature(_) => "i16 degC x10",
            Field::Pressure => "u16 kPa x100",
            Field::FineAdjustment => "i16 mm x10",
        }
    }

    /// Field covering the block offset, `None` for reserved words.
    pub fn at(offset: u16) -> Option<Field> {
        match offset {
            0..=1 => Some(Field::Level),
            2..=7 => Some(Field::Temperature((offset - TEMPERATURE_OFFSET) as u8)),
            8 => Some(Field::Pressure),
            9..=10 => Some(Field::RadarHeight),
            11 => Some(Field::FineAdjustment),
            _ => None,
        }
    }
}

/// One row of [`RegisterMap::layout`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub name: String,
    pub address: u16,
    pub width: u16,
    pub writable: bool,
    pub encoding: &'static str,
}

pub fn encode_u32(value: f64) -> [u16; 2] {
    let rounded = value.round();
    let raw = if rounded.is_nan() {
        0
    } else {
        rounded.clamp(0.0, u32::MAX as f64) as u32
    };
    [(raw >> 16) as u16, raw as u16]
}

pub fn decode_u32(words: [u16; 2]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

pub fn encode_i16(value: f64, scale: f64) -> u16 {
    let rounded = (value * scale).round();
    let raw = if rounded.is_nan() {
        0
    } else {
        rounded.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    };
    raw as u16
}

pub fn decode_i16(word: u16, scale: f64) -> f64 {
    f64::from(word as i16) / scale
}

pub fn encode_u16(value: f64, scale: f64) -> u16 {
    let rounded = (value * scale).round();
    if rounded.is_nan() {
        0
    } else {
        rounded.clamp(0.0, u16::MAX as f64) as u16
    }
}

pub fn decode_u16(word: u16, scale: f64) -> f64 {
    f64::from(word) / scale
}

/// Stateless translation between radar state and register words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    base: u16,
    registers_per_tank: u16,
}

impl RegisterMap {
    /// `registers_per_tank` is clamped to the supported block sizes.
    pub fn new(tank_base_address: u16, registers_per_tank: u16) -> Self {
        debug_assert!(
            (MIN_REGISTERS_PER_TANK..=MAX_REGISTERS_PER_TANK).contains(&registers_per_tank),
            "registers_per_tank {} outside supported range",
            registers_per_tank
        );
        Self {
            base: tank_base_address,
            registers_per_tank: registers_per_tank.clamp(MIN_REGISTERS_PER_TANK, MAX_REGISTERS_PER_TANK),
        }
    }

    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(config.tank_base_address, config.registers_per_tank)
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn registers_per_tank(&self) -> u16 {
        self.registers_per_tank
    }

    /// First register of the block for protocol `address`, if it fits the 16-bit space.
    pub fn block_start(&self, address: u16) -> Option<u16> {
        if address == 0 {
            return None;
        }
        let start = u32::from(self.base) + u32::from(address - 1) * u32::from(self.registers_per_tank);
        u16::try_from(start).ok()
    }

    /// Protocol address and block offset of an absolute register.
    pub fn locate(&self, register: u32) -> Option<(u16, u16)> {
        let relative = register.checked_sub(u32::from(self.base))?;
        let rpt = u32::from(self.registers_per_tank);
        let address = u16::try_from(relative / rpt + 1).ok()?;
        Some((address, (relative % rpt) as u16))
    }

    pub fn encode_block(&self, snapshot: &RadarSnapshot) -> RegisterBlock {
        let mut block: RegisterBlock = (0..self.registers_per_tank).map(|_| 0).collect();

        let [hi, lo] = encode_u32(snapshot.level);
        block[LEVEL_OFFSET as usize] = hi;
        block[LEVEL_OFFSET as usize + 1] = lo;

        // Sensors beyond the sixth are not mapped; missing ones read zero
        for (i, &temperature) in snapshot.temperatures.iter().take(TEMPERATURE_REGISTERS as usize).enumerate() {
            block[TEMPERATURE_OFFSET as usize + i] = encode_i16(temperature, TEMPERATURE_SCALE);
        }

        block[PRESSURE_OFFSET as usize] = encode_u16(snapshot.pressure, PRESSURE_SCALE);

        let [hi, lo] = encode_u32(snapshot.installation_height);
        block[RADAR_HEIGHT_OFFSET as usize] = hi;
        block[RADAR_HEIGHT_OFFSET as usize + 1] = lo;

        block[FINE_ADJUSTMENT_OFFSET as usize] = encode_i16(snapshot.fine_adjustment, FINE_ADJUSTMENT_SCALE);

        block
    }

    /// One word per register in `[start, start + count)`.
    ///
    /// Each radar touched by the range is snapshotted once. Fields only partly
    /// inside the range, reserved words and registers outside every block read zero.
    pub fn read(&self, fleet: &Fleet, start: u16, count: u16) -> Vec<u16> {
        let first = u32::from(start);
        let end = first + u32::from(count);
        let mut words = vec![0u16; count as usize];
        let mut cached: Option<(u16, Option<RegisterBlock>)> = None;

        for register in first..end {
            let Some((address, offset)) = self.locate(register) else {
                continue;
            };
            let Some(field) = Field::at(offset) else {
                continue;
            };
            let field_start = register - u32::from(offset - field.offset());
            if field_start < first || field_start + u32::from(field.width()) > end {
                continue;
            }

            if cached.as_ref().map(|(a, _)| *a) != Some(address) {
                let block = fleet
                    .radar_by_address(address)
                    .map(|snapshot| self.encode_block(&snapshot));
                cached = Some((address, block));
            }
            if let Some((_, Some(block))) = &cached {
                words[(register - first) as usize] = block[offset as usize];
            }
        }

        debug!("Read {} registers from {}", count, start);
        words
    }

    /// Apply calibration words starting at `start`.
    ///
    /// The whole request is validated before any radar is touched; on error no
    /// radar changes.
    pub fn write(&self, fleet: &Fleet, start: u16, words: &[u16]) -> Result<(), RegisterError> {
        let first = u32::from(start);
        let end = first + words.len() as u32;
        let mut pending: BTreeMap<u16, Calibration> = BTreeMap::new();

        for register in first..end {
            let reported = u16::try_from(register).unwrap_or(u16::MAX);
            let (address, offset) = self
                .locate(register)
                .ok_or(RegisterError::Address { address: reported })?;
            if !fleet.contains_address(address) {
                return Err(RegisterError::Address { address: reported });
            }
            let field = Field::at(offset).ok_or(RegisterError::Address { address: reported })?;
            if !field.writable() {
                return Err(RegisterError::ReadOnlyViolation {
                    address: reported,
                    field: field.name(),
                });
            }

            let field_start = register - u32::from(offset - field.offset());
            if field_start < first || field_start + u32::from(field.width()) > end {
                return Err(RegisterError::PartialWrite {
                    address: reported,
                    field: field.name(),
                    width: field.width(),
                });
            }

            // Decode once, at the field's first word
            if register != field_start {
                continue;
            }
            let index = (register - first) as usize;
            let calibration = pending.entry(address).or_default();
            match field {
                Field::RadarHeight => {
                    let mm = decode_u32([words[index], words[index + 1]]);
                    calibration.installation_height = Some(f64::from(mm));
                }
                Field::FineAdjustment => {
                    calibration.fine_adjustment = Some(decode_i16(words[index], FINE_ADJUSTMENT_SCALE));
                }
                _ => {}
            }
        }

        for (address, calibration) in pending {
            debug!("Calibration write for radar {}: {:?}", address, calibration);
            fleet.update_calibration(address, calibration).map_err(|e| {
                warn!("Calibration for radar {} vanished mid-write: {}", address, e);
                e
            })?;
        }
        Ok(())
    }

    /// Every field of the block for `address` with its absolute register.
    pub fn layout(&self, address: u16) -> Option<Vec<FieldLayout>> {
        let start = self.block_start(address)?;
        let mut rows = Vec::with_capacity(Field::ALL.len() + 1);
        for field in Field::ALL {
            let name = match field {
                Field::Temperature(i) => format!("temperature_{}", i + 1),
                other => other.name().to_string(),
            };
            rows.push(FieldLayout {
                name,
                address: start.checked_add(field.offset())?,
                width: field.width(),
                writable: field.writable(),
                encoding: field.encoding(),
            });
        }
        if self.registers_per_tank > FIELD_REGISTERS {
            rows.push(FieldLayout {
                name: "reserved".to_string(),
                address: start.checked_add(FIELD_REGISTERS)?,
                width: self.registers_per_tank - FIELD_REGISTERS,
                writable: false,
                encoding: "reads as zero",
            });
        }
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::fleet::FleetMember;
    use crate::radar::RadarEntity;
    use crate::strapping::TankType;
    use crate::tank::{Product, TankEntity, TankSpec};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn fleet(count: u16) -> Fleet {
        let quiet = RadarConfig {
            measurement_error: 0.0,
            temperature_noise: 0.0,
            pressure_noise: 0.0,
            ..RadarConfig::default()
        };
        let members = (1..=count)
            .map(|address| {
                let id = format!("PN-TK-{:02}", address);
                let mut tank = TankEntity::new(TankSpec {
                    id: id.clone(),
                    patio: "North".into(),
                    product: Product::Diesel,
                    tank_type: TankType::standard(),
                    height: 12.0,
                    capacity: 70_000.0,
                });
                tank.set_level(5.0 + address as f64);
                let mut rng = ChaCha8Rng::seed_from_u64(address as u64);
                let mut radar = RadarEntity::new(&id, address, 12.0, &quiet);
                radar.measure(&tank, &mut rng);
                FleetMember { tank, radar, rng }
            })
            .collect();
        Fleet::new(members)
    }

    #[test]
    fn test_encoders_round_and_clamp() {
        assert_eq!(encode_i16(-15.0, TEMPERATURE_SCALE), (-150i16) as u16);
        assert_eq!(decode_i16((-150i16) as u16, TEMPERATURE_SCALE), -15.0);
        assert_eq!(encode_i16(5000.0, TEMPERATURE_SCALE), i16::MAX as u16);
        assert_eq!(encode_i16(-5000.0, TEMPERATURE_SCALE), i16::MIN as u16);
        assert_eq!(encode_i16(1.26, TEMPERATURE_SCALE), 13);
        assert_eq!(encode_u16(-3.0, PRESSURE_SCALE), 0);
        assert_eq!(encode_u16(101.325, PRESSURE_SCALE), 10133);
        assert_eq!(encode_u32(-1.0), [0, 0]);
        assert_eq!(encode_u32(1e12), [u16::MAX, u16::MAX]);
        assert_eq!(decode_u32(encode_u32(12_345.4)), 12_345);
        assert_eq!(encode_u32(f64::NAN), [0, 0]);
    }

    #[test]
    fn test_field_offsets_match_lookup() {
        for field in Field::ALL {
            for word in 0..field.width() {
                assert_eq!(Field::at(field.offset() + word), Some(field));
            }
        }
        assert_eq!(Field::at(FIELD_REGISTERS), None);
    }

    #[test]
    fn test_block_addressing() {
        let map = RegisterMap::new(1000, 20);
        assert_eq!(map.block_start(1), Some(1000));
        assert_eq!(map.block_start(3), Some(1040));
        assert_eq!(map.block_start(0), None);
        assert_eq!(map.locate(1041), Some((3, 1)));
        assert_eq!(map.locate(999), None);
    }

    #[test]
    fn test_read_full_block() {
        let fleet = fleet(2);
        let map = RegisterMap::new(1000, 20);
        let words = map.read(&fleet, 1020, 20);
        // Tank 2 sits at 7 m
        assert_eq!(decode_u32([words[0], words[1]]), 7000);
        assert_eq!(decode_u32([words[9], words[10]]), 12_200);
        assert!(words[12..].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_partial_field_reads_zero() {
        let fleet = fleet(1);
        let map = RegisterMap::new(1000, 20);
        // Only the low word of level and the high word of radar height
        assert_eq!(map.read(&fleet, 1001, 1), vec![0]);
        let words = map.read(&fleet, 1001, 9);
        assert_eq!(words[0], 0);
        assert_eq!(words[8], 0);
        assert_ne!(words[7], 0);
    }

    #[test]
    fn test_read_outside_blocks_is_zero() {
        let fleet = fleet(1);
        let map = RegisterMap::new(1000, 20);
        assert_eq!(map.read(&fleet, 10, 5), vec![0; 5]);
        assert_eq!(map.read(&fleet, 1020, 12), vec![0; 12]);
    }

    #[test]
    fn test_write_radar_height() {
        let fleet = fleet(2);
        let map = RegisterMap::new(1000, 20);
        let words = encode_u32(12_345.0);
        map.write(&fleet, 1029, &words).unwrap();
        assert_eq!(fleet.radar_by_address(2).unwrap().installation_height, 12_345.0);
        assert_eq!(fleet.radar_by_address(1).unwrap().installation_height, 12_200.0);
    }

    #[test]
    fn test_write_both_calibration_fields() {
        let fleet = fleet(1);
        let map = RegisterMap::new(1000, 20);
        let [hi, lo] = encode_u32(12_250.0);
        map.write(&fleet, 1009, &[hi, lo, encode_i16(-2.5, FINE_ADJUSTMENT_SCALE)])
            .unwrap();
        let radar = fleet.radar_by_address(1).unwrap();
        assert_eq!(radar.installation_height, 12_250.0);
        assert_eq!(radar.fine_adjustment, -2.5);
    }

    #[test]
    fn test_write_errors_leave_radar_untouched() {
        let fleet = fleet(1);
        let map = RegisterMap::new(1000, 20);
        let before = fleet.radar_by_address(1).unwrap();

        assert_eq!(
            map.write(&fleet, 1000, &[0, 1]),
            Err(RegisterError::ReadOnlyViolation {
                address: 1000,
                field: "level"
            })
        );
        // Valid fine adjustment followed by a reserved word
        assert_eq!(
            map.write(&fleet, 1011, &[25, 0]),
            Err(RegisterError::Address { address: 1012 })
        );
        assert_eq!(
            map.write(&fleet, 1010, &[7]),
            Err(RegisterError::PartialWrite {
                address: 1010,
                field: "radar_height",
                width: 2
            })
        );
        assert_eq!(
            map.write(&fleet, 1031, &[7]),
            Err(RegisterError::Address { address: 1031 })
        );

        assert_eq!(fleet.radar_by_address(1).unwrap(), before);
    }

    #[test]
    fn test_layout_lists_absolute_addresses() {
        let map = RegisterMap::new(1000, 20);
        let layout = map.layout(2).unwrap();
        assert_eq!(layout[0].name, "level");
        assert_eq!(layout[0].address, 1020);
        assert_eq!(layout[1].name, "temperature_1");
        let height = layout.iter().find(|f| f.name == "radar_height").unwrap();
        assert_eq!(height.address, 1029);
        assert!(height.writable);
        assert_eq!(layout.last().unwrap().name, "reserved");
        assert_eq!(layout.last().unwrap().width, 8);
        assert!(map.layout(0).is_none());
    }
}
