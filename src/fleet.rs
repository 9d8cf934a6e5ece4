use crate::config::{EnvironmentConfig, OperationsConfig};
use crate::error::RegisterError;
use crate::radar::{Calibration, RadarEntity, RadarSnapshot};
use crate::tank::{TankEntity, TankState};
use crate::telemetry::TankSnapshot;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A tank together with its private random stream.
#[derive(Debug)]
pub struct TankCell {
    pub tank: TankEntity,
    pub rng: ChaCha8Rng,
}

/// One tank and the radar installed on it, as produced by the factory.
#[derive(Debug)]
pub struct FleetMember {
    pub tank: TankEntity,
    pub radar: RadarEntity,
    pub rng: ChaCha8Rng,
}

// Every critical section leaves its data valid, so a poisoned lock is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The simulated tanks and radars, shared by the scheduler, the register surface
/// and the telemetry publisher.
///
/// Lock order is always tank cell first, then radar. Register operations only
/// take radar locks.
#[derive(Debug)]
pub struct Fleet {
    tanks: Vec<Mutex<TankCell>>,
    radars: Vec<Mutex<RadarEntity>>,
    tank_ids: Vec<String>,
    addresses: Vec<u16>,
    tank_index: HashMap<String, usize>,
    address_index: HashMap<u16, usize>,
}

impl Fleet {
    pub fn new(members: Vec<FleetMember>) -> Self {
        let mut fleet = Self {
            tanks: Vec::with_capacity(members.len()),
            radars: Vec::with_capacity(members.len()),
            tank_ids: Vec::with_capacity(members.len()),
            addresses: Vec::with_capacity(members.len()),
            tank_index: HashMap::with_capacity(members.len()),
            address_index: HashMap::with_capacity(members.len()),
        };

        for (index, member) in members.into_iter().enumerate() {
            debug_assert_eq!(member.tank.id(), member.radar.tank_id());
            let previous_tank = fleet.tank_index.insert(member.tank.id().to_string(), index);
            let previous_address = fleet.address_index.insert(member.radar.address(), index);
            debug_assert!(previous_tank.is_none(), "duplicate tank id {}", member.tank.id());
            debug_assert!(previous_address.is_none(), "duplicate radar address {}", member.radar.address());

            fleet.tank_ids.push(member.tank.id().to_string());
            fleet.addresses.push(member.radar.address());
            fleet.tanks.push(Mutex::new(TankCell {
                tank: member.tank,
                rng: member.rng,
            }));
            fleet.radars.push(Mutex::new(member.radar));
        }

        fleet
    }

    pub fn len(&self) -> usize {
        self.tanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
    }

    /// Tank identifiers in build order.
    pub fn tank_ids(&self) -> &[String] {
        &self.tank_ids
    }

    /// Radar protocol addresses in build order.
    pub fn addresses(&self) -> &[u16] {
        &self.addresses
    }

    pub fn contains_address(&self, address: u16) -> bool {
        self.address_index.contains_key(&address)
    }

    pub fn radar_by_address(&self, address: u16) -> Option<RadarSnapshot> {
        self.with_radar(address, |radar| radar.snapshot())
    }

    /// Run `f` on the radar at `address` while holding its lock.
    pub fn with_radar<T>(&self, address: u16, f: impl FnOnce(&mut RadarEntity) -> T) -> Option<T> {
        let index = *self.address_index.get(&address)?;
        let mut radar = lock(&self.radars[index]);
        Some(f(&mut radar))
    }

    /// Run `f` on the tank cell with identifier `id` while holding its lock.
    pub fn with_tank<T>(&self, id: &str, f: impl FnOnce(&mut TankCell) -> T) -> Option<T> {
        let index = *self.tank_index.get(id)?;
        let mut cell = lock(&self.tanks[index]);
        Some(f(&mut cell))
    }

    /// Tank identifier bound to the radar at `address`.
    pub fn tank_for_address(&self, address: u16) -> Option<&str> {
        let index = *self.address_index.get(&address)?;
        self.tank_ids.get(index).map(String::as_str)
    }

    pub fn tank_snapshot(&self, id: &str) -> Option<TankSnapshot> {
        let index = *self.tank_index.get(id)?;
        Some(self.snapshot_at(index))
    }

    /// Snapshot of every tank in build order.
    pub fn snapshot(&self) -> Vec<TankSnapshot> {
        (0..self.len()).map(|index| self.snapshot_at(index)).collect()
    }

    fn snapshot_at(&self, index: usize) -> TankSnapshot {
        let cell = lock(&self.tanks[index]);
        let radar = lock(&self.radars[index]).snapshot();
        cell.tank.snapshot(radar)
    }

    pub fn update_calibration(&self, address: u16, calibration: Calibration) -> Result<(), RegisterError> {
        self.with_radar(address, |radar| radar.apply(calibration))
            .ok_or(RegisterError::UnknownRadar(address))
    }

    /// Advance the tank at `index` one tick and let its radar measure the result.
    pub(crate) fn step_member(
        &self,
        index: usize,
        ops: &OperationsConfig,
        env: &EnvironmentConfig,
        now: f64,
        dt: f64,
    ) -> (TankState, Option<TankState>) {
        let mut guard = lock(&self.tanks[index]);
        let cell = &mut *guard;
        let transition = cell.tank.step(ops, env, now, dt, &mut cell.rng);

        let mut radar = lock(&self.radars[index]);
        radar.measure(&cell.tank, &mut cell.rng);

        (cell.tank.state(), transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::strapping::TankType;
    use crate::tank::{Product, TankSpec};
    use rand::SeedableRng;

    fn member(id: &str, address: u16) -> FleetMember {
        let tank = TankEntity::new(TankSpec {
            id: id.to_string(),
            patio: "North".into(),
            product: Product::Crude,
            tank_type: TankType::standard(),
            height: 14.0,
            capacity: 90_000.0,
        });
        let radar = RadarEntity::new(id, address, 14.0, &RadarConfig::default());
        FleetMember {
            tank,
            radar,
            rng: ChaCha8Rng::seed_from_u64(address as u64),
        }
    }

    fn fleet() -> Fleet {
        Fleet::new(vec![member("PN-TK-01", 1), member("PN-TK-02", 2)])
    }

    #[test]
    fn test_lookup_tables() {
        let fleet = fleet();
        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet.tank_ids(), ["PN-TK-01", "PN-TK-02"]);
        assert_eq!(fleet.addresses(), [1, 2]);
        assert_eq!(fleet.tank_for_address(2), Some("PN-TK-02"));
        assert!(fleet.radar_by_address(3).is_none());
        assert!(fleet.tank_snapshot("PN-TK-09").is_none());
    }

    #[test]
    fn test_update_calibration() {
        let fleet = fleet();
        fleet
            .update_calibration(
                2,
                Calibration {
                    installation_height: Some(14_321.0),
                    fine_adjustment: None,
                },
            )
            .unwrap();
        let radar = fleet.radar_by_address(2).unwrap();
        assert_eq!(radar.installation_height, 14_321.0);
        assert_eq!(radar.fine_adjustment, 0.0);

        assert_eq!(
            fleet.update_calibration(99, Calibration::default()),
            Err(RegisterError::UnknownRadar(99))
        );
    }

    #[test]
    fn test_step_member_measures_after_step() {
        let fleet = fleet();
        let config = crate::config::Config::default();
        fleet.with_tank("PN-TK-01", |cell| cell.tank.set_level(7.0));
        fleet.step_member(0, &config.operations, &config.environment, 60.0, 60.0);

        let snapshot = fleet.tank_snapshot("PN-TK-01").unwrap();
        assert!((snapshot.radar.level - snapshot.level * 1000.0).abs() < 10.0);
        assert_eq!(snapshot.radar.temperatures.len(), 6);
    }

    #[test]
    fn test_snapshot_in_build_order() {
        let ids: Vec<String> = fleet().snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["PN-TK-01", "PN-TK-02"]);
    }
}
