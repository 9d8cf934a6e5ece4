use crate::config::{Config, SizeCategory};
use crate::error::ConfigurationError;
use crate::fleet::{Fleet, FleetMember};
use crate::radar::RadarEntity;
use crate::strapping::TankKind;
use crate::tank::{Product, TankEntity, TankSpec};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Fine adjustment drawn for every radar at build time, in mm.
const INITIAL_FINE_ADJUSTMENT_MM: f64 = 5.0;

/// Builds the fleet described by a [`Config`]. The same seed always yields the same
/// tanks, radars and per-tank random streams.
pub struct FleetFactory<'a> {
    config: &'a Config,
    seed: u64,
}

impl<'a> FleetFactory<'a> {
    /// Uses the configured seed, or one taken from the clock when none is set.
    pub fn new(config: &'a Config) -> Self {
        let seed = config.simulation.seed.unwrap_or_else(clock_seed);
        Self::with_seed(config, seed)
    }

    pub fn with_seed(config: &'a Config, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn build(&self) -> Result<Fleet, ConfigurationError> {
        let fleet_config = &self.config.fleet;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let products: Vec<(Product, f64)> = fleet_config
            .product_distribution
            .iter()
            .map(|(&product, &weight)| (product, weight))
            .collect();
        let product_dist = weighted(products.iter().map(|(_, w)| *w), "fleet.product_distribution")?;

        let kinds: Vec<TankKind> = fleet_config.tank_types.keys().copied().collect();
        let kind_dist = weighted(
            fleet_config.tank_types.values().map(|t| t.probability),
            "fleet.tank_types",
        )?;

        let mut members = Vec::with_capacity(fleet_config.total_tanks());
        for patio in &fleet_config.patios {
            let size_dist = weighted(
                SizeCategory::ALL.iter().map(|&c| patio.tank_sizes.weight(c)),
                "patio tank_sizes",
            )?;

            for slot in 1..=patio.count {
                let category = SizeCategory::ALL[size_dist.sample(&mut rng)];
                let range = fleet_config.tank_size_ranges.get(&category).ok_or_else(|| {
                    ConfigurationError::invalid(format!("fleet.tank_size_ranges is missing {}", category.as_str()))
                })?;
                let capacity = rng.gen_range(range.min_capacity..=range.max_capacity);
                let height = rng.gen_range(range.min_height..=range.max_height);
                let product = products[product_dist.sample(&mut rng)].0;
                let kind = kinds[kind_dist.sample(&mut rng)];
                let tank_type = fleet_config.tank_types[&kind].tank_type(kind);

                let id = format!("{}-TK-{:02}", patio.prefix, slot);
                let address = u16::try_from(members.len() + 1)
                    .map_err(|_| ConfigurationError::invalid("fleet has more tanks than protocol addresses"))?;

                let mut tank_rng = ChaCha8Rng::seed_from_u64(rng.gen());
                let mut tank = TankEntity::new(TankSpec {
                    id: id.clone(),
                    patio: patio.name.clone(),
                    product,
                    tank_type,
                    height,
                    capacity,
                });
                tank.initialize(&self.config.operations, &mut tank_rng);

                let mut radar = RadarEntity::new(&id, address, height, &self.config.radar);
                radar.update_fine_adjustment(rng.gen_range(-INITIAL_FINE_ADJUSTMENT_MM..=INITIAL_FINE_ADJUSTMENT_MM));
                radar.measure(&tank, &mut tank_rng);

                debug!(
                    "Built {} ({}, {}, {}) {:.0} bbl x {:.2} m at address {}",
                    id,
                    category.as_str(),
                    product.as_str(),
                    kind.as_str(),
                    capacity,
                    height,
                    address
                );

                members.push(FleetMember {
                    tank,
                    radar,
                    rng: tank_rng,
                });
            }
        }

        info!(
            "Built fleet of {} tanks in {} patios (seed {})",
            members.len(),
            fleet_config.patios.len(),
            self.seed
        );
        Ok(Fleet::new(members))
    }
}

fn weighted(
    weights: impl Iterator<Item = f64>,
    name: &str,
) -> Result<WeightedIndex<f64>, ConfigurationError> {
    WeightedIndex::new(weights).map_err(|e| ConfigurationError::invalid(format!("{name}: {e}")))
}

fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
