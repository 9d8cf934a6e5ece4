use serde::{Deserialize, Serialize};

/// Breakpoint spacing along the tank height, in meters.
pub const STRAPPING_RESOLUTION_M: f64 = 0.1;

pub const CUBIC_METERS_PER_BARREL: f64 = 0.159;

pub const DEFAULT_ROOF_LANDING_FRACTION: f64 = 0.3;
pub const DEFAULT_CONE_ANGLE_DEG: f64 = 15.0;
const MIN_CONE_FRACTION: f64 = 0.01;
const MAX_CONE_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankKind {
    Standard,
    FloatingRoof,
    ConicalBottom,
}

impl TankKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TankKind::Standard => "standard",
            TankKind::FloatingRoof => "floating_roof",
            TankKind::ConicalBottom => "conical_bottom",
        }
    }
}

/// Tank construction variant with the parameters its shape correction needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TankType {
    Standard {
        deformation_factor: f64,
    },
    FloatingRoof {
        deformation_factor: f64,
        roof_landing_fraction: f64,
    },
    ConicalBottom {
        deformation_factor: f64,
        cone_angle_deg: f64,
    },
}

impl TankType {
    pub fn standard() -> Self {
        TankType::Standard { deformation_factor: 0.0 }
    }

    pub fn floating_roof(deformation_factor: f64) -> Self {
        TankType::FloatingRoof {
            deformation_factor,
            roof_landing_fraction: DEFAULT_ROOF_LANDING_FRACTION,
        }
    }

    pub fn conical_bottom(deformation_factor: f64) -> Self {
        TankType::ConicalBottom {
            deformation_factor,
            cone_angle_deg: DEFAULT_CONE_ANGLE_DEG,
        }
    }

    pub fn kind(&self) -> TankKind {
        match self {
            TankType::Standard { .. } => TankKind::Standard,
            TankType::FloatingRoof { .. } => TankKind::FloatingRoof,
            TankType::ConicalBottom { .. } => TankKind::ConicalBottom,
        }
    }

    pub fn deformation_factor(&self) -> f64 {
        match *self {
            TankType::Standard { deformation_factor }
            | TankType::FloatingRoof { deformation_factor, .. }
            | TankType::ConicalBottom { deformation_factor, .. } => deformation_factor,
        }
    }

    /// Shape parameter handed to the profile function: roof landing point or cone
    /// height, both as a fraction of the tank height.
    fn shape_parameter(&self, height: f64, diameter: f64) -> f64 {
        match *self {
            TankType::Standard { .. } => 0.0,
            TankType::FloatingRoof { roof_landing_fraction, .. } => roof_landing_fraction.clamp(0.0, 0.95),
            TankType::ConicalBottom { cone_angle_deg, .. } => {
                let cone_height = (diameter / 2.0) * cone_angle_deg.to_radians().tan();
                (cone_height / height).clamp(MIN_CONE_FRACTION, MAX_CONE_FRACTION)
            }
        }
    }
}

/// Unnormalized cumulative volume fraction `G(x)` for a level fraction `x`, given the
/// deformation factor `d` and a per-type shape parameter `p`.
type ShapeProfile = fn(x: f64, d: f64, p: f64) -> f64;

// Indexed by TankKind discriminant.
const SHAPE_PROFILES: [ShapeProfile; 3] = [standard_profile, floating_roof_profile, conical_bottom_profile];

// Cross-section shrinks quadratically toward the top (shell bulge).
fn standard_profile(x: f64, d: f64, _p: f64) -> f64 {
    x - d * x * x * x / 3.0
}

// Full cross-section while the roof rests on its legs, then compressed toward the
// top for the displaced roof volume.
fn floating_roof_profile(x: f64, d: f64, landing: f64) -> f64 {
    if x <= landing {
        return x;
    }
    let span = 1.0 - landing;
    let u = (x - landing) / span;
    x - d * span * u * u * u / 3.0
}

// Compressed over the cone at the bottom, plain cylinder above it.
fn conical_bottom_profile(x: f64, d: f64, cone: f64) -> f64 {
    if x < cone {
        x - d * (x - x * x * x / (3.0 * cone * cone))
    } else {
        (cone - 2.0 * d * cone / 3.0) + (x - cone)
    }
}

/// Diameter in meters of a plain cylinder holding `capacity` barrels at `height` meters.
pub fn diameter_for(capacity: f64, height: f64) -> f64 {
    let volume_m3 = capacity * CUBIC_METERS_PER_BARREL;
    2.0 * (volume_m3 / (core::f64::consts::PI * height)).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrappingPoint {
    /// Liquid level in meters.
    pub level: f64,
    /// Cumulative volume in barrels.
    pub volume: f64,
}

/// Level to volume calibration curve for one tank.
///
/// Breakpoints are strictly increasing in both coordinates, start at `(0, 0)` and end
/// exactly at `(height, capacity)`. Lookups clamp out-of-range input instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrappingTable {
    points: Vec<StrappingPoint>,
    height: f64,
    capacity: f64,
}

impl StrappingTable {
    pub fn new(height: f64, capacity: f64, tank_type: TankType) -> Self {
        debug_assert!(height > 0.0 && capacity > 0.0, "tank dimensions must be positive");

        let diameter = diameter_for(capacity, height);
        let profile = SHAPE_PROFILES[tank_type.kind() as usize];
        let d = tank_type.deformation_factor().clamp(0.0, 0.99);
        let p = tank_type.shape_parameter(height, diameter);
        let full = profile(1.0, d, p);

        let steps = (height / STRAPPING_RESOLUTION_M).floor() as usize;
        let mut points = Vec::with_capacity(steps + 2);
        points.push(StrappingPoint { level: 0.0, volume: 0.0 });

        for i in 1..=steps {
            let level = i as f64 * STRAPPING_RESOLUTION_M;
            // Top point is appended exactly below
            if level >= height - 1e-6 {
                break;
            }
            let volume = capacity * profile(level / height, d, p) / full;
            points.push(StrappingPoint { level, volume });
        }
        points.push(StrappingPoint { level: height, volume: capacity });

        debug_assert!(
            points.windows(2).all(|w| w[1].level > w[0].level && w[1].volume > w[0].volume),
            "strapping breakpoints must be strictly increasing"
        );

        Self { points, height, capacity }
    }

    /// Volume in barrels at `level` meters, clamped to `[0, height]`.
    pub fn volume_at(&self, level: f64) -> f64 {
        let level = level.max(0.0).min(self.height);
        let upper = self.points.partition_point(|p| p.level <= level);
        if upper >= self.points.len() {
            return self.capacity;
        }
        let lo = self.points[upper - 1];
        let hi = self.points[upper];
        lo.volume + (hi.volume - lo.volume) * (level - lo.level) / (hi.level - lo.level)
    }

    /// Level in meters holding `volume` barrels, clamped to `[0, capacity]`.
    pub fn level_at(&self, volume: f64) -> f64 {
        let volume = volume.max(0.0).min(self.capacity);
        let upper = self.points.partition_point(|p| p.volume <= volume);
        if upper >= self.points.len() {
            return self.height;
        }
        let lo = self.points[upper - 1];
        let hi = self.points[upper];
        lo.level + (hi.level - lo.level) * (volume - lo.volume) / (hi.volume - lo.volume)
    }

    pub fn points(&self) -> &[StrappingPoint] {
        &self.points
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn resolution(&self) -> f64 {
        STRAPPING_RESOLUTION_M
    }
}
