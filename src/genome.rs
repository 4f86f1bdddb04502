use std::f32::consts::PI;

use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const CHASSIS_POINT_COUNT: usize = 8;
pub const WHEEL_COUNT: usize = 2;
pub const CHASSIS_RADIUS_MIN: f32 = 20.0;
pub const CHASSIS_RADIUS_MAX: f32 = 40.0;
pub const WHEEL_OFFSET_X_LIMIT: f32 = 30.0;
pub const WHEEL_OFFSET_Y_MIN: f32 = 0.0;
pub const WHEEL_OFFSET_Y_MAX: f32 = 30.0;
pub const WHEEL_RADIUS: f32 = 15.0;

const ANGLE_MUTATION_SPAN: f32 = 0.5;
const RADIUS_MUTATION_SPAN: f32 = 5.0;
const WHEEL_MUTATION_SPAN: f32 = 5.0;

/// One chassis vertex in polar form around the local body origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChassisPointGene {
    pub angle: f32,
    pub radius: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelGene {
    /// Horizontal attachment offset from the chassis origin.
    pub offset_x: f32,
    /// Downward attachment offset from the chassis origin.
    pub offset_y: f32,
}

/// Heritable body plan of one car: a closed 8-point chassis outline plus two
/// wheel attachment offsets. Vertex and wheel counts are fixed for the
/// lifetime of a population; only the values evolve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genome {
    pub chassis_points: Vec<ChassisPointGene>,
    pub wheels: Vec<WheelGene>,
}

impl Genome {
    /// Chassis outline in local cartesian coordinates, one point per gene in
    /// gene order. The loop may be concave, or even self-intersecting after
    /// mutation; the phenotype builder decides whether it is usable.
    pub fn chassis_polygon(&self) -> Vec<[f32; 2]> {
        self.chassis_points
            .iter()
            .map(|point| {
                [
                    point.angle.cos() * point.radius,
                    point.angle.sin() * point.radius,
                ]
            })
            .collect()
    }
}

/// Samples a fresh genome. Angles are drawn uniformly and then ordered around
/// the origin so the initial outline closes without crossing itself; mutation
/// is free to break that ordering later.
pub fn random_genome(rng: &mut SmallRng) -> Genome {
    let mut angles: Vec<f32> = (0..CHASSIS_POINT_COUNT)
        .map(|_| rng_range(rng, 0.0, PI * 2.0))
        .collect();
    angles.sort_by(f32::total_cmp);

    let chassis_points = angles
        .into_iter()
        .map(|angle| ChassisPointGene {
            angle,
            radius: rng_range(rng, CHASSIS_RADIUS_MIN, CHASSIS_RADIUS_MAX),
        })
        .collect();
    let wheels = (0..WHEEL_COUNT)
        .map(|_| WheelGene {
            offset_x: rng_range(rng, -WHEEL_OFFSET_X_LIMIT, WHEEL_OFFSET_X_LIMIT),
            offset_y: rng_range(rng, WHEEL_OFFSET_Y_MIN, WHEEL_OFFSET_Y_MAX),
        })
        .collect();

    Genome {
        chassis_points,
        wheels,
    }
}

/// Uniform crossover: every chassis point and wheel offset is copied whole
/// from one parent or the other, never blended.
pub fn crossover_genome(a: &Genome, b: &Genome, rng: &mut SmallRng) -> Genome {
    let chassis_points = a
        .chassis_points
        .iter()
        .zip(&b.chassis_points)
        .map(|(pa, pb)| if rng.random::<f32>() < 0.5 { *pa } else { *pb })
        .collect();
    let wheels = a
        .wheels
        .iter()
        .zip(&b.wheels)
        .map(|(wa, wb)| if rng.random::<f32>() < 0.5 { *wa } else { *wb })
        .collect();

    Genome {
        chassis_points,
        wheels,
    }
}

/// Perturbs each gene with probability `chance`. Radii and wheel offsets are
/// clamped back into their declared ranges; angles wrap modulo 2π.
pub fn mutate_genome(mut genome: Genome, chance: f32, rng: &mut SmallRng) -> Genome {
    for point in &mut genome.chassis_points {
        if rng.random::<f32>() >= chance {
            continue;
        }
        point.angle = wrap_angle(
            point.angle + rng_range(rng, -ANGLE_MUTATION_SPAN, ANGLE_MUTATION_SPAN),
        );
        point.radius = clamp(
            point.radius + rng_range(rng, -RADIUS_MUTATION_SPAN, RADIUS_MUTATION_SPAN),
            CHASSIS_RADIUS_MIN,
            CHASSIS_RADIUS_MAX,
        );
    }
    for wheel in &mut genome.wheels {
        if rng.random::<f32>() >= chance {
            continue;
        }
        wheel.offset_x = clamp(
            wheel.offset_x + rng_range(rng, -WHEEL_MUTATION_SPAN, WHEEL_MUTATION_SPAN),
            -WHEEL_OFFSET_X_LIMIT,
            WHEEL_OFFSET_X_LIMIT,
        );
        wheel.offset_y = clamp(
            wheel.offset_y + rng_range(rng, -WHEEL_MUTATION_SPAN, WHEEL_MUTATION_SPAN),
            WHEEL_OFFSET_Y_MIN,
            WHEEL_OFFSET_Y_MAX,
        );
    }
    genome
}

pub fn wrap_angle(angle: f32) -> f32 {
    let two_pi = PI * 2.0;
    let mut a = angle % two_pi;
    if a < 0.0 {
        a += two_pi;
    }
    a
}

pub fn rng_range(rng: &mut SmallRng, min: f32, max: f32) -> f32 {
    min + rng.random::<f32>() * (max - min)
}

pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}
