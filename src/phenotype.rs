use crate::genome::{Genome, WHEEL_COUNT, WHEEL_RADIUS};
use crate::physics::{BodyId, BodyState, ConstraintId, PhysicsWorld};

const MIN_POLYGON_AREA: f32 = 1.0;

/// One evaluated car: a chassis body, two wheel bodies and the pins holding
/// them together. Lives in the physics world for exactly one evaluation
/// window, then gets torn down.
pub struct CarPhenotype {
    chassis: BodyId,
    wheels: [BodyId; WHEEL_COUNT],
    axles: [ConstraintId; WHEEL_COUNT],
    spawn: [f32; 2],
    destroyed: bool,
}

impl CarPhenotype {
    pub fn spawn(&self) -> [f32; 2] {
        self.spawn
    }

    pub fn wheel_bodies(&self) -> &[BodyId; WHEEL_COUNT] {
        &self.wheels
    }

    pub fn chassis_state<P: PhysicsWorld>(&self, world: &P) -> Option<BodyState> {
        world.body_state(self.chassis)
    }

    /// Constant wheel motor, applied every tick. Negative spin rolls the car
    /// toward +x.
    pub fn drive<P: PhysicsWorld>(&self, world: &mut P, wheel_speed: f32) {
        for wheel in self.wheels {
            world.set_angvel(wheel, -wheel_speed);
        }
    }
}

/// Instantiates `genome` against the physics world at `spawn`. Fails without
/// touching the world if the chassis outline is degenerate; a partial build
/// rolls back whatever it already created.
pub fn build_car<P: PhysicsWorld>(
    world: &mut P,
    genome: &Genome,
    spawn: [f32; 2],
) -> Result<CarPhenotype, String> {
    if genome.wheels.len() != WHEEL_COUNT {
        return Err(format!(
            "genome carries {} wheel offsets, expected {WHEEL_COUNT}",
            genome.wheels.len()
        ));
    }
    let polygon = genome.chassis_polygon();
    validate_polygon(&polygon)?;

    let chassis = world.add_polygon_body(spawn, &polygon)?;
    let mut wheels = Vec::with_capacity(WHEEL_COUNT);
    let mut axles = Vec::with_capacity(WHEEL_COUNT);
    for gene in &genome.wheels {
        // Genome offsets measure downward from the chassis origin.
        let anchor = [gene.offset_x, -gene.offset_y];
        let wheel_position = [spawn[0] + anchor[0], spawn[1] + anchor[1]];
        let wheel = match world.add_circle_body(wheel_position, WHEEL_RADIUS) {
            Ok(id) => id,
            Err(err) => {
                rollback(world, chassis, &wheels, &axles);
                return Err(err);
            }
        };
        wheels.push(wheel);
        match world.add_pin_joint(chassis, wheel, anchor) {
            Ok(id) => axles.push(id),
            Err(err) => {
                rollback(world, chassis, &wheels, &axles);
                return Err(err);
            }
        }
    }

    let wheels: [BodyId; WHEEL_COUNT] = match wheels.try_into() {
        Ok(wheels) => wheels,
        Err(_) => return Err("wheel body count mismatch".to_string()),
    };
    let axles: [ConstraintId; WHEEL_COUNT] = match axles.try_into() {
        Ok(axles) => axles,
        Err(_) => return Err("axle constraint count mismatch".to_string()),
    };

    Ok(CarPhenotype {
        chassis,
        wheels,
        axles,
        spawn,
        destroyed: false,
    })
}

/// Removes the whole car from the world exactly once; calling it again is a
/// no-op.
pub fn destroy_car<P: PhysicsWorld>(world: &mut P, car: &mut CarPhenotype) {
    if car.destroyed {
        return;
    }
    car.destroyed = true;
    for axle in car.axles {
        world.remove_constraint(axle);
    }
    for wheel in car.wheels {
        world.remove_body(wheel);
    }
    world.remove_body(car.chassis);
}

fn rollback<P: PhysicsWorld>(
    world: &mut P,
    chassis: BodyId,
    wheels: &[BodyId],
    axles: &[ConstraintId],
) {
    for axle in axles {
        world.remove_constraint(*axle);
    }
    for wheel in wheels {
        world.remove_body(*wheel);
    }
    world.remove_body(chassis);
}

/// Rejects outlines the decomposer cannot be trusted with: too few or
/// non-finite vertices, near-zero enclosed area, or edges that properly cross
/// each other.
pub fn validate_polygon(points: &[[f32; 2]]) -> Result<(), String> {
    if points.len() < 3 {
        return Err(format!(
            "chassis outline needs at least 3 points, got {}",
            points.len()
        ));
    }
    for point in points {
        if !(point[0].is_finite() && point[1].is_finite()) {
            return Err("chassis outline has a non-finite vertex".to_string());
        }
    }
    let area = signed_area(points);
    if area.abs() < MIN_POLYGON_AREA {
        return Err(format!(
            "chassis outline encloses near-zero area ({area:.3})"
        ));
    }
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            // Edges sharing a vertex may touch but cannot properly cross.
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (a1, a2) = (points[i], points[(i + 1) % n]);
            let (b1, b2) = (points[j], points[(j + 1) % n]);
            if segments_cross(a1, a2, b1, b2) {
                return Err(format!(
                    "chassis outline self-intersects (edges {i} and {j})"
                ));
            }
        }
    }
    Ok(())
}

fn signed_area(points: &[[f32; 2]]) -> f32 {
    let n = points.len();
    let mut doubled = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        doubled += a[0] * b[1] - b[0] * a[1];
    }
    doubled * 0.5
}

fn orientation(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_cross(a1: [f32; 2], a2: [f32; 2], b1: [f32; 2], b2: [f32; 2]) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{random_genome, ChassisPointGene, Genome, WheelGene};
    use crate::physics::testing::ScriptedWorld;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::f32::consts::PI;

    fn square() -> Vec<[f32; 2]> {
        vec![[0.0, 0.0], [40.0, 0.0], [40.0, 40.0], [0.0, 40.0]]
    }

    #[test]
    fn accepts_simple_polygons() {
        validate_polygon(&square()).unwrap();
        let mut rng = SmallRng::seed_from_u64(31);
        let genome = random_genome(&mut rng);
        validate_polygon(&genome.chassis_polygon()).unwrap();
    }

    #[test]
    fn rejects_bowtie() {
        let bowtie = vec![[0.0, 0.0], [40.0, 40.0], [40.0, 0.0], [0.0, 40.0]];
        assert!(validate_polygon(&bowtie).is_err());
    }

    #[test]
    fn rejects_zero_area_and_bad_vertices() {
        let flat = vec![[0.0, 0.0], [10.0, 0.0], [20.0, 0.0]];
        assert!(validate_polygon(&flat).is_err());
        let nan = vec![[0.0, 0.0], [f32::NAN, 0.0], [10.0, 10.0]];
        assert!(validate_polygon(&nan).is_err());
        assert!(validate_polygon(&[[0.0, 0.0], [1.0, 1.0]]).is_err());
    }

    #[test]
    fn build_registers_chassis_wheels_and_axles() {
        let mut rng = SmallRng::seed_from_u64(12);
        let genome = random_genome(&mut rng);
        let mut world = ScriptedWorld::new();
        let car = build_car(&mut world, &genome, [100.0, 120.0]).unwrap();
        assert_eq!(world.created_bodies, 3);
        assert_eq!(world.created_constraints, 2);
        assert_eq!(car.spawn(), [100.0, 120.0]);
        assert!(car.chassis_state(&world).is_some());
    }

    #[test]
    fn degenerate_genome_leaves_world_untouched() {
        // All vertices collapse onto one point: zero enclosed area.
        let genome = Genome {
            chassis_points: vec![ChassisPointGene { angle: 0.0, radius: 30.0 }; 8],
            wheels: vec![
                WheelGene { offset_x: -30.0, offset_y: 30.0 },
                WheelGene { offset_x: 30.0, offset_y: 30.0 },
            ],
        };
        let mut world = ScriptedWorld::new();
        assert!(build_car(&mut world, &genome, [0.0, 0.0]).is_err());
        assert_eq!(world.created_bodies, 0);
        assert_eq!(world.created_constraints, 0);
    }

    #[test]
    fn non_monotonic_angles_with_crossing_edges_are_rejected() {
        let angles = [
            0.0,
            3.0 * PI / 4.0,
            PI / 4.0,
            PI,
            5.0 * PI / 4.0,
            3.0 * PI / 2.0,
            7.0 * PI / 4.0,
            15.0 * PI / 8.0,
        ];
        let genome = Genome {
            chassis_points: angles
                .iter()
                .map(|&angle| ChassisPointGene { angle, radius: 30.0 })
                .collect(),
            wheels: vec![
                WheelGene { offset_x: -30.0, offset_y: 30.0 },
                WheelGene { offset_x: 30.0, offset_y: 30.0 },
            ],
        };
        assert!(validate_polygon(&genome.chassis_polygon()).is_err());
    }

    #[test]
    fn destroy_is_exact_and_idempotent() {
        let mut rng = SmallRng::seed_from_u64(8);
        let genome = random_genome(&mut rng);
        let mut world = ScriptedWorld::new();
        let terrain = world.add_static_polyline(&[[0.0, 0.0], [800.0, 0.0]]).unwrap();
        let mut car = build_car(&mut world, &genome, [100.0, 120.0]).unwrap();

        destroy_car(&mut world, &mut car);
        assert_eq!(world.removed_bodies, 3);
        assert_eq!(world.removed_constraints, 2);
        assert_eq!(world.live_bodies(), 1);

        destroy_car(&mut world, &mut car);
        assert_eq!(world.removed_bodies, 3);
        assert_eq!(world.removed_constraints, 2);
        assert!(world.body_state(terrain).is_some());
    }
}
