use rand::rngs::SmallRng;
use serde::Serialize;

use crate::genome::rng_range;
use crate::physics::{BodyId, PhysicsWorld};

pub const TERRAIN_SEGMENTS: usize = 10;
pub const TERRAIN_SEGMENT_LENGTH: f32 = 80.0;
pub const TERRAIN_ROUGHNESS: f32 = 30.0;
const TERRAIN_EDGE_DROP: f32 = 100.0;

/// Rough ground profile. Generated once per run from the seeded generator and
/// never mutated; evolution only reads it through the physics world.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Terrain {
    pub points: Vec<[f32; 2]>,
}

impl Terrain {
    /// Interior heights jitter around the baseline; both end points drop well
    /// below it so cars cannot roll off the back of the world.
    pub fn generate(rng: &mut SmallRng) -> Self {
        let mut points = Vec::with_capacity(TERRAIN_SEGMENTS + 1);
        for i in 0..=TERRAIN_SEGMENTS {
            let x = i as f32 * TERRAIN_SEGMENT_LENGTH;
            let y = if i == 0 || i == TERRAIN_SEGMENTS {
                -TERRAIN_EDGE_DROP
            } else {
                rng_range(rng, -TERRAIN_ROUGHNESS, TERRAIN_ROUGHNESS)
            };
            points.push([x, y]);
        }
        Self { points }
    }

    pub fn install<P: PhysicsWorld>(&self, world: &mut P) -> Result<BodyId, String> {
        world.add_static_polyline(&self.points)
    }

    pub fn length(&self) -> f32 {
        self.points.last().map(|p| p[0]).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::testing::ScriptedWorld;
    use rand::SeedableRng;

    #[test]
    fn generation_is_seed_deterministic() {
        let a = Terrain::generate(&mut SmallRng::seed_from_u64(77));
        let b = Terrain::generate(&mut SmallRng::seed_from_u64(77));
        assert_eq!(a.points, b.points);
        assert_eq!(a.points.len(), TERRAIN_SEGMENTS + 1);
    }

    #[test]
    fn interior_stays_within_roughness_band() {
        let terrain = Terrain::generate(&mut SmallRng::seed_from_u64(4));
        for point in &terrain.points[1..TERRAIN_SEGMENTS] {
            assert!(point[1].abs() <= TERRAIN_ROUGHNESS);
        }
        assert_eq!(terrain.points[0][1], -TERRAIN_EDGE_DROP);
        assert_eq!(terrain.points[TERRAIN_SEGMENTS][1], -TERRAIN_EDGE_DROP);
        assert_eq!(terrain.length(), TERRAIN_SEGMENTS as f32 * TERRAIN_SEGMENT_LENGTH);
    }

    #[test]
    fn installs_as_one_static_body() {
        let terrain = Terrain::generate(&mut SmallRng::seed_from_u64(4));
        let mut world = ScriptedWorld::new();
        terrain.install(&mut world).unwrap();
        assert_eq!(world.created_bodies, 1);
    }
}
