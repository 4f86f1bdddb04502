use std::collections::HashMap;

use rapier2d::na::{point, vector, Point2, Vector2};
use rapier2d::prelude::*;
use serde::Serialize;

pub const GRAVITY_Y: f32 = -180.0;
pub const PHYSICS_DT: f32 = 1.0 / 60.0;

const GROUND_FRICTION: f32 = 1.0;
const CHASSIS_FRICTION: f32 = 0.7;
const WHEEL_FRICTION: f32 = 1.25;
const RESTITUTION: f32 = 0.02;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BodyId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub u64);

#[derive(Clone, Copy, Debug)]
pub struct BodyState {
    pub position: [f32; 2],
    pub angle: f32,
    pub linvel: [f32; 2],
}

impl BodyState {
    pub fn is_finite(&self) -> bool {
        self.position[0].is_finite()
            && self.position[1].is_finite()
            && self.angle.is_finite()
            && self.linvel[0].is_finite()
            && self.linvel[1].is_finite()
    }
}

/// The slice of a rigid-body engine the simulation relies on. The evolution
/// loop only ever talks to this trait, so tests can drive it with a scripted
/// world instead of a real solver.
pub trait PhysicsWorld {
    /// Creates a dynamic body whose collision shape is the given closed
    /// outline (local coordinates, need not be convex).
    fn add_polygon_body(
        &mut self,
        position: [f32; 2],
        local_points: &[[f32; 2]],
    ) -> Result<BodyId, String>;

    fn add_circle_body(&mut self, position: [f32; 2], radius: f32) -> Result<BodyId, String>;

    fn add_static_polyline(&mut self, points: &[[f32; 2]]) -> Result<BodyId, String>;

    /// Pins `wheel` to `chassis` at `chassis_anchor` (chassis-local), leaving
    /// the wheel free to spin around the pin.
    fn add_pin_joint(
        &mut self,
        chassis: BodyId,
        wheel: BodyId,
        chassis_anchor: [f32; 2],
    ) -> Result<ConstraintId, String>;

    /// Removing an already-removed body is a no-op.
    fn remove_body(&mut self, id: BodyId);

    /// Removing an already-removed constraint is a no-op.
    fn remove_constraint(&mut self, id: ConstraintId);

    fn set_angvel(&mut self, id: BodyId, angvel: f32);

    fn step(&mut self);

    fn body_state(&self, id: BodyId) -> Option<BodyState>;
}

/// Production implementation on rapier2d. Chassis outlines go through convex
/// decomposition so concave gene shapes keep their silhouette.
pub struct RapierWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector2<f32>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    body_handles: HashMap<BodyId, RigidBodyHandle>,
    joint_handles: HashMap<ConstraintId, ImpulseJointHandle>,
    next_id: u64,
}

impl RapierWorld {
    pub fn new() -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = PHYSICS_DT;

        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, GRAVITY_Y],
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            body_handles: HashMap::new(),
            joint_handles: HashMap::new(),
            next_id: 0,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_body(&mut self, body: RigidBody, collider: Collider) -> BodyId {
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        let id = BodyId(self.alloc_id());
        self.body_handles.insert(id, handle);
        id
    }
}

impl Default for RapierWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld for RapierWorld {
    fn add_polygon_body(
        &mut self,
        position: [f32; 2],
        local_points: &[[f32; 2]],
    ) -> Result<BodyId, String> {
        if local_points.len() < 3 {
            return Err(format!(
                "polygon body needs at least 3 points, got {}",
                local_points.len()
            ));
        }
        let vertices: Vec<Point2<f32>> = local_points
            .iter()
            .map(|p| point![p[0], p[1]])
            .collect();
        let indices: Vec<[u32; 2]> = (0..vertices.len() as u32)
            .map(|i| [i, (i + 1) % vertices.len() as u32])
            .collect();

        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1]])
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::convex_decomposition(&vertices, &indices)
            .friction(CHASSIS_FRICTION)
            .restitution(RESTITUTION)
            .build();
        Ok(self.insert_body(body, collider))
    }

    fn add_circle_body(&mut self, position: [f32; 2], radius: f32) -> Result<BodyId, String> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(format!("circle body radius must be positive, got {radius}"));
        }
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1]])
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::ball(radius)
            .friction(WHEEL_FRICTION)
            .restitution(RESTITUTION)
            .build();
        Ok(self.insert_body(body, collider))
    }

    fn add_static_polyline(&mut self, points: &[[f32; 2]]) -> Result<BodyId, String> {
        if points.len() < 2 {
            return Err(format!(
                "static polyline needs at least 2 points, got {}",
                points.len()
            ));
        }
        let vertices: Vec<Point2<f32>> = points.iter().map(|p| point![p[0], p[1]]).collect();
        let body = RigidBodyBuilder::fixed().build();
        let collider = ColliderBuilder::polyline(vertices, None)
            .friction(GROUND_FRICTION)
            .restitution(RESTITUTION)
            .build();
        Ok(self.insert_body(body, collider))
    }

    fn add_pin_joint(
        &mut self,
        chassis: BodyId,
        wheel: BodyId,
        chassis_anchor: [f32; 2],
    ) -> Result<ConstraintId, String> {
        let chassis_handle = *self
            .body_handles
            .get(&chassis)
            .ok_or_else(|| "pin joint references an unknown chassis body".to_string())?;
        let wheel_handle = *self
            .body_handles
            .get(&wheel)
            .ok_or_else(|| "pin joint references an unknown wheel body".to_string())?;

        let joint = RevoluteJointBuilder::new()
            .local_anchor1(point![chassis_anchor[0], chassis_anchor[1]])
            .local_anchor2(point![0.0, 0.0])
            .contacts_enabled(false);
        let handle = self
            .impulse_joints
            .insert(chassis_handle, wheel_handle, joint, true);
        let id = ConstraintId(self.alloc_id());
        self.joint_handles.insert(id, handle);
        Ok(id)
    }

    fn remove_body(&mut self, id: BodyId) {
        if let Some(handle) = self.body_handles.remove(&id) {
            self.bodies.remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
        }
    }

    fn remove_constraint(&mut self, id: ConstraintId) {
        if let Some(handle) = self.joint_handles.remove(&id) {
            self.impulse_joints.remove(handle, true);
        }
    }

    fn set_angvel(&mut self, id: BodyId, angvel: f32) {
        if let Some(handle) = self.body_handles.get(&id) {
            if let Some(body) = self.bodies.get_mut(*handle) {
                body.set_angvel(angvel, true);
            }
        }
    }

    fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn body_state(&self, id: BodyId) -> Option<BodyState> {
        let handle = self.body_handles.get(&id)?;
        let body = self.bodies.get(*handle)?;
        let translation = body.translation();
        let linvel = body.linvel();
        Some(BodyState {
            position: [translation.x, translation.y],
            angle: body.rotation().angle(),
            linvel: [linvel.x, linvel.y],
        })
    }
}
