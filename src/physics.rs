// src/physics.rs

use rapier3d::prelude::*;
use tracing::warn;

use crate::vehicle::VehicleConfig;

pub const MAP_SIZE: Real = 100.0;
pub const WALL_HEIGHT: Real = 4.0;
pub const WALL_THICKNESS: Real = 2.0;
const GRAVITY_Y: Real = -20.0;

/// How far the avoidance whiskers look ahead.
pub const PROBE_RANGE: Real = 6.0;
/// Ray origins sit above the chassis floor so they clear ground clutter.
const PROBE_HEIGHT: Real = 0.5;

/// Bodies past this coordinate (or with NaN) get snapped back onto the map.
const RUNAWAY_LIMIT: Real = 1_000.0;

/// Pose and frame vectors for one chassis, sampled once per tick so the
/// AI and particle systems read a consistent view.
#[derive(Clone, Copy, Debug)]
pub struct BodyFrame {
    pub position: Vector<Real>,
    pub rotation: Rotation<Real>,
    pub forward: Vector<Real>,
    pub right: Vector<Real>,
    pub velocity: Vector<Real>,
}

/// Whisker raycast distances. `None` means nothing within [`PROBE_RANGE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WallProbes {
    pub forward: Option<Real>,
    pub left: Option<Real>,
    pub right: Option<Real>,
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    /// Build the arena: a flat ground slab with a wall along each edge of
    /// the square map. Its top surface is exactly at y = 0.
    pub fn new() -> Self {
        let gravity = vector![0.0, GRAVITY_Y, 0.0];

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let ground_rb = RigidBodyBuilder::fixed()
            .translation(vector![0.0, -0.1, 0.0])
            .build();
        let ground_handle = bodies.insert(ground_rb);
        let ground_collider = ColliderBuilder::cuboid(MAP_SIZE, 0.1, MAP_SIZE)
            .friction(1.0)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        let half_map = MAP_SIZE / 2.0;
        let half_wall = WALL_HEIGHT / 2.0;
        let half_thick = WALL_THICKNESS / 2.0;
        // Walls sit centered on the map edges: two along x, two along z.
        let walls: [(Vector<Real>, [Real; 3]); 4] = [
            (vector![0.0, half_wall, -half_map], [half_map, half_wall, half_thick]),
            (vector![0.0, half_wall, half_map], [half_map, half_wall, half_thick]),
            (vector![-half_map, half_wall, 0.0], [half_thick, half_wall, half_map]),
            (vector![half_map, half_wall, 0.0], [half_thick, half_wall, half_map]),
        ];
        for (center, [hx, hy, hz]) in walls {
            let rb = RigidBodyBuilder::fixed().translation(center).build();
            let handle = bodies.insert(rb);
            let collider = ColliderBuilder::cuboid(hx, hy, hz)
                .friction(0.2)
                .restitution(0.3)
                .build();
            colliders.insert_with_parent(collider, handle, &mut bodies);
        }

        let mut query_pipeline = QueryPipeline::new();
        // The arena is static, so probes work before the first step.
        query_pipeline.update(&colliders);

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline,
        }
    }

    /// Dynamic chassis body with a single box collider. Density is chosen
    /// so the collider's computed mass matches the config mass.
    pub fn spawn_vehicle_body(
        &mut self,
        config: &VehicleConfig,
        position: [Real; 3],
    ) -> RigidBodyHandle {
        let [hx, hy, hz] = config.half_extents;
        let volume = 8.0 * hx * hy * hz;
        let density = config.mass / volume;

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1], position[2]])
            .linear_damping(config.linear_damping)
            .angular_damping(config.angular_damping)
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(rb);

        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .density(density)
            .friction(0.5)
            .restitution(0.1)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
    }

    /// Snap a body back to a position at rest, facing -Z.
    pub fn teleport(&mut self, handle: RigidBodyHandle, position: [Real; 3]) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_translation(vector![position[0], position[1], position[2]], true);
            body.set_rotation(Rotation::identity(), true);
            body.set_linvel(vector![0.0, 0.0, 0.0], true);
            body.set_angvel(vector![0.0, 0.0, 0.0], true);
        }
    }

    pub fn frame(&self, handle: RigidBodyHandle) -> Option<BodyFrame> {
        let body = self.bodies.get(handle)?;
        let rotation = *body.rotation();
        Some(BodyFrame {
            position: *body.translation(),
            rotation,
            forward: rotation * vector![0.0, 0.0, -1.0],
            right: rotation * vector![1.0, 0.0, 0.0],
            velocity: *body.linvel(),
        })
    }

    fn cast_probe(
        &self,
        handle: RigidBodyHandle,
        origin: Vector<Real>,
        direction: Vector<Real>,
    ) -> Option<Real> {
        let ray = Ray::new(origin.into(), direction);
        let filter = QueryFilter::default().exclude_rigid_body(handle);
        self.query_pipeline
            .cast_ray(&self.bodies, &self.colliders, &ray, PROBE_RANGE, true, filter)
            .map(|(_, toi)| toi)
    }

    /// Three horizontal whiskers from the chassis: straight ahead and 45
    /// degrees to either side. The body's own collider is excluded.
    pub fn wall_probes(&self, handle: RigidBodyHandle, frame: &BodyFrame) -> WallProbes {
        let origin = frame.position + vector![0.0, PROBE_HEIGHT, 0.0];
        let quarter = std::f32::consts::FRAC_PI_4;
        let left_dir =
            Rotation::from_axis_angle(&Vector::y_axis(), quarter) * frame.forward;
        let right_dir =
            Rotation::from_axis_angle(&Vector::y_axis(), -quarter) * frame.forward;
        WallProbes {
            forward: self.cast_probe(handle, origin, frame.forward),
            left: self.cast_probe(handle, origin, left_dir),
            right: self.cast_probe(handle, origin, right_dir),
        }
    }

    pub fn step(&mut self, dt: Real) {
        let hooks = ();
        let mut events = ();

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &mut events,
            &hooks,
        );

        // Safety: a solver blowup must not take the whole match with it.
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite()
                || !pos.y.is_finite()
                || !pos.z.is_finite()
                || pos.x.abs() > RUNAWAY_LIMIT
                || pos.y.abs() > RUNAWAY_LIMIT
                || pos.z.abs() > RUNAWAY_LIMIT;

            if bad {
                warn!(?pos, "resetting runaway body");
                body.set_translation(vector![0.0, 1.0, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::RACE_CAR;

    #[test]
    fn frame_faces_negative_z_at_identity() {
        let mut phys = PhysicsWorld::new();
        let handle = phys.spawn_vehicle_body(&RACE_CAR, [0.0, 2.0, 0.0]);
        let frame = phys.frame(handle).unwrap();
        assert!((frame.forward - vector![0.0, 0.0, -1.0]).magnitude() < 1e-6);
        assert!((frame.right - vector![1.0, 0.0, 0.0]).magnitude() < 1e-6);
    }

    #[test]
    fn forward_probe_sees_the_near_wall() {
        let mut phys = PhysicsWorld::new();
        // Facing -Z, four meters short of the wall at z = -50.
        let handle = phys.spawn_vehicle_body(&RACE_CAR, [0.0, 1.0, -45.0]);
        let frame = phys.frame(handle).unwrap();
        let probes = phys.wall_probes(handle, &frame);
        let toi = probes.forward.expect("wall within probe range");
        // Wall face is at z = -49 (center -50, half thickness 1).
        assert!((toi - 4.0).abs() < 0.1, "toi {toi}");
    }

    #[test]
    fn probe_misses_in_open_field() {
        let mut phys = PhysicsWorld::new();
        let handle = phys.spawn_vehicle_body(&RACE_CAR, [0.0, 1.0, 0.0]);
        let frame = phys.frame(handle).unwrap();
        let probes = phys.wall_probes(handle, &frame);
        assert!(probes.forward.is_none());
        assert!(probes.left.is_none());
        assert!(probes.right.is_none());
    }

    #[test]
    fn teleport_zeroes_motion() {
        let mut phys = PhysicsWorld::new();
        let handle = phys.spawn_vehicle_body(&RACE_CAR, [10.0, 2.0, 10.0]);
        phys.bodies
            .get_mut(handle)
            .unwrap()
            .set_linvel(vector![5.0, 0.0, 5.0], true);
        phys.teleport(handle, [0.0, 2.0, -15.0]);
        let body = phys.bodies.get(handle).unwrap();
        assert_eq!(*body.translation(), vector![0.0, 2.0, -15.0]);
        assert_eq!(body.linvel().magnitude(), 0.0);
    }
}
