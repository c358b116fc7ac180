// src/vehicle.rs
//
// Impulse-based arcade vehicle controller. One chassis rigid body per
// vehicle; handling comes entirely from per-tick impulses plus a hard
// speed clamp, not from wheel colliders or joints.

use rapier3d::prelude::*;

use crate::physics::PhysicsWorld;

/// Impulse magnitudes were tuned against a 60 Hz frame, so throttle force
/// scales with dt relative to this rate.
const REFERENCE_TICK_HZ: Real = 60.0;

/// Below this speed yaw torque needs an explicit steer command; residual
/// angular velocity alone cannot keep the chassis rotating.
const MIN_TURN_SPEED: Real = 1.0;

/// Braking factor applied once a vehicle has taken the flag.
const FINISH_BRAKE: Real = 0.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleRole {
    Player,
    AiRacer,
    AiChaser,
}

impl VehicleRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleRole::Player => "player",
            VehicleRole::AiRacer => "racer",
            VehicleRole::AiChaser => "chaser",
        }
    }
}

/// One frame of driver input. `steer` is -1 for full left, +1 for full
/// right; both axes are clamped before use so a hostile client cannot
/// exceed the handling envelope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveIntent {
    pub throttle: Real,
    pub steer: Real,
}

impl DriveIntent {
    pub const NEUTRAL: DriveIntent = DriveIntent {
        throttle: 0.0,
        steer: 0.0,
    };

    pub fn clamped(self) -> DriveIntent {
        DriveIntent {
            throttle: self.throttle.clamp(-1.0, 1.0),
            steer: self.steer.clamp(-1.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VehicleConfig {
    pub mass: Real,
    pub max_speed: Real,
    pub drive_accel: Real,
    pub turn_rate: Real,
    pub lateral_friction: Real,
    pub linear_damping: Real,
    pub angular_damping: Real,
    pub half_extents: [Real; 3],
}

pub const RACE_CAR: VehicleConfig = VehicleConfig {
    mass: 150.0,
    max_speed: 16.0,
    drive_accel: 2.5,
    turn_rate: 3.5,
    lateral_friction: 0.8,
    linear_damping: 0.8,
    angular_damping: 1.5,
    half_extents: [0.75, 0.3, 1.5],
};

pub const CHASE_VAN: VehicleConfig = VehicleConfig {
    mass: 150.0,
    max_speed: 15.0,
    drive_accel: 1.0,
    turn_rate: 3.0,
    lateral_friction: 0.8,
    linear_damping: 0.8,
    angular_damping: 1.5,
    half_extents: [0.8, 0.45, 1.7],
};

pub struct Vehicle {
    pub id: String,
    pub role: VehicleRole,
    pub body: Option<RigidBodyHandle>,
    pub config: VehicleConfig,
    pub spawn_position: [Real; 3],
    pub intent: DriveIntent,
    pub finished: bool,
}

impl Vehicle {
    pub fn new(id: String, role: VehicleRole, config: VehicleConfig, spawn: [Real; 3]) -> Self {
        Self {
            id,
            role,
            body: None,
            config,
            spawn_position: spawn,
            intent: DriveIntent::NEUTRAL,
            finished: false,
        }
    }

    pub fn spawn(&mut self, phys: &mut PhysicsWorld) {
        if self.body.is_none() {
            self.body = Some(phys.spawn_vehicle_body(&self.config, self.spawn_position));
        }
    }

    pub fn respawn(&mut self, phys: &mut PhysicsWorld) {
        if let Some(handle) = self.body {
            phys.teleport(handle, self.spawn_position);
        }
        self.intent = DriveIntent::NEUTRAL;
        self.finished = false;
    }

    /// Run one control tick against the chassis body. Order matters:
    /// lateral grip and drive impulses first, then the clamp reads the
    /// velocity those impulses already produced, so a tick can never end
    /// above `max_speed`.
    pub fn tick(&self, bodies: &mut RigidBodySet, dt: Real) {
        let Some(handle) = self.body else {
            return;
        };
        let Some(body) = bodies.get_mut(handle) else {
            return;
        };
        let cfg = &self.config;
        let rot = *body.rotation();
        let forward = rot * vector![0.0, 0.0, -1.0];
        let right = rot * vector![1.0, 0.0, 0.0];
        let linvel = *body.linvel();

        // Sideways grip: cancel a fraction of lateral slip every tick.
        let lateral_speed = linvel.dot(&right);
        body.apply_impulse(right * (-lateral_speed * cfg.lateral_friction * cfg.mass), true);

        if self.finished {
            // Coast to a stop after the flag.
            let vel = *body.linvel();
            body.apply_impulse(vel * (-FINISH_BRAKE * cfg.mass), true);
            return;
        }

        let intent = self.intent.clamped();

        if intent.throttle != 0.0 {
            let force = cfg.drive_accel * cfg.mass * dt * REFERENCE_TICK_HZ;
            body.apply_impulse(forward * (intent.throttle * force), true);
        }

        // Pivoting on the spot needs explicit steer input; a coasting car
        // below walking pace gets no torque.
        let forward_speed = body.linvel().dot(&forward);
        if forward_speed.abs() > MIN_TURN_SPEED || intent.steer != 0.0 {
            // Positive steer is rightward, which is a negative yaw.
            let torque = -cfg.turn_rate * intent.steer * dt * cfg.mass;
            body.apply_torque_impulse(vector![0.0, torque, 0.0], true);
        }

        // Impulses update the velocity immediately, so this reads the
        // post-impulse state.
        let vel = *body.linvel();
        let speed = vel.magnitude();
        if speed > cfg.max_speed {
            body.set_linvel(vel * (cfg.max_speed / speed), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Real = 1.0 / 60.0;

    fn spawned(config: VehicleConfig) -> (PhysicsWorld, Vehicle) {
        let mut phys = PhysicsWorld::new();
        let mut car = Vehicle::new("car".into(), VehicleRole::Player, config, [0.0, 2.0, 0.0]);
        car.spawn(&mut phys);
        (phys, car)
    }

    #[test]
    fn speed_never_exceeds_cap_after_tick() {
        let (mut phys, mut car) = spawned(RACE_CAR);
        let handle = car.body.unwrap();
        phys.bodies
            .get_mut(handle)
            .unwrap()
            .set_linvel(vector![0.0, 0.0, -15.9], true);
        car.intent = DriveIntent {
            throttle: 1.0,
            steer: 0.0,
        };
        for _ in 0..20 {
            car.tick(&mut phys.bodies, DT);
            let speed = phys.bodies.get(handle).unwrap().linvel().magnitude();
            assert!(speed <= RACE_CAR.max_speed + 1e-4, "speed {speed}");
        }
        // And the clamp does not kill the drive: still near the cap.
        let speed = phys.bodies.get(handle).unwrap().linvel().magnitude();
        assert!(speed > RACE_CAR.max_speed - 0.5);
    }

    #[test]
    fn stationary_pivot_needs_explicit_steer() {
        let (mut phys, mut car) = spawned(RACE_CAR);
        let handle = car.body.unwrap();

        // Stationary with no steer: nothing turns the chassis.
        car.intent = DriveIntent::NEUTRAL;
        car.tick(&mut phys.bodies, DT);
        let angvel = *phys.bodies.get(handle).unwrap().angvel();
        assert_eq!(angvel.y, 0.0);

        // Stationary with steer held pivots, negative yaw for rightward.
        car.intent = DriveIntent {
            throttle: 0.0,
            steer: 1.0,
        };
        car.tick(&mut phys.bodies, DT);
        let angvel = *phys.bodies.get(handle).unwrap().angvel();
        assert!(angvel.y < 0.0);
    }

    #[test]
    fn steering_allowed_when_rolling_fast() {
        let (mut phys, mut car) = spawned(RACE_CAR);
        let handle = car.body.unwrap();
        phys.bodies
            .get_mut(handle)
            .unwrap()
            .set_linvel(vector![0.0, 0.0, -5.0], true);
        car.intent = DriveIntent {
            throttle: 0.0,
            steer: -1.0,
        };
        car.tick(&mut phys.bodies, DT);
        let angvel = *phys.bodies.get(handle).unwrap().angvel();
        assert!(angvel.y > 0.0);
    }

    #[test]
    fn tick_without_body_is_a_no_op() {
        let mut phys = PhysicsWorld::new();
        let car = Vehicle::new("ghost".into(), VehicleRole::AiRacer, RACE_CAR, [0.0, 2.0, 0.0]);
        car.tick(&mut phys.bodies, DT);
    }

    #[test]
    fn finished_vehicle_brakes_and_ignores_throttle() {
        let (mut phys, mut car) = spawned(RACE_CAR);
        let handle = car.body.unwrap();
        phys.bodies
            .get_mut(handle)
            .unwrap()
            .set_linvel(vector![0.0, 0.0, -10.0], true);
        car.finished = true;
        car.intent = DriveIntent {
            throttle: 1.0,
            steer: 0.0,
        };
        let before = phys.bodies.get(handle).unwrap().linvel().magnitude();
        car.tick(&mut phys.bodies, DT);
        let after = phys.bodies.get(handle).unwrap().linvel().magnitude();
        assert!(after < before);
    }

    #[test]
    fn hostile_intent_is_clamped() {
        let clamped = DriveIntent {
            throttle: 40.0,
            steer: -9.0,
        }
        .clamped();
        assert_eq!(clamped.throttle, 1.0);
        assert_eq!(clamped.steer, -1.0);
    }

    #[test]
    fn lateral_slip_is_damped() {
        let (mut phys, car) = spawned(RACE_CAR);
        let handle = car.body.unwrap();
        // Chassis faces -Z at spawn, so +X is pure sideways slip.
        phys.bodies
            .get_mut(handle)
            .unwrap()
            .set_linvel(vector![8.0, 0.0, 0.0], true);
        car.tick(&mut phys.bodies, DT);
        let vx = phys.bodies.get(handle).unwrap().linvel().x;
        assert!((vx - 8.0 * (1.0 - RACE_CAR.lateral_friction)).abs() < 1e-3);
    }
}
