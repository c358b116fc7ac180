// src/ai.rs
//
// AI drivers produce the same DriveIntent a human would, so the vehicle
// controller treats them identically. Two behaviors share one state
// machine: chasers pursue the player directly, racers follow the
// waypoint loop. A stuck timer and wall whiskers cover recovery.

use rapier3d::prelude::*;

use crate::physics::{BodyFrame, WallProbes};
use crate::vehicle::DriveIntent;

/// Below this speed the driver may be stuck rather than cornering.
const STUCK_SPEED: Real = 1.5;
/// Per-tick displacement under this counts as "not moving". Speed is the
/// binding condition; this only rules out a body being carried while its
/// own velocity reads low.
const STUCK_MOVE_EPS: Real = 0.1;
/// Spawn grace before stuck detection arms, covering the drop to ground.
const STUCK_GRACE: Real = 3.0;
/// Accumulated stuck time that triggers a reversal.
const STUCK_AFTER: Real = 2.0;
const REVERSE_FOR: Real = 1.2;
const AVOID_FOR: Real = 0.8;
/// Forward whisker distance that triggers a swerve.
const WALL_NEAR: Real = 4.0;

const CHASE_STOP_DISTANCE: Real = 1.5;
const STEER_GAIN: Real = 2.0;
/// Alignment (forward dot to-target) above which full throttle is safe.
const ALIGN_FULL_THROTTLE: Real = 0.5;
const CORNER_THROTTLE: Real = 0.5;
const REVERSE_THROTTLE: Real = -0.6;
const AVOID_THROTTLE: Real = 0.6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiMode {
    Chase,
    Race,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AiState {
    Pursuing,
    Avoiding { steer: Real, remaining: Real },
    Reversing { steer: Real, remaining: Real },
}

/// Per-tick world view handed to the driver. Waypoints are the shared
/// racing line; `player_position` is absent when no player is connected.
pub struct AiContext<'a> {
    pub frame: BodyFrame,
    pub player_position: Option<Vector<Real>>,
    pub waypoints: &'a [Vector<Real>],
    pub probes: WallProbes,
}

pub struct AiDriver {
    pub mode: AiMode,
    pub state: AiState,
    pub next_waypoint: usize,
    checkpoint_radius: Real,
    stuck_time: Real,
    grace: Real,
    last_position: Option<Vector<Real>>,
}

impl AiDriver {
    pub fn new(mode: AiMode, checkpoint_radius: Real) -> Self {
        Self {
            mode,
            state: AiState::Pursuing,
            next_waypoint: 0,
            checkpoint_radius,
            stuck_time: 0.0,
            grace: STUCK_GRACE,
            last_position: None,
        }
    }

    /// Back to the grid: fresh state, fresh grace period.
    pub fn reset(&mut self) {
        self.state = AiState::Pursuing;
        self.next_waypoint = 0;
        self.stuck_time = 0.0;
        self.grace = STUCK_GRACE;
        self.last_position = None;
    }

    pub fn compute_intent(&mut self, ctx: &AiContext, dt: Real) -> DriveIntent {
        self.update_stuck_timer(&ctx.frame, dt);

        match self.state {
            AiState::Reversing { steer, remaining } => {
                let remaining = remaining - dt;
                if remaining <= 0.0 {
                    self.state = AiState::Pursuing;
                    self.stuck_time = 0.0;
                } else {
                    self.state = AiState::Reversing { steer, remaining };
                }
                DriveIntent {
                    throttle: REVERSE_THROTTLE,
                    steer,
                }
            }
            AiState::Avoiding { steer, remaining } => {
                let remaining = remaining - dt;
                if remaining <= 0.0 {
                    self.state = AiState::Pursuing;
                } else {
                    self.state = AiState::Avoiding { steer, remaining };
                }
                DriveIntent {
                    throttle: AVOID_THROTTLE,
                    steer,
                }
            }
            AiState::Pursuing => {
                let pursue = match self.mode {
                    AiMode::Chase => self.chase_intent(ctx),
                    AiMode::Race => self.race_intent(ctx),
                };

                if self.stuck_time >= STUCK_AFTER {
                    // Back out mirrored, so the nose swings away from
                    // whatever we were steering into.
                    let steer = -pursue.steer;
                    self.state = AiState::Reversing {
                        steer,
                        remaining: REVERSE_FOR,
                    };
                    return DriveIntent {
                        throttle: REVERSE_THROTTLE,
                        steer,
                    };
                }

                if let Some(ahead) = ctx.probes.forward {
                    if ahead < WALL_NEAR {
                        let steer = swerve_direction(&ctx.probes);
                        self.state = AiState::Avoiding {
                            steer,
                            remaining: AVOID_FOR,
                        };
                        return DriveIntent {
                            throttle: AVOID_THROTTLE,
                            steer,
                        };
                    }
                }

                pursue
            }
        }
    }

    fn update_stuck_timer(&mut self, frame: &BodyFrame, dt: Real) {
        if self.grace > 0.0 {
            self.grace -= dt;
            // Accumulation starts on the very tick the grace runs out.
            if self.grace > 0.0 {
                self.last_position = Some(frame.position);
                return;
            }
        }
        let moved = match self.last_position {
            Some(last) => (frame.position - last).magnitude(),
            None => Real::MAX,
        };
        self.last_position = Some(frame.position);

        let crawling = frame.velocity.magnitude() < STUCK_SPEED;
        if crawling && moved < STUCK_MOVE_EPS {
            self.stuck_time += dt;
        } else {
            self.stuck_time = 0.0;
        }
    }

    /// Direct pursuit: full throttle at the player, bang-bang steering
    /// from the sign of cross(forward, to_target).y.
    fn chase_intent(&self, ctx: &AiContext) -> DriveIntent {
        let Some(target) = ctx.player_position else {
            return DriveIntent::NEUTRAL;
        };
        let to_target = flat(target - ctx.frame.position);
        let distance = to_target.magnitude();
        if distance < CHASE_STOP_DISTANCE {
            return DriveIntent::NEUTRAL;
        }
        let cross_y = ctx.frame.forward.cross(&to_target).y;
        let steer = if cross_y > 0.0 {
            -1.0
        } else if cross_y < 0.0 {
            1.0
        } else {
            0.0
        };
        DriveIntent {
            throttle: 1.0,
            steer,
        }
    }

    /// Waypoint racing: advance the target when inside the checkpoint
    /// radius, steer proportionally, ease off when pointed away.
    fn race_intent(&mut self, ctx: &AiContext) -> DriveIntent {
        if ctx.waypoints.is_empty() {
            return DriveIntent::NEUTRAL;
        }
        self.next_waypoint %= ctx.waypoints.len();

        let mut to_target = flat(ctx.waypoints[self.next_waypoint] - ctx.frame.position);
        if to_target.magnitude() < self.checkpoint_radius {
            self.next_waypoint = (self.next_waypoint + 1) % ctx.waypoints.len();
            to_target = flat(ctx.waypoints[self.next_waypoint] - ctx.frame.position);
        }

        let distance = to_target.magnitude();
        if distance < 1e-3 {
            return DriveIntent::NEUTRAL;
        }
        let dir = to_target / distance;
        let alignment = ctx.frame.forward.dot(&dir);
        let throttle = if alignment > ALIGN_FULL_THROTTLE {
            1.0
        } else {
            CORNER_THROTTLE
        };
        DriveIntent {
            throttle,
            steer: steer_toward(&ctx.frame, to_target),
        }
    }
}

fn flat(v: Vector<Real>) -> Vector<Real> {
    vector![v.x, 0.0, v.z]
}

/// Proportional steer toward a world-space offset. cross(forward, to).y
/// is positive when the target lies to the left, which maps to negative
/// steer.
fn steer_toward(frame: &BodyFrame, to_target: Vector<Real>) -> Real {
    let cross_y = frame.forward.cross(&to_target).y;
    let distance = to_target.magnitude();
    if distance < 1e-3 {
        return 0.0;
    }
    (-STEER_GAIN * cross_y / distance).clamp(-1.0, 1.0)
}

/// Pick the swerve side from the diagonal whiskers: turn toward the
/// clearer side, defaulting right when both are open or both blocked
/// equally.
fn swerve_direction(probes: &WallProbes) -> Real {
    match (probes.left, probes.right) {
        (Some(l), Some(r)) if l > r => -1.0,
        (Some(_), None) => 1.0,
        (None, Some(_)) => -1.0,
        _ => 1.0,
    }
}
