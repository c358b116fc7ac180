mod ai;
mod net;
mod particles;
mod physics;
mod race;
mod state;
mod vehicle;

use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::prelude::*;
use tokio::sync::Mutex;
use tokio::time::{Duration, interval};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::ai::{AiContext, AiMode};
use crate::net::start_websocket_server;
use crate::particles::{DustPool, TrailPool};
use crate::physics::PhysicsWorld;
use crate::race::RaceTracker;
use crate::state::SharedGameState;
use crate::vehicle::{CHASE_VAN, RACE_CAR, VehicleRole};

const TICK_DT: Real = 1.0 / 60.0;

const TOTAL_LAPS: u32 = 3;
const CHECKPOINT_RADIUS: Real = 10.0;

/// Oval racing line around the arena, counterclockwise from the grid.
const TRACK_WAYPOINTS: [[Real; 3]; 6] = [
    [30.0, 0.0, -20.0],
    [40.0, 0.0, 0.0],
    [30.0, 0.0, 20.0],
    [-30.0, 0.0, 20.0],
    [-40.0, 0.0, 0.0],
    [-30.0, 0.0, -20.0],
];

const START_POSITIONS: [[Real; 3]; 5] = [
    [0.0, 2.0, -15.0],
    [-5.0, 2.0, -15.0],
    [5.0, 2.0, -15.0],
    [-10.0, 2.0, -15.0],
    [10.0, 2.0, -15.0],
];

const DUST_SPEED_THRESHOLD: Real = 5.0;
const DUST_EMISSION_CHANCE: f64 = 0.2;
const DUST_REAR_OFFSET: Real = 1.2;
const DUST_WIDTH_OFFSET: Real = 0.6;
const DUST_Y_OFFSET: Real = -0.5;
/// Lateral slip speed above which tire marks are laid down.
const TRAIL_SLIP_THRESHOLD: Real = 4.0;

/// Extra players line up to the left of the last grid slot.
pub fn player_spawn_position(player_index: usize) -> [Real; 3] {
    let base = START_POSITIONS[0];
    [base[0] - 2.5 * player_index as Real, base[1], base[2]]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("starting race server");

    let waypoints = TRACK_WAYPOINTS
        .iter()
        .map(|&[x, y, z]| vector![x, y, z])
        .collect();
    let race = RaceTracker::new(waypoints, TOTAL_LAPS, CHECKPOINT_RADIUS)?;
    let mut game = SharedGameState::new(
        race,
        DustPool::new(particles::DUST_CAPACITY)?,
        TrailPool::new(particles::TRAIL_CAPACITY)?,
    );

    // The AI field: three racers plus one chase van.
    for (i, spawn) in START_POSITIONS[1..4].iter().enumerate() {
        game.add_ai(
            &format!("racer-{}", i + 1),
            VehicleRole::AiRacer,
            RACE_CAR,
            AiMode::Race,
            *spawn,
            CHECKPOINT_RADIUS,
        );
    }
    game.add_ai(
        "chaser-1",
        VehicleRole::AiChaser,
        CHASE_VAN,
        AiMode::Chase,
        START_POSITIONS[4],
        CHECKPOINT_RADIUS,
    );

    let state = Arc::new(Mutex::new(game));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    tokio::spawn(start_websocket_server(
        Arc::clone(&state),
        Arc::clone(&physics),
    ));

    // ThreadRng is not Send, so the tick loop owns a seeded StdRng.
    let mut rng = StdRng::from_entropy();

    // Fixed timestep: ~60 Hz
    let mut ticker = interval(Duration::from_millis(16));

    loop {
        ticker.tick().await;

        let mut phys = physics.lock().await;
        let mut game = state.lock().await;

        step_game(&mut game, &mut phys, &mut rng, TICK_DT);

        game.tick += 1;
        game.broadcast_snapshot(&phys.bodies);
    }
}

/// One full simulation tick: phase transitions, AI, vehicle control,
/// particle emission, then the physics step.
fn step_game(
    game: &mut SharedGameState,
    phys: &mut PhysicsWorld,
    rng: &mut impl Rng,
    dt: Real,
) {
    if game.restart_requested {
        game.restart_requested = false;
        game.race.restart();
        for vehicle in game.vehicles.values_mut() {
            vehicle.respawn(phys);
        }
        for driver in game.drivers.values_mut() {
            driver.reset();
        }
        info!("race restarted");
    }
    if game.start_requested {
        game.start_requested = false;
        game.race.start();
    }

    // Bodies are created lazily so vehicles added mid-tick by the
    // network task materialize here.
    for vehicle in game.vehicles.values_mut() {
        vehicle.spawn(phys);
    }

    game.race.advance(dt);

    // Score checkpoint progress for every competitor.
    if game.race.is_racing() {
        for vehicle in game.vehicles.values() {
            if vehicle.role == VehicleRole::AiChaser {
                continue;
            }
            let Some(handle) = vehicle.body else { continue };
            if let Some(frame) = phys.frame(handle) {
                game.race.report_position(&vehicle.id, frame.position);
            }
        }
    }

    // One player position sample shared by every chaser this tick.
    let player_position = game
        .vehicles
        .values()
        .find(|v| v.role == VehicleRole::Player)
        .and_then(|v| v.body)
        .and_then(|handle| phys.frame(handle))
        .map(|frame| frame.position);

    // AI intents. Drivers idle until the green flag.
    let racing = game.race.is_racing();
    for (id, driver) in game.drivers.iter_mut() {
        let Some(vehicle) = game.vehicles.get_mut(id) else { continue };
        let Some(handle) = vehicle.body else { continue };
        let Some(frame) = phys.frame(handle) else { continue };

        if !racing {
            vehicle.intent = crate::vehicle::DriveIntent::NEUTRAL;
            continue;
        }

        let probes = phys.wall_probes(handle, &frame);
        let ctx = AiContext {
            frame,
            player_position,
            waypoints: game.race.waypoints(),
            probes,
        };
        vehicle.intent = driver.compute_intent(&ctx, dt);
    }

    // Vehicle control plus particle emission from the post-control frame.
    for vehicle in game.vehicles.values_mut() {
        if vehicle.role != VehicleRole::AiChaser {
            if let Some(rec) = game.race.record(&vehicle.id) {
                vehicle.finished = rec.finished;
            }
        }
        vehicle.tick(&mut phys.bodies, dt);

        let Some(handle) = vehicle.body else { continue };
        let Some(frame) = phys.frame(handle) else { continue };

        let forward_speed = frame.velocity.dot(&frame.forward);
        if forward_speed.abs() > DUST_SPEED_THRESHOLD && rng.gen_bool(DUST_EMISSION_CHANCE) {
            // One puff behind each rear wheel.
            let rear = frame.position - frame.forward * DUST_REAR_OFFSET
                + vector![0.0, DUST_Y_OFFSET, 0.0];
            for side in [-1.0, 1.0] {
                let at = rear + frame.right * (side * DUST_WIDTH_OFFSET);
                game.dust.emit(rng, at, frame.velocity * 0.1);
            }
        }

        let lateral_speed = frame.velocity.dot(&frame.right);
        if lateral_speed.abs() > TRAIL_SLIP_THRESHOLD {
            let yaw = frame.rotation.euler_angles().1;
            game.trails.emit(frame.position + vector![0.0, DUST_Y_OFFSET, 0.0], yaw);
        }
    }

    phys.step(dt);
    game.dust.advance(dt);
    game.trails.advance(dt);
}
