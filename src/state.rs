// src/state.rs

use std::collections::HashMap;

use rapier3d::prelude::{Real, RigidBodyHandle, RigidBodySet};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;
use uuid::Uuid;

use crate::ai::{AiDriver, AiMode};
use crate::particles::{DustPool, TrailPool};
use crate::race::RaceTracker;
use crate::vehicle::{DriveIntent, Vehicle, VehicleConfig, VehicleRole};

#[derive(Serialize)]
struct VehicleSnapshot {
    id: String,
    role: &'static str,
    x: f32,
    y: f32,
    z: f32,
    rot: [f32; 4],
    lap: u32,
    total_laps: u32,
    rank: Option<usize>,
    finished: bool,
}

#[derive(Serialize)]
struct DustSnapshot {
    x: f32,
    y: f32,
    z: f32,
    scale: f32,
    alpha: f32,
}

#[derive(Serialize)]
struct TrailSnapshot {
    x: f32,
    z: f32,
    rot: f32,
    alpha: f32,
}

#[derive(Serialize)]
struct Snapshot {
    tick: u64,
    phase: &'static str,
    countdown: Option<&'static str>,
    vehicles: Vec<VehicleSnapshot>,
    dust: Vec<DustSnapshot>,
    trails: Vec<TrailSnapshot>,
}

/// Everything the tick loop mutates under one lock: the roster, the race
/// bookkeeping, the particle pools, and the connected clients.
pub struct SharedGameState {
    pub tick: u64,
    pub clients: Vec<UnboundedSender<String>>,
    pub vehicles: HashMap<String, Vehicle>,
    pub drivers: HashMap<String, AiDriver>,
    pub race: RaceTracker,
    pub dust: DustPool,
    pub trails: TrailPool,
    pub start_requested: bool,
    pub restart_requested: bool,
}

impl SharedGameState {
    pub fn new(race: RaceTracker, dust: DustPool, trails: TrailPool) -> Self {
        Self {
            tick: 0,
            clients: Vec::new(),
            vehicles: HashMap::new(),
            drivers: HashMap::new(),
            race,
            dust,
            trails,
            start_requested: false,
            restart_requested: false,
        }
    }

    pub fn register_client(&mut self, tx: UnboundedSender<String>) {
        self.clients.push(tx);
    }

    pub fn player_count(&self) -> usize {
        self.vehicles
            .values()
            .filter(|v| v.role == VehicleRole::Player)
            .count()
    }

    /// Create a player vehicle, enter it in the race, and return its id.
    /// The first player becomes the primary whose finish ends the race.
    pub fn add_player(&mut self, config: VehicleConfig, spawn: [Real; 3]) -> String {
        let id = Uuid::new_v4().to_string();
        self.vehicles.insert(
            id.clone(),
            Vehicle::new(id.clone(), VehicleRole::Player, config, spawn),
        );
        self.race.track(&id);
        if self.race.primary().is_none() {
            self.race.set_primary(&id);
        }
        id
    }

    pub fn add_ai(
        &mut self,
        id: &str,
        role: VehicleRole,
        config: VehicleConfig,
        mode: AiMode,
        spawn: [Real; 3],
        checkpoint_radius: Real,
    ) {
        self.vehicles.insert(
            id.to_string(),
            Vehicle::new(id.to_string(), role, config, spawn),
        );
        self.drivers
            .insert(id.to_string(), AiDriver::new(mode, checkpoint_radius));
        // Chasers are not competitors, so they never enter the standings.
        if role != VehicleRole::AiChaser {
            self.race.track(id);
        }
    }

    /// Drop a vehicle from every table; the caller removes the returned
    /// body handle from the physics world.
    pub fn remove_vehicle(&mut self, id: &str) -> Option<RigidBodyHandle> {
        self.drivers.remove(id);
        self.race.untrack(id);
        self.vehicles.remove(id).and_then(|v| v.body)
    }

    pub fn set_player_intent(&mut self, id: &str, intent: DriveIntent) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            if vehicle.role == VehicleRole::Player {
                vehicle.intent = intent.clamped();
            }
        }
    }

    /// Build one snapshot of the whole scene and fan it out to every
    /// connected client.
    pub fn broadcast_snapshot(&self, bodies: &RigidBodySet) {
        let standings = self.race.standings();
        let rank_of = |id: &str| standings.iter().position(|s| s.as_str() == id).map(|p| p + 1);

        let mut vehicles = Vec::with_capacity(self.vehicles.len());
        for vehicle in self.vehicles.values() {
            let Some(handle) = vehicle.body else { continue };
            let Some(body) = bodies.get(handle) else { continue };
            let pos = body.translation();
            let rot = body.rotation();
            let competitor = vehicle.role != VehicleRole::AiChaser;
            vehicles.push(VehicleSnapshot {
                id: vehicle.id.clone(),
                role: vehicle.role.as_str(),
                x: pos.x,
                y: pos.y,
                z: pos.z,
                rot: [rot.i, rot.j, rot.k, rot.w],
                lap: if competitor {
                    self.race.lap_display(&vehicle.id)
                } else {
                    0
                },
                total_laps: self.race.total_laps(),
                rank: if competitor { rank_of(&vehicle.id) } else { None },
                finished: vehicle.finished,
            });
        }

        let dust = self
            .dust
            .iter_active()
            .map(|p| DustSnapshot {
                x: p.position.x,
                y: p.position.y,
                z: p.position.z,
                scale: p.scale(),
                alpha: p.alpha(),
            })
            .collect();
        let trails = self
            .trails
            .iter_active()
            .map(|m| TrailSnapshot {
                x: m.position.x,
                z: m.position.z,
                rot: m.rotation_y,
                alpha: m.alpha(),
            })
            .collect();

        let snapshot = Snapshot {
            tick: self.tick,
            phase: self.race.phase().as_str(),
            countdown: self.race.countdown_label(),
            vehicles,
            dust,
            trails,
        };
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(err) => {
                error!(%err, "snapshot serialization failed");
                return;
            }
        };

        for tx in &self.clients {
            let _ = tx.send(json.clone());
        }
    }
}
