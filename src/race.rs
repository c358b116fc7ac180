// src/race.rs
//
// Checkpoint/lap accounting and the race phase machine. The tracker only
// ever consumes position samples; steering toward waypoints is the AI
// driver's business. Lap numbers are always derived from the checkpoint
// count, never stored incrementally, so progress can't drift.

use std::collections::HashMap;

use anyhow::{Result, bail};
use rapier3d::prelude::*;
use tracing::info;

const COUNTDOWN_SECS: Real = 3.0;
const GO_FLASH_SECS: Real = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RacePhase {
    Waiting,
    Countdown { remaining: Real },
    Racing { go_flash: Real },
    Finished,
}

impl RacePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RacePhase::Waiting => "waiting",
            RacePhase::Countdown { .. } => "countdown",
            RacePhase::Racing { .. } => "racing",
            RacePhase::Finished => "finished",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub checkpoints_passed: u32,
    pub next_waypoint: usize,
    pub distance_to_next: Real,
    pub finished: bool,
}

impl ProgressRecord {
    fn new() -> Self {
        Self {
            checkpoints_passed: 0,
            next_waypoint: 0,
            distance_to_next: Real::MAX,
            finished: false,
        }
    }
}

/// Lap currently in progress, derived from total checkpoints passed.
/// With 6 waypoints: 0..=6 checkpoints is lap 1, the 7th starts lap 2.
fn lap_from_checkpoints(checkpoints_passed: u32, waypoint_count: usize) -> u32 {
    if checkpoints_passed == 0 {
        1
    } else {
        (checkpoints_passed - 1) / waypoint_count as u32 + 1
    }
}

pub struct RaceTracker {
    waypoints: Vec<Vector<Real>>,
    total_laps: u32,
    checkpoint_radius: Real,
    phase: RacePhase,
    records: HashMap<String, ProgressRecord>,
    primary: Option<String>,
}

impl RaceTracker {
    pub fn new(waypoints: Vec<Vector<Real>>, total_laps: u32, checkpoint_radius: Real) -> Result<Self> {
        if waypoints.is_empty() {
            bail!("race track needs at least one waypoint");
        }
        if total_laps == 0 {
            bail!("total laps must be nonzero");
        }
        if checkpoint_radius <= 0.0 {
            bail!("checkpoint radius must be positive");
        }
        Ok(Self {
            waypoints,
            total_laps,
            checkpoint_radius,
            phase: RacePhase::Waiting,
            records: HashMap::new(),
            primary: None,
        })
    }

    pub fn track(&mut self, id: &str) {
        self.records.insert(id.to_string(), ProgressRecord::new());
    }

    pub fn untrack(&mut self, id: &str) {
        self.records.remove(id);
        if self.primary.as_deref() == Some(id) {
            self.primary = None;
        }
    }

    pub fn set_primary(&mut self, id: &str) {
        self.primary = Some(id.to_string());
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn is_racing(&self) -> bool {
        matches!(self.phase, RacePhase::Racing { .. })
    }

    pub fn waypoints(&self) -> &[Vector<Real>] {
        &self.waypoints
    }

    pub fn total_laps(&self) -> u32 {
        self.total_laps
    }

    pub fn record(&self, id: &str) -> Option<&ProgressRecord> {
        self.records.get(id)
    }

    /// Lap number for the HUD, capped at the lap count once finished.
    pub fn lap_display(&self, id: &str) -> u32 {
        let Some(rec) = self.records.get(id) else {
            return 1;
        };
        lap_from_checkpoints(rec.checkpoints_passed, self.waypoints.len()).min(self.total_laps)
    }

    /// Arm the countdown. Only meaningful from the grid.
    pub fn start(&mut self) {
        if self.phase == RacePhase::Waiting {
            self.phase = RacePhase::Countdown {
                remaining: COUNTDOWN_SECS,
            };
            info!("countdown armed");
        }
    }

    /// Reset every record to the grid and go back to waiting.
    pub fn restart(&mut self) {
        for rec in self.records.values_mut() {
            *rec = ProgressRecord::new();
        }
        self.phase = RacePhase::Waiting;
    }

    pub fn advance(&mut self, dt: Real) {
        match &mut self.phase {
            RacePhase::Countdown { remaining } => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.phase = RacePhase::Racing {
                        go_flash: GO_FLASH_SECS,
                    };
                    info!("race started");
                }
            }
            RacePhase::Racing { go_flash } => {
                if *go_flash > 0.0 {
                    *go_flash -= dt;
                }
            }
            _ => {}
        }
    }

    /// HUD text for the 3-2-1-Go sequence; the GO flash rides into the
    /// first second of racing.
    pub fn countdown_label(&self) -> Option<&'static str> {
        match self.phase {
            RacePhase::Countdown { remaining } => match remaining.ceil() as i32 {
                3 => Some("3"),
                2 => Some("2"),
                1 => Some("1"),
                _ => Some("GO"),
            },
            RacePhase::Racing { go_flash } if go_flash > 0.0 => Some("GO"),
            _ => None,
        }
    }

    /// One position sample for one tracked vehicle. Ignored outside the
    /// racing phase and after the vehicle has taken the flag. Distance is
    /// measured in the horizontal plane; waypoints sit at ground level
    /// while chassis ride at suspension height.
    pub fn report_position(&mut self, id: &str, position: Vector<Real>) {
        if !self.is_racing() {
            return;
        }
        let waypoint_count = self.waypoints.len();
        let Some(rec) = self.records.get_mut(id) else {
            return;
        };
        if rec.finished {
            return;
        }

        let target = self.waypoints[rec.next_waypoint];
        let dx = position.x - target.x;
        let dz = position.z - target.z;
        rec.distance_to_next = (dx * dx + dz * dz).sqrt();

        if rec.distance_to_next < self.checkpoint_radius {
            rec.checkpoints_passed += 1;
            rec.next_waypoint = (rec.next_waypoint + 1) % waypoint_count;

            if rec.checkpoints_passed >= self.total_laps * waypoint_count as u32 {
                rec.finished = true;
                info!(vehicle = id, "took the flag");
                if self.primary.as_deref() == Some(id) {
                    self.phase = RacePhase::Finished;
                }
            }
        }
    }

    /// Standings over every tracked vehicle: most checkpoints first, ties
    /// broken by who is closer to their next waypoint. The id tiebreak
    /// keeps the order total when both are equal.
    pub fn standings(&self) -> Vec<String> {
        let mut order: Vec<(&String, &ProgressRecord)> = self.records.iter().collect();
        order.sort_by(|(a_id, a), (b_id, b)| {
            b.checkpoints_passed
                .cmp(&a.checkpoints_passed)
                .then(
                    a.distance_to_next
                        .partial_cmp(&b.distance_to_next)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a_id.cmp(b_id))
        });
        order.into_iter().map(|(id, _)| id.clone()).collect()
    }
}
