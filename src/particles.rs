// src/particles.rs
//
// Fixed-capacity pools for the two wheel effects. Dust puffs reuse the
// first free slot and fall back to overwriting a uniformly random slot when
// the pool is saturated; tire trails always overwrite a monotonically
// advancing ring index so the mark on the ground stays unbroken. Emission
// past capacity is defined behavior, never an error.

use anyhow::{Result, bail};
use rand::Rng;
use rapier3d::prelude::*;

pub const DUST_CAPACITY: usize = 200;
pub const TRAIL_CAPACITY: usize = 600;

const DUST_LIFE_MIN: Real = 0.5;
const DUST_LIFE_SPREAD: Real = 0.5;
const DUST_SCALE_MIN: Real = 0.1;
const DUST_SCALE_SPREAD: Real = 0.2;
const DUST_DRAG: Real = 0.96; // multiplicative velocity decay per tick
const DUST_UPDRAFT: Real = 0.15; // m/s^2 of upward bias while alive
const DUST_BASE_ALPHA: Real = 0.4;

const TRAIL_LIFE: Real = 3.0;
const TRAIL_BASE_ALPHA: Real = 0.8;

#[derive(Clone)]
pub struct DustParticle {
    pub active: bool,
    pub position: Vector<Real>,
    pub velocity: Vector<Real>,
    pub age: Real,
    pub life: Real,
    pub base_scale: Real,
}

impl DustParticle {
    fn idle() -> Self {
        Self {
            active: false,
            position: vector![0.0, 0.0, 0.0],
            velocity: vector![0.0, 0.0, 0.0],
            age: 0.0,
            life: 0.0,
            base_scale: 0.0,
        }
    }

    pub fn progress(&self) -> Real {
        if self.life > 0.0 {
            (self.age / self.life).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Grow-then-shrink: fresh puffs pop slightly above their base scale
    /// before collapsing toward zero.
    pub fn scale(&self) -> Real {
        let p = self.progress();
        self.base_scale * (1.0 + 0.5 * p) * (1.0 - p * p * p)
    }

    pub fn alpha(&self) -> Real {
        DUST_BASE_ALPHA * (1.0 - self.progress())
    }
}

pub struct DustPool {
    slots: Vec<DustParticle>,
}

impl DustPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("dust pool capacity must be nonzero");
        }
        Ok(Self {
            slots: vec![DustParticle::idle(); capacity],
        })
    }

    /// Activate one particle at `position`. Scans for a free slot first;
    /// when the pool is full, a uniformly random slot is overwritten (a
    /// young particle may get cut short, which reads fine for dust).
    pub fn emit(&mut self, rng: &mut impl Rng, position: Vector<Real>, velocity: Vector<Real>) {
        let index = self
            .slots
            .iter()
            .position(|p| !p.active)
            .unwrap_or_else(|| rng.gen_range(0..self.slots.len()));

        let jitter = vector![
            rng.gen_range(-1.0..1.0),
            rng.gen_range(0.0..1.0),
            rng.gen_range(0.0..2.0)
        ];

        let p = &mut self.slots[index];
        p.active = true;
        p.age = 0.0;
        p.life = DUST_LIFE_MIN + rng.gen_range(0.0..DUST_LIFE_SPREAD);
        p.position = position;
        p.velocity = velocity + jitter;
        p.base_scale = DUST_SCALE_MIN + rng.gen_range(0.0..DUST_SCALE_SPREAD);
    }

    pub fn advance(&mut self, dt: Real) {
        for p in &mut self.slots {
            if !p.active {
                continue;
            }
            p.age += dt;
            if p.age >= p.life {
                p.active = false;
                continue;
            }
            p.position += p.velocity * dt;
            p.velocity *= DUST_DRAG;
            p.velocity.y += DUST_UPDRAFT * dt;
        }
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &DustParticle> {
        self.slots.iter().filter(|p| p.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|p| p.active).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Clone)]
pub struct TrailMark {
    pub active: bool,
    pub position: Vector<Real>,
    pub rotation_y: Real,
    pub age: Real,
    pub life: Real,
}

impl TrailMark {
    fn idle() -> Self {
        Self {
            active: false,
            position: vector![0.0, 0.0, 0.0],
            rotation_y: 0.0,
            age: 0.0,
            life: 0.0,
        }
    }

    pub fn progress(&self) -> Real {
        if self.life > 0.0 {
            (self.age / self.life).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    pub fn alpha(&self) -> Real {
        TRAIL_BASE_ALPHA * (1.0 - self.progress())
    }
}

/// Ring-overwrite pool for tire marks. Unlike dust, trail segments must lay
/// down in laid-down order, so overwrite walks the ring deterministically
/// instead of picking a random victim.
pub struct TrailPool {
    slots: Vec<TrailMark>,
    next: usize,
}

impl TrailPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("trail pool capacity must be nonzero");
        }
        Ok(Self {
            slots: vec![TrailMark::idle(); capacity],
            next: 0,
        })
    }

    pub fn emit(&mut self, position: Vector<Real>, rotation_y: Real) {
        let t = &mut self.slots[self.next];
        t.active = true;
        t.age = 0.0;
        t.life = TRAIL_LIFE;
        t.position = position;
        t.rotation_y = rotation_y;

        self.next = (self.next + 1) % self.slots.len();
    }

    pub fn advance(&mut self, dt: Real) {
        for t in &mut self.slots {
            if !t.active {
                continue;
            }
            t.age += dt;
            if t.age >= t.life {
                t.active = false;
            }
        }
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &TrailMark> {
        self.slots.iter().filter(|t| t.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|t| t.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(DustPool::new(0).is_err());
        assert!(TrailPool::new(0).is_err());
    }

    #[test]
    fn dust_fills_free_slots_before_overwriting() {
        let mut rng = rng();
        let mut pool = DustPool::new(5).unwrap();
        for _ in 0..3 {
            pool.emit(&mut rng, vector![0.0, 0.0, 0.0], vector![0.0, 0.0, 0.0]);
        }
        assert_eq!(pool.active_count(), 3);
        assert!(pool.slots[0].active && pool.slots[1].active && pool.slots[2].active);
        assert!(!pool.slots[3].active && !pool.slots[4].active);
    }

    #[test]
    fn dust_saturation_never_exceeds_capacity() {
        let mut rng = rng();
        let mut pool = DustPool::new(5).unwrap();
        for _ in 0..7 {
            pool.emit(&mut rng, vector![1.0, 0.0, 1.0], vector![0.0, 0.0, 0.0]);
        }
        assert_eq!(pool.active_count(), 5);
    }

    #[test]
    fn trail_ring_overwrites_in_index_order() {
        let mut pool = TrailPool::new(5).unwrap();
        for i in 0..5 {
            pool.emit(vector![i as Real, 0.0, 0.0], 0.0);
        }
        // Age the initial ring so overwrites are visible as age resets.
        pool.advance(1.0);
        pool.emit(vector![5.0, 0.0, 0.0], 0.0);
        pool.emit(vector![6.0, 0.0, 0.0], 0.0);

        assert_eq!(pool.active_count(), 5);
        assert_eq!(pool.slots[0].position.x, 5.0);
        assert_eq!(pool.slots[1].position.x, 6.0);
        assert_eq!(pool.slots[0].age, 0.0);
        assert_eq!(pool.slots[2].age, 1.0);
        assert_eq!(pool.next, 2);
    }

    #[test]
    fn particle_expires_exactly_once_and_stays_dead() {
        let mut rng = rng();
        let mut pool = DustPool::new(1).unwrap();
        pool.emit(&mut rng, vector![0.0, 0.0, 0.0], vector![0.0, 0.0, 0.0]);
        let life = pool.slots[0].life;

        let dt = 0.05;
        let mut deactivations = 0;
        let mut was_active = true;
        let steps = (life / dt).ceil() as usize + 10;
        for _ in 0..steps {
            pool.advance(dt);
            let active = pool.slots[0].active;
            if was_active && !active {
                deactivations += 1;
            }
            assert!(!(!was_active && active), "expired particle came back");
            was_active = active;
        }
        assert_eq!(deactivations, 1);
        assert!(!pool.slots[0].active);
    }

    #[test]
    fn dust_scale_pops_then_collapses() {
        let p = DustParticle {
            active: true,
            position: vector![0.0, 0.0, 0.0],
            velocity: vector![0.0, 0.0, 0.0],
            age: 0.0,
            life: 1.0,
            base_scale: 0.2,
        };
        let mut young = p.clone();
        young.age = 0.2;
        let mut old = p.clone();
        old.age = 0.9;

        // Fresh puffs grow past their base scale, then collapse to zero.
        assert!(young.scale() > p.base_scale);
        assert!(old.scale() < young.scale());
        let mut done = p.clone();
        done.age = 1.0;
        assert!(done.scale().abs() < 1e-6);
    }

    #[test]
    fn trail_alpha_fades_linearly() {
        let mut pool = TrailPool::new(2).unwrap();
        pool.emit(vector![0.0, 0.0, 0.0], 0.5);
        pool.advance(1.5);
        let t = &pool.slots[0];
        assert!(t.active);
        assert!((t.alpha() - 0.4).abs() < 1e-4);
    }

    #[test]
    fn dust_velocity_drags_down_over_ticks() {
        let mut rng = rng();
        let mut pool = DustPool::new(1).unwrap();
        pool.emit(&mut rng, vector![0.0, 0.0, 0.0], vector![10.0, 0.0, 0.0]);
        let v0 = pool.slots[0].velocity.x;
        pool.advance(0.01);
        pool.advance(0.01);
        assert!(pool.slots[0].velocity.x < v0);
    }
}
