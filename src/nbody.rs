use crate::error::{GwError, Recovery, Result};
use crate::{NBodyConfig, ParticleInstance};
use cgmath::{InnerSpace, Vector3, Zero};
use std::collections::VecDeque;

pub type Vec3 = Vector3<f64>;

/// Fixed-capacity history of positions. Purely for drawing.
#[derive(Debug, Clone)]
pub struct Trail {
  points: VecDeque<[f32; 3]>,
  capacity: usize,
}

impl Trail {
  pub fn new(capacity: usize) -> Self {
    Self {
      points: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, p: Vec3) {
    if self.capacity == 0 {
      return;
    }
    if self.points.len() == self.capacity {
      self.points.pop_front();
    }
    self.points.push_back([p.x as f32, p.y as f32, p.z as f32]);
  }

  /// Oldest first.
  pub fn points(&self) -> impl Iterator<Item = &[f32; 3]> {
    self.points.iter()
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn clear(&mut self) {
    self.points.clear();
  }
}

#[derive(Debug, Clone)]
pub struct Particle {
  pub id: u32,
  pub pos: Vec3,
  pub vel: Vec3,
  pub mass: f64,
  pub radius: f64,
  pub alive: bool,
  pub trail: Trail,
}

impl Particle {
  pub fn momentum(&self) -> Vec3 {
    self.vel * self.mass
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeEvent {
  pub time: f64,
  pub survivor: u32,
  pub absorbed: u32,
  pub position: Vec3,
  pub mass: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
  pub substeps: u32,
  pub merges: Vec<MergeEvent>,
  /// Particles whose velocity had to be clamped this frame.
  pub clamped: usize,
}

#[derive(Debug, Clone)]
pub struct NBodySystem {
  config: NBodyConfig,
  particles: Vec<Particle>,
  time: f64,
  frame: u64,
  next_id: u32,
  accel: Vec<Vec3>,
  last_good: Vec<Vec3>,
}

pub fn check_config(config: &NBodyConfig) -> Result<()> {
  let positive = [
    ("gravity", config.gravity),
    ("max_travel_fraction", config.max_travel_fraction),
  ];
  for (name, value) in positive {
    if !value.is_finite() || value <= 0.0 {
      return Err(GwError::InvalidParameter(format!("nbody.{name} must be positive")));
    }
  }
  if !config.softening.is_finite() || config.softening < 0.0 {
    return Err(GwError::InvalidParameter("nbody.softening must not be negative".into()));
  }
  if !(config.max_speed > 0.0) {
    return Err(GwError::InvalidParameter("nbody.max_speed must be positive".into()));
  }
  if config.max_substeps == 0 || config.max_particles == 0 {
    return Err(GwError::InvalidParameter(
      "nbody.max_substeps and nbody.max_particles must be positive".into(),
    ));
  }
  Ok(())
}

impl NBodySystem {
  pub fn new(config: NBodyConfig) -> Result<Self> {
    check_config(&config)?;
    Ok(Self {
      config,
      particles: Vec::new(),
      time: 0.0,
      frame: 0,
      next_id: 0,
      accel: Vec::new(),
      last_good: Vec::new(),
    })
  }

  /// Place a particle. Fails on non-physical input or once the particle
  /// cap is reached.
  pub fn add(&mut self, pos: Vec3, vel: Vec3, mass: f64, radius: f64) -> Result<u32> {
    if self.particles.len() >= self.config.max_particles {
      return Err(GwError::InvalidParameter(format!(
        "particle cap of {} reached",
        self.config.max_particles
      )));
    }
    let finite = |v: Vec3| v.x.is_finite() && v.y.is_finite() && v.z.is_finite();
    if !finite(pos) || !finite(vel) {
      return Err(GwError::InvalidParameter("particle state must be finite".into()));
    }
    if !(mass > 0.0 && mass.is_finite()) || !(radius > 0.0 && radius.is_finite()) {
      return Err(GwError::InvalidParameter(format!(
        "particle mass and radius must be positive, got {mass} / {radius}"
      )));
    }
    let id = self.next_id;
    self.next_id += 1;
    self.particles.push(Particle {
      id,
      pos,
      vel,
      mass,
      radius,
      alive: true,
      trail: Trail::new(self.config.trail_length),
    });
    Ok(id)
  }

  /// Drop every particle and trail and restart the clock.
  pub fn clear(&mut self) {
    self.particles.clear();
    self.time = 0.0;
    self.frame = 0;
    self.next_id = 0;
  }

  pub fn particles(&self) -> &[Particle] {
    &self.particles
  }

  pub fn len(&self) -> usize {
    self.particles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.particles.is_empty()
  }

  pub fn time(&self) -> f64 {
    self.time
  }

  pub fn config(&self) -> &NBodyConfig {
    &self.config
  }

  /// Advance the system by `dt` simulation seconds. Negative `dt`
  /// integrates backwards.
  pub fn step(&mut self, dt: f64) -> StepReport {
    let mut report = StepReport::default();
    if self.particles.is_empty() || dt == 0.0 || !dt.is_finite() {
      return report;
    }

    let (substeps, clamped) = self.plan_substeps(dt);
    report.substeps = substeps;
    report.clamped = clamped;
    let h = dt / f64::from(substeps);

    for _ in 0..substeps {
      self.verlet(h);
      self.time += h;
      report.clamped += self.enforce_speed_limit();
      self.resolve_collisions(&mut report.merges);
    }

    self.frame += 1;
    if self.config.trail_stride > 0 && self.frame % u64::from(self.config.trail_stride) == 0 {
      for p in &mut self.particles {
        p.trail.push(p.pos);
      }
    }
    if report.substeps > 1 || !report.merges.is_empty() {
      log::debug!(
        "nbody frame {}: {} substeps, {} merges, {} alive",
        self.frame,
        report.substeps,
        report.merges.len(),
        self.particles.len()
      );
    }
    report
  }

  /// Substep count for this frame, plus the number of velocities clamped
  /// when the count would exceed the cap.
  fn plan_substeps(&mut self, dt: f64) -> (u32, usize) {
    let span = dt.abs();
    let fraction = self.config.max_travel_fraction;
    let mut needed = 1.0_f64;
    let n = self.particles.len();
    for i in 0..n {
      for j in (i + 1)..n {
        let (a, b) = (&self.particles[i], &self.particles[j]);
        let dr = b.pos - a.pos;
        let dist = dr.magnitude();
        if dist == 0.0 {
          continue;
        }
        let closing = -(b.vel - a.vel).dot(dr) / dist;
        if closing > 0.0 {
          let allowed = fraction * a.radius.min(b.radius);
          needed = needed.max((closing * span / allowed).ceil());
        }
      }
    }

    let cap = self.config.max_substeps.max(1);
    if needed <= f64::from(cap) {
      return (needed as u32, 0);
    }

    // Fastest closing speed the cap can still resolve, split between the
    // two partners of a pair.
    let min_radius = self
      .particles
      .iter()
      .map(|p| p.radius)
      .fold(f64::INFINITY, f64::min);
    let limit = 0.5 * f64::from(cap) * fraction * min_radius / span;
    let mut clamped = 0;
    for p in &mut self.particles {
      let speed = p.vel.magnitude();
      if speed > limit {
        p.vel *= limit / speed;
        clamped += 1;
      }
    }
    Recovery::IntegratorInstability.report(format_args!(
      "needed {needed} substeps (cap {cap}), clamped {clamped} velocities to {limit:.3}"
    ));
    (cap, clamped)
  }

  /// Kick-drift-kick velocity Verlet.
  fn verlet(&mut self, h: f64) {
    let half = 0.5 * h;
    self.last_good.clear();
    self.last_good.extend(self.particles.iter().map(|p| p.pos));

    self.compute_accelerations();
    for (p, a) in self.particles.iter_mut().zip(&self.accel) {
      p.vel += *a * half;
    }
    for p in &mut self.particles {
      p.pos += p.vel * h;
    }
    self.compute_accelerations();
    for (p, a) in self.particles.iter_mut().zip(&self.accel) {
      p.vel += *a * half;
    }
  }

  /// a_i = sum_j G m_j (r_j - r_i) / (|r_j - r_i|^2 + eps^2)^(3/2)
  fn compute_accelerations(&mut self) {
    let n = self.particles.len();
    self.accel.clear();
    self.accel.resize(n, Vec3::zero());
    let g = self.config.gravity;
    let eps2 = self.config.softening * self.config.softening;
    for i in 0..n {
      for j in (i + 1)..n {
        let dr = self.particles[j].pos - self.particles[i].pos;
        let d2 = dr.magnitude2() + eps2;
        if d2 == 0.0 {
          continue;
        }
        let inv = g / (d2 * d2.sqrt());
        self.accel[i] += dr * (inv * self.particles[j].mass);
        self.accel[j] -= dr * (inv * self.particles[i].mass);
      }
    }
  }

  fn enforce_speed_limit(&mut self) -> usize {
    let max_speed = self.config.max_speed;
    let mut clamped = 0;
    for (p, good) in self.particles.iter_mut().zip(&self.last_good) {
      let finite = p.pos.x.is_finite() && p.pos.y.is_finite() && p.pos.z.is_finite();
      let speed = p.vel.magnitude();
      if !finite || !speed.is_finite() {
        Recovery::IntegratorInstability
          .report(format_args!("particle {} went non-finite, restored", p.id));
        p.pos = *good;
        p.vel = Vec3::zero();
        clamped += 1;
      } else if speed > max_speed {
        Recovery::IntegratorInstability.report(format_args!(
          "particle {} at speed {speed:.3}, clamped to {max_speed}",
          p.id
        ));
        p.vel *= max_speed / speed;
        clamped += 1;
      }
    }
    clamped
  }

  fn resolve_collisions(&mut self, merges: &mut Vec<MergeEvent>) {
    let n = self.particles.len();
    let before = merges.len();
    for i in 0..n {
      for j in (i + 1)..n {
        if !self.particles[i].alive || !self.particles[j].alive {
          continue;
        }
        let (a, b) = (&self.particles[i], &self.particles[j]);
        if (b.pos - a.pos).magnitude() >= a.radius + b.radius {
          continue;
        }
        // Ties go to the older particle.
        let (keep, lose) = if b.mass > a.mass { (j, i) } else { (i, j) };
        merges.push(self.merge(keep, lose));
      }
    }
    if merges.len() > before {
      self.particles.retain(|p| p.alive);
      for m in &merges[before..] {
        log::info!(
          "particle {} absorbed {} at t={:.3}, mass now {}",
          m.survivor,
          m.absorbed,
          m.time,
          m.mass
        );
      }
    }
  }

  /// Perfectly inelastic merge of `lose` into `keep`.
  fn merge(&mut self, keep: usize, lose: usize) -> MergeEvent {
    let (absorbed_id, m2, p2, v2, r2) = {
      let l = &mut self.particles[lose];
      l.alive = false;
      l.trail.clear();
      (l.id, l.mass, l.pos, l.vel, l.radius)
    };
    let k = &mut self.particles[keep];
    let m1 = k.mass;
    let total = m1 + m2;
    k.vel = (k.vel * m1 + v2 * m2) / total;
    k.pos = (k.pos * m1 + p2 * m2) / total;
    k.radius = (k.radius.powi(3) + r2.powi(3)).cbrt();
    k.mass = total;
    MergeEvent {
      time: self.time,
      survivor: k.id,
      absorbed: absorbed_id,
      position: k.pos,
      mass: total,
    }
  }

  pub fn total_mass(&self) -> f64 {
    self.particles.iter().map(|p| p.mass).sum()
  }

  pub fn total_momentum(&self) -> Vec3 {
    self
      .particles
      .iter()
      .fold(Vec3::zero(), |acc, p| acc + p.momentum())
  }

  pub fn center_of_mass(&self) -> Vec3 {
    let m = self.total_mass();
    if m == 0.0 {
      return Vec3::zero();
    }
    self
      .particles
      .iter()
      .fold(Vec3::zero(), |acc, p| acc + p.pos * p.mass)
      / m
  }

  pub fn kinetic_energy(&self) -> f64 {
    self
      .particles
      .iter()
      .map(|p| 0.5 * p.mass * p.vel.magnitude2())
      .sum()
  }

  /// Softened potential, consistent with the force law.
  pub fn potential_energy(&self) -> f64 {
    let eps2 = self.config.softening * self.config.softening;
    let n = self.particles.len();
    let mut u = 0.0;
    for i in 0..n {
      for j in (i + 1)..n {
        let (a, b) = (&self.particles[i], &self.particles[j]);
        let d = ((b.pos - a.pos).magnitude2() + eps2).sqrt();
        if d > 0.0 {
          u -= self.config.gravity * a.mass * b.mass / d;
        }
      }
    }
    u
  }

  pub fn total_energy(&self) -> f64 {
    self.kinetic_energy() + self.potential_energy()
  }

  /// Fill `out` with GPU instance data for the live particles.
  pub fn write_instances(&self, out: &mut Vec<ParticleInstance>) {
    out.clear();
    out.extend(self.particles.iter().map(|p| ParticleInstance {
      pos: [p.pos.x as f32, p.pos.y as f32, p.pos.z as f32],
      vel: [p.vel.x as f32, p.vel.y as f32, p.vel.z as f32],
      mass: p.mass as f32,
      radius: p.radius as f32,
    }));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  fn system() -> NBodySystem {
    NBodySystem::new(NBodyConfig::default()).unwrap()
  }

  #[test]
  fn head_on_pair_merges_exactly_once() {
    let mut sys = system();
    sys.add(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), 1.0, 0.1).unwrap();
    sys.add(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0), 1.0, 0.1).unwrap();
    let mut merges = Vec::new();
    for _ in 0..120 {
      merges.extend(sys.step(1.0 / 60.0).merges);
    }
    assert_eq!(merges.len(), 1);
    assert_eq!(sys.len(), 1);
    assert_abs_diff_eq!(sys.particles()[0].mass, 2.0);
    assert!(sys.particles()[0].alive);
    assert_abs_diff_eq!(sys.total_momentum().magnitude(), 0.0, epsilon = 1e-9);
  }

  #[test]
  fn merge_conserves_pair_momentum() {
    let mut sys = system();
    sys.add(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.3, -1.0, 0.2), 3.0, 0.5).unwrap();
    sys.add(Vec3::new(0.2, 0.1, 0.0), Vec3::new(-2.0, 0.5, 1.0), 1.5, 0.5).unwrap();
    sys.add(Vec3::new(50.0, 0.0, 0.0), Vec3::zero(), 1.0, 0.1).unwrap();
    let before = sys.particles()[0].momentum() + sys.particles()[1].momentum();
    let mut merges = Vec::new();
    sys.resolve_collisions(&mut merges);
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].survivor, 0);
    assert_eq!(merges[0].absorbed, 1);
    assert_eq!(sys.len(), 2);
    let after = sys.particles()[0].momentum();
    assert_abs_diff_eq!(before.x, after.x, epsilon = 1e-12);
    assert_abs_diff_eq!(before.y, after.y, epsilon = 1e-12);
    assert_abs_diff_eq!(before.z, after.z, epsilon = 1e-12);
  }

  #[test]
  fn heavier_particle_survives() {
    let mut sys = system();
    sys.add(Vec3::zero(), Vec3::zero(), 1.0, 0.5).unwrap();
    let heavy = sys.add(Vec3::new(0.1, 0.0, 0.0), Vec3::zero(), 5.0, 0.5).unwrap();
    let report = sys.step(1e-3);
    assert_eq!(report.merges[0].survivor, heavy);
    assert_eq!(sys.particles()[0].id, heavy);
  }

  #[test]
  fn identical_runs_are_bit_identical() {
    let build = || {
      let mut sys = system();
      sys.add(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.4, 0.1), 1.0, 0.05).unwrap();
      sys.add(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, -0.4, 0.0), 1.0, 0.05).unwrap();
      sys.add(Vec3::new(0.0, 1.5, 0.0), Vec3::new(-0.3, 0.0, 0.0), 0.5, 0.05).unwrap();
      sys
    };
    let (mut a, mut b) = (build(), build());
    for _ in 0..300 {
      let ra = a.step(1.0 / 60.0);
      let rb = b.step(1.0 / 60.0);
      assert_eq!(ra, rb);
    }
    for (pa, pb) in a.particles().iter().zip(b.particles()) {
      assert_eq!(pa.pos, pb.pos);
      assert_eq!(pa.vel, pb.vel);
    }
  }

  #[test]
  fn fast_encounters_substep_instead_of_tunneling() {
    let mut sys = system();
    // A single full step would carry the pair straight through each other.
    sys.add(Vec3::new(-0.5, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0), 1.0, 0.2).unwrap();
    sys.add(Vec3::new(0.5, 0.0, 0.0), Vec3::new(-10.0, 0.0, 0.0), 1.0, 0.2).unwrap();
    let report = sys.step(0.1);
    assert!(report.substeps > 1);
    assert_eq!(report.merges.len(), 1);
  }

  #[test]
  fn substep_cap_clamps_velocities() {
    let config = NBodyConfig {
      max_substeps: 4,
      max_speed: 1.0e6,
      ..NBodyConfig::default()
    };
    let mut sys = NBodySystem::new(config).unwrap();
    sys.add(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(1.0e4, 0.0, 0.0), 1.0, 0.01).unwrap();
    sys.add(Vec3::new(10.0, 0.0, 0.0), Vec3::new(-1.0e4, 0.0, 0.0), 1.0, 0.01).unwrap();
    let report = sys.step(1.0 / 60.0);
    assert_eq!(report.substeps, 4);
    assert_eq!(report.clamped, 2);
    for p in sys.particles() {
      assert!(p.vel.magnitude() < 1.0e4);
    }
  }

  #[test]
  fn runaway_speed_is_clamped() {
    let mut sys = system();
    sys.add(Vec3::zero(), Vec3::new(500.0, 0.0, 0.0), 1.0, 1000.0).unwrap();
    let report = sys.step(1e-3);
    assert_eq!(report.clamped, 1);
    assert_abs_diff_eq!(sys.particles()[0].vel.magnitude(), NBodyConfig::default().max_speed, epsilon = 1e-9);
  }

  #[test]
  fn non_finite_state_is_restored() {
    let mut sys = system();
    sys.add(Vec3::new(1.0, 2.0, 3.0), Vec3::zero(), 1.0, 0.1).unwrap();
    sys.particles[0].vel.x = f64::NAN;
    let report = sys.step(0.1);
    assert_eq!(report.clamped, 1);
    let p = &sys.particles()[0];
    assert_eq!(p.pos, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(p.vel, Vec3::zero());
  }

  #[test]
  fn rejects_degenerate_config() {
    for config in [
      NBodyConfig {
        max_travel_fraction: 0.0,
        ..NBodyConfig::default()
      },
      NBodyConfig {
        max_substeps: 0,
        ..NBodyConfig::default()
      },
      NBodyConfig {
        softening: f64::NAN,
        ..NBodyConfig::default()
      },
      NBodyConfig {
        max_speed: 0.0,
        ..NBodyConfig::default()
      },
    ] {
      assert!(matches!(NBodySystem::new(config), Err(GwError::InvalidParameter(_))));
    }
  }

  #[test]
  fn binary_orbit_conserves_energy() {
    let mut sys = system();
    let v = 0.5_f64.sqrt();
    sys.add(Vec3::new(-0.5, 0.0, 0.0), Vec3::new(0.0, -v, 0.0), 1.0, 0.05).unwrap();
    sys.add(Vec3::new(0.5, 0.0, 0.0), Vec3::new(0.0, v, 0.0), 1.0, 0.05).unwrap();
    let e0 = sys.total_energy();
    for _ in 0..600 {
      sys.step(1.0 / 60.0);
    }
    assert_eq!(sys.len(), 2);
    assert!(((sys.total_energy() - e0) / e0).abs() < 1e-2);
  }

  #[test]
  fn trails_are_bounded_ring_buffers() {
    let config = NBodyConfig {
      trail_length: 4,
      ..NBodyConfig::default()
    };
    let mut sys = NBodySystem::new(config).unwrap();
    sys.add(Vec3::zero(), Vec3::new(1.0, 0.0, 0.0), 1.0, 0.1).unwrap();
    for _ in 0..10 {
      sys.step(1.0);
    }
    let trail: Vec<_> = sys.particles()[0].trail.points().copied().collect();
    assert_eq!(trail.len(), 4);
    assert_eq!(trail[0], [7.0, 0.0, 0.0]);
    assert_eq!(trail[3], [10.0, 0.0, 0.0]);
  }

  #[test]
  fn rejects_bad_particles_and_respects_cap() {
    let config = NBodyConfig {
      max_particles: 1,
      ..NBodyConfig::default()
    };
    let mut sys = NBodySystem::new(config).unwrap();
    assert!(sys.add(Vec3::zero(), Vec3::zero(), -1.0, 0.1).is_err());
    assert!(sys.add(Vec3::new(f64::NAN, 0.0, 0.0), Vec3::zero(), 1.0, 0.1).is_err());
    sys.add(Vec3::zero(), Vec3::zero(), 1.0, 0.1).unwrap();
    assert!(sys.add(Vec3::zero(), Vec3::zero(), 1.0, 0.1).is_err());
  }
}
