use crate::error::Result;
use crate::nbody::{NBodySystem, Vec3};
use crate::NBodyConfig;
use cgmath::Zero;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// One body of an initial condition set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
  pub pos: Vec3,
  pub vel: Vec3,
  pub mass: f64,
  pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preset {
  /// Two equal masses on a circular orbit.
  Binary { separation: f64 },
  /// Two equal masses approaching along x faster than escape speed.
  HeadOn { separation: f64 },
  /// The Chenciner-Montgomery three-body choreography.
  FigureEight,
  /// Gaussian ball of bodies with a small random velocity dispersion.
  Cluster { count: usize, seed: u64 },
}

impl Preset {
  #[must_use]
  pub fn bodies(&self, config: &NBodyConfig) -> Vec<Body> {
    match *self {
      Preset::Binary { separation } => binary(config, separation),
      Preset::HeadOn { separation } => head_on(config, separation),
      Preset::FigureEight => figure_eight(config),
      Preset::Cluster { count, seed } => cluster(config, count, seed),
    }
  }

  /// Replace the contents of `system` with this preset.
  pub fn populate(&self, system: &mut NBodySystem) -> Result<usize> {
    let bodies = self.bodies(system.config());
    system.clear();
    for b in &bodies {
      system.add(b.pos, b.vel, b.mass, b.radius)?;
    }
    log::info!("loaded {self:?} with {} bodies", bodies.len());
    Ok(bodies.len())
  }
}

fn binary(config: &NBodyConfig, separation: f64) -> Vec<Body> {
  let mass = 1.0;
  let d = separation;
  // Circular speed under the softened force law.
  let soft = (d * d + config.softening * config.softening).powf(1.5);
  let v = (config.gravity * mass * d * d / (2.0 * soft)).sqrt();
  vec![
    Body {
      pos: Vec3::new(-0.5 * d, 0.0, 0.0),
      vel: Vec3::new(0.0, -v, 0.0),
      mass,
      radius: 0.05,
    },
    Body {
      pos: Vec3::new(0.5 * d, 0.0, 0.0),
      vel: Vec3::new(0.0, v, 0.0),
      mass,
      radius: 0.05,
    },
  ]
}

fn head_on(config: &NBodyConfig, separation: f64) -> Vec<Body> {
  let mass = 1.0;
  let escape = (2.0 * config.gravity * 2.0 * mass / separation).sqrt();
  let v = 0.6 * escape;
  vec![
    Body {
      pos: Vec3::new(-0.5 * separation, 0.0, 0.0),
      vel: Vec3::new(v, 0.0, 0.0),
      mass,
      radius: 0.1,
    },
    Body {
      pos: Vec3::new(0.5 * separation, 0.0, 0.0),
      vel: Vec3::new(-v, 0.0, 0.0),
      mass,
      radius: 0.1,
    },
  ]
}

fn figure_eight(config: &NBodyConfig) -> Vec<Body> {
  // Initial data for G = m = 1; other G rescales the velocities.
  let s = config.gravity.sqrt();
  let x1 = Vec3::new(-0.970_004_36, 0.243_087_53, 0.0);
  let v3 = Vec3::new(-0.932_407_37, -0.864_731_46, 0.0) * s;
  let body = |pos, vel| Body {
    pos,
    vel,
    mass: 1.0,
    radius: 0.02,
  };
  vec![
    body(x1, v3 * -0.5),
    body(-x1, v3 * -0.5),
    body(Vec3::zero(), v3),
  ]
}

fn cluster(config: &NBodyConfig, count: usize, seed: u64) -> Vec<Body> {
  let count = count.min(config.max_particles);
  let mut rng = SmallRng::seed_from_u64(seed);
  let scale = 1.0;
  let mean_mass = 1.0;
  // Rough virial dispersion for a Gaussian ball.
  let sigma = (config.gravity * mean_mass * count as f64 / (6.0 * scale)).sqrt() * 0.5;
  let (Ok(position), Ok(velocity)) = (Normal::new(0.0, scale), Normal::new(0.0, sigma.max(1e-6)))
  else {
    return Vec::new();
  };

  let mut bodies: Vec<Body> = (0..count)
    .map(|_| {
      let pos = Vec3::new(
        position.sample(&mut rng),
        position.sample(&mut rng),
        position.sample(&mut rng),
      );
      let vel = Vec3::new(
        velocity.sample(&mut rng),
        velocity.sample(&mut rng),
        velocity.sample(&mut rng),
      );
      let mass = rng.gen_range(0.5..1.5) * mean_mass;
      Body {
        pos,
        vel,
        mass,
        radius: 0.02 * mass.cbrt(),
      }
    })
    .collect();

  // Park the centre of mass at the origin.
  let total: f64 = bodies.iter().map(|b| b.mass).sum();
  if total > 0.0 {
    let com = bodies.iter().fold(Vec3::zero(), |acc, b| acc + b.pos * b.mass) / total;
    let drift = bodies.iter().fold(Vec3::zero(), |acc, b| acc + b.vel * b.mass) / total;
    for b in &mut bodies {
      b.pos -= com;
      b.vel -= drift;
    }
  }
  bodies
}
