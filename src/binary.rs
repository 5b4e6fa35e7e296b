use crate::error::{GwError, Recovery, Result};
use crate::event::EventParameters;
use crate::WaveformConfig;
use std::f64::consts::PI;

/// G * M_sun / c^3 in seconds.
pub const SOLAR_MASS_SECONDS: f64 = 4.925_490_947e-6;
/// G * M_sun / c^2 in kilometres.
pub const SOLAR_MASS_KM: f64 = 1.476_625_038;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrbitPhase {
  Inspiral,
  Merger,
  Ringdown,
}

impl OrbitPhase {
  pub fn index(self) -> u32 {
    match self {
      OrbitPhase::Inspiral => 0,
      OrbitPhase::Merger => 1,
      OrbitPhase::Ringdown => 2,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitState {
  pub time: f64,
  /// Orbital separation in km. Always above [`BinaryModel::min_separation`].
  pub separation: f64,
  /// Orbital phase in radians, half the gravitational-wave phase.
  pub orbital_phase: f64,
  /// Orbital angular frequency in rad/s (physical).
  pub orbital_frequency: f64,
  pub phase: OrbitPhase,
  /// Normalized envelope, 1.0 at merger.
  pub amplitude: f64,
  /// Set once the ringdown has decayed below the silence threshold.
  pub signal_ended: bool,
}

impl OrbitState {
  /// Gravitational-wave frequency in Hz: twice the orbital frequency.
  pub fn gw_frequency(&self) -> f64 {
    self.orbital_frequency / PI
  }
}

/// Per-event constants of the closed-form model.
#[derive(Debug, Clone)]
pub struct BinaryModel {
  config: WaveformConfig,
  total_mass: f64,
  mass_ratio: f64,
  remnant_mass: f64,
  remnant_spin: f64,
  /// Chirp amplitude K in f = K tau^(-3/8).
  chirp_k: f64,
  /// Physical time-to-coalescence at t = 0 and at merger.
  tau_start: f64,
  tau_merger: f64,
  start_frequency: f64,
  isco_frequency: f64,
  qnm_frequency: f64,
  merger_time: f64,
  merger_width: f64,
  damping_time: f64,
  frequency_decay_time: f64,
  silence_time: f64,
  duration: f64,
  min_separation: f64,
  isco_separation: f64,
  merger_phase: f64,
  ringdown_phase: f64,
  silence_phase: f64,
  silence_frequency: f64,
}

impl BinaryModel {
  pub fn new(params: &EventParameters, config: &WaveformConfig) -> Result<Self> {
    check_config(config)?;
    let stretch = config.time_stretch;
    let total_mass = params.total_mass();
    let eta = params.symmetric_mass_ratio();
    let tm = total_mass * SOLAR_MASS_SECONDS;
    let tc = params.chirp_mass() * SOLAR_MASS_SECONDS;

    let chirp_k = (5.0_f64 / 256.0).powf(3.0 / 8.0) * tc.powf(-5.0 / 8.0) / PI;
    let tau_of = |f: f64| (5.0 / 256.0) * (PI * f).powf(-8.0 / 3.0) * tc.powf(-5.0 / 3.0);

    let isco_frequency = 1.0 / (6.0_f64.powf(1.5) * PI * tm);
    let tau_merger = tau_of(isco_frequency);

    // Heavy systems reach ISCO below the nominal start frequency.
    let mut start_frequency = config.start_frequency.min(0.5 * isco_frequency);
    let mut tau_start = tau_of(start_frequency);
    let mut inspiral = (tau_start - tau_merger) * stretch;
    if inspiral > config.max_inspiral_seconds {
      inspiral = config.max_inspiral_seconds;
      tau_start = tau_merger + inspiral / stretch;
      start_frequency = chirp_k * tau_start.powf(-3.0 / 8.0);
      log::debug!(
        "{}: inspiral capped at {inspiral}s, start frequency raised to {start_frequency:.2} Hz",
        params.name()
      );
    }

    let (remnant_mass, remnant_spin) = remnant(total_mass, eta, params.effective_spin());
    let (qnm_frequency, qnm_damping) = quasi_normal_mode(remnant_mass, remnant_spin);
    // Never let the ringdown sit below the end of the chirp.
    let qnm_frequency = qnm_frequency.max(isco_frequency);

    let damping_time = qnm_damping * config.damping_scale * stretch;
    let merger_width = config.merger_width * damping_time;
    let frequency_decay_time = config.ringdown_frequency_decay * damping_time;
    let silence_time = inspiral + damping_time * (1.0 / config.silence_epsilon).ln();
    let duration = inspiral + config.tail * damping_time;

    let rs = 2.0 * total_mass * SOLAR_MASS_KM;
    let min_separation = config.min_separation_factor * rs;
    let isco_separation = (6.0 * total_mass * SOLAR_MASS_KM).max(min_separation * 1.5);

    let mut model = Self {
      config: *config,
      total_mass,
      mass_ratio: params.mass2() / params.mass1(),
      remnant_mass,
      remnant_spin,
      chirp_k,
      tau_start,
      tau_merger,
      start_frequency,
      isco_frequency,
      qnm_frequency,
      merger_time: inspiral,
      merger_width,
      damping_time,
      frequency_decay_time,
      silence_time,
      duration,
      min_separation,
      isco_separation,
      merger_phase: 0.0,
      ringdown_phase: 0.0,
      silence_phase: 0.0,
      silence_frequency: 0.0,
    };
    model.merger_phase = model.inspiral_gw_phase(model.merger_time);
    model.ringdown_phase = model.merger_gw_phase(model.merger_time + merger_width);
    let (silence_phase, silence_frequency) = model.live_phase_and_frequency(silence_time);
    model.silence_phase = silence_phase;
    model.silence_frequency = silence_frequency;

    let derived = [
      model.tau_start,
      model.tau_merger,
      model.merger_time,
      model.damping_time,
      model.qnm_frequency,
      model.silence_phase,
      model.duration,
    ];
    if derived.iter().any(|v| !v.is_finite()) || model.merger_time <= 0.0 {
      return Err(GwError::InvalidParameter(format!(
        "{}: masses {} / {} produce a degenerate waveform",
        params.name(),
        params.mass1(),
        params.mass2()
      )));
    }

    log::info!(
      "{}: merger at {:.3}s, f {:.1} -> {:.1} -> {:.1} Hz, damping {:.4}s",
      params.name(),
      model.merger_time,
      model.start_frequency,
      model.isco_frequency,
      model.qnm_frequency,
      model.damping_time
    );
    Ok(model)
  }

  pub fn evaluate(&self, t: f64) -> OrbitState {
    let t = if t.is_finite() {
      t.clamp(0.0, self.duration)
    } else {
      Recovery::NumericDegenerate.report(format_args!("non-finite query time {t}"));
      0.0
    };

    let phase = self.phase_at(t);
    let amplitude = self.amplitude_at(t);
    let signal_ended = t >= self.silence_time;
    let (gw_phase, frequency) = if signal_ended {
      (self.silence_phase, self.silence_frequency)
    } else {
      self.live_phase_and_frequency(t)
    };

    let mut separation = self.separation_at(t);
    if !separation.is_finite() {
      Recovery::NumericDegenerate.report(format_args!("separation at t={t}"));
      separation = self.isco_separation;
    }
    let frequency = if frequency.is_finite() {
      frequency
    } else {
      Recovery::NumericDegenerate.report(format_args!("frequency at t={t}"));
      self.isco_frequency
    };

    OrbitState {
      time: t,
      separation,
      orbital_phase: 0.5 * gw_phase,
      orbital_frequency: PI * frequency,
      phase,
      amplitude,
      signal_ended,
    }
  }

  fn phase_at(&self, t: f64) -> OrbitPhase {
    if t < self.merger_time {
      OrbitPhase::Inspiral
    } else if t < self.merger_time + self.merger_width {
      OrbitPhase::Merger
    } else {
      OrbitPhase::Ringdown
    }
  }

  fn amplitude_at(&self, t: f64) -> f64 {
    if t < self.merger_time {
      (self.inspiral_frequency(t) / self.isco_frequency).powf(2.0 / 3.0).min(1.0)
    } else if t >= self.silence_time {
      0.0
    } else {
      (-(t - self.merger_time) / self.damping_time).exp()
    }
  }

  fn separation_at(&self, t: f64) -> f64 {
    if t < self.merger_time {
      let x = PI * self.inspiral_frequency(t) * self.total_mass * SOLAR_MASS_SECONDS;
      let kepler = x.powf(-2.0 / 3.0) * self.total_mass * SOLAR_MASS_KM;
      kepler.max(self.isco_separation)
    } else {
      let t = t.min(self.silence_time);
      let decay = (-(t - self.merger_time) / (0.5 * self.damping_time)).exp();
      self.min_separation + (self.isco_separation - self.min_separation) * decay
    }
  }

  /// Physical time-to-coalescence at simulation time `t` (inspiral only).
  fn tau(&self, t: f64) -> f64 {
    (self.tau_start - t / self.config.time_stretch).max(self.tau_merger)
  }

  fn inspiral_frequency(&self, t: f64) -> f64 {
    self.chirp_k * self.tau(t).powf(-3.0 / 8.0)
  }

  /// GW phase accumulated from t = 0: 2 pi times the integral of f over
  /// physical time, i.e. (16 pi / 5) K (tau_0^(5/8) - tau^(5/8)).
  fn inspiral_gw_phase(&self, t: f64) -> f64 {
    let k = 16.0 * PI / 5.0 * self.chirp_k;
    k * (self.tau_start.powf(5.0 / 8.0) - self.tau(t).powf(5.0 / 8.0))
  }

  fn merger_frequency(&self, t: f64) -> f64 {
    let u = ((t - self.merger_time) / self.merger_width).clamp(0.0, 1.0);
    let smooth = u * u * (3.0 - 2.0 * u);
    self.isco_frequency + (self.qnm_frequency - self.isco_frequency) * smooth
  }

  fn merger_gw_phase(&self, t: f64) -> f64 {
    let u = ((t - self.merger_time) / self.merger_width).clamp(0.0, 1.0);
    let integral = self.isco_frequency * u
      + (self.qnm_frequency - self.isco_frequency) * (u.powi(3) - 0.5 * u.powi(4));
    self.merger_phase + 2.0 * PI * self.merger_width / self.config.time_stretch * integral
  }

  fn ringdown_frequency(&self, t: f64) -> f64 {
    let s = (t - self.merger_time - self.merger_width).max(0.0);
    let floor = self.config.ringdown_frequency_floor;
    self.qnm_frequency * (floor + (1.0 - floor) * (-s / self.frequency_decay_time).exp())
  }

  fn ringdown_gw_phase(&self, t: f64) -> f64 {
    let s = (t - self.merger_time - self.merger_width).max(0.0);
    let floor = self.config.ringdown_frequency_floor;
    let tf = self.frequency_decay_time;
    let integral = floor * s + (1.0 - floor) * tf * (1.0 - (-s / tf).exp());
    self.ringdown_phase + 2.0 * PI * self.qnm_frequency / self.config.time_stretch * integral
  }

  /// GW phase and frequency ignoring the silence cut-off.
  fn live_phase_and_frequency(&self, t: f64) -> (f64, f64) {
    match self.phase_at(t) {
      OrbitPhase::Inspiral => (self.inspiral_gw_phase(t), self.inspiral_frequency(t)),
      OrbitPhase::Merger => (self.merger_gw_phase(t), self.merger_frequency(t)),
      OrbitPhase::Ringdown => (self.ringdown_gw_phase(t), self.ringdown_frequency(t)),
    }
  }

  pub fn config(&self) -> &WaveformConfig {
    &self.config
  }

  pub fn merger_time(&self) -> f64 {
    self.merger_time
  }

  pub fn merger_width(&self) -> f64 {
    self.merger_width
  }

  pub fn ringdown_start(&self) -> f64 {
    self.merger_time + self.merger_width
  }

  /// Envelope e-folding time after merger, in simulation seconds.
  pub fn damping_time(&self) -> f64 {
    self.damping_time
  }

  pub fn silence_time(&self) -> f64 {
    self.silence_time
  }

  pub fn duration(&self) -> f64 {
    self.duration
  }

  pub fn start_frequency(&self) -> f64 {
    self.start_frequency
  }

  pub fn isco_frequency(&self) -> f64 {
    self.isco_frequency
  }

  pub fn qnm_frequency(&self) -> f64 {
    self.qnm_frequency
  }

  pub fn min_separation(&self) -> f64 {
    self.min_separation
  }

  pub fn mass_ratio(&self) -> f64 {
    self.mass_ratio
  }

  pub fn remnant_mass(&self) -> f64 {
    self.remnant_mass
  }

  pub fn remnant_spin(&self) -> f64 {
    self.remnant_spin
  }
}

fn check_config(config: &WaveformConfig) -> Result<()> {
  let positive = [
    ("start_frequency", config.start_frequency),
    ("time_stretch", config.time_stretch),
    ("max_inspiral_seconds", config.max_inspiral_seconds),
    ("min_separation_factor", config.min_separation_factor),
    ("merger_width", config.merger_width),
    ("damping_scale", config.damping_scale),
    ("ringdown_frequency_decay", config.ringdown_frequency_decay),
  ];
  for (name, value) in positive {
    if !value.is_finite() || value <= 0.0 {
      return Err(GwError::InvalidParameter(format!("waveform.{name} must be positive")));
    }
  }
  if !(0.0..=1.0).contains(&config.ringdown_frequency_floor) {
    return Err(GwError::InvalidParameter(
      "waveform.ringdown_frequency_floor must lie in [0, 1]".into(),
    ));
  }
  if !(config.silence_epsilon > 0.0 && config.silence_epsilon < 1.0) {
    return Err(GwError::InvalidParameter(
      "waveform.silence_epsilon must lie in (0, 1)".into(),
    ));
  }
  let silence = (1.0 / config.silence_epsilon).ln();
  if config.tail <= silence {
    return Err(GwError::InvalidParameter(format!(
      "waveform.tail must exceed {silence:.2} damping times so the signal ends in range"
    )));
  }
  Ok(())
}

/// Remnant mass and dimensionless spin from fits to non-precessing mergers.
fn remnant(total_mass: f64, eta: f64, effective_spin: f64) -> (f64, f64) {
  let radiated = 0.055_974_5 * eta + 0.580_951 * eta.powi(2) - 0.960_673 * eta.powi(3)
    + 3.352_41 * eta.powi(4);
  let orbital_spin = 2.0 * 3.0_f64.sqrt() * eta - 3.871 * eta.powi(2) + 4.028 * eta.powi(3);
  let spin = orbital_spin + 0.5 * effective_spin * (1.0 - orbital_spin);
  (total_mass * (1.0 - radiated), spin.clamp(0.0, 0.998))
}

/// Fundamental l = m = 2 quasi-normal mode: (frequency Hz, damping time s).
fn quasi_normal_mode(remnant_mass: f64, remnant_spin: f64) -> (f64, f64) {
  let tm = remnant_mass * SOLAR_MASS_SECONDS;
  let omega = 1.5251 - 1.1568 * (1.0 - remnant_spin).powf(0.1292);
  let quality = 0.7 + 1.4187 * (1.0 - remnant_spin).powf(-0.499);
  let frequency = omega / (2.0 * PI * tm);
  (frequency, quality / (PI * frequency))
}
