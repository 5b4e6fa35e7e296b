use crate::binary::{BinaryModel, OrbitState, SOLAR_MASS_SECONDS};
use crate::error::Result;
use crate::event::EventParameters;
use crate::WaveformConfig;
use serde::Serialize;
use std::f64::consts::PI;

/// Metres per megaparsec.
const MPC_METRES: f64 = 3.085_677_581e22;
const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const MAX_BATCH_SAMPLES: usize = 1 << 28;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveformSample {
  pub time: f64,
  /// Normalized strain in [-1, 1].
  pub strain: f64,
  /// Instantaneous GW frequency in Hz.
  pub frequency: f64,
  /// Envelope in [0, 1].
  pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct Waveform {
  params: EventParameters,
  model: BinaryModel,
}

impl Waveform {
  pub fn new(params: EventParameters, config: &WaveformConfig) -> Result<Self> {
    let model = BinaryModel::new(&params, config)?;
    Ok(Self { params, model })
  }

  pub fn params(&self) -> &EventParameters {
    &self.params
  }

  pub fn model(&self) -> &BinaryModel {
    &self.model
  }

  pub fn duration(&self) -> f64 {
    self.model.duration()
  }

  pub fn orbit(&self, t: f64) -> OrbitState {
    self.model.evaluate(t)
  }

  pub fn sample(&self, t: f64) -> WaveformSample {
    Self::from_orbit(&self.model.evaluate(t))
  }

  /// Derive the strain sample from an already evaluated orbit, so a caller
  /// that needs both only evaluates the model once.
  pub fn from_orbit(orbit: &OrbitState) -> WaveformSample {
    let gw_phase = 2.0 * orbit.orbital_phase;
    WaveformSample {
      time: orbit.time,
      strain: orbit.amplitude * gw_phase.cos(),
      frequency: orbit.gw_frequency(),
      amplitude: orbit.amplitude,
    }
  }

  /// Uniformly spaced samples at `rate` samples per simulation second over
  /// `[start, end]` clamped to `[0, duration]`. Sample `i` sits at exactly
  /// `start + i / rate` of the clamped range. Non-finite requests are empty.
  pub fn batch(&self, start: f64, end: f64, rate: f64) -> Vec<WaveformSample> {
    if !(rate > 0.0 && rate.is_finite() && start.is_finite() && end.is_finite()) {
      return Vec::new();
    }
    let duration = self.duration();
    let (start, end) = (start.clamp(0.0, duration), end.clamp(0.0, duration));
    if end < start {
      return Vec::new();
    }
    let span = ((end - start) * rate).floor();
    if span >= MAX_BATCH_SAMPLES as f64 {
      log::warn!("refused export of {span} samples at {rate} per second");
      return Vec::new();
    }
    let count = span as usize + 1;
    (0..count)
      .map(|i| self.sample(start + i as f64 / rate))
      .collect()
  }

  /// Samples at caller-chosen time stamps, e.g. the ones a render loop used.
  pub fn samples_at(&self, times: &[f64]) -> Vec<WaveformSample> {
    times.iter().map(|&t| self.sample(t)).collect()
  }

  /// Peak dimensionless strain at Earth for the event's distance, using the
  /// leading-order quadrupole amplitude at the ISCO frequency.
  pub fn physical_peak_strain(&self) -> f64 {
    let tc = self.params.chirp_mass() * SOLAR_MASS_SECONDS;
    let distance = self.params.distance_mpc() * MPC_METRES;
    let f = self.model.isco_frequency();
    4.0 * tc.powf(5.0 / 3.0) * (PI * f).powf(2.0 / 3.0) * SPEED_OF_LIGHT / distance
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn waveform() -> Waveform {
    Waveform::new(EventParameters::new(30.0, 25.0).unwrap(), &WaveformConfig::default()).unwrap()
  }

  #[test]
  fn repeated_sampling_is_bit_identical() {
    let w = waveform();
    for &t in &[0.0, 1.234, w.model().merger_time(), w.duration()] {
      let a = w.sample(t);
      let b = w.sample(t);
      assert_eq!(a.strain.to_bits(), b.strain.to_bits());
      assert_eq!(a.frequency.to_bits(), b.frequency.to_bits());
    }
  }

  #[test]
  fn strain_has_bounded_slope_across_phase_boundaries() {
    let w = waveform();
    let model = w.model();
    let stretch = model.config().time_stretch;
    let bound = 2.0 * PI * model.qnm_frequency() / stretch + 100.0;
    let delta = 1e-6;
    for &edge in &[model.merger_time(), model.ringdown_start()] {
      for k in -50..50 {
        let t = edge + k as f64 * delta;
        let slope = (w.sample(t + delta).strain - w.sample(t).strain).abs() / delta;
        assert!(slope < bound, "slope {slope} at t={t}");
      }
    }
  }

  #[test]
  fn amplitude_is_continuous_at_boundaries() {
    let w = waveform();
    let model = w.model();
    for &edge in &[model.merger_time(), model.ringdown_start()] {
      let before = w.sample(edge - 1e-7).amplitude;
      let after = w.sample(edge).amplitude;
      assert!((before - after).abs() < 1e-3, "jump at {edge}: {before} -> {after}");
    }
  }

  #[test]
  fn batch_matches_direct_sampling() {
    let w = waveform();
    let batch = w.batch(10.0, 11.0, 1000.0);
    assert_eq!(batch.len(), 1001);
    for (i, s) in batch.iter().enumerate() {
      assert_eq!(*s, w.sample(10.0 + i as f64 / 1000.0));
    }
    assert!(w.batch(1.0, 0.0, 10.0).is_empty());
    assert!(w.batch(0.0, 1.0, 0.0).is_empty());
  }

  #[test]
  fn batch_is_clamped_to_the_signal() {
    let w = waveform();
    let whole = w.batch(0.0, w.duration(), 100.0);
    assert_eq!(whole.len(), (w.duration() * 100.0).floor() as usize + 1);
    assert_eq!(w.batch(-5.0, 100.0 * w.duration(), 100.0), whole);
    assert!(w.batch(0.0, f64::INFINITY, 1.0).is_empty());
    assert!(w.batch(f64::NAN, 1.0, 1.0).is_empty());
    assert!(w.batch(0.0, w.duration(), 1.0e300).is_empty());
  }

  #[test]
  fn frequency_decays_through_ringdown() {
    let w = waveform();
    let model = w.model();
    let peak = w.sample(model.ringdown_start()).frequency;
    let later = w.sample(model.ringdown_start() + 2.0 * model.damping_time()).frequency;
    assert!(later < peak);
    assert!(peak >= w.sample(model.merger_time()).frequency);
  }

  #[test]
  fn physical_strain_is_in_detector_range() {
    let near = waveform().physical_peak_strain();
    assert!(near > 1e-22 && near < 1e-19, "{near}");
  }
}
