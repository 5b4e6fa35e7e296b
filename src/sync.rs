use crate::binary::OrbitState;
use crate::error::Result;
use crate::event::EventParameters;
use crate::nbody::{self, MergeEvent, NBodySystem};
use crate::sonify::{self, AudioSession, AudioSink, AudioStream, Sonifier};
use crate::transport::{Transport, TransportHandle};
use crate::waveform::{Waveform, WaveformSample};
use crate::{FrameUniform, ParticleInstance, SimConfig};
use std::f64::consts::TAU;

/// Everything the render collaborator needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
  pub time: f64,
  pub epoch: u64,
  pub orbit: OrbitState,
  pub sample: WaveformSample,
  pub uniform: FrameUniform,
  pub particles: Vec<ParticleInstance>,
  pub merges: Vec<MergeEvent>,
}

pub struct SceneContext {
  config: SimConfig,
  transport: Transport,
  handle: TransportHandle,
  waveform: Waveform,
  nbody: Option<NBodySystem>,
  frame: u64,
}

impl SceneContext {
  pub fn new(params: EventParameters, config: SimConfig) -> Result<Self> {
    sonify::check_config(&config.audio)?;
    nbody::check_config(&config.nbody)?;
    let waveform = Waveform::new(params, &config.waveform)?;
    let transport = Transport::new(waveform.duration(), &config.transport);
    let handle = transport.handle();
    log::info!(
      "scene '{}' ready: {:.2}s of signal, merger at {:.2}s",
      waveform.params().name(),
      waveform.duration(),
      waveform.model().merger_time()
    );
    Ok(Self {
      config,
      transport,
      handle,
      waveform,
      nbody: None,
      frame: 0,
    })
  }

  /// Attach an N-body system that advances with the scene clock.
  #[must_use]
  pub fn with_nbody(mut self, system: NBodySystem) -> Self {
    self.nbody = Some(system);
    self
  }

  /// Advance the clock by wall-clock `real_dt` and build the frame.
  pub fn update(&mut self, real_dt: f64) -> FrameSnapshot {
    let sim_dt = self.transport.tick(real_dt);
    let time = self.transport.elapsed();
    let epoch = self.transport.epoch();
    self.frame += 1;

    let orbit = self.waveform.orbit(time);
    let sample = Waveform::from_orbit(&orbit);
    let uniform = FrameUniform {
      time: time as f32,
      strain: sample.strain as f32,
      amplitude: sample.amplitude as f32,
      frequency: sample.frequency as f32,
      orbital_phase: orbit.orbital_phase.rem_euclid(TAU) as f32,
      separation: orbit.separation as f32,
      mass_ratio: self.waveform.model().mass_ratio() as f32,
      phase: orbit.phase.index(),
    };

    let mut particles = Vec::new();
    let mut merges = Vec::new();
    if let Some(system) = self.nbody.as_mut() {
      merges = system.step(sim_dt).merges;
      system.write_instances(&mut particles);
    }

    FrameSnapshot {
      time,
      epoch,
      orbit,
      sample,
      uniform,
      particles,
      merges,
    }
  }

  /// Fill one audio block for `sonifier` from this scene's clock.
  pub fn render_audio(&self, sonifier: &mut Sonifier, out: &mut [f32]) {
    sonifier.render(&self.handle, &self.waveform, out);
  }

  /// Open the audio side of the scene. Output stops when the session drops.
  pub fn audio_session(&self) -> (AudioSession, Sonifier) {
    AudioSession::start(self.config.audio)
  }

  pub fn audio_stream(&self) -> (AudioStream, AudioSink) {
    AudioStream::start(&self.config.audio, self.handle.clone())
  }

  /// Samples over `[start, end]` clamped to the signal, at `rate`, through
  /// the playback path.
  pub fn export(&self, start: f64, end: f64, rate: f64) -> Vec<WaveformSample> {
    self.waveform.batch(start, end, rate)
  }

  pub fn seek(&mut self, t: f64) {
    self.transport.seek(t);
  }

  pub fn set_speed(&mut self, speed: f64) {
    self.transport.set_speed(speed);
  }

  pub fn pause(&mut self) {
    self.transport.pause();
  }

  pub fn resume(&mut self) {
    self.transport.resume();
  }

  pub fn set_loop(&mut self, bounds: Option<(f64, f64)>) {
    self.transport.set_loop(bounds);
  }

  pub fn handle(&self) -> TransportHandle {
    self.handle.clone()
  }

  pub fn elapsed(&self) -> f64 {
    self.transport.elapsed()
  }

  pub fn duration(&self) -> f64 {
    self.transport.duration()
  }

  pub fn frame(&self) -> u64 {
    self.frame
  }

  /// True once playback sits at the end of the signal.
  pub fn finished(&self) -> bool {
    self.transport.loop_bounds().is_none() && self.transport.elapsed() >= self.transport.duration()
  }

  pub fn transport(&self) -> &Transport {
    &self.transport
  }

  pub fn waveform(&self) -> &Waveform {
    &self.waveform
  }

  pub fn nbody(&self) -> Option<&NBodySystem> {
    self.nbody.as_ref()
  }

  pub fn nbody_mut(&mut self) -> Option<&mut NBodySystem> {
    self.nbody.as_mut()
  }

  pub fn config(&self) -> &SimConfig {
    &self.config
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::presets::Preset;
  use crate::{GwError, NBodyConfig};

  fn scene() -> SceneContext {
    SceneContext::new(EventParameters::new(30.0, 25.0).unwrap(), SimConfig::default()).unwrap()
  }

  #[test]
  fn frame_values_come_from_one_time() {
    let mut scene = scene();
    let frame = scene.update(0.75);
    assert_eq!(frame.time, 0.75);
    assert_eq!(frame.sample, scene.waveform().sample(0.75));
    assert_eq!(frame.uniform.strain, frame.sample.strain as f32);
    assert_eq!(frame.uniform.phase, frame.orbit.phase.index());
    assert!(frame.particles.is_empty());
  }

  #[test]
  fn paused_scene_holds_its_frame() {
    let mut scene = scene();
    scene.update(1.0);
    scene.pause();
    let a = scene.update(0.5);
    let b = scene.update(0.5);
    assert_eq!(a.time, 1.0);
    assert_eq!(a.sample, b.sample);
  }

  #[test]
  fn nbody_advances_with_scene_time() {
    let mut system = NBodySystem::new(NBodyConfig::default()).unwrap();
    Preset::Binary { separation: 1.0 }.populate(&mut system).unwrap();
    let mut scene = scene().with_nbody(system);
    scene.set_speed(2.0);
    let frame = scene.update(0.1);
    assert_eq!(frame.particles.len(), 2);
    let t = scene.nbody().unwrap().time();
    assert!((t - 0.2).abs() < 1e-12, "{t}");
  }

  #[test]
  fn invalid_tuning_is_rejected_up_front() {
    let params = || EventParameters::new(30.0, 25.0).unwrap();
    let mut config = SimConfig::default();
    config.audio.sample_rate = 40;
    assert!(matches!(SceneContext::new(params(), config), Err(GwError::InvalidParameter(_))));

    let mut config = SimConfig::default();
    config.nbody.max_travel_fraction = 0.0;
    assert!(SceneContext::new(params(), config).is_err());
  }

  #[test]
  fn export_is_bounded_by_the_signal() {
    let scene = scene();
    let whole = scene.export(0.0, scene.duration(), 100.0);
    assert_eq!(scene.export(0.0, 100.0 * scene.duration(), 100.0), whole);
    assert!(scene.export(0.0, f64::INFINITY, 1.0).is_empty());
  }

  #[test]
  fn finishes_at_end_of_signal() {
    let mut scene = scene();
    let duration = scene.duration();
    scene.update(duration + 1.0);
    assert!(scene.finished());
    assert_eq!(scene.elapsed(), duration);
  }
}
