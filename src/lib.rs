pub mod binary;
pub mod catalog;
pub mod error;
pub mod event;
pub mod export;
pub mod nbody;
pub mod presets;
pub mod sonify;
pub mod sync;
pub mod transport;
pub mod waveform;

pub use binary::{BinaryModel, OrbitPhase, OrbitState};
pub use error::{GwError, Recovery, Result};
pub use event::{EventParameters, EventRecord, MergerKind};
pub use nbody::{MergeEvent, NBodySystem, Particle, Trail};
pub use presets::{Body, Preset};
pub use sonify::{AudioSession, AudioSink, AudioStream, Sonifier};
pub use sync::{FrameSnapshot, SceneContext};
pub use transport::{Transport, TransportHandle, TransportSnapshot};
pub use waveform::{Waveform, WaveformSample};

use serde::Deserialize;
use std::path::Path;

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
  pub start_frequency: f64,
  /// Simulation seconds per physical second.
  pub time_stretch: f64,
  pub max_inspiral_seconds: f64,
  /// Separation floor as a multiple of the combined Schwarzschild radius.
  pub min_separation_factor: f64,
  pub merger_width: f64,
  pub damping_scale: f64,
  /// Fraction of the QNM frequency the ringdown decays toward.
  pub ringdown_frequency_floor: f64,
  pub ringdown_frequency_decay: f64,
  pub silence_epsilon: f64,
  /// Playback duration after merger, in damping times.
  pub tail: f64,
}

impl Default for WaveformConfig {
  fn default() -> Self {
    Self {
      start_frequency: 20.0,
      time_stretch: 10.0,
      max_inspiral_seconds: 12.0,
      min_separation_factor: 1.0,
      merger_width: 1.0,
      damping_scale: 4.0,
      ringdown_frequency_floor: 0.5,
      ringdown_frequency_decay: 3.0,
      silence_epsilon: 0.01,
      tail: 8.0,
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NBodyConfig {
  pub gravity: f64,
  pub softening: f64,
  /// Largest fraction of the smallest radius a particle may travel per substep.
  pub max_travel_fraction: f64,
  pub max_substeps: u32,
  pub max_particles: usize,
  pub max_speed: f64,
  pub trail_length: usize,
  /// Record a trail point every this many frames.
  pub trail_stride: u32,
}

impl Default for NBodyConfig {
  fn default() -> Self {
    Self {
      gravity: 1.0,
      softening: 0.05,
      max_travel_fraction: 0.25,
      max_substeps: 64,
      max_particles: 512,
      max_speed: 50.0,
      trail_length: 256,
      trail_stride: 1,
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
  pub sample_rate: u32,
  pub block_size: usize,
  pub buffered_blocks: usize,
  /// Multiplier taking the physical GW frequency into the audible band.
  pub pitch_shift: f64,
  pub master_volume: f32,
  pub fade_ms: f32,
  /// Audio cursor lead or lag tolerated before it snaps back to the transport.
  pub max_drift_ms: f32,
}

impl Default for AudioConfig {
  fn default() -> Self {
    Self {
      sample_rate: 48_000,
      block_size: 256,
      buffered_blocks: 8,
      pitch_shift: 2.0,
      master_volume: 0.5,
      fade_ms: 5.0,
      max_drift_ms: 100.0,
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  pub speed: f64,
  pub start_paused: bool,
  pub loop_start: Option<f64>,
  pub loop_end: Option<f64>,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      speed: 1.0,
      start_paused: false,
      loop_start: None,
      loop_end: None,
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimConfig {
  pub waveform: WaveformConfig,
  pub nbody: NBodyConfig,
  pub audio: AudioConfig,
  pub transport: TransportConfig,
}

impl SimConfig {
  pub fn from_yaml_str(text: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(text)?)
  }

  pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_yaml::from_reader(reader)?)
  }
}

/// Per-frame parameters for the grid-deformation shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniform {
  pub time: f32,
  pub strain: f32,
  pub amplitude: f32,
  pub frequency: f32,
  pub orbital_phase: f32,
  pub separation: f32,
  pub mass_ratio: f32,
  /// 0 inspiral, 1 merger, 2 ringdown.
  pub phase: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleInstance {
  pub pos: [f32; 3],
  pub vel: [f32; 3],
  pub mass: f32,
  pub radius: f32,
}
