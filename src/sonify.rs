use crate::error::{GwError, Recovery, Result};
use crate::transport::TransportHandle;
use crate::waveform::Waveform;
use crate::AudioConfig;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lowest frequency the oscillator will play, in Hz.
const MIN_AUDIO_FREQUENCY: f64 = 20.0;
const MIN_SAMPLE_RATE: u32 = 8_000;

/// Sample tagged with the transport epoch it was rendered under.
type Tagged = (u64, f32);

pub fn check_config(config: &AudioConfig) -> Result<()> {
  if config.sample_rate < MIN_SAMPLE_RATE {
    return Err(GwError::InvalidParameter(format!(
      "audio.sample_rate must be at least {MIN_SAMPLE_RATE}, got {}",
      config.sample_rate
    )));
  }
  if config.block_size == 0 || config.buffered_blocks == 0 {
    return Err(GwError::InvalidParameter(
      "audio.block_size and audio.buffered_blocks must be positive".into(),
    ));
  }
  if !(config.pitch_shift > 0.0 && config.pitch_shift.is_finite()) {
    return Err(GwError::InvalidParameter("audio.pitch_shift must be positive".into()));
  }
  let non_negative = [
    ("master_volume", config.master_volume),
    ("fade_ms", config.fade_ms),
    ("max_drift_ms", config.max_drift_ms),
  ];
  for (name, value) in non_negative {
    if !value.is_finite() || value < 0.0 {
      return Err(GwError::InvalidParameter(format!("audio.{name} must not be negative")));
    }
  }
  Ok(())
}

pub struct Sonifier {
  config: AudioConfig,
  active: Arc<AtomicBool>,
  /// Oscillator phase in cycles, in [0, 1).
  phase: f64,
  /// Simulation time of the next sample.
  cursor: f64,
  last_epoch: Option<u64>,
  gated: bool,
  fade_len: u32,
  fade_pos: u32,
}

impl Sonifier {
  fn new(config: AudioConfig, active: Arc<AtomicBool>) -> Self {
    let fade_len = (config.fade_ms * 1e-3 * config.sample_rate as f32).round() as u32;
    Self {
      config,
      active,
      phase: 0.0,
      cursor: 0.0,
      last_epoch: None,
      gated: false,
      fade_len,
      fade_pos: 0,
    }
  }

  pub fn config(&self) -> &AudioConfig {
    &self.config
  }

  /// Map a gravitational-wave frequency into the playable band.
  pub fn audio_frequency(&self, gw_frequency: f64) -> f64 {
    let ceiling = 0.45 * f64::from(self.config.sample_rate);
    (gw_frequency * self.config.pitch_shift).clamp(MIN_AUDIO_FREQUENCY, ceiling)
  }

  /// Fill `out` with the next block of mono samples.
  pub fn render(&mut self, transport: &TransportHandle, waveform: &Waveform, out: &mut [f32]) {
    let snap = transport.snapshot();
    if !self.active.load(Ordering::Relaxed) || snap.paused {
      out.fill(0.0);
      self.gated = true;
      self.last_epoch = Some(snap.epoch);
      return;
    }

    if self.gated || self.last_epoch != Some(snap.epoch) {
      self.phase = 0.0;
      self.cursor = snap.elapsed;
      self.fade_pos = 0;
      self.gated = false;
      self.last_epoch = Some(snap.epoch);
    } else {
      let tolerance = f64::from(self.config.max_drift_ms) * 1e-3 * snap.speed.abs();
      let drift = self.cursor - snap.elapsed;
      if drift.abs() > tolerance {
        log::debug!("audio cursor drifted {drift:.4}s from transport, resyncing");
        self.cursor = snap.elapsed;
      }
    }

    let rate = f64::from(self.config.sample_rate);
    let step = snap.speed / rate;
    let volume = f64::from(self.config.master_volume);
    let epsilon = waveform.model().config().silence_epsilon;
    let end = snap.duration;

    for sample in out.iter_mut() {
      let s = waveform.sample(self.cursor.clamp(0.0, end));
      self.phase += self.audio_frequency(s.frequency) / rate;
      self.phase -= self.phase.floor();

      let gain = if self.fade_pos < self.fade_len {
        let g = f64::from(self.fade_pos) / f64::from(self.fade_len);
        self.fade_pos += 1;
        g
      } else {
        1.0
      };

      *sample = if s.amplitude < epsilon {
        0.0
      } else {
        (s.amplitude * volume * gain * (TAU * self.phase).sin()) as f32
      };
      self.cursor += step;
    }
  }
}

/// Keeps the audio side alive. Dropping it silences every [`Sonifier`] it
/// handed out.
pub struct AudioSession {
  active: Arc<AtomicBool>,
}

impl AudioSession {
  pub fn open(config: AudioConfig) -> Result<(Self, Sonifier)> {
    check_config(&config)?;
    Ok(Self::start(config))
  }

  /// `config` must already have passed [`check_config`].
  pub(crate) fn start(config: AudioConfig) -> (Self, Sonifier) {
    let active = Arc::new(AtomicBool::new(true));
    log::info!(
      "audio session opened at {} Hz, pitch x{}",
      config.sample_rate,
      config.pitch_shift
    );
    let sonifier = Sonifier::new(config, Arc::clone(&active));
    (Self { active }, sonifier)
  }

  pub fn set_muted(&self, muted: bool) {
    self.active.store(!muted, Ordering::Relaxed);
  }

  pub fn is_muted(&self) -> bool {
    !self.active.load(Ordering::Relaxed)
  }
}

impl Drop for AudioSession {
  fn drop(&mut self) {
    self.active.store(false, Ordering::Relaxed);
    log::info!("audio session closed");
  }
}

/// Producer half of a bounded sample ring between the thread that renders
/// audio and the device callback.
pub struct AudioStream {
  producer: HeapProd<Tagged>,
  block: Vec<f32>,
}

/// Consumer half of an [`AudioStream`]. This is what a device callback owns.
pub struct AudioSink {
  consumer: HeapCons<Tagged>,
  transport: TransportHandle,
  starving: bool,
  underruns: u64,
  discarded: u64,
}

impl AudioStream {
  pub fn new(config: &AudioConfig, transport: TransportHandle) -> Result<(Self, AudioSink)> {
    check_config(config)?;
    Ok(Self::start(config, transport))
  }

  /// `config` must already have passed [`check_config`].
  pub(crate) fn start(config: &AudioConfig, transport: TransportHandle) -> (Self, AudioSink) {
    let block_size = config.block_size;
    let capacity = block_size * config.buffered_blocks;
    let (producer, consumer) = HeapRb::<Tagged>::new(capacity).split();
    let stream = Self {
      producer,
      block: vec![0.0; block_size],
    };
    let sink = AudioSink {
      consumer,
      transport,
      starving: false,
      underruns: 0,
      discarded: 0,
    };
    (stream, sink)
  }

  /// Render whole blocks until the ring is full. Returns the number of
  /// blocks written.
  pub fn pump(
    &mut self,
    sonifier: &mut Sonifier,
    transport: &TransportHandle,
    waveform: &Waveform,
  ) -> usize {
    let mut blocks = 0;
    while self.producer.vacant_len() >= self.block.len() {
      sonifier.render(transport, waveform, &mut self.block);
      let epoch = sonifier.last_epoch.unwrap_or_default();
      self.producer.push_iter(self.block.iter().map(|&s| (epoch, s)));
      blocks += 1;
    }
    blocks
  }

  pub fn buffered(&self) -> usize {
    self.producer.occupied_len()
  }
}

impl AudioSink {
  /// Fill `out` from the ring. Whatever the ring cannot supply is silence.
  /// Samples rendered under an older epoch are dropped, not played.
  pub fn pull(&mut self, out: &mut [f32]) -> usize {
    let epoch = self.transport.snapshot().epoch;
    let mut read = 0;
    let mut stale = 0;
    while read < out.len() {
      let Some((tag, sample)) = self.consumer.try_pop() else {
        break;
      };
      if tag == epoch {
        out[read] = sample;
        read += 1;
      } else {
        stale += 1;
      }
    }
    out[read..].fill(0.0);
    if stale > 0 {
      log::debug!("dropped {stale} samples rendered before epoch {epoch}");
      self.discarded += stale;
    }
    if read < out.len() && stale == 0 {
      self.underruns += 1;
      if !self.starving {
        Recovery::AudioUnderrun.report(format_args!(
          "ring supplied {read} of {} samples",
          out.len()
        ));
      }
      self.starving = true;
    } else {
      self.starving = false;
    }
    read
  }

  pub fn underruns(&self) -> u64 {
    self.underruns
  }

  /// Samples thrown away because the time line moved under them.
  pub fn discarded(&self) -> u64 {
    self.discarded
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{EventParameters, Transport, TransportConfig, WaveformConfig};

  fn scene() -> (Transport, Waveform) {
    let waveform =
      Waveform::new(EventParameters::new(30.0, 25.0).unwrap(), &WaveformConfig::default()).unwrap();
    let transport = Transport::new(waveform.duration(), &TransportConfig::default());
    (transport, waveform)
  }

  #[test]
  fn blocks_join_without_a_seam() {
    let (transport, waveform) = scene();
    let handle = transport.handle();
    let (_session, mut whole) = AudioSession::open(AudioConfig::default()).unwrap();
    let (_other, mut split) = AudioSession::open(AudioConfig::default()).unwrap();

    let mut one = vec![0.0; 512];
    whole.render(&handle, &waveform, &mut one);
    let mut two = vec![0.0; 512];
    split.render(&handle, &waveform, &mut two[..256]);
    split.render(&handle, &waveform, &mut two[256..]);
    assert_eq!(one, two);
  }

  #[test]
  fn seek_resets_phase_with_a_fade() {
    let (mut transport, waveform) = scene();
    let handle = transport.handle();
    let (_session, mut sonifier) = AudioSession::open(AudioConfig::default()).unwrap();
    let mut out = vec![0.0; 256];
    sonifier.render(&handle, &waveform, &mut out);

    transport.seek(5.0);
    sonifier.render(&handle, &waveform, &mut out);
    assert_eq!(out[0], 0.0);
    let fade = (sonifier.config().fade_ms * 1e-3 * 48_000.0) as usize;
    let early = out[..fade / 4].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    let volume = sonifier.config().master_volume;
    assert!(early <= 0.25 * volume + 1e-6, "{early}");
  }

  #[test]
  fn pause_and_ended_signal_are_exact_silence() {
    let (mut transport, waveform) = scene();
    let handle = transport.handle();
    let (_session, mut sonifier) = AudioSession::open(AudioConfig::default()).unwrap();
    let mut out = vec![1.0; 256];

    transport.pause();
    sonifier.render(&handle, &waveform, &mut out);
    assert!(out.iter().all(|&s| s == 0.0));

    transport.resume();
    transport.seek(waveform.model().silence_time() + 0.01);
    out.fill(1.0);
    sonifier.render(&handle, &waveform, &mut out);
    assert!(out.iter().all(|&s| s.to_bits() == 0));
  }

  #[test]
  fn dropping_the_session_mutes() {
    let (transport, waveform) = scene();
    let handle = transport.handle();
    let (session, mut sonifier) = AudioSession::open(AudioConfig::default()).unwrap();
    let mut out = vec![0.0; 256];
    sonifier.render(&handle, &waveform, &mut out);
    assert!(out.iter().any(|&s| s != 0.0));
    drop(session);
    sonifier.render(&handle, &waveform, &mut out);
    assert!(out.iter().all(|&s| s == 0.0));
  }

  #[test]
  fn frequencies_are_pitched_into_band() {
    let (_session, sonifier) = AudioSession::open(AudioConfig::default()).unwrap();
    assert_eq!(sonifier.audio_frequency(100.0), 200.0);
    assert_eq!(sonifier.audio_frequency(1.0), MIN_AUDIO_FREQUENCY);
    assert_eq!(sonifier.audio_frequency(1.0e6), 0.45 * 48_000.0);
  }

  #[test]
  fn stream_underrun_yields_silence() {
    let (transport, waveform) = scene();
    let handle = transport.handle();
    let config = AudioConfig::default();
    let (_session, mut sonifier) = AudioSession::open(config).unwrap();
    let (mut stream, mut sink) = AudioStream::new(&config, handle.clone()).unwrap();

    let blocks = stream.pump(&mut sonifier, &handle, &waveform);
    assert_eq!(blocks, config.buffered_blocks);

    let mut out = vec![1.0; config.block_size * (config.buffered_blocks + 1)];
    let read = sink.pull(&mut out);
    assert_eq!(read, config.block_size * config.buffered_blocks);
    assert!(out[read..].iter().all(|&s| s == 0.0));
    assert_eq!(sink.underruns(), 1);
  }

  #[test]
  fn seek_flushes_stale_stream_audio() {
    let (mut transport, waveform) = scene();
    let handle = transport.handle();
    let config = AudioConfig::default();
    let (_session, mut sonifier) = AudioSession::open(config).unwrap();
    let (mut stream, mut sink) = AudioStream::new(&config, handle.clone()).unwrap();

    let mut out = vec![0.0; config.block_size];
    stream.pump(&mut sonifier, &handle, &waveform);
    sink.pull(&mut out);
    transport.seek(3.0);
    assert_eq!(sink.pull(&mut out), 0);
  }

  #[test]
  fn seek_before_first_pull_drops_old_audio() {
    let (mut transport, waveform) = scene();
    let handle = transport.handle();
    let config = AudioConfig::default();
    let (_session, mut sonifier) = AudioSession::open(config).unwrap();
    let (mut stream, mut sink) = AudioStream::new(&config, handle.clone()).unwrap();

    stream.pump(&mut sonifier, &handle, &waveform);
    transport.seek(9.0);
    let mut out = vec![1.0; config.block_size];
    assert_eq!(sink.pull(&mut out), 0);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(sink.underruns(), 0);
    assert!(sink.discarded() > 0);

    stream.pump(&mut sonifier, &handle, &waveform);
    assert_eq!(sink.pull(&mut out), config.block_size);
    let (_fresh_session, mut fresh) = AudioSession::open(config).unwrap();
    let mut expected = vec![0.0; config.block_size];
    fresh.render(&handle, &waveform, &mut expected);
    assert_eq!(out, expected);
  }

  #[test]
  fn rejects_unplayable_config() {
    let low = AudioConfig {
      sample_rate: 40,
      ..AudioConfig::default()
    };
    assert!(matches!(AudioSession::open(low), Err(GwError::InvalidParameter(_))));
    let empty = AudioConfig {
      block_size: 0,
      ..AudioConfig::default()
    };
    let (transport, _) = scene();
    assert!(AudioStream::new(&empty, transport.handle()).is_err());
    let loud = AudioConfig {
      master_volume: f32::NAN,
      ..AudioConfig::default()
    };
    assert!(check_config(&loud).is_err());
    assert!(check_config(&AudioConfig::default()).is_ok());
  }
}
