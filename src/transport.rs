use crate::error::Recovery;
use crate::TransportConfig;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Reader spins this many times before yielding to a preempted writer.
const SPIN_RETRIES: usize = 16;

#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
  fn new(value: f64) -> Self {
    Self(AtomicU64::new(value.to_bits()))
  }

  fn load(&self) -> f64 {
    f64::from_bits(self.0.load(Ordering::Relaxed))
  }

  fn store(&self, value: f64) {
    self.0.store(value.to_bits(), Ordering::Relaxed);
  }
}

#[derive(Debug)]
struct Shared {
  sequence: AtomicU64,
  elapsed: AtomicF64,
  speed: AtomicF64,
  paused: AtomicBool,
  /// Bumped on every seek, pause, resume and loop wrap.
  epoch: AtomicU64,
  duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
  pub elapsed: f64,
  pub speed: f64,
  pub paused: bool,
  /// Discontinuity counter. A consumer that sees it change must treat the
  /// time line as broken: flush buffers, reset oscillators.
  pub epoch: u64,
  pub duration: f64,
}

/// Read-only view of a [`Transport`] for other schedulers.
#[derive(Debug, Clone)]
pub struct TransportHandle {
  shared: Arc<Shared>,
}

impl TransportHandle {
  /// Consistent view of the transport. Retries until no write overlapped
  /// the read, so `elapsed` and `epoch` always belong together.
  pub fn snapshot(&self) -> TransportSnapshot {
    let s = &self.shared;
    let mut attempt = 0;
    loop {
      let before = s.sequence.load(Ordering::Acquire);
      let snap = TransportSnapshot {
        elapsed: s.elapsed.load(),
        speed: s.speed.load(),
        paused: s.paused.load(Ordering::Relaxed),
        epoch: s.epoch.load(Ordering::Relaxed),
        duration: s.duration,
      };
      fence(Ordering::Acquire);
      let after = s.sequence.load(Ordering::Relaxed);
      if before % 2 == 0 && before == after {
        return snap;
      }
      if attempt < SPIN_RETRIES {
        attempt += 1;
        std::hint::spin_loop();
      } else {
        // The writer was likely preempted mid-update.
        std::thread::yield_now();
      }
    }
  }

  pub fn elapsed(&self) -> f64 {
    self.snapshot().elapsed
  }
}

/// The single source of simulation time for one scene instance.
#[derive(Debug)]
pub struct Transport {
  shared: Arc<Shared>,
  elapsed: f64,
  speed: f64,
  paused: bool,
  epoch: u64,
  loop_bounds: Option<(f64, f64)>,
}

impl Transport {
  /// `duration` may be infinite for open-ended scenes such as N-body.
  pub fn new(duration: f64, config: &TransportConfig) -> Self {
    let duration = if duration.is_nan() || duration < 0.0 { 0.0 } else { duration };
    let speed = if config.speed.is_finite() { config.speed } else { 1.0 };
    let shared = Arc::new(Shared {
      sequence: AtomicU64::new(0),
      elapsed: AtomicF64::new(0.0),
      speed: AtomicF64::new(speed),
      paused: AtomicBool::new(config.start_paused),
      epoch: AtomicU64::new(0),
      duration,
    });
    let mut transport = Self {
      shared,
      elapsed: 0.0,
      speed,
      paused: config.start_paused,
      epoch: 0,
      loop_bounds: None,
    };
    if let (Some(start), Some(end)) = (config.loop_start, config.loop_end) {
      transport.set_loop(Some((start, end)));
    }
    transport
  }

  pub fn handle(&self) -> TransportHandle {
    TransportHandle {
      shared: Arc::clone(&self.shared),
    }
  }

  /// Advance by wall-clock `real_dt` and return the simulation delta,
  /// `real_dt * speed`, or 0 while paused.
  pub fn tick(&mut self, real_dt: f64) -> f64 {
    if self.paused || !real_dt.is_finite() || real_dt <= 0.0 {
      return 0.0;
    }
    let sim_dt = real_dt * self.speed;
    let target = self.elapsed + sim_dt;
    let duration = self.duration();
    let next = match self.loop_bounds {
      Some((start, end)) if target > end || target < start => {
        self.epoch += 1;
        let span = end - start;
        start + (target - start).rem_euclid(span)
      }
      _ => target.clamp(0.0, duration),
    };
    self.elapsed = next;
    self.publish();
    sim_dt
  }

  /// Jump to `target`, clamped to `[0, duration]`. Always a discontinuity.
  pub fn seek(&mut self, target: f64) {
    if target.is_nan() {
      Recovery::SeekOutOfRange.report(format_args!("ignored NaN seek target"));
      return;
    }
    let duration = self.duration();
    let clamped = target.clamp(0.0, duration);
    if clamped != target {
      Recovery::SeekOutOfRange.report(format_args!("seek {target} clamped to {clamped}"));
    }
    self.elapsed = clamped;
    self.epoch += 1;
    self.publish();
  }

  /// Negative values play backwards, zero freezes the frame.
  pub fn set_speed(&mut self, speed: f64) {
    if !speed.is_finite() {
      log::warn!("ignored non-finite playback speed {speed}");
      return;
    }
    self.speed = speed;
    self.publish();
  }

  pub fn pause(&mut self) {
    if !self.paused {
      self.paused = true;
      self.epoch += 1;
      self.publish();
    }
  }

  pub fn resume(&mut self) {
    if self.paused {
      self.paused = false;
      self.epoch += 1;
      self.publish();
    }
  }

  /// Restrict playback to `[start, end]`, wrapping in both directions.
  /// Degenerate or inverted regions clear the loop.
  pub fn set_loop(&mut self, bounds: Option<(f64, f64)>) {
    let duration = self.duration();
    self.loop_bounds = bounds
      .map(|(a, b)| (a.clamp(0.0, duration), b.clamp(0.0, duration)))
      .filter(|(a, b)| a.is_finite() && b.is_finite() && b > a);
    if bounds.is_some() && self.loop_bounds.is_none() {
      log::warn!("ignored empty loop region {bounds:?}");
    }
    if let Some((start, end)) = self.loop_bounds {
      if self.elapsed < start || self.elapsed > end {
        self.seek(start);
      }
    }
  }

  /// Back to t = 0 without touching speed, pause state or loop region.
  pub fn reset(&mut self) {
    self.elapsed = 0.0;
    self.epoch += 1;
    self.publish();
  }

  pub fn elapsed(&self) -> f64 {
    self.elapsed
  }

  pub fn speed(&self) -> f64 {
    self.speed
  }

  pub fn is_paused(&self) -> bool {
    self.paused
  }

  pub fn duration(&self) -> f64 {
    self.shared.duration
  }

  pub fn loop_bounds(&self) -> Option<(f64, f64)> {
    self.loop_bounds
  }

  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  fn publish(&self) {
    let s = &self.shared;
    let seq = s.sequence.load(Ordering::Relaxed);
    s.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
    fence(Ordering::Release);
    s.elapsed.store(self.elapsed);
    s.speed.store(self.speed);
    s.paused.store(self.paused, Ordering::Relaxed);
    s.epoch.store(self.epoch, Ordering::Relaxed);
    s.sequence.store(seq.wrapping_add(2), Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  fn transport(duration: f64) -> Transport {
    Transport::new(duration, &TransportConfig::default())
  }

  #[test]
  fn tick_scales_by_speed_and_stops_when_paused() {
    let mut t = transport(10.0);
    assert_relative_eq!(t.tick(0.5), 0.5);
    t.set_speed(2.0);
    assert_relative_eq!(t.tick(0.5), 1.0);
    assert_relative_eq!(t.elapsed(), 1.5);
    t.pause();
    assert_eq!(t.tick(0.5), 0.0);
    assert_relative_eq!(t.elapsed(), 1.5);
    t.resume();
    t.set_speed(0.0);
    assert_eq!(t.tick(0.5), 0.0);
    assert_relative_eq!(t.elapsed(), 1.5);
  }

  #[test]
  fn reverse_playback_clamps_at_zero() {
    let mut t = transport(10.0);
    t.seek(1.0);
    t.set_speed(-1.0);
    assert_relative_eq!(t.tick(0.4), -0.4);
    assert_relative_eq!(t.elapsed(), 0.6);
    t.tick(5.0);
    assert_eq!(t.elapsed(), 0.0);
  }

  #[test]
  fn seek_clamps_and_marks_discontinuity() {
    let mut t = transport(10.0);
    let handle = t.handle();
    t.seek(42.0);
    assert_eq!(t.elapsed(), 10.0);
    t.seek(-1.0);
    assert_eq!(t.elapsed(), 0.0);
    t.seek(f64::NAN);
    assert_eq!(t.elapsed(), 0.0);
    let snap = handle.snapshot();
    assert_eq!(snap.epoch, 2);
    assert_eq!(snap.elapsed, 0.0);
  }

  #[test]
  fn pause_and_resume_bump_epoch_once() {
    let mut t = transport(10.0);
    t.pause();
    t.pause();
    t.resume();
    assert_eq!(t.epoch(), 2);
  }

  #[test]
  fn loop_region_wraps_both_ways() {
    let mut t = transport(10.0);
    t.set_loop(Some((2.0, 4.0)));
    assert_eq!(t.elapsed(), 2.0);
    t.tick(2.5);
    assert_relative_eq!(t.elapsed(), 2.5, epsilon = 1e-12);
    t.set_speed(-1.0);
    t.tick(1.0);
    assert_relative_eq!(t.elapsed(), 3.5, epsilon = 1e-12);
    t.set_loop(Some((5.0, 5.0)));
    assert_eq!(t.loop_bounds(), None);
  }

  #[test]
  fn snapshot_waits_out_a_stalled_writer() {
    let t = transport(10.0);
    let handle = t.handle();
    let shared = Arc::clone(&t.shared);
    shared.sequence.store(1, Ordering::Release);
    shared.elapsed.store(4.0);
    let writer = std::thread::spawn(move || {
      std::thread::sleep(std::time::Duration::from_millis(50));
      shared.epoch.store(7, Ordering::Relaxed);
      shared.sequence.store(2, Ordering::Release);
    });
    let snap = handle.snapshot();
    writer.join().unwrap();
    assert_eq!(snap.elapsed, 4.0);
    assert_eq!(snap.epoch, 7);
  }

  #[test]
  fn readers_never_see_a_torn_seek() {
    let mut t = transport(1.0e9);
    let handle = t.handle();
    let reader = std::thread::spawn(move || {
      for _ in 0..50_000 {
        let s = handle.snapshot();
        assert_eq!(s.elapsed, s.epoch as f64);
      }
    });
    for k in 1..=50_000u64 {
      t.seek(k as f64);
    }
    reader.join().unwrap();
  }
}
