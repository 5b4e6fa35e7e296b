use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use gw_sim::catalog::Catalog;
use gw_sim::presets::Preset;
use gw_sim::{
  export, EventParameters, EventRecord, NBodySystem, SceneContext, SimConfig, Transport,
  TransportConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Gravitational-wave merger simulation, sonification and export
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
  /// YAML file overriding the default tuning
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Args, Debug)]
struct EventArgs {
  /// Catalog event name, e.g. GW150914 (needs --catalog)
  #[arg(short, long)]
  event: Option<String>,
  /// GWOSC allevents JSON file
  #[arg(long)]
  catalog: Option<PathBuf>,
  /// Primary mass in solar masses
  #[arg(long, default_value_t = 30.0)]
  mass1: f64,
  /// Secondary mass in solar masses
  #[arg(long, default_value_t = 25.0)]
  mass2: f64,
  /// Luminosity distance in Mpc
  #[arg(long)]
  distance: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PresetKind {
  Binary,
  HeadOn,
  FigureEight,
  Cluster,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Play an event headless: drive the scene clock and the audio stream
  Run {
    #[command(flatten)]
    event: EventArgs,
    /// Playback speed in simulation seconds per second
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
    /// Frames per second of the driving loop
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Sleep between frames instead of running as fast as possible
    #[arg(long, default_value_t = false)]
    realtime: bool,
  },
  /// Write the synthesized strain of an event to disk
  Export {
    #[command(flatten)]
    event: EventArgs,
    /// Output directory for {event}/synthetic.bin and manifest.json
    #[arg(short, long, default_value = "strain")]
    out: PathBuf,
    /// Samples per simulation second
    #[arg(long, default_value_t = 4096)]
    rate: u32,
    /// Also write a CSV of time, strain, frequency and amplitude
    #[arg(long)]
    csv: Option<PathBuf>,
  },
  /// Run an N-body preset and report merges and conservation
  Nbody {
    #[arg(value_enum, default_value_t = PresetKind::Binary)]
    preset: PresetKind,
    /// Bodies in the cluster preset
    #[arg(long, default_value_t = 64)]
    count: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Simulation seconds to run
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    #[arg(long, default_value_t = 60)]
    fps: u32,
  },
  /// List the events in a catalog file
  List {
    #[arg(long)]
    catalog: PathBuf,
  },
  /// Generate shell completion scripts
  Completions {
    /// The shell to generate the script for
    #[arg(value_enum)]
    shell: Shell,
  },
}

fn main() -> Result<()> {
  env_logger::init();
  let cli = Cli::parse();

  let config = match &cli.config {
    Some(path) => SimConfig::from_yaml_path(path)
      .with_context(|| format!("loading config {}", path.display()))?,
    None => SimConfig::default(),
  };

  match cli.command {
    Commands::Run {
      event,
      speed,
      fps,
      realtime,
    } => run(load_event(&event)?, config, speed, fps, realtime),
    Commands::Export {
      event,
      out,
      rate,
      csv,
    } => {
      let scene = SceneContext::new(load_event(&event)?, config)?;
      let path = export::export_event(&out, scene.waveform(), rate)?;
      println!("wrote {}", path.display());
      if let Some(csv) = csv {
        let samples = scene.export(0.0, scene.duration(), f64::from(rate));
        export::write_csv(&csv, &samples)?;
        println!("wrote {}", csv.display());
      }
      Ok(())
    }
    Commands::Nbody {
      preset,
      count,
      seed,
      seconds,
      fps,
    } => {
      let preset = match preset {
        PresetKind::Binary => Preset::Binary { separation: 1.0 },
        PresetKind::HeadOn => Preset::HeadOn { separation: 2.0 },
        PresetKind::FigureEight => Preset::FigureEight,
        PresetKind::Cluster => Preset::Cluster { count, seed },
      };
      nbody(preset, config, seconds, fps)
    }
    Commands::List { catalog } => {
      let catalog = Catalog::from_path(&catalog)?;
      for name in catalog.names() {
        println!("{name}");
      }
      Ok(())
    }
    Commands::Completions { shell } => {
      let mut cmd = Cli::command();
      let name = cmd.get_name().to_string();
      generate(shell, &mut cmd, name, &mut io::stdout());
      Ok(())
    }
  }
}

fn load_event(args: &EventArgs) -> Result<EventParameters> {
  if let Some(name) = &args.event {
    let Some(path) = &args.catalog else {
      bail!("--event {name} needs --catalog");
    };
    let catalog = Catalog::from_path(path)
      .with_context(|| format!("reading catalog {}", path.display()))?;
    return Ok(catalog.event(name)?);
  }
  Ok(EventParameters::from_record(EventRecord {
    mass1: Some(args.mass1),
    mass2: Some(args.mass2),
    distance_mpc: args.distance,
    ..EventRecord::default()
  })?)
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
  let stop = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&stop);
  ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
    .context("installing Ctrl-C handler")?;
  Ok(stop)
}

fn run(params: EventParameters, config: SimConfig, speed: f64, fps: u32, realtime: bool) -> Result<()> {
  if fps == 0 {
    bail!("--fps must be positive");
  }
  if !(speed > 0.0) {
    bail!("--speed must be positive for a headless run");
  }
  let stop = stop_flag()?;
  let mut scene = SceneContext::new(params, config)?;
  scene.set_speed(speed);
  scene.resume();

  let (session, mut sonifier) = scene.audio_session();
  let (mut stream, mut sink) = scene.audio_stream();
  let waveform = scene.waveform().clone();
  let handle = scene.handle();

  let frame_dt = 1.0 / f64::from(fps);
  let samples_per_frame = (f64::from(scene.config().audio.sample_rate) * frame_dt).round() as usize;
  let mut device = vec![0.0_f32; samples_per_frame];
  let mut energy = 0.0_f64;
  let mut samples = 0_u64;
  let mut peak_frequency = 0.0_f64;
  let mut last_phase = None;
  let started = Instant::now();

  while !stop.load(Ordering::SeqCst) && !scene.finished() {
    let frame_start = Instant::now();
    let frame = scene.update(frame_dt);
    if last_phase != Some(frame.orbit.phase) {
      log::info!("t={:.3}s entering {:?}", frame.time, frame.orbit.phase);
      last_phase = Some(frame.orbit.phase);
    }
    peak_frequency = peak_frequency.max(frame.sample.frequency);

    stream.pump(&mut sonifier, &handle, &waveform);
    sink.pull(&mut device);
    energy += device.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>();
    samples += device.len() as u64;

    if realtime {
      let spent = frame_start.elapsed();
      if let Some(rest) = Duration::from_secs_f64(frame_dt).checked_sub(spent) {
        std::thread::sleep(rest);
      }
    }
  }
  drop(session);

  let rms = if samples > 0 { (energy / samples as f64).sqrt() } else { 0.0 };
  log::info!(
    "played {:.2}s of {:.2}s in {} frames ({:.2?} wall), peak {:.1} Hz, audio rms {:.4}, {} underruns",
    scene.elapsed(),
    scene.duration(),
    scene.frame(),
    started.elapsed(),
    peak_frequency,
    rms,
    sink.underruns()
  );
  Ok(())
}

fn nbody(preset: Preset, config: SimConfig, seconds: f64, fps: u32) -> Result<()> {
  if fps == 0 {
    bail!("--fps must be positive");
  }
  let stop = stop_flag()?;
  let mut system = NBodySystem::new(config.nbody)?;
  preset.populate(&mut system)?;
  let mut transport = Transport::new(seconds.max(0.0), &TransportConfig::default());

  let e0 = system.total_energy();
  let p0 = system.total_momentum();
  let frame_dt = 1.0 / f64::from(fps);
  let mut merges = 0;
  while !stop.load(Ordering::SeqCst) && transport.elapsed() < transport.duration() {
    let dt = transport.tick(frame_dt);
    merges += system.step(dt).merges.len();
  }

  let e1 = system.total_energy();
  let p1 = system.total_momentum();
  log::info!(
    "{:?}: {:.2}s, {} bodies left, {} merges, energy drift {:.3e}, momentum drift {:.3e}",
    preset,
    system.time(),
    system.len(),
    merges,
    if e0 != 0.0 { (e1 - e0) / e0.abs() } else { e1 - e0 },
    ((p1.x - p0.x).powi(2) + (p1.y - p0.y).powi(2) + (p1.z - p0.z).powi(2)).sqrt()
  );
  Ok(())
}
