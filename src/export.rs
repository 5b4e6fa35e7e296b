use crate::error::{GwError, Result};
use crate::waveform::{Waveform, WaveformSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DETECTOR: &str = "synthetic";
pub const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub detectors: Vec<String>,
  #[serde(rename = "sampleRate")]
  pub sample_rate: u32,
  #[serde(rename = "gpsStart")]
  pub gps_start: f64,
  pub duration: f64,
}

/// Sample the whole signal at `sample_rate`, write raw little-endian f32
/// strain to `{dir}/{event}/synthetic.bin` and register it in
/// `{dir}/manifest.json`.
pub fn export_event(dir: impl AsRef<Path>, waveform: &Waveform, sample_rate: u32) -> Result<PathBuf> {
  if sample_rate == 0 {
    return Err(GwError::InvalidParameter("export sample rate must be positive".into()));
  }
  let dir = dir.as_ref();
  let name = waveform.params().name();
  let samples = waveform.batch(0.0, waveform.duration(), f64::from(sample_rate));
  let strain: Vec<f32> = samples.iter().map(|s| s.strain as f32).collect();

  let path = dir.join(name).join(format!("{DETECTOR}.bin"));
  write_strain(&path, &strain)?;

  let entry = ManifestEntry {
    detectors: vec![DETECTOR.to_string()],
    sample_rate,
    gps_start: waveform.params().gps_time() - waveform.model().merger_time(),
    duration: waveform.duration(),
  };
  update_manifest(dir.join(MANIFEST), name, &entry)?;
  log::info!(
    "exported {} samples of {name} to {}",
    strain.len(),
    path.display()
  );
  Ok(path)
}

pub fn write_strain(path: &Path, strain: &[f32]) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  if cfg!(target_endian = "little") {
    fs::write(path, bytemuck::cast_slice::<f32, u8>(strain))?;
  } else {
    let bytes: Vec<u8> = strain.iter().flat_map(|s| s.to_le_bytes()).collect();
    fs::write(path, bytes)?;
  }
  Ok(())
}

pub fn read_strain(path: &Path) -> Result<Vec<f32>> {
  let bytes = fs::read(path)?;
  if bytes.len() % 4 != 0 {
    return Err(GwError::InvalidParameter(format!(
      "{} is not a whole number of f32 samples",
      path.display()
    )));
  }
  Ok(
    bytes
      .chunks_exact(4)
      .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect(),
  )
}

/// Insert or replace `name` in the manifest at `path`, keeping every other
/// entry as it was. Keys are written sorted.
pub fn update_manifest(path: impl AsRef<Path>, name: &str, entry: &ManifestEntry) -> Result<()> {
  let path = path.as_ref();
  let mut manifest: BTreeMap<String, serde_json::Value> = if path.exists() {
    serde_json::from_str(&fs::read_to_string(path)?)?
  } else {
    BTreeMap::new()
  };
  manifest.insert(name.to_string(), serde_json::to_value(entry)?);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let mut out = BufWriter::new(fs::File::create(path)?);
  serde_json::to_writer_pretty(&mut out, &manifest)?;
  out.write_all(b"\n")?;
  out.flush()?;
  Ok(())
}

pub fn write_csv(path: impl AsRef<Path>, samples: &[WaveformSample]) -> Result<()> {
  let mut out = BufWriter::new(fs::File::create(path)?);
  writeln!(out, "time,strain,frequency,amplitude")?;
  for s in samples {
    writeln!(out, "{},{},{},{}", s.time, s.strain, s.frequency, s.amplitude)?;
  }
  out.flush()?;
  Ok(())
}
