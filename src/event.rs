use crate::error::{GwError, Result};
use serde::{Deserialize, Serialize};

/// Heaviest mass treated as a neutron star when inferring the merger kind.
pub const NEUTRON_STAR_MAX_MASS: f64 = 3.0;
/// Luminosity distance assumed when a record does not carry one (Mpc).
pub const DEFAULT_DISTANCE_MPC: f64 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergerKind {
  #[serde(rename = "BBH")]
  Bbh,
  #[serde(rename = "BNS")]
  Bns,
  #[serde(rename = "NSBH")]
  Nsbh,
}

impl MergerKind {
  /// Classify by component masses: anything at or under
  /// [`NEUTRON_STAR_MAX_MASS`] counts as a neutron star.
  #[must_use]
  pub fn infer(mass1: f64, mass2: f64) -> Self {
    let ns1 = mass1 <= NEUTRON_STAR_MAX_MASS;
    let ns2 = mass2 <= NEUTRON_STAR_MAX_MASS;
    match (ns1, ns2) {
      (true, true) => MergerKind::Bns,
      (false, false) => MergerKind::Bbh,
      _ => MergerKind::Nsbh,
    }
  }
}

/// Raw, possibly incomplete event description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
  pub name: Option<String>,
  pub mass1: Option<f64>,
  pub mass2: Option<f64>,
  pub spin1: Option<f64>,
  pub spin2: Option<f64>,
  pub distance_mpc: Option<f64>,
  pub kind: Option<MergerKind>,
  pub snr: Option<f64>,
  pub gps_time: Option<f64>,
}

/// Validated, immutable event parameters. Masses are in solar masses,
/// spins are dimensionless magnitudes in `[0, 1)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventParameters {
  name: String,
  mass1: f64,
  mass2: f64,
  spin1: f64,
  spin2: f64,
  distance_mpc: f64,
  kind: MergerKind,
  snr: f64,
  gps_time: f64,
}

impl EventParameters {
  /// Sandbox constructor: two masses, every other field defaulted.
  pub fn new(mass1: f64, mass2: f64) -> Result<Self> {
    Self::from_record(EventRecord {
      mass1: Some(mass1),
      mass2: Some(mass2),
      ..EventRecord::default()
    })
  }

  pub fn from_record(record: EventRecord) -> Result<Self> {
    let name = record.name.unwrap_or_else(|| "sandbox".to_string());
    let mass_a = require_mass(&name, "mass1", record.mass1)?;
    let mass_b = require_mass(&name, "mass2", record.mass2)?;
    let (mass1, mass2, spin1, spin2) = if mass_b > mass_a {
      (mass_b, mass_a, record.spin2, record.spin1)
    } else {
      (mass_a, mass_b, record.spin1, record.spin2)
    };

    let spin1 = check_spin(&name, "spin1", spin1.unwrap_or(0.0))?;
    let spin2 = check_spin(&name, "spin2", spin2.unwrap_or(0.0))?;

    let distance_mpc = record.distance_mpc.unwrap_or(DEFAULT_DISTANCE_MPC);
    if !distance_mpc.is_finite() || distance_mpc <= 0.0 {
      return Err(GwError::InvalidParameter(format!(
        "{name}: distance must be positive, got {distance_mpc}"
      )));
    }

    let snr = record.snr.unwrap_or(0.0);
    if !snr.is_finite() || snr < 0.0 {
      return Err(GwError::InvalidParameter(format!(
        "{name}: snr must be non-negative, got {snr}"
      )));
    }

    let gps_time = record.gps_time.unwrap_or(0.0);
    if !gps_time.is_finite() {
      return Err(GwError::InvalidParameter(format!("{name}: gps time is not finite")));
    }

    Ok(Self {
      kind: record.kind.unwrap_or_else(|| MergerKind::infer(mass1, mass2)),
      name,
      mass1,
      mass2,
      spin1,
      spin2,
      distance_mpc,
      snr,
      gps_time,
    })
  }

  pub fn with_spins(mut self, spin1: f64, spin2: f64) -> Result<Self> {
    self.spin1 = check_spin(&self.name, "spin1", spin1)?;
    self.spin2 = check_spin(&self.name, "spin2", spin2)?;
    Ok(self)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn mass1(&self) -> f64 {
    self.mass1
  }

  pub fn mass2(&self) -> f64 {
    self.mass2
  }

  pub fn spin1(&self) -> f64 {
    self.spin1
  }

  pub fn spin2(&self) -> f64 {
    self.spin2
  }

  pub fn distance_mpc(&self) -> f64 {
    self.distance_mpc
  }

  pub fn kind(&self) -> MergerKind {
    self.kind
  }

  pub fn snr(&self) -> f64 {
    self.snr
  }

  pub fn gps_time(&self) -> f64 {
    self.gps_time
  }

  pub fn total_mass(&self) -> f64 {
    self.mass1 + self.mass2
  }

  /// Mc = (m1 m2)^(3/5) / (m1 + m2)^(1/5)
  pub fn chirp_mass(&self) -> f64 {
    (self.mass1 * self.mass2).powf(0.6) / self.total_mass().powf(0.2)
  }

  /// eta = m1 m2 / M^2, in (0, 0.25].
  pub fn symmetric_mass_ratio(&self) -> f64 {
    let m = self.total_mass();
    self.mass1 * self.mass2 / (m * m)
  }

  /// Mass-weighted aligned spin.
  pub fn effective_spin(&self) -> f64 {
    (self.mass1 * self.spin1 + self.mass2 * self.spin2) / self.total_mass()
  }
}

fn require_mass(name: &str, field: &str, value: Option<f64>) -> Result<f64> {
  match value {
    None => Err(GwError::InvalidParameter(format!("{name}: missing {field}"))),
    Some(m) if !m.is_finite() || m <= 0.0 => Err(GwError::InvalidParameter(format!(
      "{name}: {field} must be positive, got {m}"
    ))),
    Some(m) => Ok(m),
  }
}

fn check_spin(name: &str, field: &str, spin: f64) -> Result<f64> {
  if spin.is_finite() && (0.0..1.0).contains(&spin) {
    Ok(spin)
  } else {
    Err(GwError::InvalidParameter(format!(
      "{name}: {field} must lie in [0, 1), got {spin}"
    )))
  }
}
