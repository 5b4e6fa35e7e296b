use crate::error::{GwError, Result};
use crate::event::{EventParameters, EventRecord};
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Largest spin magnitude a catalog `chi_eff` is mapped onto.
const MAX_CATALOG_SPIN: f64 = 0.99;

/// Rank of a catalog release. Unknown releases rank lowest.
pub fn catalog_priority(short_name: &str) -> u8 {
  match short_name {
    "O1_O2-Preliminary" => 0,
    "GWTC-1-marginal" => 1,
    "GWTC-2.1-marginal" => 2,
    "GWTC-3-marginal" => 3,
    "GWTC-1-confident" => 5,
    "GWTC-2" => 6,
    "GWTC-2.1-confident" => 7,
    "GWTC-3-confident" => 8,
    "O4_Discovery_Papers" => 9,
    _ => 0,
  }
}

/// One catalog release's view of an event. Any field may be null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogEntry {
  #[serde(rename = "commonName")]
  pub common_name: Option<String>,
  #[serde(rename = "catalog.shortName")]
  pub catalog: Option<String>,
  #[serde(rename = "GPS")]
  pub gps: Option<f64>,
  pub mass_1_source: Option<f64>,
  pub mass_2_source: Option<f64>,
  pub luminosity_distance: Option<f64>,
  pub network_matched_filter_snr: Option<f64>,
  pub chi_eff: Option<f64>,
}

impl CatalogEntry {
  pub fn priority(&self) -> u8 {
    self.catalog.as_deref().map_or(0, catalog_priority)
  }

  /// The catalog only carries the aligned effective spin, so both component
  /// spins are set to its magnitude-clamped value.
  pub fn to_record(&self, name: &str) -> EventRecord {
    let spin = self.chi_eff.map(|chi| chi.clamp(0.0, MAX_CATALOG_SPIN));
    EventRecord {
      name: Some(name.to_string()),
      mass1: self.mass_1_source,
      mass2: self.mass_2_source,
      spin1: spin,
      spin2: spin,
      distance_mpc: self.luminosity_distance,
      kind: None,
      snr: self.network_matched_filter_snr,
      gps_time: self.gps,
    }
  }
}

#[derive(Deserialize)]
struct AllEvents {
  events: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
  events: BTreeMap<String, Vec<CatalogEntry>>,
}

impl Catalog {
  pub fn from_json_str(text: &str) -> Result<Self> {
    let doc: AllEvents = serde_json::from_str(text)?;
    Ok(Self::group(doc))
  }

  pub fn from_reader(reader: impl Read) -> Result<Self> {
    let doc: AllEvents = serde_json::from_reader(reader)?;
    Ok(Self::group(doc))
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
    let file = std::fs::File::open(path)?;
    Self::from_reader(std::io::BufReader::new(file))
  }

  fn group(doc: AllEvents) -> Self {
    let mut events: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
    for entry in doc.events.into_values() {
      let Some(name) = entry.common_name.clone().filter(|n| !n.is_empty()) else {
        continue;
      };
      events.entry(name).or_default().push(entry);
    }
    for versions in events.values_mut() {
      versions.sort_by_key(|e| Reverse(e.priority()));
    }
    log::info!("catalog holds {} unique events", events.len());
    Self { events }
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  /// Event names in lexical order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.events.keys().map(String::as_str)
  }

  /// All releases of `name`, best first.
  pub fn versions(&self, name: &str) -> Option<&[CatalogEntry]> {
    self.events.get(name).map(Vec::as_slice)
  }

  /// Validated parameters from the best release of `name` that has usable
  /// values.
  pub fn event(&self, name: &str) -> Result<EventParameters> {
    let versions = self
      .events
      .get(name)
      .ok_or_else(|| GwError::UnknownEvent(name.to_string()))?;
    let mut last_err = None;
    for entry in versions {
      match EventParameters::from_record(entry.to_record(name)) {
        Ok(params) => return Ok(params),
        Err(err) => {
          log::debug!("{name}: skipping {:?} release: {err}", entry.catalog);
          last_err = Some(err);
        }
      }
    }
    Err(last_err.unwrap_or_else(|| GwError::UnknownEvent(name.to_string())))
  }
}
