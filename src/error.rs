use thiserror::Error;

#[derive(Debug, Error)]
pub enum GwError {
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("unknown event: {0}")]
  UnknownEvent(String),

  #[error("catalog parse error: {0}")]
  Catalog(#[from] serde_json::Error),

  #[error("config parse error: {0}")]
  Config(#[from] serde_yaml::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GwError>;

/// Runtime conditions that are absorbed on the real-time paths instead of
/// surfacing as errors. They are only reported through the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
  /// A separation or frequency would have gone non-finite and was clamped.
  NumericDegenerate,
  /// An N-body velocity blew past the sanity bound and was clamped.
  IntegratorInstability,
  /// The audio consumer asked for more samples than were buffered.
  AudioUnderrun,
  /// A seek target fell outside `[0, duration]`.
  SeekOutOfRange,
}

impl Recovery {
  pub fn report(self, detail: std::fmt::Arguments<'_>) {
    log::warn!("recovered from {self:?}: {detail}");
  }
}
