//! Error types for `marquee-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown publication kind: {0:?}")]
  UnknownPublicationKind(String),

  #[error("rating out of range (expected 1-5): {0}")]
  RatingOutOfRange(i64),

  #[error("record has neither an external id nor a local identity")]
  MissingIdentity,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
