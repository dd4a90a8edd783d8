//! Error taxonomy for the consumer pipeline.
//!
//! Expected reconciliation cases never appear here — they are outcome
//! variants on the store trait. What remains is split between fatal startup
//! conditions (`Connect`, `ReconnectExhausted`), per-message reject causes
//! (`Event`, `Store`), and broker plumbing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Broker unreachable while establishing a connection. Fatal at startup.
  #[error("broker connection failed: {0}")]
  Connect(#[source] lapin::Error),

  /// Bounded reconnection gave up. Fatal; the process exits.
  #[error("reconnect attempts exhausted after {0} attempts")]
  ReconnectExhausted(u32),

  #[error("not connected to broker")]
  NotConnected,

  /// Payload failed normalization or validation.
  #[error("event error: {0}")]
  Event(#[from] marquee_core::Error),

  #[error("broker error: {0}")]
  Broker(#[from] lapin::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
