//! Per-entity event handlers.
//!
//! Each handler is a small state machine per external id, tolerant of
//! out-of-order and redelivered events via the self-healing fallback chains:
//! an update that misses becomes a create, a create that collides becomes an
//! update, and session events for unknown users either heal or no-op
//! depending on whether the event implies the user exists.

pub mod reviews;
pub mod users;

use crate::Error;

/// Wrap a store-level failure for propagation to the delivery loop.
pub(crate) fn store_err<E>(e: E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  Error::Store(Box::new(e))
}

#[cfg(test)]
mod tests;
