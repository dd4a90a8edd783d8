//! The unified user record.
//!
//! One table holds both locally registered accounts and users mirrored from
//! the upstream Core. Which identity keys are populated determines the
//! record's provenance; handler logic switches on [`Provenance`], never on
//! ad-hoc field presence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Provenance ──────────────────────────────────────────────────────────────

/// Where a unified record originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Created through the local REST layer only.
  Local,
  /// Mirrored from the upstream Core only.
  External,
  /// Both identities are known (e.g. a local account later matched to a
  /// Core-synced identity).
  Both,
}

// ─── UserRecord ──────────────────────────────────────────────────────────────

/// A user, unified across both provenances.
///
/// Invariant: at least one of `external_id` / `local_username` is set. The
/// store enforces this with a schema CHECK and rejects rows violating it at
/// decode time. Event processing never deletes a user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
  pub user_id:        Uuid,
  /// Opaque identifier assigned by the Core; the idempotency key for sync.
  pub external_id:    Option<String>,
  pub local_username: Option<String>,
  pub local_email:    Option<String>,
  pub display_name:   Option<String>,
  pub country:        Option<String>,
  pub registered_at:  Option<DateTime<Utc>>,
  pub last_login_at:  Option<DateTime<Utc>>,
  pub last_logout_at: Option<DateTime<Utc>>,
  /// Last time an inbound Core event touched this record.
  pub synced_at:      Option<DateTime<Utc>>,
}

impl UserRecord {
  /// Derived from which identity keys are populated. Rows with neither key
  /// are rejected at the store boundary, so both-absent cannot occur here.
  pub fn provenance(&self) -> Provenance {
    match (self.external_id.is_some(), self.local_username.is_some()) {
      (true, true) => Provenance::Both,
      (true, false) => Provenance::External,
      _ => Provenance::Local,
    }
  }
}

// ─── NewSyncedUser ───────────────────────────────────────────────────────────

/// Input to [`crate::store::RecordStore::upsert_user`] — a user as described
/// by a Core lifecycle event.
#[derive(Debug, Clone)]
pub struct NewSyncedUser {
  pub external_id:   String,
  pub display_name:  Option<String>,
  pub country:       Option<String>,
  pub registered_at: Option<DateTime<Utc>>,
}

/// Which session timestamp a session event updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMark {
  Login,
  Logout,
}
