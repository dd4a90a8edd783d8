//! The `RecordStore` trait and operation outcome types.
//!
//! The trait is implemented by storage backends (e.g.
//! `marquee-store-sqlite`). The consumer depends on this abstraction, not on
//! any concrete backend.
//!
//! Expected reconciliation cases are modelled as outcome variants, not
//! errors: a duplicate create surfaces as [`UpsertOutcome::Updated`], an
//! update miss as [`UpdateOutcome::NotFound`]. Handlers switch on the
//! variant; only genuinely unexpected failures travel the error channel.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  publication::{NewPublication, Publication, PublicationPatch, WirePublication},
  user::{NewSyncedUser, SessionMark, UserRecord},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of an idempotent create-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
  Created,
  /// The record already existed; the write reconciled to an update.
  Updated,
}

/// Result of an update keyed by external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
  Updated,
  /// No record with that external id exists. Callers decide whether this
  /// triggers a self-healing create or a benign no-op.
  NotFound,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the unified record store.
///
/// All operations are idempotent with respect to redelivery of the same
/// event. All methods return `Send` futures so the trait can be used from a
/// multi-threaded tokio runtime.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Create-or-update a user keyed by external id. Never fails on "already
  /// exists"; an existing record is merged field-by-field (present payload
  /// fields win, absent ones are left untouched).
  fn upsert_user(
    &self,
    input: NewSyncedUser,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + '_;

  /// Stamp `last_login_at` or `last_logout_at` on the user with the given
  /// external id.
  fn touch_session<'a>(
    &'a self,
    external_id: &'a str,
    mark: SessionMark,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + 'a;

  /// Fetch by Core-assigned id. Returns `None` if not found.
  fn get_user_by_external_id<'a>(
    &'a self,
    external_id: &'a str,
  ) -> impl Future<Output = Result<Option<UserRecord>, Self::Error>> + Send + 'a;

  /// Fetch by local identity. Returns `None` if not found.
  fn get_user_by_username<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<UserRecord>, Self::Error>> + Send + 'a;

  // ── Publications ──────────────────────────────────────────────────────

  /// Insert keyed by `external_review_id`. A duplicate id reconciles to a
  /// full-payload update and reports [`UpsertOutcome::Updated`].
  fn insert_publication(
    &self,
    input: NewPublication,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + '_;

  /// Partial update by external id; only fields present in the patch are
  /// written. A body write updates both legacy columns in the same
  /// statement.
  fn update_publication(
    &self,
    external_review_id: i64,
    patch: PublicationPatch,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + '_;

  /// Soft-delete by external id: sets `is_deleted` and refreshes
  /// `deleted_at` to the event timestamp. Idempotent.
  fn soft_delete_publication(
    &self,
    external_review_id: i64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + '_;

  /// Hard delete — an explicit alternate path. Never invoked by event
  /// processing, which soft-deletes only.
  fn hard_delete_publication(
    &self,
    external_review_id: i64,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + '_;

  /// Fetch by Core-assigned review id. Soft-deleted records are still
  /// returned.
  fn get_publication_by_external_id(
    &self,
    external_review_id: i64,
  ) -> impl Future<Output = Result<Option<Publication>, Self::Error>> + Send + '_;

  /// The legacy dual-field read shape for the REST layer.
  fn get_publication_wire(
    &self,
    external_review_id: i64,
  ) -> impl Future<Output = Result<Option<WirePublication>, Self::Error>> + Send + '_;

  // ── Cross-linking ─────────────────────────────────────────────────────

  /// Lazy author link: resolve the publication's `external_author_id` to a
  /// local user reference if a matching synced user exists. Returns `true`
  /// when a link was written. Best-effort; callers log and swallow errors
  /// so the primary write is never blocked.
  fn link_author(
    &self,
    external_review_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
