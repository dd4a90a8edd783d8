//! The unified publication record — reviews, ratings, and lists.
//!
//! Publications are dual-provenance: the REST layer creates them with local
//! references (`author_id`, `target_id`), Core sync events create them with
//! external identifiers. Internally the body is a single canonical field;
//! the legacy dual-column wire shape (`body_text` + `content`) exists only
//! at the store boundary (see [`WirePublication`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, user::Provenance};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// What flavour of publication this is. The discriminant string is stored in
/// the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationKind {
  Review,
  Rating,
  List,
}

impl PublicationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Review => "review",
      Self::Rating => "rating",
      Self::List => "list",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "review" => Ok(Self::Review),
      "rating" => Ok(Self::Rating),
      "list" => Ok(Self::List),
      other => Err(Error::UnknownPublicationKind(other.to_owned())),
    }
  }
}

// ─── Publication ─────────────────────────────────────────────────────────────

/// A publication, unified across both provenances.
///
/// Invariant: `external_review_id` is globally unique when present. A second
/// create for the same id reconciles to an update at the store level; callers
/// never see a uniqueness error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
  pub publication_id:     Uuid,
  /// Core-assigned review id; sparse, present only for synced rows.
  pub external_review_id: Option<i64>,
  /// Local author reference; populated at creation for local rows, or later
  /// by the lazy author-link pass for synced rows.
  pub author_id:          Option<Uuid>,
  pub external_author_id: Option<String>,
  pub kind:               PublicationKind,
  /// Local movie/show reference; sparse.
  pub target_id:          Option<Uuid>,
  pub external_movie_id:  Option<i64>,
  pub title:              Option<String>,
  /// Canonical review content. Stored once; persisted under both legacy
  /// column names.
  pub body:               String,
  /// 1-5 when present.
  pub rating:             Option<u8>,
  pub has_spoilers:       bool,
  pub tags:               Vec<String>,
  pub is_deleted:         bool,
  pub deleted_at:         Option<DateTime<Utc>>,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
  pub synced_at:          Option<DateTime<Utc>>,
}

impl Publication {
  /// Provenance of the authorship reference.
  pub fn author_provenance(&self) -> Provenance {
    match (self.external_author_id.is_some(), self.author_id.is_some()) {
      (true, true) => Provenance::Both,
      (true, false) => Provenance::External,
      _ => Provenance::Local,
    }
  }
}

// ─── NewPublication ──────────────────────────────────────────────────────────

/// Input to [`crate::store::RecordStore::insert_publication`] — a publication
/// as described by a Core `resena.creada` (or self-healed update) event.
#[derive(Debug, Clone)]
pub struct NewPublication {
  pub external_review_id: i64,
  pub external_author_id: Option<String>,
  pub external_movie_id:  Option<i64>,
  /// `None` when the payload carries no kind. Stored as NULL so a later
  /// create can still fill it; reads default to [`PublicationKind::Review`].
  pub kind:               Option<PublicationKind>,
  pub title:              Option<String>,
  pub body:               String,
  pub rating:             Option<u8>,
  /// `None` when the payload never stated it; reads default to `false`.
  pub has_spoilers:       Option<bool>,
  pub tags:               Vec<String>,
  /// Event-supplied creation timestamp; the store falls back to now.
  pub created_at:         Option<DateTime<Utc>>,
}

impl NewPublication {
  /// Reinterpret a create as a partial update — used when the record already
  /// exists and the duplicate create must reconcile to an update.
  pub fn as_patch(&self) -> PublicationPatch {
    PublicationPatch {
      kind:               self.kind,
      title:              self.title.clone(),
      body:               Some(self.body.clone()),
      rating:             self.rating,
      has_spoilers:       self.has_spoilers,
      tags:               Some(self.tags.clone()),
      external_movie_id:  self.external_movie_id,
      external_author_id: self.external_author_id.clone(),
    }
  }
}

// ─── PublicationPatch ────────────────────────────────────────────────────────

/// Partial update for [`crate::store::RecordStore::update_publication`].
/// `None` leaves the stored field untouched — omitted fields are never
/// nulled.
#[derive(Debug, Clone, Default)]
pub struct PublicationPatch {
  pub kind:               Option<PublicationKind>,
  pub title:              Option<String>,
  pub body:               Option<String>,
  pub rating:             Option<u8>,
  pub has_spoilers:       Option<bool>,
  pub tags:               Option<Vec<String>>,
  pub external_movie_id:  Option<i64>,
  pub external_author_id: Option<String>,
}

impl PublicationPatch {
  pub fn is_empty(&self) -> bool {
    self.kind.is_none()
      && self.title.is_none()
      && self.body.is_none()
      && self.rating.is_none()
      && self.has_spoilers.is_none()
      && self.tags.is_none()
      && self.external_movie_id.is_none()
      && self.external_author_id.is_none()
  }
}

// ─── WirePublication ─────────────────────────────────────────────────────────

/// The legacy read shape consumed by the REST layer: the body appears under
/// both historical field names. Produced only at the store boundary; internal
/// logic never carries the duplicated field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePublication {
  pub publication_id:     Uuid,
  pub external_review_id: Option<i64>,
  pub kind:               PublicationKind,
  pub title:              Option<String>,
  pub body_text:          String,
  /// Legacy alias; always identical to `body_text`.
  pub content:            String,
  pub rating:             Option<u8>,
  pub has_spoilers:       bool,
  pub tags:               Vec<String>,
  pub is_deleted:         bool,
}
