//! Column encoding helpers and raw-row intermediate structs.
//!
//! SQLite stores UUIDs and timestamps as TEXT and tags as a JSON array; this
//! module owns the translation in both directions.

use chrono::{DateTime, Utc};
use marquee_core::{
  publication::{Publication, PublicationKind, WirePublication},
  user::UserRecord,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalar encoders ─────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String {
  id.to_string()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn parse_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(parse_dt).transpose()
}

fn parse_uuid_opt(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(Uuid::parse_str).transpose().map_err(Error::Uuid)
}

fn parse_kind_opt(s: Option<&str>) -> Result<PublicationKind> {
  Ok(
    s.map(PublicationKind::parse)
      .transpose()
      .map_err(Error::Core)?
      .unwrap_or(PublicationKind::Review),
  )
}

pub fn encode_tags(tags: &[String]) -> Result<String> {
  Ok(serde_json::to_string(tags)?)
}

pub fn decode_tags(s: &str) -> Result<Vec<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `users` row as read from SQLite, before decoding.
pub struct RawUser {
  pub user_id:        String,
  pub external_id:    Option<String>,
  pub local_username: Option<String>,
  pub local_email:    Option<String>,
  pub display_name:   Option<String>,
  pub country:        Option<String>,
  pub registered_at:  Option<String>,
  pub last_login_at:  Option<String>,
  pub last_logout_at: Option<String>,
  pub synced_at:      Option<String>,
}

impl RawUser {
  pub fn into_user(self) -> Result<UserRecord> {
    if self.external_id.is_none() && self.local_username.is_none() {
      return Err(Error::Core(marquee_core::Error::MissingIdentity));
    }
    Ok(UserRecord {
      user_id:        Uuid::parse_str(&self.user_id)?,
      external_id:    self.external_id,
      local_username: self.local_username,
      local_email:    self.local_email,
      display_name:   self.display_name,
      country:        self.country,
      registered_at:  parse_dt_opt(self.registered_at)?,
      last_login_at:  parse_dt_opt(self.last_login_at)?,
      last_logout_at: parse_dt_opt(self.last_logout_at)?,
      synced_at:      parse_dt_opt(self.synced_at)?,
    })
  }
}

/// A `publications` row as read from SQLite, before decoding. `kind` and
/// `has_spoilers` are NULL when no event has stated them yet; the decode
/// defaults them so callers always see a concrete value.
pub struct RawPublication {
  pub publication_id:     String,
  pub external_review_id: Option<i64>,
  pub author_id:          Option<String>,
  pub external_author_id: Option<String>,
  pub kind:               Option<String>,
  pub target_id:          Option<String>,
  pub external_movie_id:  Option<i64>,
  pub title:              Option<String>,
  pub body_text:          String,
  pub content:            String,
  pub rating:             Option<i64>,
  pub has_spoilers:       Option<bool>,
  pub tags:               String,
  pub is_deleted:         bool,
  pub deleted_at:         Option<String>,
  pub created_at:         String,
  pub updated_at:         String,
  pub synced_at:          Option<String>,
}

impl RawPublication {
  pub fn into_publication(self) -> Result<Publication> {
    Ok(Publication {
      publication_id:     Uuid::parse_str(&self.publication_id)?,
      external_review_id: self.external_review_id,
      author_id:          parse_uuid_opt(self.author_id)?,
      external_author_id: self.external_author_id,
      kind:               parse_kind_opt(self.kind.as_deref())?,
      target_id:          parse_uuid_opt(self.target_id)?,
      external_movie_id:  self.external_movie_id,
      title:              self.title,
      body:               self.body_text,
      rating:             self.rating.map(|r| r as u8),
      has_spoilers:       self.has_spoilers.unwrap_or(false),
      tags:               decode_tags(&self.tags)?,
      is_deleted:         self.is_deleted,
      deleted_at:         parse_dt_opt(self.deleted_at)?,
      created_at:         parse_dt(&self.created_at)?,
      updated_at:         parse_dt(&self.updated_at)?,
      synced_at:          parse_dt_opt(self.synced_at)?,
    })
  }

  pub fn into_wire(self) -> Result<WirePublication> {
    Ok(WirePublication {
      publication_id:     Uuid::parse_str(&self.publication_id)?,
      external_review_id: self.external_review_id,
      kind:               parse_kind_opt(self.kind.as_deref())?,
      title:              self.title,
      body_text:          self.body_text,
      content:            self.content,
      rating:             self.rating.map(|r| r as u8),
      has_spoilers:       self.has_spoilers.unwrap_or(false),
      tags:               decode_tags(&self.tags)?,
      is_deleted:         self.is_deleted,
    })
  }
}
