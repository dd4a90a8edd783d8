//! Inbound event normalization.
//!
//! Producers publish two body shapes: a bare entity payload, or a
//! CloudEvents-ish envelope with the payload under `data` — and some older
//! producers wrap it a second time (`data.data`). [`unwrap_payload`] accepts
//! nesting depth 0, 1, or 2 and the typed payload structs absorb the legacy
//! field aliases, so handler logic never touches raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{Error, Result, publication::PublicationKind, user::NewSyncedUser};

// ─── Routing keys ────────────────────────────────────────────────────────────

/// Routing-key namespace — the first dot-segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
  Users,
  Reviews,
}

impl Namespace {
  /// Prefix match. The user namespace has a legacy spelling still emitted by
  /// older Core deployments.
  pub fn of(routing_key: &str) -> Option<Self> {
    if routing_key.starts_with("users.") || routing_key.starts_with("usuarios.") {
      Some(Self::Users)
    } else if routing_key.starts_with("resenas.") {
      Some(Self::Reviews)
    } else {
      None
    }
  }
}

/// User lifecycle events, selected by exact routing-key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEventKind {
  Created,
  SessionStarted,
  SessionEnded,
}

impl UserEventKind {
  pub fn from_routing_key(key: &str) -> Option<Self> {
    match key.split_once('.').map(|(_, rest)| rest) {
      Some("usuario.creado") => Some(Self::Created),
      Some("sesion.iniciada") => Some(Self::SessionStarted),
      Some("sesion.finalizada") => Some(Self::SessionEnded),
      _ => None,
    }
  }
}

/// Review lifecycle events, selected by exact routing-key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEventKind {
  Created,
  Updated,
  Deleted,
}

impl ReviewEventKind {
  pub fn from_routing_key(key: &str) -> Option<Self> {
    match key.split_once('.').map(|(_, rest)| rest) {
      Some("resena.creada") => Some(Self::Created),
      Some("resena.actualizada") => Some(Self::Updated),
      Some("resena.eliminada") => Some(Self::Deleted),
      _ => None,
    }
  }
}

// ─── Envelope unwrapping ─────────────────────────────────────────────────────

/// Descend through up to two levels of `data` wrapping and return the entity
/// payload object.
pub fn unwrap_payload(body: &Value) -> &Value {
  let mut payload = body;
  for _ in 0..2 {
    match payload.get("data") {
      Some(inner) if inner.is_object() => payload = inner,
      _ => break,
    }
  }
  payload
}

/// Best-effort event timestamp: the payload's `created_at`, falling back to
/// the envelope's `timestamp`.
pub fn occurred_at(body: &Value) -> Option<DateTime<Utc>> {
  let payload = unwrap_payload(body);
  parse_dt_field(payload.get("created_at"))
    .or_else(|| parse_dt_field(body.get("timestamp")))
}

fn parse_dt_field(value: Option<&Value>) -> Option<DateTime<Utc>> {
  value
    .and_then(Value::as_str)
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc))
}

// ─── Flexible scalar decoding ────────────────────────────────────────────────

/// Core ids arrive as either JSON strings or numbers; canonicalise to String.
fn flexible_id<'de, D>(de: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(i64),
  }
  Ok(match Raw::deserialize(de)? {
    Raw::Text(s) => s,
    Raw::Number(n) => n.to_string(),
  })
}

fn flexible_id_opt<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(i64),
  }
  Ok(Option::<Raw>::deserialize(de)?.map(|raw| match raw {
    Raw::Text(s) => s,
    Raw::Number(n) => n.to_string(),
  }))
}

// ─── User events ─────────────────────────────────────────────────────────────

/// Entity payload of a user lifecycle event, after unwrapping and alias
/// resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
  /// Core-assigned user id (`id` or legacy `idUsuario`).
  #[serde(alias = "idUsuario", deserialize_with = "flexible_id")]
  pub id:           String,
  #[serde(default, alias = "nombre")]
  pub display_name: Option<String>,
  #[serde(default, alias = "pais")]
  pub country:      Option<String>,
  #[serde(default)]
  pub email:        Option<String>,
  #[serde(default)]
  pub created_at:   Option<DateTime<Utc>>,
}

/// A normalized user event: typed payload plus the event timestamp.
#[derive(Debug, Clone)]
pub struct UserEvent {
  pub payload:     UserPayload,
  pub occurred_at: Option<DateTime<Utc>>,
}

impl UserEvent {
  /// Parse and normalize from a raw message body.
  pub fn from_body(body: &Value) -> Result<Self> {
    let payload = UserPayload::deserialize(unwrap_payload(body))?;
    let occurred_at = occurred_at(body);
    Ok(Self { payload, occurred_at })
  }

  /// The create-path input derived from this event. Also used by the
  /// session-start self-healing fallback.
  pub fn as_new_user(&self) -> NewSyncedUser {
    NewSyncedUser {
      external_id:   self.payload.id.clone(),
      display_name:  self.payload.display_name.clone(),
      country:       self.payload.country.clone(),
      registered_at: self.payload.created_at.or(self.occurred_at),
    }
  }
}

// ─── Review events ───────────────────────────────────────────────────────────

/// Entity payload of a review lifecycle event. All fields except the id are
/// optional so the same shape serves create, partial update, and delete.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewPayload {
  /// Core-assigned review id (`id` or legacy `idResena`).
  #[serde(alias = "idResena")]
  pub id:           i64,
  #[serde(default, alias = "idUsuario", deserialize_with = "flexible_id_opt")]
  pub user_id:      Option<String>,
  #[serde(default, alias = "idPelicula")]
  pub movie_id:     Option<i64>,
  #[serde(default, alias = "tipo")]
  pub kind:         Option<String>,
  #[serde(default, alias = "titulo")]
  pub title:        Option<String>,
  #[serde(default, alias = "contenido")]
  pub body:         Option<String>,
  #[serde(default)]
  pub rating:       Option<i64>,
  #[serde(default)]
  pub has_spoilers: Option<bool>,
  #[serde(default)]
  pub tags:         Option<Vec<String>>,
  #[serde(default)]
  pub created_at:   Option<DateTime<Utc>>,
}

/// A normalized review event.
#[derive(Debug, Clone)]
pub struct ReviewEvent {
  pub payload:     ReviewPayload,
  pub occurred_at: Option<DateTime<Utc>>,
}

impl ReviewEvent {
  /// Parse, normalize, and validate from a raw message body.
  pub fn from_body(body: &Value) -> Result<Self> {
    let payload = ReviewPayload::deserialize(unwrap_payload(body))?;
    if let Some(r) = payload.rating
      && !(1..=5).contains(&r)
    {
      return Err(Error::RatingOutOfRange(r));
    }
    let occurred_at = occurred_at(body);
    Ok(Self { payload, occurred_at })
  }

  pub fn rating(&self) -> Option<u8> {
    // Validated to 1-5 in from_body.
    self.payload.rating.map(|r| r as u8)
  }

  /// The publication kind, when the payload names one. An absent kind stays
  /// unset in the store and defaults to a review at the read boundary, so a
  /// later event carrying the kind can still fill it.
  pub fn kind(&self) -> Result<Option<PublicationKind>> {
    self.payload.kind.as_deref().map(PublicationKind::parse).transpose()
  }

  /// The create-path input derived from this event. Also used by the
  /// update-miss self-healing fallback, where the body may be absent.
  pub fn as_new_publication(&self) -> Result<crate::publication::NewPublication> {
    Ok(crate::publication::NewPublication {
      external_review_id: self.payload.id,
      external_author_id: self.payload.user_id.clone(),
      external_movie_id:  self.payload.movie_id,
      kind:               self.kind()?,
      title:              self.payload.title.clone(),
      body:               self.payload.body.clone().unwrap_or_default(),
      rating:             self.rating(),
      has_spoilers:       self.payload.has_spoilers,
      tags:               self.payload.tags.clone().unwrap_or_default(),
      created_at:         self.payload.created_at.or(self.occurred_at),
    })
  }

  /// The partial-update input derived from this event — only the fields the
  /// payload carries.
  pub fn as_patch(&self) -> Result<crate::publication::PublicationPatch> {
    Ok(crate::publication::PublicationPatch {
      kind:               self.kind()?,
      title:              self.payload.title.clone(),
      body:               self.payload.body.clone(),
      rating:             self.rating(),
      has_spoilers:       self.payload.has_spoilers,
      tags:               self.payload.tags.clone(),
      external_movie_id:  self.payload.movie_id,
      external_author_id: self.payload.user_id.clone(),
    })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn namespace_prefix_match() {
    assert_eq!(Namespace::of("users.usuario.creado"), Some(Namespace::Users));
    assert_eq!(
      Namespace::of("usuarios.sesion.iniciada"),
      Some(Namespace::Users)
    );
    assert_eq!(
      Namespace::of("resenas.resena.creada"),
      Some(Namespace::Reviews)
    );
    assert_eq!(Namespace::of("pagos.cargo.creado"), None);
    assert_eq!(Namespace::of("users"), None);
  }

  #[test]
  fn exact_event_keys() {
    assert_eq!(
      UserEventKind::from_routing_key("users.usuario.creado"),
      Some(UserEventKind::Created)
    );
    assert_eq!(
      UserEventKind::from_routing_key("usuarios.sesion.finalizada"),
      Some(UserEventKind::SessionEnded)
    );
    assert_eq!(UserEventKind::from_routing_key("users.usuario.borrado"), None);
    assert_eq!(
      ReviewEventKind::from_routing_key("resenas.resena.actualizada"),
      Some(ReviewEventKind::Updated)
    );
    assert_eq!(
      ReviewEventKind::from_routing_key("resenas.resena.archivada"),
      None
    );
  }

  #[test]
  fn unwrap_depth_zero() {
    let body = json!({"id": 7, "body": "plain"});
    let review = ReviewEvent::from_body(&body).unwrap();
    assert_eq!(review.payload.id, 7);
    assert_eq!(review.payload.body.as_deref(), Some("plain"));
  }

  #[test]
  fn unwrap_depth_one_and_two() {
    let once = json!({"specversion": "1.0", "data": {"id": 8, "rating": 3}});
    let twice = json!({"data": {"data": {"id": 9, "rating": 4}}});

    assert_eq!(ReviewEvent::from_body(&once).unwrap().payload.id, 8);
    let deep = ReviewEvent::from_body(&twice).unwrap();
    assert_eq!(deep.payload.id, 9);
    assert_eq!(deep.rating(), Some(4));
  }

  #[test]
  fn legacy_field_aliases() {
    let body = json!({
      "idUsuario": 42,
      "nombre": "Ana",
      "pais": "AR",
    });
    let user = UserEvent::from_body(&body).unwrap();
    assert_eq!(user.payload.id, "42");
    assert_eq!(user.payload.display_name.as_deref(), Some("Ana"));

    let review = json!({"idResena": 5, "contenido": "bien"});
    let review = ReviewEvent::from_body(&review).unwrap();
    assert_eq!(review.payload.id, 5);
    assert_eq!(review.payload.body.as_deref(), Some("bien"));
  }

  #[test]
  fn user_id_accepts_string_or_number() {
    let a = UserEvent::from_body(&json!({"id": "u-1"})).unwrap();
    let b = UserEvent::from_body(&json!({"id": 31337})).unwrap();
    assert_eq!(a.payload.id, "u-1");
    assert_eq!(b.payload.id, "31337");
  }

  #[test]
  fn rating_out_of_range_rejected() {
    let err = ReviewEvent::from_body(&json!({"id": 1, "rating": 9})).unwrap_err();
    assert!(matches!(err, Error::RatingOutOfRange(9)));
  }

  #[test]
  fn occurred_at_prefers_payload_created_at() {
    let body = json!({
      "timestamp": "2024-01-01T00:00:00Z",
      "data": {"id": 1, "created_at": "2024-06-15T12:00:00Z"},
    });
    let at = occurred_at(&body).unwrap();
    assert_eq!(at.to_rfc3339(), "2024-06-15T12:00:00+00:00");
  }

  #[test]
  fn occurred_at_falls_back_to_envelope_timestamp() {
    let body = json!({
      "timestamp": "2024-01-01T00:00:00Z",
      "data": {"id": 1},
    });
    assert!(occurred_at(&body).is_some());
    assert!(occurred_at(&json!({"id": 1})).is_none());
  }

  #[test]
  fn update_payload_with_only_rating_patches_nothing_else() {
    let review = ReviewEvent::from_body(&json!({"id": 101, "rating": 5})).unwrap();
    let patch = review.as_patch().unwrap();
    assert_eq!(patch.rating, Some(5));
    assert!(patch.kind.is_none());
    assert!(patch.title.is_none());
    assert!(patch.body.is_none());
    assert!(patch.tags.is_none());
    assert!(!patch.is_empty());
  }

  #[test]
  fn kind_is_unset_unless_the_payload_carries_it() {
    let review = ReviewEvent::from_body(&json!({"id": 1})).unwrap();
    assert_eq!(review.kind().unwrap(), None);

    let rated = ReviewEvent::from_body(&json!({"id": 1, "kind": "rating"})).unwrap();
    assert_eq!(rated.kind().unwrap(), Some(PublicationKind::Rating));

    let bad = ReviewEvent::from_body(&json!({"id": 1, "kind": "essay"})).unwrap();
    assert!(matches!(
      bad.kind().unwrap_err(),
      Error::UnknownPublicationKind(_)
    ));
  }
}
