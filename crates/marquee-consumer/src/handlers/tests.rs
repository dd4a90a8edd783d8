//! Handler tests driven through the router against an in-memory store.

use marquee_core::{publication::PublicationKind, store::RecordStore};
use marquee_store_sqlite::SqliteStore;
use serde_json::json;

use crate::{
  Error,
  handlers::{reviews::ReviewOutcome, users::UserOutcome},
  router::{Dispatch, dispatch},
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn user_created_then_redelivered() {
  let s = store().await;
  let body = json!({"id": "u1", "nombre": "Ana", "pais": "AR"});

  let first = dispatch(&s, "users.usuario.creado", &body).await.unwrap();
  assert_eq!(first, Dispatch::User(UserOutcome::Created));

  let second = dispatch(&s, "users.usuario.creado", &body).await.unwrap();
  assert_eq!(second, Dispatch::User(UserOutcome::Updated));

  let user = s.get_user_by_external_id("u1").await.unwrap().unwrap();
  assert_eq!(user.display_name.as_deref(), Some("Ana"));
}

#[tokio::test]
async fn session_start_heals_missing_user() {
  let s = store().await;
  let body = json!({
    "timestamp": "2024-03-10T09:00:00Z",
    "data": {"idUsuario": "u2", "nombre": "Bo"},
  });

  let outcome = dispatch(&s, "users.sesion.iniciada", &body).await.unwrap();
  assert_eq!(outcome, Dispatch::User(UserOutcome::HealedFromSession));

  let user = s.get_user_by_external_id("u2").await.unwrap().unwrap();
  assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn session_end_for_unknown_user_is_a_noop() {
  let s = store().await;
  let body = json!({"id": "ghost"});

  let outcome = dispatch(&s, "users.sesion.finalizada", &body).await.unwrap();
  assert_eq!(outcome, Dispatch::User(UserOutcome::UnknownUserIgnored));
  assert!(s.get_user_by_external_id("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn session_cycle_stamps_both_marks() {
  let s = store().await;
  dispatch(&s, "users.usuario.creado", &json!({"id": "u3"}))
    .await
    .unwrap();
  dispatch(
    &s,
    "usuarios.sesion.iniciada",
    &json!({"id": "u3", "created_at": "2024-03-10T09:00:00Z"}),
  )
  .await
  .unwrap();
  let outcome = dispatch(
    &s,
    "usuarios.sesion.finalizada",
    &json!({"id": "u3", "created_at": "2024-03-10T10:00:00Z"}),
  )
  .await
  .unwrap();
  assert_eq!(outcome, Dispatch::User(UserOutcome::LogoutMarked));

  let user = s.get_user_by_external_id("u3").await.unwrap().unwrap();
  assert!(user.last_logout_at > user.last_login_at);
}

// ─── Reviews: the documented example scenario ────────────────────────────────

#[tokio::test]
async fn review_create_update_delete_scenario() {
  let s = store().await;

  let create = json!({"data": {
    "id": 101, "movie_id": 25, "user_id": "u123",
    "title": "T", "body": "B", "rating": 4,
    "has_spoilers": false, "tags": ["x"],
  }});
  let outcome = dispatch(&s, "resenas.resena.creada", &create).await.unwrap();
  assert_eq!(outcome, Dispatch::Review(ReviewOutcome::Created));

  let p = s.get_publication_by_external_id(101).await.unwrap().unwrap();
  assert_eq!(p.body, "B");
  assert_eq!(p.rating, Some(4));
  assert!(!p.is_deleted);

  let wire = s.get_publication_wire(101).await.unwrap().unwrap();
  assert_eq!(wire.body_text, "B");
  assert_eq!(wire.content, "B");

  let update = json!({"data": {"id": 101, "rating": 5}});
  let outcome = dispatch(&s, "resenas.resena.actualizada", &update)
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Review(ReviewOutcome::Updated));

  let p = s.get_publication_by_external_id(101).await.unwrap().unwrap();
  assert_eq!(p.rating, Some(5));
  assert_eq!(p.body, "B");

  let delete = json!({"data": {"id": 101}});
  let outcome = dispatch(&s, "resenas.resena.eliminada", &delete)
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Review(ReviewOutcome::SoftDeleted));

  let p = s.get_publication_by_external_id(101).await.unwrap().unwrap();
  assert!(p.is_deleted);
  assert!(p.deleted_at.is_some());
}

#[tokio::test]
async fn duplicate_create_reconciles() {
  let s = store().await;
  let body = json!({"id": 7, "body": "hola", "rating": 3});

  dispatch(&s, "resenas.resena.creada", &body).await.unwrap();
  let second = dispatch(&s, "resenas.resena.creada", &body).await.unwrap();
  assert_eq!(second, Dispatch::Review(ReviewOutcome::ReconciledToUpdate));
}

#[tokio::test]
async fn update_before_create_heals_and_converges() {
  let s = store().await;

  let update = json!({"id": 8, "rating": 5});
  let outcome = dispatch(&s, "resenas.resena.actualizada", &update)
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Review(ReviewOutcome::HealedFromUpdate));

  let create = json!({"id": 8, "title": "T", "body": "B", "rating": 4, "tags": ["x"]});
  dispatch(&s, "resenas.resena.creada", &create).await.unwrap();

  // Same final state as create-then-update.
  let p = s.get_publication_by_external_id(8).await.unwrap().unwrap();
  assert_eq!(p.rating, Some(5));
  assert_eq!(p.title.as_deref(), Some("T"));
  assert_eq!(p.body, "B");
  assert_eq!(p.tags, vec!["x".to_owned()]);
}

#[tokio::test]
async fn order_tolerance_covers_spoilers_and_kind() {
  let s1 = store().await;
  let s2 = store().await;

  let create = json!({"id": 8, "body": "B", "has_spoilers": true, "kind": "rating"});
  let update = json!({"id": 8, "rating": 5});

  dispatch(&s1, "resenas.resena.creada", &create).await.unwrap();
  dispatch(&s1, "resenas.resena.actualizada", &update)
    .await
    .unwrap();

  dispatch(&s2, "resenas.resena.actualizada", &update)
    .await
    .unwrap();
  dispatch(&s2, "resenas.resena.creada", &create).await.unwrap();

  let a = s1.get_publication_by_external_id(8).await.unwrap().unwrap();
  let b = s2.get_publication_by_external_id(8).await.unwrap().unwrap();
  assert!(a.has_spoilers);
  assert_eq!(a.has_spoilers, b.has_spoilers);
  assert_eq!(a.kind, PublicationKind::Rating);
  assert_eq!(a.kind, b.kind);
  assert_eq!(a.rating, b.rating);
  assert_eq!(a.body, b.body);
}

#[tokio::test]
async fn delete_for_unknown_review_creates_no_tombstone() {
  let s = store().await;
  let outcome = dispatch(&s, "resenas.resena.eliminada", &json!({"id": 404}))
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Review(ReviewOutcome::UnknownReviewIgnored));
  assert!(s.get_publication_by_external_id(404).await.unwrap().is_none());
}

#[tokio::test]
async fn author_links_once_user_is_synced() {
  let s = store().await;

  let create = json!({"id": 9, "user_id": "u123", "body": "B"});
  dispatch(&s, "resenas.resena.creada", &create).await.unwrap();

  let p = s.get_publication_by_external_id(9).await.unwrap().unwrap();
  assert!(p.author_id.is_none());

  dispatch(&s, "users.usuario.creado", &json!({"id": "u123"}))
    .await
    .unwrap();

  // The next review event for the same id retries the link.
  dispatch(&s, "resenas.resena.actualizada", &json!({"id": 9, "rating": 2}))
    .await
    .unwrap();

  let p = s.get_publication_by_external_id(9).await.unwrap().unwrap();
  assert!(p.author_id.is_some());
}

// ─── Dispatch edges ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_namespace_is_ignored_without_mutation() {
  let s = store().await;
  let outcome = dispatch(&s, "pagos.cargo.creado", &json!({"id": 1}))
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Ignored);
  assert!(s.get_publication_by_external_id(1).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_key_within_known_namespace_is_ignored() {
  let s = store().await;
  let outcome = dispatch(&s, "resenas.resena.archivada", &json!({"id": 1}))
    .await
    .unwrap();
  assert_eq!(outcome, Dispatch::Ignored);
}

#[tokio::test]
async fn invalid_payload_surfaces_as_event_error() {
  let s = store().await;
  let err = dispatch(&s, "resenas.resena.creada", &json!({"id": 1, "rating": 11}))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Event(_)));

  // A payload with no id at all fails normalization too.
  let err = dispatch(&s, "resenas.resena.creada", &json!({"rating": 3}))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Event(_)));
}
