//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use marquee_core::{
  publication::{NewPublication, Publication, PublicationPatch, WirePublication},
  store::{RecordStore, UpdateOutcome, UpsertOutcome},
  user::{NewSyncedUser, SessionMark, UserRecord},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawPublication, RawUser, encode_dt, encode_tags, encode_uuid},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Marquee record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Patch encoding ──────────────────────────────────────────────────────────

/// A [`PublicationPatch`] with columns pre-encoded for SQLite.
struct PatchRow {
  kind:               Option<String>,
  title:              Option<String>,
  body:               Option<String>,
  rating:             Option<i64>,
  has_spoilers:       Option<i64>,
  tags:               Option<String>,
  external_movie_id:  Option<i64>,
  external_author_id: Option<String>,
  touched_at:         String,
}

impl PatchRow {
  fn encode(patch: &PublicationPatch, at: DateTime<Utc>) -> Result<Self> {
    Ok(Self {
      kind:               patch.kind.map(|k| k.as_str().to_owned()),
      title:              patch.title.clone(),
      body:               patch.body.clone(),
      rating:             patch.rating.map(i64::from),
      has_spoilers:       patch.has_spoilers.map(i64::from),
      tags:               patch.tags.as_deref().map(encode_tags).transpose()?,
      external_movie_id:  patch.external_movie_id,
      external_author_id: patch.external_author_id.clone(),
      touched_at:         encode_dt(at),
    })
  }
}

/// Apply a pre-encoded patch; the SET clause carries only present fields, so
/// omitted fields are never nulled. A body write updates `body_text` and the
/// legacy `content` column in the same statement.
fn apply_patch(
  conn: &rusqlite::Connection,
  external_review_id: i64,
  row: &PatchRow,
) -> rusqlite::Result<usize> {
  let mut sets: Vec<&'static str> =
    vec!["updated_at = :touched_at", "synced_at = :touched_at"];
  let mut params: Vec<(&'static str, &dyn rusqlite::ToSql)> = vec![
    (":id", &external_review_id),
    (":touched_at", &row.touched_at),
  ];

  if let Some(ref v) = row.kind {
    sets.push("kind = :kind");
    params.push((":kind", v));
  }
  if let Some(ref v) = row.title {
    sets.push("title = :title");
    params.push((":title", v));
  }
  if let Some(ref v) = row.body {
    sets.push("body_text = :body");
    sets.push("content = :body");
    params.push((":body", v));
  }
  if let Some(ref v) = row.rating {
    sets.push("rating = :rating");
    params.push((":rating", v));
  }
  if let Some(ref v) = row.has_spoilers {
    sets.push("has_spoilers = :has_spoilers");
    params.push((":has_spoilers", v));
  }
  if let Some(ref v) = row.tags {
    sets.push("tags = :tags");
    params.push((":tags", v));
  }
  if let Some(ref v) = row.external_movie_id {
    sets.push("external_movie_id = :external_movie_id");
    params.push((":external_movie_id", v));
  }
  if let Some(ref v) = row.external_author_id {
    sets.push("external_author_id = :external_author_id");
    params.push((":external_author_id", v));
  }

  let sql = format!(
    "UPDATE publications SET {} WHERE external_review_id = :id",
    sets.join(", ")
  );
  conn.execute(&sql, &params[..])
}

/// Reconcile a duplicate create against the existing row.
///
/// Fill-only merge: columns already carrying data win over the incoming
/// payload, so a redelivered or late-arriving create can complete a
/// self-healed skeleton record but never clobbers a newer update. All SET
/// expressions read the pre-update row, so the body/content pair stays
/// consistent.
fn reconcile_duplicate_create(
  conn: &rusqlite::Connection,
  external_review_id: i64,
  row: &PatchRow,
) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE publications SET
       kind               = COALESCE(kind, :kind),
       title              = COALESCE(title, :title),
       body_text          = CASE WHEN body_text = '' THEN :body ELSE body_text END,
       content            = CASE WHEN body_text = '' THEN :body ELSE content END,
       rating             = COALESCE(rating, :rating),
       has_spoilers       = COALESCE(has_spoilers, :spoilers),
       tags               = CASE WHEN tags = '[]' THEN :tags ELSE tags END,
       external_movie_id  = COALESCE(external_movie_id, :movie_id),
       external_author_id = COALESCE(external_author_id, :author_id),
       updated_at         = :touched_at,
       synced_at          = :touched_at
     WHERE external_review_id = :id",
    rusqlite::named_params! {
      ":id":         external_review_id,
      ":kind":       row.kind,
      ":title":      row.title,
      ":body":       row.body.as_deref().unwrap_or(""),
      ":rating":     row.rating,
      ":spoilers":   row.has_spoilers,
      ":tags":       row.tags.as_deref().unwrap_or("[]"),
      ":movie_id":   row.external_movie_id,
      ":author_id":  row.external_author_id,
      ":touched_at": row.touched_at,
    },
  )
}

// ─── Row readers ─────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "user_id, external_id, local_username, local_email,
   display_name, country, registered_at, last_login_at, last_logout_at,
   synced_at";

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
  Ok(RawUser {
    user_id:        row.get(0)?,
    external_id:    row.get(1)?,
    local_username: row.get(2)?,
    local_email:    row.get(3)?,
    display_name:   row.get(4)?,
    country:        row.get(5)?,
    registered_at:  row.get(6)?,
    last_login_at:  row.get(7)?,
    last_logout_at: row.get(8)?,
    synced_at:      row.get(9)?,
  })
}

const PUBLICATION_COLUMNS: &str = "publication_id, external_review_id,
   author_id, external_author_id, kind, target_id, external_movie_id, title,
   body_text, content, rating, has_spoilers, tags, is_deleted, deleted_at,
   created_at, updated_at, synced_at";

fn read_publication(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPublication> {
  Ok(RawPublication {
    publication_id:     row.get(0)?,
    external_review_id: row.get(1)?,
    author_id:          row.get(2)?,
    external_author_id: row.get(3)?,
    kind:               row.get(4)?,
    target_id:          row.get(5)?,
    external_movie_id:  row.get(6)?,
    title:              row.get(7)?,
    body_text:          row.get(8)?,
    content:            row.get(9)?,
    rating:             row.get(10)?,
    has_spoilers:       row.get(11)?,
    tags:               row.get(12)?,
    is_deleted:         row.get(13)?,
    deleted_at:         row.get(14)?,
    created_at:         row.get(15)?,
    updated_at:         row.get(16)?,
    synced_at:          row.get(17)?,
  })
}

impl SqliteStore {
  async fn fetch_publication_raw(
    &self,
    external_review_id: i64,
  ) -> Result<Option<RawPublication>> {
    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {PUBLICATION_COLUMNS} FROM publications
           WHERE external_review_id = ?1"
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![external_review_id], read_publication)
            .optional()?,
        )
      })
      .await?;
    Ok(raw)
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn upsert_user(&self, input: NewSyncedUser) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let user_id_str = encode_uuid(Uuid::new_v4());
    let synced_str = encode_dt(now);
    let registered_str = input.registered_at.map(encode_dt);

    let outcome = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO users (
             user_id, external_id, display_name, country, registered_at,
             synced_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(external_id) DO NOTHING",
          rusqlite::params![
            user_id_str,
            input.external_id,
            input.display_name,
            input.country,
            registered_str,
            synced_str,
          ],
        )?;

        if inserted == 1 {
          return Ok(UpsertOutcome::Created);
        }

        // Merge: present payload fields win, absent ones stay untouched.
        conn.execute(
          "UPDATE users SET
             display_name  = COALESCE(?2, display_name),
             country       = COALESCE(?3, country),
             registered_at = COALESCE(?4, registered_at),
             synced_at     = ?5
           WHERE external_id = ?1",
          rusqlite::params![
            input.external_id,
            input.display_name,
            input.country,
            registered_str,
            synced_str,
          ],
        )?;
        Ok(UpsertOutcome::Updated)
      })
      .await?;

    Ok(outcome)
  }

  async fn touch_session(
    &self,
    external_id: &str,
    mark: SessionMark,
    at: DateTime<Utc>,
  ) -> Result<UpdateOutcome> {
    let external_id = external_id.to_owned();
    let at_str = encode_dt(at);
    let column = match mark {
      SessionMark::Login => "last_login_at",
      SessionMark::Logout => "last_logout_at",
    };

    let changed = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "UPDATE users SET {column} = ?2, synced_at = ?2
           WHERE external_id = ?1"
        );
        Ok(conn.execute(&sql, rusqlite::params![external_id, at_str])?)
      })
      .await?;

    Ok(if changed == 1 {
      UpdateOutcome::Updated
    } else {
      UpdateOutcome::NotFound
    })
  }

  async fn get_user_by_external_id(
    &self,
    external_id: &str,
  ) -> Result<Option<UserRecord>> {
    let external_id = external_id.to_owned();
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![external_id], read_user)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
    let username = username.to_owned();
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {USER_COLUMNS} FROM users WHERE local_username = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![username], read_user)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  // ── Publications ──────────────────────────────────────────────────────────

  async fn insert_publication(&self, input: NewPublication) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let publication_id_str = encode_uuid(Uuid::new_v4());
    let created_str = encode_dt(input.created_at.unwrap_or(now));
    let now_str = encode_dt(now);
    let kind_str = input.kind.map(|k| k.as_str().to_owned());
    let tags_str = encode_tags(&input.tags)?;
    let rating = input.rating.map(i64::from);
    let has_spoilers = input.has_spoilers.map(i64::from);
    let reconcile = PatchRow::encode(&input.as_patch(), now)?;
    let external_review_id = input.external_review_id;

    let outcome = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO publications (
             publication_id, external_review_id, external_author_id, kind,
             external_movie_id, title, body_text, content, rating,
             has_spoilers, tags, created_at, updated_at, synced_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
           ON CONFLICT(external_review_id) DO NOTHING",
          rusqlite::params![
            publication_id_str,
            external_review_id,
            input.external_author_id,
            kind_str,
            input.external_movie_id,
            input.title,
            input.body,
            rating,
            has_spoilers,
            tags_str,
            created_str,
            now_str,
          ],
        )?;

        if inserted == 1 {
          return Ok(UpsertOutcome::Created);
        }

        // Duplicate external id: reconcile the redelivered or out-of-order
        // create to an update of the existing row.
        reconcile_duplicate_create(conn, external_review_id, &reconcile)?;
        Ok(UpsertOutcome::Updated)
      })
      .await?;

    Ok(outcome)
  }

  async fn update_publication(
    &self,
    external_review_id: i64,
    patch: PublicationPatch,
  ) -> Result<UpdateOutcome> {
    let row = PatchRow::encode(&patch, Utc::now())?;

    let changed = self
      .conn
      .call(move |conn| Ok(apply_patch(conn, external_review_id, &row)?))
      .await?;

    Ok(if changed == 1 {
      UpdateOutcome::Updated
    } else {
      UpdateOutcome::NotFound
    })
  }

  async fn soft_delete_publication(
    &self,
    external_review_id: i64,
    at: DateTime<Utc>,
  ) -> Result<UpdateOutcome> {
    let at_str = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE publications
           SET is_deleted = 1, deleted_at = ?2, updated_at = ?2, synced_at = ?2
           WHERE external_review_id = ?1",
          rusqlite::params![external_review_id, at_str],
        )?)
      })
      .await?;

    Ok(if changed == 1 {
      UpdateOutcome::Updated
    } else {
      UpdateOutcome::NotFound
    })
  }

  async fn hard_delete_publication(
    &self,
    external_review_id: i64,
  ) -> Result<UpdateOutcome> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM publications WHERE external_review_id = ?1",
          rusqlite::params![external_review_id],
        )?)
      })
      .await?;

    Ok(if changed == 1 {
      UpdateOutcome::Updated
    } else {
      UpdateOutcome::NotFound
    })
  }

  async fn get_publication_by_external_id(
    &self,
    external_review_id: i64,
  ) -> Result<Option<Publication>> {
    self
      .fetch_publication_raw(external_review_id)
      .await?
      .map(RawPublication::into_publication)
      .transpose()
  }

  async fn get_publication_wire(
    &self,
    external_review_id: i64,
  ) -> Result<Option<WirePublication>> {
    self
      .fetch_publication_raw(external_review_id)
      .await?
      .map(RawPublication::into_wire)
      .transpose()
  }

  // ── Cross-linking ─────────────────────────────────────────────────────────

  async fn link_author(&self, external_review_id: i64) -> Result<bool> {
    // One atomic statement: only links when the row is still unlinked and a
    // synced user with the matching external id exists.
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE publications
           SET author_id = (
             SELECT user_id FROM users
             WHERE users.external_id = publications.external_author_id
           )
           WHERE external_review_id = ?1
             AND author_id IS NULL
             AND external_author_id IS NOT NULL
             AND EXISTS (
               SELECT 1 FROM users
               WHERE users.external_id = publications.external_author_id
             )",
          rusqlite::params![external_review_id],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }
}
