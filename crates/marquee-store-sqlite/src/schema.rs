//! SQL schema for the Marquee SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One table for both locally registered accounts and Core-synced users.
-- A row must carry at least one identity key.
CREATE TABLE IF NOT EXISTS users (
    user_id        TEXT PRIMARY KEY,
    external_id    TEXT UNIQUE,          -- Core-assigned; sparse
    local_username TEXT UNIQUE,          -- local accounts; sparse
    local_email    TEXT UNIQUE,
    display_name   TEXT,
    country        TEXT,
    registered_at  TEXT,
    last_login_at  TEXT,
    last_logout_at TEXT,
    synced_at      TEXT,
    CHECK (external_id IS NOT NULL OR local_username IS NOT NULL)
);

-- Dual-provenance publications. Event processing soft-deletes only; rows
-- are never purged by the consumer.
CREATE TABLE IF NOT EXISTS publications (
    publication_id     TEXT PRIMARY KEY,
    external_review_id INTEGER UNIQUE,   -- Core-assigned; sparse
    author_id          TEXT REFERENCES users(user_id),
    external_author_id TEXT,
    kind               TEXT,             -- 'review' | 'rating' | 'list'; NULL until an event states it
    target_id          TEXT,
    external_movie_id  INTEGER,
    title              TEXT,
    body_text          TEXT NOT NULL DEFAULT '',
    content            TEXT NOT NULL DEFAULT '',  -- legacy alias of body_text
    rating             INTEGER,
    has_spoilers       INTEGER,          -- NULL until an event states it; read as false
    tags               TEXT NOT NULL DEFAULT '[]',
    is_deleted         INTEGER NOT NULL DEFAULT 0,
    deleted_at         TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    synced_at          TEXT,
    CHECK (rating IS NULL OR (rating BETWEEN 1 AND 5)),
    CHECK (body_text = content)
);

CREATE INDEX IF NOT EXISTS publications_author_idx
    ON publications(author_id);
CREATE INDEX IF NOT EXISTS publications_ext_author_idx
    ON publications(external_author_id);

PRAGMA user_version = 1;
";
