//! User lifecycle events.

use chrono::Utc;
use marquee_core::{
  event::{UserEvent, UserEventKind},
  store::{RecordStore, UpdateOutcome, UpsertOutcome},
  user::SessionMark,
};

use super::store_err;
use crate::Result;

/// What a user event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
  Created,
  Updated,
  LoginMarked,
  LogoutMarked,
  /// A session-start for an unknown user was healed into a create.
  HealedFromSession,
  /// A session-end for an unknown user; deliberately not healed.
  UnknownUserIgnored,
}

pub async fn handle<S>(
  store: &S,
  kind: UserEventKind,
  event: &UserEvent,
) -> Result<UserOutcome>
where
  S: RecordStore,
{
  let external_id = event.payload.id.as_str();
  let at = event.occurred_at.unwrap_or_else(Utc::now);

  match kind {
    UserEventKind::Created => {
      match store.upsert_user(event.as_new_user()).await.map_err(store_err)? {
        UpsertOutcome::Created => Ok(UserOutcome::Created),
        UpsertOutcome::Updated => Ok(UserOutcome::Updated),
      }
    }

    UserEventKind::SessionStarted => {
      match store
        .touch_session(external_id, SessionMark::Login, at)
        .await
        .map_err(store_err)?
      {
        UpdateOutcome::Updated => Ok(UserOutcome::LoginMarked),
        UpdateOutcome::NotFound => {
          // A started session implies the user exists upstream: replay the
          // event through the create path, then stamp the login.
          tracing::warn!(external_id, "session start for unknown user; healing");
          store.upsert_user(event.as_new_user()).await.map_err(store_err)?;
          store
            .touch_session(external_id, SessionMark::Login, at)
            .await
            .map_err(store_err)?;
          Ok(UserOutcome::HealedFromSession)
        }
      }
    }

    UserEventKind::SessionEnded => {
      match store
        .touch_session(external_id, SessionMark::Logout, at)
        .await
        .map_err(store_err)?
      {
        UpdateOutcome::Updated => Ok(UserOutcome::LogoutMarked),
        UpdateOutcome::NotFound => {
          // Ending a session for an unknown user is not evidence the user
          // should exist; no fallback creation.
          tracing::warn!(external_id, "session end for unknown user; ignoring");
          Ok(UserOutcome::UnknownUserIgnored)
        }
      }
    }
  }
}
