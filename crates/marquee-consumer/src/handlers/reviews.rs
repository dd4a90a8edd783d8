//! Review/publication lifecycle events.

use chrono::Utc;
use marquee_core::{
  event::{ReviewEvent, ReviewEventKind},
  store::{RecordStore, UpdateOutcome, UpsertOutcome},
};

use super::store_err;
use crate::Result;

/// What a review event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
  Created,
  /// A duplicate create reconciled to an update of the existing record.
  ReconciledToUpdate,
  Updated,
  /// An update for a missing record was healed into a create.
  HealedFromUpdate,
  SoftDeleted,
  /// A delete for an unknown id; no tombstone is created.
  UnknownReviewIgnored,
}

pub async fn handle<S>(
  store: &S,
  kind: ReviewEventKind,
  event: &ReviewEvent,
) -> Result<ReviewOutcome>
where
  S: RecordStore,
{
  let external_review_id = event.payload.id;

  match kind {
    ReviewEventKind::Created => {
      let outcome = store
        .insert_publication(event.as_new_publication()?)
        .await
        .map_err(store_err)?;
      try_link_author(store, external_review_id).await;
      Ok(match outcome {
        UpsertOutcome::Created => ReviewOutcome::Created,
        UpsertOutcome::Updated => ReviewOutcome::ReconciledToUpdate,
      })
    }

    ReviewEventKind::Updated => {
      match store
        .update_publication(external_review_id, event.as_patch()?)
        .await
        .map_err(store_err)?
      {
        UpdateOutcome::Updated => {
          try_link_author(store, external_review_id).await;
          Ok(ReviewOutcome::Updated)
        }
        UpdateOutcome::NotFound => {
          // The creation event never arrived (or hasn't yet): replay this
          // update through the create path.
          tracing::warn!(external_review_id, "update for unknown review; healing");
          store
            .insert_publication(event.as_new_publication()?)
            .await
            .map_err(store_err)?;
          try_link_author(store, external_review_id).await;
          Ok(ReviewOutcome::HealedFromUpdate)
        }
      }
    }

    ReviewEventKind::Deleted => {
      let at = event.occurred_at.unwrap_or_else(Utc::now);
      match store
        .soft_delete_publication(external_review_id, at)
        .await
        .map_err(store_err)?
      {
        UpdateOutcome::Updated => Ok(ReviewOutcome::SoftDeleted),
        UpdateOutcome::NotFound => {
          tracing::warn!(external_review_id, "delete for unknown review; ignoring");
          Ok(ReviewOutcome::UnknownReviewIgnored)
        }
      }
    }
  }
}

/// Best-effort lazy author link. Failure never blocks the primary write;
/// the link is retried on the next event for the same id.
async fn try_link_author<S>(store: &S, external_review_id: i64)
where
  S: RecordStore,
{
  match store.link_author(external_review_id).await {
    Ok(true) => {
      tracing::debug!(external_review_id, "author linked to local user");
    }
    Ok(false) => {}
    Err(e) => {
      tracing::warn!(external_review_id, error = %e, "author link failed; continuing");
    }
  }
}
