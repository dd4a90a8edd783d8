//! Routing-key dispatch.
//!
//! The namespace prefix selects the entity handler; the exact routing key
//! selects the event within it. Anything unrecognized is a logged no-op and
//! the message is acknowledged — an unknown key is not a failure.

use marquee_core::{
  event::{Namespace, ReviewEvent, ReviewEventKind, UserEvent, UserEventKind},
  store::RecordStore,
};
use serde_json::Value;

use crate::{
  Result,
  handlers::{reviews, users},
};

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
  User(users::UserOutcome),
  Review(reviews::ReviewOutcome),
  /// Unrecognized namespace or event key.
  Ignored,
}

pub async fn dispatch<S>(store: &S, routing_key: &str, body: &Value) -> Result<Dispatch>
where
  S: RecordStore,
{
  match Namespace::of(routing_key) {
    Some(Namespace::Users) => match UserEventKind::from_routing_key(routing_key) {
      Some(kind) => {
        let event = UserEvent::from_body(body)?;
        Ok(Dispatch::User(users::handle(store, kind, &event).await?))
      }
      None => {
        tracing::warn!(routing_key, "unrecognized user event key; ignoring");
        Ok(Dispatch::Ignored)
      }
    },
    Some(Namespace::Reviews) => match ReviewEventKind::from_routing_key(routing_key) {
      Some(kind) => {
        let event = ReviewEvent::from_body(body)?;
        Ok(Dispatch::Review(reviews::handle(store, kind, &event).await?))
      }
      None => {
        tracing::warn!(routing_key, "unrecognized review event key; ignoring");
        Ok(Dispatch::Ignored)
      }
    },
    None => {
      tracing::warn!(routing_key, "unrecognized routing key namespace; ignoring");
      Ok(Dispatch::Ignored)
    }
  }
}
