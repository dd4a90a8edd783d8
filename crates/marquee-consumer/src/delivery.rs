//! The delivery loop: prefetch-1 consumption, dispatch, and terminal
//! acknowledgement.
//!
//! Every message is processed to a terminal state in this loop: acknowledged
//! on success, republished with an incremented retry header on recoverable
//! failure, or parked on the dead-letter exchange once the attempt budget is
//! spent (or immediately, for bodies that cannot be parsed at all). The main
//! queue therefore never redelivers a message unboundedly.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use futures::StreamExt as _;
use lapin::{
  BasicProperties, Channel,
  message::Delivery,
  options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions},
  types::{AMQPValue, FieldTable},
};
use marquee_core::store::RecordStore;
use serde_json::Value;

use crate::{Error, Result, broker::BrokerManager, router, topology::Topology};

/// Header carrying the number of processing attempts already spent.
const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// Header explaining why a message was parked.
const PARK_REASON_HEADER: &str = "x-park-reason";

const CONSUMER_TAG: &str = "marquee-consumer";

// ─── Failure policy ──────────────────────────────────────────────────────────

/// What to do with a message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
  /// Republish to the main exchange with the retry header set to
  /// `next_attempt`.
  Retry { next_attempt: u32 },
  /// Publish to the dead-letter exchange for manual replay.
  Park,
}

/// Pure retry/park decision. `prior_attempts` counts failed attempts before
/// this delivery; the delivery that just failed brings the total to
/// `prior_attempts + 1`.
pub(crate) fn failure_action(prior_attempts: u32, max_attempts: u32) -> FailureAction {
  if prior_attempts + 1 >= max_attempts {
    FailureAction::Park
  } else {
    FailureAction::Retry { next_attempt: prior_attempts + 1 }
  }
}

/// Total deliveries spent on this message, including the one in hand.
/// Written to the parked message's retry header so replay tooling sees the
/// attempts actually made.
pub(crate) fn attempts_spent(properties: &BasicProperties) -> u32 {
  retry_count(properties) + 1
}

/// Whether a failure in the consume loop warrants a reconnect cycle rather
/// than terminating the process. Only reconnect exhaustion is fatal for
/// channel loss.
pub(crate) fn recoverable(e: &Error) -> bool {
  matches!(e, Error::Broker(_) | Error::Connect(_) | Error::NotConnected)
}

/// Parse decision for a raw message body, made before any handler runs.
#[derive(Debug)]
pub(crate) enum BodyOutcome {
  Dispatch(Value),
  /// Unparseable; park immediately, skipping the retry budget.
  Park(String),
}

pub(crate) fn parse_body(data: &[u8]) -> BodyOutcome {
  match serde_json::from_slice(data) {
    Ok(body) => BodyOutcome::Dispatch(body),
    Err(e) => BodyOutcome::Park(format!("malformed payload: {e}")),
  }
}

/// Read the retry header, tolerating the integer width the publisher chose.
pub(crate) fn retry_count(properties: &BasicProperties) -> u32 {
  let Some(headers) = properties.headers() else {
    return 0;
  };
  let value = headers
    .inner()
    .iter()
    .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
    .map(|(_, value)| value);
  match value {
    Some(AMQPValue::LongUInt(n)) => *n,
    Some(AMQPValue::LongInt(n)) => (*n).max(0) as u32,
    Some(AMQPValue::LongLongInt(n)) => (*n).max(0) as u32,
    Some(AMQPValue::ShortInt(n)) => i64::from(*n).max(0) as u32,
    Some(AMQPValue::ShortShortInt(n)) => i64::from(*n).max(0) as u32,
    _ => 0,
  }
}

// ─── Loop ────────────────────────────────────────────────────────────────────

pub struct DeliveryLoop<S> {
  manager:               Arc<BrokerManager>,
  store:                 Arc<S>,
  topology:              Topology,
  max_delivery_attempts: u32,
  /// Message sequence number, for log correlation.
  sequence:              AtomicU64,
}

impl<S> DeliveryLoop<S>
where
  S: RecordStore,
{
  pub fn new(
    manager: Arc<BrokerManager>,
    store: Arc<S>,
    topology: Topology,
    max_delivery_attempts: u32,
  ) -> Self {
    Self {
      manager,
      store,
      topology,
      max_delivery_attempts,
      sequence: AtomicU64::new(0),
    }
  }

  /// Consume until the connection is lost beyond recovery. Topology is
  /// (re)declared before each consume so a restarted broker comes back with
  /// the right shape.
  pub async fn run(&self) -> Result<()> {
    loop {
      let channel = self.manager.channel().await?;
      self.topology.declare(&channel).await?;
      channel.basic_qos(1, BasicQosOptions::default()).await?;

      let mut consumer = channel
        .basic_consume(
          &self.topology.queue,
          CONSUMER_TAG,
          BasicConsumeOptions::default(),
          FieldTable::default(),
        )
        .await?;

      tracing::info!(queue = %self.topology.queue, "consuming");

      while let Some(delivery) = consumer.next().await {
        match delivery {
          Ok(delivery) => {
            // Broker failures mid-delivery (a dying channel failing an ack
            // or publish) go through the bounded-reconnect path, not out of
            // the process.
            if let Err(e) = self.process(&channel, delivery).await {
              if !recoverable(&e) {
                return Err(e);
              }
              tracing::warn!(error = %e, "broker failure during delivery");
              break;
            }
          }
          Err(e) => {
            tracing::warn!(error = %e, "delivery stream error");
            break;
          }
        }
      }

      tracing::warn!("broker channel lost; attempting reconnect");
      self.manager.reconnect().await?;
    }
  }

  /// Drive one delivery to a terminal state. Only broker failures (ack or
  /// publish) propagate; handler failures are absorbed into the retry/park
  /// path.
  async fn process(&self, channel: &Channel, delivery: Delivery) -> Result<()> {
    let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    let routing_key = delivery.routing_key.as_str().to_owned();

    let body: Value = match parse_body(&delivery.data) {
      BodyOutcome::Dispatch(body) => body,
      BodyOutcome::Park(reason) => {
        // Reparsing can never succeed; park without retries.
        tracing::error!(
          seq,
          routing_key = %routing_key,
          raw = %String::from_utf8_lossy(&delivery.data),
          %reason,
          "malformed payload; parking"
        );
        self.park(channel, &delivery, &routing_key, &reason).await?;
        return ack(&delivery).await;
      }
    };

    match router::dispatch(self.store.as_ref(), &routing_key, &body).await {
      Ok(outcome) => {
        tracing::debug!(seq, routing_key = %routing_key, ?outcome, "processed");
        ack(&delivery).await
      }
      Err(e) => {
        let prior_attempts = retry_count(&delivery.properties);
        match failure_action(prior_attempts, self.max_delivery_attempts) {
          FailureAction::Retry { next_attempt } => {
            tracing::warn!(
              seq,
              routing_key = %routing_key,
              attempt = next_attempt,
              max_attempts = self.max_delivery_attempts,
              error = %e,
              "handler failed; requeueing for retry"
            );
            self
              .republish(channel, &delivery, &routing_key, next_attempt)
              .await?;
            ack(&delivery).await
          }
          FailureAction::Park => {
            tracing::error!(
              seq,
              routing_key = %routing_key,
              attempts = attempts_spent(&delivery.properties),
              payload = %body,
              error = %e,
              "handler failed; parking for manual replay"
            );
            self
              .park(channel, &delivery, &routing_key, &e.to_string())
              .await?;
            ack(&delivery).await
          }
        }
      }
    }
  }

  /// Put the message back on the main exchange with an incremented retry
  /// header; the original delivery is then acknowledged by the caller.
  async fn republish(
    &self,
    channel: &Channel,
    delivery: &Delivery,
    routing_key: &str,
    next_attempt: u32,
  ) -> Result<()> {
    let mut headers = delivery.properties.headers().clone().unwrap_or_default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(next_attempt));
    let properties = delivery.properties.clone().with_headers(headers);

    let _confirm = channel
      .basic_publish(
        &self.topology.exchange,
        routing_key,
        BasicPublishOptions::default(),
        &delivery.data,
        properties,
      )
      .await?;
    Ok(())
  }

  /// Publish to the dead-letter exchange, preserving the original routing
  /// key and body.
  async fn park(
    &self,
    channel: &Channel,
    delivery: &Delivery,
    routing_key: &str,
    reason: &str,
  ) -> Result<()> {
    let mut headers = delivery.properties.headers().clone().unwrap_or_default();
    headers.insert(
      RETRY_COUNT_HEADER.into(),
      AMQPValue::LongUInt(attempts_spent(&delivery.properties)),
    );
    headers.insert(
      PARK_REASON_HEADER.into(),
      AMQPValue::LongString(reason.to_string().into()),
    );
    let properties = delivery.properties.clone().with_headers(headers);

    let _confirm = channel
      .basic_publish(
        &self.topology.dead_letter_exchange,
        routing_key,
        BasicPublishOptions::default(),
        &delivery.data,
        properties,
      )
      .await?;
    Ok(())
  }
}

async fn ack(delivery: &Delivery) -> Result<()> {
  delivery.ack(BasicAckOptions::default()).await?;
  Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use lapin::{BasicProperties, types::{AMQPValue, FieldTable}};

  use super::{
    BodyOutcome, FailureAction, RETRY_COUNT_HEADER, attempts_spent, failure_action,
    parse_body, recoverable, retry_count,
  };
  use crate::Error;

  #[test]
  fn first_failure_retries() {
    assert_eq!(
      failure_action(0, 4),
      FailureAction::Retry { next_attempt: 1 }
    );
  }

  #[test]
  fn last_allowed_attempt_parks() {
    assert_eq!(failure_action(3, 4), FailureAction::Park);
    assert_eq!(failure_action(7, 4), FailureAction::Park);
  }

  #[test]
  fn attempt_budget_of_one_never_retries() {
    assert_eq!(failure_action(0, 1), FailureAction::Park);
  }

  #[test]
  fn retry_chain_terminates_at_budget() {
    let max = 4;
    let mut attempts = 0;
    let mut hops = 0;
    loop {
      match failure_action(attempts, max) {
        FailureAction::Retry { next_attempt } => {
          attempts = next_attempt;
          hops += 1;
          assert!(hops < 100, "retry chain must terminate");
        }
        FailureAction::Park => break,
      }
    }
    // 3 republishes, then the 4th attempt parks.
    assert_eq!(hops, 3);
  }

  #[test]
  fn retry_count_defaults_to_zero() {
    assert_eq!(retry_count(&BasicProperties::default()), 0);
  }

  #[test]
  fn retry_count_reads_header() {
    let mut headers = FieldTable::default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(2));
    let props = BasicProperties::default().with_headers(headers);
    assert_eq!(retry_count(&props), 2);
  }

  #[test]
  fn unparseable_body_parks_without_dispatching() {
    match parse_body(b"{not json") {
      BodyOutcome::Park(reason) => assert!(reason.starts_with("malformed payload")),
      BodyOutcome::Dispatch(_) => panic!("unparseable body must not dispatch"),
    }
  }

  #[test]
  fn valid_body_is_dispatched() {
    assert!(matches!(
      parse_body(br#"{"id": 1}"#),
      BodyOutcome::Dispatch(_)
    ));
  }

  #[test]
  fn parked_header_counts_the_final_attempt() {
    assert_eq!(attempts_spent(&BasicProperties::default()), 1);

    let mut headers = FieldTable::default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(2));
    let props = BasicProperties::default().with_headers(headers);
    assert_eq!(attempts_spent(&props), 3);
  }

  #[test]
  fn channel_loss_is_recoverable_but_exhaustion_is_fatal() {
    assert!(recoverable(&Error::Broker(lapin::Error::ChannelsLimitReached)));
    assert!(recoverable(&Error::NotConnected));
    assert!(!recoverable(&Error::ReconnectExhausted(10)));
    assert!(!recoverable(&Error::Event(
      marquee_core::Error::MissingIdentity
    )));
  }

  #[test]
  fn retry_count_tolerates_signed_widths() {
    let mut headers = FieldTable::default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(3));
    let props = BasicProperties::default().with_headers(headers);
    assert_eq!(retry_count(&props), 3);

    let mut headers = FieldTable::default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(-1));
    let props = BasicProperties::default().with_headers(headers);
    assert_eq!(retry_count(&props), 0);
  }
}
