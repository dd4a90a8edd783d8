//! Broker topology declared idempotently at startup.
//!
//! One durable topic exchange and one durable queue bound to the configured
//! routing-key patterns, plus the dead-letter exchange and parked queue that
//! receive messages whose processing attempts are exhausted. Declarations
//! are no-ops when the objects already exist with matching properties.

use lapin::{
  Channel, ExchangeKind,
  options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
  types::FieldTable,
};

use crate::{ConsumerConfig, Result};

#[derive(Debug, Clone)]
pub struct Topology {
  pub exchange:             String,
  pub queue:                String,
  pub routing_keys:         Vec<String>,
  pub dead_letter_exchange: String,
  pub dead_letter_queue:    String,
}

impl Topology {
  pub fn from_config(cfg: &ConsumerConfig) -> Self {
    Self {
      exchange:             cfg.exchange.clone(),
      queue:                cfg.queue.clone(),
      routing_keys:         parse_routing_keys(&cfg.routing_keys),
      dead_letter_exchange: cfg.dead_letter_exchange.clone(),
      dead_letter_queue:    cfg.dead_letter_queue.clone(),
    }
  }

  /// Declare everything. Must complete before consuming starts.
  pub async fn declare(&self, channel: &Channel) -> Result<()> {
    let durable = ExchangeDeclareOptions { durable: true, ..Default::default() };

    channel
      .exchange_declare(
        &self.exchange,
        ExchangeKind::Topic,
        durable,
        FieldTable::default(),
      )
      .await?;
    channel
      .exchange_declare(
        &self.dead_letter_exchange,
        ExchangeKind::Topic,
        durable,
        FieldTable::default(),
      )
      .await?;

    let durable_queue = QueueDeclareOptions { durable: true, ..Default::default() };

    channel
      .queue_declare(&self.queue, durable_queue, FieldTable::default())
      .await?;
    channel
      .queue_declare(&self.dead_letter_queue, durable_queue, FieldTable::default())
      .await?;

    for pattern in &self.routing_keys {
      channel
        .queue_bind(
          &self.queue,
          &self.exchange,
          pattern,
          QueueBindOptions::default(),
          FieldTable::default(),
        )
        .await?;
    }

    // Parked messages keep their original routing key; catch them all.
    channel
      .queue_bind(
        &self.dead_letter_queue,
        &self.dead_letter_exchange,
        "#",
        QueueBindOptions::default(),
        FieldTable::default(),
      )
      .await?;

    tracing::info!(
      exchange = %self.exchange,
      queue = %self.queue,
      bindings = self.routing_keys.len(),
      "broker topology declared"
    );
    Ok(())
  }
}

/// Split the comma-separated binding list, dropping empty entries.
pub fn parse_routing_keys(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::parse_routing_keys;

  #[test]
  fn splits_and_trims() {
    assert_eq!(
      parse_routing_keys("users.#, usuarios.# ,resenas.#"),
      vec!["users.#", "usuarios.#", "resenas.#"]
    );
  }

  #[test]
  fn drops_empty_entries() {
    assert_eq!(parse_routing_keys("users.#,,"), vec!["users.#"]);
    assert!(parse_routing_keys("").is_empty());
  }
}
