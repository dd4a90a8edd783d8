//! Broker connection ownership and bounded reconnection.
//!
//! The manager exclusively owns the connection and its single channel; the
//! delivery loop borrows the channel via [`BrokerManager::channel`]. On
//! channel loss the run loop drives [`BrokerManager::reconnect`], which
//! retries at a fixed interval up to a maximum attempt count — exhaustion is
//! fatal and the process exits.

use std::{
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;

use crate::{ConsumerConfig, Error, Result};

struct Active {
  connection: Connection,
  channel:    Channel,
}

pub struct BrokerManager {
  url:                String,
  reconnect_interval: Duration,
  max_attempts:       u32,
  state:              Mutex<Option<Active>>,
  /// Connect-in-progress guard; prevents overlapping attempts.
  connecting:         AtomicBool,
}

impl BrokerManager {
  pub fn new(cfg: &ConsumerConfig) -> Self {
    Self {
      url:                cfg.broker_url.clone(),
      reconnect_interval: cfg.reconnect_interval(),
      max_attempts:       cfg.max_reconnect_attempts,
      state:              Mutex::new(None),
      connecting:         AtomicBool::new(false),
    }
  }

  /// Establish a connection and a channel. If another attempt is already in
  /// flight this call is a no-op.
  pub async fn connect(&self) -> Result<()> {
    if self.connecting.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    let result = self.establish().await;
    self.connecting.store(false, Ordering::SeqCst);
    result
  }

  async fn establish(&self) -> Result<()> {
    let connection = Connection::connect(&self.url, ConnectionProperties::default())
      .await
      .map_err(Error::Connect)?;
    let channel = connection.create_channel().await.map_err(Error::Connect)?;

    tracing::info!("broker connection established");
    *self.state.lock().await = Some(Active { connection, channel });
    Ok(())
  }

  /// The currently established channel, or [`Error::NotConnected`].
  pub async fn channel(&self) -> Result<Channel> {
    self
      .state
      .lock()
      .await
      .as_ref()
      .filter(|active| active.channel.status().connected())
      .map(|active| active.channel.clone())
      .ok_or(Error::NotConnected)
  }

  /// Bounded reconnection: sleep the configured interval before each
  /// attempt; give up with [`Error::ReconnectExhausted`] once the attempt
  /// budget is spent.
  pub async fn reconnect(&self) -> Result<()> {
    self.state.lock().await.take();

    for attempt in 1..=self.max_attempts {
      tokio::time::sleep(self.reconnect_interval).await;
      match self.connect().await {
        Ok(()) => {
          tracing::info!(attempt, "broker reconnected");
          return Ok(());
        }
        Err(e) => {
          tracing::warn!(
            attempt,
            max_attempts = self.max_attempts,
            error = %e,
            "reconnect attempt failed"
          );
        }
      }
    }

    Err(Error::ReconnectExhausted(self.max_attempts))
  }

  /// Graceful shutdown: close channel then connection, swallowing
  /// close-time errors.
  pub async fn close(&self) {
    if let Some(active) = self.state.lock().await.take() {
      if let Err(e) = active.channel.close(200, "shutting down").await {
        tracing::debug!(error = %e, "channel close failed");
      }
      if let Err(e) = active.connection.close(200, "shutting down").await {
        tracing::debug!(error = %e, "connection close failed");
      }
    }
  }
}
