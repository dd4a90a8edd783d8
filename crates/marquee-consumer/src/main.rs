//! marquee-consumer binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! shared SQLite store, connects to the broker, declares the topology, and
//! runs the delivery loop until shutdown or reconnect exhaustion.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use marquee_consumer::{
  ConsumerConfig, broker::BrokerManager, delivery::DeliveryLoop, topology::Topology,
};
use marquee_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Marquee feed event consumer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("MARQUEE"))
    .build()
    .context("failed to read config file")?;

  let cfg: ConsumerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ConsumerConfig")?;

  // Open the shared store.
  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  // Startup connectivity failures are fatal; no retry loop here.
  let manager = Arc::new(BrokerManager::new(&cfg));
  manager
    .connect()
    .await
    .context("broker unreachable at startup")?;

  let topology = Topology::from_config(&cfg);
  let worker = DeliveryLoop::new(
    manager.clone(),
    Arc::new(store),
    topology,
    cfg.max_delivery_attempts,
  );

  let result = worker.run().await;
  manager.close().await;

  // Reconnect exhaustion lands here and turns into a nonzero exit code.
  result.context("consumer terminated")
}
