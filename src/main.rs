//! VPN Shop - Telegram bot selling time-limited VPN access
//!
//! Architecture:
//! - SeaORM for database access (SQLite)
//! - Teloxide for the Telegram bot and Stars payments
//! - Reqwest client with retries and a circuit breaker for the VPN API
//! - Axum for the health endpoint

mod config;
mod entity;
mod error;
mod plugins;
mod prelude;
mod state;
mod sv;
mod utils;
mod vpn;

use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{config::Config, plugins::App, prelude::*, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "vpn_shop=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  info!("Starting VPN Shop v{}", env!("CARGO_PKG_VERSION"));

  let config = Config::from_env()?;
  if config.admins.is_empty() {
    warn!("No admins configured, admin commands disabled");
  }

  let app = Arc::new(AppState::new(config).await?);

  App::new()
    .register(plugins::telegram::Plugin)
    .register(plugins::server::Plugin)
    .register(plugins::expiry::ExpirySweep)
    .run(app)
    .await;

  tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
  info!("Shutting down");

  Ok(())
}
