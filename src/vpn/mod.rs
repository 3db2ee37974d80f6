//! Client for the external VPN provisioning API.

pub mod breaker;
pub mod client;
pub mod retry;
pub mod types;

pub use breaker::{BreakerSettings, State};
pub use client::{Settings, VpnApi};
pub use retry::RetryPolicy;
pub use types::{ConfigItem, CreateConfigs};

use crate::prelude::*;

pub mod protocol {
  /// Reality-obfuscated tunnel, upserted by external id.
  pub const VLESS_REALITY: &str = "vless_reality";
  /// Obfuscated WireGuard, a fresh id on every generation.
  pub const AMNEZIAWG: &str = "amneziawg";
  /// Plain WireGuard tags issued before AmneziaWG.
  pub const LEGACY_WIREGUARD: [&str; 2] = ["wireguard", "wg"];
}

/// Source of VPN access material.
#[async_trait]
pub trait Provider: Send + Sync {
  async fn create_configs(
    &self,
    params: CreateConfigs,
  ) -> Result<Vec<ConfigItem>>;

  /// Best effort: failures are logged, never returned.
  async fn revoke_configs(&self, config_ids: &[String], reason: &str);

  fn breaker_state(&self) -> State {
    State::Closed
  }
}
