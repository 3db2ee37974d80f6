use std::sync::Arc;

use crate::{plugins::Plugin, prelude::*, state::AppState};

/// Expires overdue subscriptions and revokes their configs.
pub struct ExpirySweep;

#[async_trait]
impl Plugin for ExpirySweep {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = time::interval(app.config.expiry_interval);

    loop {
      interval.tick().await;

      match app.sv().provision.expire().await {
        Ok(0) => debug!("No overdue subscriptions"),
        Ok(count) => info!("Expired {count} subscriptions"),
        Err(err) => error!("Expiry sweep failed: {err}"),
      }

      app.locks.gc();
    }
  }
}
