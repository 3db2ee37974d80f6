pub mod expiry;
pub mod server;
pub mod telegram;

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::state::AppState;

#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

pub struct App {
  plugins: Vec<Arc<dyn Plugin>>,
  restart_delay: Duration,
}

impl App {
  pub fn new() -> Self {
    Self { plugins: Vec::new(), restart_delay: Duration::from_secs(5) }
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Arc::new(plugin));
    self
  }

  /// Spawns every plugin under a supervisor that restarts it after
  /// `restart_delay` whenever it stops, fails or panics.
  pub async fn run(self, app: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let delay = self.restart_delay;
    self
      .plugins
      .into_iter()
      .map(|plugin| tokio::spawn(supervise(plugin, app.clone(), delay)))
      .collect()
  }
}

async fn supervise(
  plugin: Arc<dyn Plugin>,
  app: Arc<AppState>,
  delay: Duration,
) {
  let name = plugin.name();
  info!(plugin = name, "Plugin started");

  loop {
    let task = tokio::spawn({
      let (plugin, app) = (plugin.clone(), app.clone());
      async move { plugin.start(app).await }
    });

    match task.await {
      Ok(Ok(())) => warn!(plugin = name, "Plugin returned"),
      Ok(Err(err)) => error!(plugin = name, "Plugin failed: {err:#}"),
      Err(err) if err.is_cancelled() => {
        info!(plugin = name, "Plugin cancelled");
        break;
      }
      Err(_) => error!(plugin = name, "Plugin panicked"),
    }

    sleep(delay).await;
    info!(plugin = name, "Restarting plugin");
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{config::Config, vpn::Provider};

  struct Flaky(Arc<AtomicUsize>);

  #[async_trait::async_trait]
  impl Plugin for Flaky {
    async fn start(&self, _app: Arc<AppState>) -> anyhow::Result<()> {
      match self.0.fetch_add(1, Ordering::SeqCst) {
        0 => anyhow::bail!("first run fails"),
        1 => panic!("second run panics"),
        _ => std::future::pending().await,
      }
    }
  }

  async fn app() -> Arc<AppState> {
    let (db, locks) = crate::sv::testing::setup().await;
    let vpn: Arc<dyn Provider> =
      Arc::new(crate::sv::testing::MockProvider::new());
    let config = Config::for_tests();
    Arc::new(AppState {
      db,
      bot: teloxide::Bot::new(&config.bot_token),
      admins: config.admins.clone(),
      config,
      vpn,
      locks,
    })
  }

  #[tokio::test]
  async fn test_failed_plugin_is_restarted() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut supervisor = App::new().register(Flaky(runs.clone()));
    supervisor.restart_delay = Duration::from_millis(10);

    let handles = supervisor.run(app().await).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // failed, panicked, then kept running
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    for handle in handles {
      handle.abort();
    }
  }
}
