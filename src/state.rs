use std::collections::HashSet;

use teloxide::Bot;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
  config::Config,
  prelude::*,
  sv,
  vpn::{Provider, VpnApi},
};

/// Serializes subscription changes per user.
#[derive(Default)]
pub struct UserLocks(DashMap<i64, Arc<Mutex<()>>>);

impl UserLocks {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn lock(&self, tg_user_id: i64) -> OwnedMutexGuard<()> {
    // clone out so the shard guard is not held across the await
    let mutex = self.0.entry(tg_user_id).or_default().clone();
    mutex.lock_owned().await
  }

  /// Drops locks nobody is holding or waiting on.
  pub fn gc(&self) {
    self.0.retain(|_, mutex| Arc::strong_count(mutex) > 1);
  }
}

pub struct Services<'a> {
  pub user: sv::User<'a>,
  pub tariff: sv::Tariff<'a>,
  pub subscription: sv::Subscription<'a>,
  pub payment: sv::Payment<'a>,
  pub configs: sv::Configs<'a>,
  pub provision: sv::Provision<'a>,
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub bot: Bot,
  pub admins: HashSet<i64>,
  pub config: Config,
  pub vpn: Arc<dyn Provider>,
  pub locks: UserLocks,
}

impl AppState {
  pub async fn new(config: Config) -> anyhow::Result<Self> {
    info!("Connecting to database...");
    let db = Database::connect(&config.database_url)
      .await
      .context("Failed to connect to database")?;

    info!("Running migrations...");
    Migrator::up(&db, None).await.context("Failed to run migrations")?;

    let seeded = sv::Tariff::new(&db).seed_defaults().await?;
    if seeded > 0 {
      info!(seeded, "Default tariffs created");
    }

    let vpn = Arc::new(VpnApi::new(config.vpn.clone())?);

    Ok(Self {
      bot: Bot::new(&config.bot_token),
      admins: config.admins.clone(),
      db,
      config,
      vpn,
      locks: UserLocks::new(),
    })
  }

  pub fn sv(&self) -> Services<'_> {
    let policy = self.config.plan_change;
    Services {
      user: sv::User::new(&self.db),
      tariff: sv::Tariff::new(&self.db),
      subscription: sv::Subscription::new(&self.db, policy),
      payment: sv::Payment::new(&self.db),
      configs: sv::Configs::new(&self.db),
      provision: sv::Provision::new(
        &self.db,
        &self.locks,
        self.vpn.as_ref(),
        policy,
        self.config.trial_days,
      ),
    }
  }

  pub fn is_admin(&self, tg_user_id: i64) -> bool {
    self.admins.contains(&tg_user_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_user_locks_serialize_and_gc() {
    let locks = UserLocks::new();

    let guard = locks.lock(1).await;
    let _other = locks.lock(2).await;
    assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock(1))
      .await
      .is_err());

    drop(guard);
    locks.gc();
    // user 2 is still held
    assert_eq!(locks.0.len(), 1);
  }
}
