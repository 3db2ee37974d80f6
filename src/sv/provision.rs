//! Turns purchases, trials and admin requests into stored VPN configs.
//!
//! Every flow runs under the user's lock. Provider calls happen outside of
//! database transactions; the stored configs change in one transaction after
//! the provider answered, so a failed call never touches live configs.

use std::slice;

use sea_orm::sea_query::Expr;

use crate::{
  entity::{subscription, tariff, user, vpn_config},
  prelude::*,
  state::UserLocks,
  sv::{
    configs,
    payment::{self, PaymentEvent},
    subscription::{self as lifecycle, PlanChangePolicy, Scenario},
  },
  vpn::{ConfigItem, CreateConfigs, Provider, protocol},
};

pub mod reason {
  pub const REPLACED: &str = "subscription_replaced";
  pub const EXPIRED: &str = "subscription_expired";
  pub const REGENERATED: &str = "config_regenerated";
  pub const BLOCKED: &str = "user_blocked";
}

/// A subscription together with its live configs.
#[derive(Debug, Clone)]
pub struct Delivery {
  pub subscription: subscription::Model,
  pub configs: Vec<vpn_config::Model>,
}

#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
  /// The charge was already processed.
  Duplicate,
  Completed { scenario: Scenario, delivery: Delivery },
}

#[derive(Debug, Clone)]
pub enum RegenOutcome {
  Regenerated,
  /// Already has a live amneziawg config and the run was not forced.
  Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenReport {
  pub regenerated: usize,
  pub skipped: usize,
  pub failed: usize,
}

impl RegenReport {
  fn add(&mut self, result: &Result<RegenOutcome>) {
    match result {
      Ok(RegenOutcome::Regenerated) => self.regenerated += 1,
      Ok(RegenOutcome::Skipped) => self.skipped += 1,
      Err(_) => self.failed += 1,
    }
  }
}

/// Both protocol classes must be present.
fn require_pair(items: &[ConfigItem]) -> Result<()> {
  let has = |name: &str| items.iter().any(|item| item.protocol == name);

  if has(protocol::VLESS_REALITY) && has(protocol::AMNEZIAWG) {
    Ok(())
  } else {
    Err(Error::IncompleteProvisioning(
      items.iter().map(|item| item.protocol.clone()).collect(),
    ))
  }
}

pub struct Provision<'a> {
  db: &'a DatabaseConnection,
  locks: &'a UserLocks,
  vpn: &'a dyn Provider,
  policy: PlanChangePolicy,
  trial_days: i64,
}

impl<'a> Provision<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    locks: &'a UserLocks,
    vpn: &'a dyn Provider,
    policy: PlanChangePolicy,
    trial_days: i64,
  ) -> Self {
    Self { db, locks, vpn, policy, trial_days }
  }

  fn subscriptions(&self) -> lifecycle::Subscription<'a> {
    lifecycle::Subscription::new(self.db, self.policy)
  }

  /// Requests a fresh config pair and stores it. Callers hold the user's lock.
  async fn issue(
    &self,
    sub: &subscription::Model,
    duration_days: i64,
  ) -> Result<Vec<vpn_config::Model>> {
    let params = CreateConfigs {
      user_id: sub.tg_user_id,
      subscription_id: sub.id,
      allowed_devices: sub.allowed_devices,
      duration_days,
    };
    let items = self.vpn.create_configs(params).await?;

    if let Err(err) = require_pair(&items) {
      error!(user = sub.tg_user_id, subscription = sub.id, "{err}");
      return Err(err);
    }

    let txn = self.db.begin().await?;
    let (stored, superseded) = configs::store_pair_in(
      &txn,
      sub.tg_user_id,
      sub.id,
      &items,
      utils::now(),
    )
    .await?;
    txn.commit().await?;

    self.vpn.revoke_configs(&superseded, reason::REGENERATED).await;

    info!(
      user = sub.tg_user_id,
      subscription = sub.id,
      configs = stored.len(),
      "VPN configs issued"
    );
    Ok(stored)
  }

  /// Revokes every live config of `subs` locally, then tells the provider.
  pub async fn retire(
    &self,
    subs: &[subscription::Model],
    reason: &str,
  ) -> Result<usize> {
    if subs.is_empty() {
      return Ok(0);
    }

    let now = utils::now();
    let txn = self.db.begin().await?;
    let mut revoked = Vec::new();
    for sub in subs {
      revoked.extend(configs::revoke_in(&txn, sub.id, &[], now).await?);
    }
    txn.commit().await?;

    if !revoked.is_empty() {
      debug!(count = revoked.len(), reason, "Configs revoked");
      self.vpn.revoke_configs(&revoked, reason).await;
    }
    Ok(revoked.len())
  }

  pub async fn purchase(&self, event: PaymentEvent) -> Result<PurchaseOutcome> {
    let tariff_id = payment::parse_payload(&event.payload)?;
    let user_id = event.tg_user_id;
    let _guard = self.locks.lock(user_id).await;

    if payment::by_charge_id_in(self.db, &event.charge_id).await?.is_some() {
      info!(user = user_id, charge = %event.charge_id, "Duplicate payment");
      return Ok(PurchaseOutcome::Duplicate);
    }

    let user = user::Entity::find_by_id(user_id)
      .one(self.db)
      .await?
      .ok_or(Error::UserNotFound)?;
    if tariff::Entity::find_by_id(tariff_id).one(self.db).await?.is_none() {
      return Err(Error::TariffNotFound);
    }

    let payment = match payment::insert_in(self.db, &event, tariff_id).await {
      Ok(payment) => payment,
      Err(Error::Database(err)) if Error::is_unique_violation(&err) => {
        info!(user = user_id, charge = %event.charge_id, "Duplicate payment");
        return Ok(PurchaseOutcome::Duplicate);
      }
      Err(err) => return Err(err),
    };

    // the payment stays on record for an admin to refund
    if user.is_blocked {
      warn!(user = user_id, payment = payment.id, "Blocked user paid");
      return Err(Error::UserBlocked);
    }

    let outcome =
      self.subscriptions().apply_scenario(user_id, tariff_id).await?;

    let scenario = outcome.scenario;
    info!(
      user = user_id,
      payment = payment.id,
      subscription = outcome.subscription.id,
      %scenario,
      "Payment applied"
    );

    if let Some(replaced) = &outcome.replaced {
      self.retire(slice::from_ref(replaced), reason::REPLACED).await?;
    }

    let configs = if scenario.provisions() {
      self.issue(&outcome.subscription, outcome.duration_days as i64).await?
    } else {
      configs::live_in(self.db, outcome.subscription.id).await?
    };

    Ok(PurchaseOutcome::Completed {
      scenario,
      delivery: Delivery { subscription: outcome.subscription, configs },
    })
  }

  /// Activates the free trial and issues its configs. The trial stays
  /// available if issuing fails.
  pub async fn trial(&self, tg_user_id: i64) -> Result<Delivery> {
    let _guard = self.locks.lock(tg_user_id).await;

    let txn = self.db.begin().await?;
    let sub = lifecycle::activate_trial_in(
      &txn,
      tg_user_id,
      self.trial_days,
      utils::now(),
    )
    .await?;
    txn.commit().await?;

    let issued = self.issue(&sub, self.trial_days).await;
    match issued {
      Ok(configs) => {
        user::Entity::update_many()
          .col_expr(user::Column::TrialUsed, Expr::value(true))
          .filter(user::Column::TgUserId.eq(tg_user_id))
          .exec(self.db)
          .await?;

        info!(user = tg_user_id, subscription = sub.id, "Trial activated");
        Ok(Delivery { subscription: sub, configs })
      }
      Err(err) => {
        warn!(user = tg_user_id, "Trial provisioning failed: {err}");
        lifecycle::cancel_in(self.db, sub, "Trial provisioning failed").await?;
        Err(err)
      }
    }
  }

  /// Current subscription and its live configs, for redelivery.
  pub async fn stored(&self, tg_user_id: i64) -> Result<Option<Delivery>> {
    let Some(sub) =
      lifecycle::current_in(self.db, tg_user_id, utils::now()).await?
    else {
      return Ok(None);
    };

    let configs = configs::live_in(self.db, sub.id).await?;
    Ok(Some(Delivery { subscription: sub, configs }))
  }

  /// Re-issues configs of a current subscription.
  pub async fn regenerate(
    &self,
    subscription_id: i32,
    force: bool,
  ) -> Result<RegenOutcome> {
    let sub = subscription::Entity::find_by_id(subscription_id)
      .one(self.db)
      .await?
      .ok_or(Error::SubscriptionNotFound)?;
    let _guard = self.locks.lock(sub.tg_user_id).await;

    // re-read under the lock
    let now = utils::now();
    let sub = subscription::Entity::find_by_id(subscription_id)
      .one(self.db)
      .await?
      .filter(|sub| sub.is_current(now))
      .ok_or(Error::SubscriptionNotFound)?;

    if !force {
      let live = configs::live_in(self.db, sub.id).await?;
      if live.iter().any(|c| c.protocol == protocol::AMNEZIAWG) {
        debug!(subscription = sub.id, "Already has amneziawg, skipping");
        return Ok(RegenOutcome::Skipped);
      }
    }

    let days = utils::days_left(sub.end_at, now).max(1);
    self.issue(&sub, days).await?;
    Ok(RegenOutcome::Regenerated)
  }

  async fn regenerate_many(
    &self,
    subs: Vec<subscription::Model>,
    force: bool,
  ) -> RegenReport {
    let mut report = RegenReport::default();
    for sub in subs {
      let result = self.regenerate(sub.id, force).await;
      if let Err(err) = &result {
        warn!(subscription = sub.id, "Regeneration failed: {err}");
      }
      report.add(&result);
    }
    report
  }

  pub async fn regenerate_user(
    &self,
    tg_user_id: i64,
    force: bool,
  ) -> Result<RegenReport> {
    let subs = self.subscriptions().current_for(tg_user_id).await?;
    Ok(self.regenerate_many(subs, force).await)
  }

  pub async fn regenerate_all(&self, force: bool) -> Result<RegenReport> {
    let subs = self.subscriptions().all_current().await?;
    let report = self.regenerate_many(subs, force).await;
    info!(?report, "Regeneration finished");
    Ok(report)
  }

  /// Blocks a user and retires the configs of their cancelled subscriptions.
  pub async fn block(&self, tg_user_id: i64) -> Result<usize> {
    let _guard = self.locks.lock(tg_user_id).await;
    let cancelled =
      crate::sv::User::new(self.db).set_blocked(tg_user_id, true).await?;
    self.retire(&cancelled, reason::BLOCKED).await
  }

  /// Expires overdue subscriptions and retires their configs.
  pub async fn expire(&self) -> Result<usize> {
    let expired = self.subscriptions().expire_overdue().await?;
    if expired.is_empty() {
      return Ok(0);
    }

    let revoked = self.retire(&expired, reason::EXPIRED).await?;
    info!(subscriptions = expired.len(), revoked, "Expired subscriptions");
    Ok(expired.len())
  }
}
