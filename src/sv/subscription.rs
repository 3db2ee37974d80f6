//! Subscription lifecycle: decides what a purchase does to the user's access.
//!
//! The `*_in` functions take any connection so callers can compose them inside
//! one transaction. `Subscription::apply_scenario` wraps the read-decide-write
//! span in a transaction; the caller holds the user's lock around it.

use std::{fmt, str::FromStr};

use crate::{
  entity::{SubscriptionKind, SubscriptionStatus, subscription, tariff, user},
  prelude::*,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
  NewUser,
  Renew,
  Upgrade,
  Downgrade,
  CrossPurchase,
}

impl Scenario {
  pub fn as_str(&self) -> &'static str {
    match self {
      Scenario::NewUser => "new_user",
      Scenario::Renew => "renew",
      Scenario::Upgrade => "upgrade",
      Scenario::Downgrade => "downgrade",
      Scenario::CrossPurchase => "cross_purchase",
    }
  }

  /// Whether the purchase needs fresh VPN configs.
  pub fn provisions(&self) -> bool {
    *self != Scenario::Renew
  }
}

impl fmt::Display for Scenario {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What happens to the current subscription on upgrade, downgrade or
/// cross-purchase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanChangePolicy {
  /// Cancel the current subscription and start a fresh one. Remaining time is
  /// dropped.
  #[default]
  CancelAndReplace,
  /// Like `CancelAndReplace`, but the fresh subscription also gets the
  /// remaining time of the cancelled one.
  CarryRemaining,
}

impl FromStr for PlanChangePolicy {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "replace" | "cancel" => Ok(Self::CancelAndReplace),
      "carry" => Ok(Self::CarryRemaining),
      other => Err(format!("unknown plan change policy `{other}`")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
  pub scenario: Scenario,
  /// New or extended subscription
  pub subscription: subscription::Model,
  /// Subscription cancelled by a plan change
  pub replaced: Option<subscription::Model>,
  pub duration_days: i32,
}

/// Compares the tariff behind the current subscription with the target.
pub fn classify(current: &tariff::Model, target: &tariff::Model) -> Scenario {
  if current.id == target.id {
    Scenario::Renew
  } else if target.price > current.price {
    Scenario::Upgrade
  } else if target.price < current.price {
    Scenario::Downgrade
  } else {
    Scenario::CrossPurchase
  }
}

/// Current subscription of a user. Several candidates resolve to the one with
/// the longest remaining access.
pub async fn current_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  now: DateTime,
) -> Result<Option<subscription::Model>> {
  let sub = subscription::Entity::find()
    .filter(subscription::Column::TgUserId.eq(tg_user_id))
    .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
    .filter(subscription::Column::EndAt.gt(now))
    .order_by_desc(subscription::Column::EndAt)
    .one(conn)
    .await?;
  Ok(sub)
}

/// Tariff a subscription is compared by. Trials map to the `TRIAL` catalog
/// entry.
async fn tariff_of<C: ConnectionTrait>(
  conn: &C,
  sub: &subscription::Model,
) -> Result<tariff::Model> {
  let tariff = match sub.tariff_id {
    Some(id) => tariff::Entity::find_by_id(id).one(conn).await?,
    None if sub.kind == SubscriptionKind::Trial => {
      tariff::Entity::find()
        .filter(tariff::Column::Code.eq(tariff::TRIAL_CODE))
        .one(conn)
        .await?
    }
    None => None,
  };
  tariff.ok_or(Error::TariffNotFound)
}

async fn scenario_for<C: ConnectionTrait>(
  conn: &C,
  current: Option<&subscription::Model>,
  tariff_id: i32,
) -> Result<Scenario> {
  let Some(current) = current else {
    return Ok(Scenario::NewUser);
  };

  let old = tariff_of(conn, current).await?;
  let new = tariff::Entity::find_by_id(tariff_id)
    .one(conn)
    .await?
    .ok_or(Error::TariffNotFound)?;

  Ok(classify(&old, &new))
}

pub async fn determine_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  tariff_id: i32,
  now: DateTime,
) -> Result<Scenario> {
  let current = current_in(conn, tg_user_id, now).await?;
  scenario_for(conn, current.as_ref(), tariff_id).await
}

async fn insert_paid<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  tariff: &tariff::Model,
  now: DateTime,
  end_at: DateTime,
) -> Result<subscription::Model> {
  let sub = subscription::ActiveModel {
    id: NotSet,
    tg_user_id: Set(tg_user_id),
    tariff_id: Set(Some(tariff.id)),
    kind: Set(SubscriptionKind::Paid),
    status: Set(SubscriptionStatus::Active),
    start_at: Set(now),
    end_at: Set(end_at),
    allowed_devices: Set(tariff.allowed_devices),
    status_reason: Set(None),
    created_at: Set(now),
  };
  Ok(sub.insert(conn).await?)
}

/// Applies a purchase of `tariff_id`. Callers must hold the user's lock and
/// pass a transaction.
pub async fn apply_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  tariff_id: i32,
  policy: PlanChangePolicy,
  now: DateTime,
) -> Result<ScenarioOutcome> {
  let current = current_in(conn, tg_user_id, now).await?;
  let scenario = scenario_for(conn, current.as_ref(), tariff_id).await?;

  let tariff = tariff::Entity::find_by_id(tariff_id)
    .one(conn)
    .await?
    .filter(|t| t.is_active)
    .ok_or(Error::TariffInactive)?;

  let duration = utils::days(tariff.duration_days as i64);
  let outcome = |subscription: subscription::Model,
                 replaced: Option<subscription::Model>| ScenarioOutcome {
    scenario,
    subscription,
    replaced,
    duration_days: tariff.duration_days,
  };

  let Some(current) = current else {
    let sub = insert_paid(conn, tg_user_id, &tariff, now, now + duration).await?;
    info!(user = tg_user_id, subscription = sub.id, %scenario, "Subscription created");
    return Ok(outcome(sub, None));
  };

  if scenario == Scenario::Renew {
    let end_at = current.end_at + duration;
    let sub = subscription::ActiveModel {
      end_at: Set(end_at),
      kind: Set(SubscriptionKind::Extended),
      ..current.into()
    }
    .update(conn)
    .await?;
    info!(user = tg_user_id, subscription = sub.id, "Subscription renewed");
    return Ok(outcome(sub, None));
  }

  let carried = match policy {
    PlanChangePolicy::CancelAndReplace => TimeDelta::zero(),
    PlanChangePolicy::CarryRemaining => current.end_at - now,
  };

  let replaced = subscription::ActiveModel {
    status: Set(SubscriptionStatus::Cancelled),
    status_reason: Set(Some(format!("Replaced by new purchase ({scenario})"))),
    ..current.into()
  }
  .update(conn)
  .await?;

  let sub =
    insert_paid(conn, tg_user_id, &tariff, now, now + duration + carried)
      .await?;
  info!(
    user = tg_user_id,
    subscription = sub.id,
    replaced = replaced.id,
    %scenario,
    "Subscription replaced"
  );

  Ok(outcome(sub, Some(replaced)))
}

/// Starts a free trial. Callers must hold the user's lock.
pub async fn activate_trial_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  trial_days: i64,
  now: DateTime,
) -> Result<subscription::Model> {
  let user = user::Entity::find_by_id(tg_user_id)
    .one(conn)
    .await?
    .ok_or(Error::UserNotFound)?;

  if user.is_blocked {
    return Err(Error::UserBlocked);
  }
  if user.trial_used {
    return Err(Error::TrialUsed);
  }
  if current_in(conn, tg_user_id, now).await?.is_some() {
    return Err(Error::AlreadySubscribed);
  }

  let sub = subscription::ActiveModel {
    id: NotSet,
    tg_user_id: Set(tg_user_id),
    tariff_id: Set(None),
    kind: Set(SubscriptionKind::Trial),
    status: Set(SubscriptionStatus::Active),
    start_at: Set(now),
    end_at: Set(now + utils::days(trial_days)),
    allowed_devices: Set(1),
    status_reason: Set(None),
    created_at: Set(now),
  };

  Ok(sub.insert(conn).await?)
}

pub async fn cancel_in<C: ConnectionTrait>(
  conn: &C,
  sub: subscription::Model,
  reason: &str,
) -> Result<subscription::Model> {
  let sub = subscription::ActiveModel {
    status: Set(SubscriptionStatus::Cancelled),
    status_reason: Set(Some(reason.to_string())),
    ..sub.into()
  }
  .update(conn)
  .await?;
  Ok(sub)
}

/// Cancels every ACTIVE subscription of a user, expired or not.
pub async fn cancel_all_active_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  reason: &str,
) -> Result<Vec<subscription::Model>> {
  let active = subscription::Entity::find()
    .filter(subscription::Column::TgUserId.eq(tg_user_id))
    .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
    .all(conn)
    .await?;

  let mut cancelled = Vec::with_capacity(active.len());
  for sub in active {
    cancelled.push(cancel_in(conn, sub, reason).await?);
  }
  Ok(cancelled)
}

pub struct Subscription<'a> {
  db: &'a DatabaseConnection,
  policy: PlanChangePolicy,
}

impl<'a> Subscription<'a> {
  pub fn new(db: &'a DatabaseConnection, policy: PlanChangePolicy) -> Self {
    Self { db, policy }
  }

  pub async fn current(
    &self,
    tg_user_id: i64,
  ) -> Result<Option<subscription::Model>> {
    current_in(self.db, tg_user_id, utils::now()).await
  }

  /// Current subscription together with its tariff, `None` for trials.
  pub async fn current_with_tariff(
    &self,
    tg_user_id: i64,
  ) -> Result<Option<(subscription::Model, Option<tariff::Model>)>> {
    let Some(sub) = self.current(tg_user_id).await? else {
      return Ok(None);
    };
    let tariff = match sub.tariff_id {
      Some(id) => tariff::Entity::find_by_id(id).one(self.db).await?,
      None => None,
    };
    Ok(Some((sub, tariff)))
  }

  pub async fn determine_scenario(
    &self,
    tg_user_id: i64,
    tariff_id: i32,
  ) -> Result<Scenario> {
    determine_in(self.db, tg_user_id, tariff_id, utils::now()).await
  }

  /// Decides and applies a purchase in one transaction. Callers hold the
  /// user's lock.
  pub async fn apply_scenario(
    &self,
    tg_user_id: i64,
    tariff_id: i32,
  ) -> Result<ScenarioOutcome> {
    let txn = self.db.begin().await?;
    let outcome =
      apply_in(&txn, tg_user_id, tariff_id, self.policy, utils::now()).await?;
    txn.commit().await?;

    Ok(outcome)
  }

  /// Current subscriptions, earliest end first.
  pub async fn all_current(&self) -> Result<Vec<subscription::Model>> {
    let subs = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::EndAt.gt(utils::now()))
      .order_by_asc(subscription::Column::EndAt)
      .all(self.db)
      .await?;
    Ok(subs)
  }

  /// Current subscriptions of one user, latest end first.
  pub async fn current_for(
    &self,
    tg_user_id: i64,
  ) -> Result<Vec<subscription::Model>> {
    let subs = subscription::Entity::find()
      .filter(subscription::Column::TgUserId.eq(tg_user_id))
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::EndAt.gt(utils::now()))
      .order_by_desc(subscription::Column::EndAt)
      .all(self.db)
      .await?;
    Ok(subs)
  }

  /// Marks ACTIVE subscriptions past their end date as EXPIRED.
  pub async fn expire_overdue(&self) -> Result<Vec<subscription::Model>> {
    let txn = self.db.begin().await?;

    let overdue = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::EndAt.lte(utils::now()))
      .all(&txn)
      .await?;

    let mut expired = Vec::with_capacity(overdue.len());
    for sub in overdue {
      let sub = subscription::ActiveModel {
        status: Set(SubscriptionStatus::Expired),
        ..sub.into()
      }
      .update(&txn)
      .await?;
      expired.push(sub);
    }

    txn.commit().await?;
    Ok(expired)
  }

  pub async fn count_active(&self) -> Result<u64> {
    let count = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::EndAt.gt(utils::now()))
      .count(self.db)
      .await?;
    Ok(count)
  }

  pub async fn by_user(
    &self,
    tg_user_id: i64,
  ) -> Result<Vec<subscription::Model>> {
    let subs = subscription::Entity::find()
      .filter(subscription::Column::TgUserId.eq(tg_user_id))
      .order_by_desc(subscription::Column::CreatedAt)
      .all(self.db)
      .await?;
    Ok(subs)
  }
}

#[cfg(test)]
mod tests {
  use futures::future;

  use super::*;
  use crate::sv::testing::{self, MONTH, QUARTER, WEEK};

  fn tariff(id: i32, price: i64) -> tariff::Model {
    tariff::Model {
      id,
      code: format!("T{id}"),
      name: format!("Tariff {id}"),
      description: None,
      duration_days: 30,
      price,
      allowed_devices: 1,
      is_active: true,
      created_at: utils::now(),
    }
  }

  #[test]
  fn test_classification_table() {
    let current = tariff(1, 400);

    assert_eq!(classify(&current, &tariff(1, 400)), Scenario::Renew);
    assert_eq!(classify(&current, &tariff(2, 1000)), Scenario::Upgrade);
    assert_eq!(classify(&current, &tariff(3, 100)), Scenario::Downgrade);
    assert_eq!(classify(&current, &tariff(4, 400)), Scenario::CrossPurchase);
  }

  #[test]
  fn test_policy_from_str() {
    assert_eq!("carry".parse(), Ok(PlanChangePolicy::CarryRemaining));
    assert_eq!("Replace".parse(), Ok(PlanChangePolicy::CancelAndReplace));
    assert!("keep".parse::<PlanChangePolicy>().is_err());
  }

  #[tokio::test]
  async fn test_new_user_scenario() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;

    let month = testing::tariff_id(&db, MONTH).await;

    assert_eq!(
      sv.determine_scenario(1, month).await.unwrap(),
      Scenario::NewUser
    );
    let outcome = sv.apply_scenario(1, month).await.unwrap();

    assert_eq!(outcome.scenario, Scenario::NewUser);
    assert_eq!(outcome.duration_days, 30);
    assert_eq!(outcome.subscription.kind, SubscriptionKind::Paid);
    assert_eq!(outcome.subscription.status, SubscriptionStatus::Active);
    assert_eq!(
      outcome.subscription.end_at - outcome.subscription.start_at,
      utils::days(30)
    );
    assert!(outcome.replaced.is_none());
  }

  #[tokio::test]
  async fn test_renew_extends_from_old_end() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;

    let first = sv.apply_scenario(1, month).await.unwrap().subscription;
    let renewed = sv.apply_scenario(1, month).await.unwrap();

    assert_eq!(renewed.scenario, Scenario::Renew);
    assert_eq!(renewed.subscription.id, first.id);
    assert_eq!(renewed.subscription.end_at, first.end_at + utils::days(30));
    assert_eq!(renewed.subscription.kind, SubscriptionKind::Extended);
  }

  #[tokio::test]
  async fn test_upgrade_cancels_and_replaces() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    let quarter = testing::tariff_id(&db, QUARTER).await;

    let first = sv.apply_scenario(1, month).await.unwrap().subscription;
    assert_eq!(
      sv.determine_scenario(1, quarter).await.unwrap(),
      Scenario::Upgrade
    );

    let outcome = sv.apply_scenario(1, quarter).await.unwrap();
    let replaced = outcome.replaced.unwrap();

    assert_eq!(outcome.scenario, Scenario::Upgrade);
    assert_ne!(outcome.subscription.id, first.id);
    assert_eq!(replaced.id, first.id);
    assert_eq!(replaced.status, SubscriptionStatus::Cancelled);
    assert_eq!(
      replaced.status_reason.as_deref(),
      Some("Replaced by new purchase (upgrade)")
    );
    assert_eq!(outcome.subscription.allowed_devices, 2);
    assert_eq!(sv.current_for(1).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_downgrade_and_cross_purchase() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    let week = testing::tariff_id(&db, WEEK).await;
    let promo = testing::tariff(&db, "PROMO_MONTH", 30, 400).await.id;

    sv.apply_scenario(1, month).await.unwrap();
    assert_eq!(
      sv.determine_scenario(1, week).await.unwrap(),
      Scenario::Downgrade
    );
    assert_eq!(
      sv.determine_scenario(1, promo).await.unwrap(),
      Scenario::CrossPurchase
    );

    let outcome = sv.apply_scenario(1, promo).await.unwrap();
    assert_eq!(outcome.scenario, Scenario::CrossPurchase);
    assert!(outcome.replaced.is_some());
  }

  #[tokio::test]
  async fn test_carry_remaining_policy() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::CarryRemaining);
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    let quarter = testing::tariff_id(&db, QUARTER).await;

    sv.apply_scenario(1, month).await.unwrap();
    let outcome = sv.apply_scenario(1, quarter).await.unwrap();
    let sub = outcome.subscription;

    // 90 days plus roughly the 30 carried over
    let length = (sub.end_at - sub.start_at).num_days();
    assert!((119..=120).contains(&length), "got {length} days");
  }

  #[tokio::test]
  async fn test_unknown_tariff() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;

    // no current subscription: nothing to compare, the tariff is unavailable
    assert!(matches!(
      sv.apply_scenario(1, 999).await,
      Err(Error::TariffInactive)
    ));

    sv.apply_scenario(1, month).await.unwrap();
    assert!(matches!(
      sv.determine_scenario(1, 999).await,
      Err(Error::TariffNotFound)
    ));
  }

  #[tokio::test]
  async fn test_inactive_tariff() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    testing::deactivate(&db, MONTH).await;

    assert!(matches!(
      sv.apply_scenario(1, month).await,
      Err(Error::TariffInactive)
    ));
    assert!(sv.current(1).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_trial_then_purchase_upgrades() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;

    let trial = activate_trial_in(&db, 1, 1, utils::now()).await.unwrap();
    assert_eq!(trial.kind, SubscriptionKind::Trial);
    assert_eq!(trial.tariff_id, None);

    assert_eq!(
      sv.determine_scenario(1, month).await.unwrap(),
      Scenario::Upgrade
    );
  }

  #[tokio::test]
  async fn test_trial_refusals() {
    let (db, _locks) = testing::setup().await;
    let now = utils::now();

    assert!(matches!(
      activate_trial_in(&db, 5, 1, now).await,
      Err(Error::UserNotFound)
    ));

    testing::user(&db, 1).await;
    activate_trial_in(&db, 1, 1, now).await.unwrap();
    assert!(matches!(
      activate_trial_in(&db, 1, 1, now).await,
      Err(Error::AlreadySubscribed)
    ));
  }

  #[tokio::test]
  async fn test_expire_overdue() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;

    let past = utils::now() - utils::days(2);
    let stale = activate_trial_in(&db, 1, 1, past).await.unwrap();

    let expired = sv.expire_overdue().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, stale.id);
    assert_eq!(expired[0].status, SubscriptionStatus::Expired);
    assert!(sv.expire_overdue().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cancel_all_active() {
    let (db, _locks) = testing::setup().await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    sv.apply_scenario(1, month).await.unwrap();

    let cancelled = cancel_all_active_in(&db, 1, "User blocked").await.unwrap();

    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].status_reason.as_deref(), Some("User blocked"));
    assert!(sv.current(1).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_concurrent_purchases_keep_one_active() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vpn.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let (db, locks) = testing::setup_at(&url).await;
    let sv = Subscription::new(&db, PlanChangePolicy::default());
    testing::user(&db, 1).await;
    let month = testing::tariff_id(&db, MONTH).await;
    let quarter = testing::tariff_id(&db, QUARTER).await;

    let purchases = (0..8).map(|i| {
      let tariff = if i % 3 == 0 { quarter } else { month };
      let (sv, locks) = (&sv, &locks);
      async move {
        let _guard = locks.lock(1).await;
        sv.apply_scenario(1, tariff).await
      }
    });
    let results = future::join_all(purchases).await;

    assert!(results.iter().all(Result::is_ok));
    let new_users = results
      .iter()
      .filter(|r| matches!(r, Ok(o) if o.scenario == Scenario::NewUser))
      .count();
    assert_eq!(new_users, 1);
    assert_eq!(sv.current_for(1).await.unwrap().len(), 1);
  }
}
