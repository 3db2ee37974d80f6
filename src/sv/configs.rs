//! Stored VPN configs. A config is live while `revoked_at` is unset; revoked
//! rows stay for history.

use sea_orm::sea_query::Expr;

use crate::{
  entity::vpn_config,
  prelude::*,
  vpn::{ConfigItem, protocol},
};

pub async fn live_in<C: ConnectionTrait>(
  conn: &C,
  subscription_id: i32,
) -> Result<Vec<vpn_config::Model>> {
  let configs = vpn_config::Entity::find()
    .filter(vpn_config::Column::SubscriptionId.eq(subscription_id))
    .filter(vpn_config::Column::RevokedAt.is_null())
    .order_by_asc(vpn_config::Column::Id)
    .all(conn)
    .await?;
  Ok(configs)
}

/// Revokes live configs of a subscription with one of `protocols`, or all of
/// them when `protocols` is empty. Returns the revoked external ids.
pub async fn revoke_in<C: ConnectionTrait>(
  conn: &C,
  subscription_id: i32,
  protocols: &[&str],
  now: DateTime,
) -> Result<Vec<String>> {
  let mut query = vpn_config::Entity::find()
    .filter(vpn_config::Column::SubscriptionId.eq(subscription_id))
    .filter(vpn_config::Column::RevokedAt.is_null());
  if !protocols.is_empty() {
    query =
      query.filter(vpn_config::Column::Protocol.is_in(protocols.to_vec()));
  }

  let ids: Vec<i32> = query.all(conn).await?.iter().map(|c| c.id).collect();
  if ids.is_empty() {
    return Ok(Vec::new());
  }

  vpn_config::Entity::update_many()
    .col_expr(vpn_config::Column::RevokedAt, Expr::value(now))
    .filter(vpn_config::Column::Id.is_in(ids.clone()))
    .exec(conn)
    .await?;

  let revoked = vpn_config::Entity::find()
    .filter(vpn_config::Column::Id.is_in(ids))
    .order_by_asc(vpn_config::Column::Id)
    .all(conn)
    .await?;
  Ok(revoked.into_iter().map(|c| c.external_id).collect())
}

/// Stores a fresh vless/amneziawg pair for a subscription.
///
/// Previous live amneziawg (and legacy WireGuard) rows are revoked before the
/// new one is inserted. vless is upserted by external id, which also revives
/// and re-parents a row the provider hands out again. Returns the stored rows
/// and the superseded external ids.
pub async fn store_pair_in<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  subscription_id: i32,
  items: &[ConfigItem],
  now: DateTime,
) -> Result<(Vec<vpn_config::Model>, Vec<String>)> {
  let mut superseded = Vec::new();
  let mut stored = Vec::with_capacity(items.len());

  let mut wireguard = vec![protocol::AMNEZIAWG];
  wireguard.extend(protocol::LEGACY_WIREGUARD);

  for item in items {
    let text = item.config_text.clone().into_bytes();

    if item.protocol == protocol::VLESS_REALITY {
      let existing = vpn_config::Entity::find()
        .filter(vpn_config::Column::ExternalId.eq(&item.config_id))
        .one(conn)
        .await?;

      let model = match existing {
        Some(row) => {
          vpn_config::ActiveModel {
            tg_user_id: Set(tg_user_id),
            subscription_id: Set(subscription_id),
            protocol: Set(item.protocol.clone()),
            config_text: Set(text),
            qr_data: Set(item.qr_data.clone()),
            revoked_at: Set(None),
            ..row.into()
          }
          .update(conn)
          .await?
        }
        None => insert(conn, tg_user_id, subscription_id, item, now).await?,
      };

      // any other live vless row of the subscription is now stale
      let stale = vpn_config::Entity::find()
        .filter(vpn_config::Column::SubscriptionId.eq(subscription_id))
        .filter(vpn_config::Column::Protocol.eq(protocol::VLESS_REALITY))
        .filter(vpn_config::Column::RevokedAt.is_null())
        .filter(vpn_config::Column::Id.ne(model.id))
        .all(conn)
        .await?;
      for row in stale {
        superseded.push(row.external_id.clone());
        vpn_config::ActiveModel { revoked_at: Set(Some(now)), ..row.into() }
          .update(conn)
          .await?;
      }

      stored.push(model);
    } else {
      if wireguard.contains(&item.protocol.as_str()) {
        superseded
          .extend(revoke_in(conn, subscription_id, &wireguard, now).await?);
      }
      let model = insert(conn, tg_user_id, subscription_id, item, now).await?;
      stored.push(model);
    }
  }

  Ok((stored, superseded))
}

async fn insert<C: ConnectionTrait>(
  conn: &C,
  tg_user_id: i64,
  subscription_id: i32,
  item: &ConfigItem,
  now: DateTime,
) -> Result<vpn_config::Model> {
  let config = vpn_config::ActiveModel {
    id: NotSet,
    tg_user_id: Set(tg_user_id),
    subscription_id: Set(subscription_id),
    external_id: Set(item.config_id.clone()),
    protocol: Set(item.protocol.clone()),
    config_text: Set(item.config_text.clone().into_bytes()),
    qr_data: Set(item.qr_data.clone()),
    created_at: Set(now),
    revoked_at: Set(None),
  };
  Ok(config.insert(conn).await?)
}

pub struct Configs<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Configs<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn live(
    &self,
    subscription_id: i32,
  ) -> Result<Vec<vpn_config::Model>> {
    live_in(self.db, subscription_id).await
  }

  pub async fn count_live(&self) -> Result<u64> {
    let count = vpn_config::Entity::find()
      .filter(vpn_config::Column::RevokedAt.is_null())
      .count(self.db)
      .await?;
    Ok(count)
  }
}
