use crate::{
  entity::{PaymentStatus, payment},
  prelude::*,
};

/// A confirmed payment as reported by the chat platform.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
  pub tg_user_id: i64,
  pub charge_id: String,
  pub amount: i64,
  pub payload: String,
}

/// Invoice payload for a tariff: `tariff_<id>_<unix millis>`.
pub fn invoice_payload(tariff_id: i32) -> String {
  format!("tariff_{tariff_id}_{}", Utc::now().timestamp_millis())
}

/// Extracts the tariff id from an invoice payload.
pub fn parse_payload(payload: &str) -> Result<i32> {
  let invalid = || Error::InvalidPayload(payload.to_string());

  let rest = payload.strip_prefix("tariff_").ok_or_else(invalid)?;
  let (id, stamp) = rest.split_once('_').ok_or_else(invalid)?;

  let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
  if !digits(id) || !digits(stamp) {
    return Err(invalid());
  }

  id.parse().ok().filter(|&id| id > 0).ok_or_else(invalid)
}

pub async fn by_charge_id_in<C: ConnectionTrait>(
  conn: &C,
  charge_id: &str,
) -> Result<Option<payment::Model>> {
  let payment = payment::Entity::find()
    .filter(payment::Column::ChargeId.eq(charge_id))
    .one(conn)
    .await?;
  Ok(payment)
}

pub async fn insert_in<C: ConnectionTrait>(
  conn: &C,
  event: &PaymentEvent,
  tariff_id: i32,
) -> Result<payment::Model> {
  let payment = payment::ActiveModel {
    id: NotSet,
    tg_user_id: Set(event.tg_user_id),
    tariff_id: Set(tariff_id),
    amount: Set(event.amount),
    charge_id: Set(event.charge_id.clone()),
    status: Set(PaymentStatus::Success),
    created_at: Set(utils::now()),
  };
  Ok(payment.insert(conn).await?)
}

pub struct Payment<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Payment<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn by_user(&self, tg_user_id: i64) -> Result<Vec<payment::Model>> {
    let payments = payment::Entity::find()
      .filter(payment::Column::TgUserId.eq(tg_user_id))
      .order_by_desc(payment::Column::CreatedAt)
      .all(self.db)
      .await?;
    Ok(payments)
  }

  pub async fn count(&self) -> Result<u64> {
    Ok(payment::Entity::find().count(self.db).await?)
  }

  /// Total of successful payments, in Stars.
  pub async fn revenue(&self) -> Result<i64> {
    let payments = payment::Entity::find()
      .filter(payment::Column::Status.eq(PaymentStatus::Success))
      .all(self.db)
      .await?;
    Ok(payments.iter().map(|p| p.amount).sum())
  }
}
