use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SubscriptionKind {
  #[sea_orm(string_value = "trial")]
  Trial,
  #[sea_orm(string_value = "paid")]
  Paid,
  #[sea_orm(string_value = "bonus")]
  Bonus,
  #[sea_orm(string_value = "extended")]
  Extended,
}

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SubscriptionStatus {
  #[sea_orm(string_value = "active")]
  Active,
  #[sea_orm(string_value = "expiring_soon")]
  ExpiringSoon,
  #[sea_orm(string_value = "expired")]
  Expired,
  #[sea_orm(string_value = "cancelled")]
  Cancelled,
  #[sea_orm(string_value = "suspended")]
  Suspended,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub tg_user_id: i64,
  /// `None` for trials
  pub tariff_id: Option<i32>,
  pub kind: SubscriptionKind,
  pub status: SubscriptionStatus,
  pub start_at: DateTime,
  pub end_at: DateTime,
  pub allowed_devices: i32,
  pub status_reason: Option<String>,
  pub created_at: DateTime,
}

impl Model {
  /// Active and not yet past its end date.
  pub fn is_current(&self, now: DateTime) -> bool {
    self.status == SubscriptionStatus::Active && self.end_at > now
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::user::Entity",
    from = "Column::TgUserId",
    to = "super::user::Column::TgUserId"
  )]
  User,
  #[sea_orm(
    belongs_to = "super::tariff::Entity",
    from = "Column::TariffId",
    to = "super::tariff::Column::Id"
  )]
  Tariff,
  #[sea_orm(has_many = "super::vpn_config::Entity")]
  VpnConfigs,
}

impl Related<super::user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::User.def()
  }
}

impl Related<super::tariff::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Tariff.def()
  }
}

impl Related<super::vpn_config::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::VpnConfigs.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
