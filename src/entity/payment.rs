use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PaymentStatus {
  #[sea_orm(string_value = "success")]
  Success,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub tg_user_id: i64,
  pub tariff_id: i32,
  pub amount: i64,
  /// Provider-issued charge id, used for idempotency
  #[sea_orm(unique)]
  pub charge_id: String,
  pub status: PaymentStatus,
  pub created_at: DateTime,
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

impl ActiveModelBehavior for ActiveModel {}
