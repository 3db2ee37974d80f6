use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Code of the catalog entry that backs free trials; never sold.
pub const TRIAL_CODE: &str = "TRIAL";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tariffs")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  #[sea_orm(unique)]
  pub code: String,
  pub name: String,
  pub description: Option<String>,
  pub duration_days: i32,
  /// Price in Telegram Stars
  pub price: i64,
  pub allowed_devices: i32,
  pub is_active: bool,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::subscription::Entity")]
  Subscriptions,
}

impl Related<super::subscription::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Subscriptions.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
