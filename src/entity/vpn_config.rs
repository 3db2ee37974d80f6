use base64::{Engine, engine::general_purpose::STANDARD};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vpn_configs")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub tg_user_id: i64,
  pub subscription_id: i32,
  /// Provider-issued config id
  #[sea_orm(unique)]
  pub external_id: String,
  pub protocol: String,
  pub config_text: Vec<u8>,
  /// `data:image/png;base64,...`
  pub qr_data: Option<String>,
  pub created_at: DateTime,
  pub revoked_at: Option<DateTime>,
}

impl Model {
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.config_text).into_owned()
  }

  pub fn qr_png(&self) -> Option<Vec<u8>> {
    self.qr_data.as_deref().and_then(decode_qr)
  }
}

/// Decodes a base64 data URL into raw image bytes.
pub fn decode_qr(data_url: &str) -> Option<Vec<u8>> {
  let (_, payload) = data_url.split_once(',')?;
  if payload.is_empty() {
    return None;
  }
  STANDARD.decode(payload).ok()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::subscription::Entity",
    from = "Column::SubscriptionId",
    to = "super::subscription::Column::Id"
  )]
  Subscription,
}

impl Related<super::subscription::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Subscription.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
