pub mod configs;
pub mod payment;
pub mod provision;
pub mod subscription;
pub mod tariff;
pub mod user;

pub use configs::Configs;
pub use payment::{Payment, PaymentEvent};
pub use provision::{Provision, PurchaseOutcome, RegenReport};
pub use subscription::{PlanChangePolicy, Scenario, Subscription};
pub use tariff::Tariff;
pub use user::User;

#[cfg(test)]
pub(crate) mod testing {
  use std::{collections::VecDeque, sync::Mutex};

  use crate::{
    entity::{tariff, user},
    prelude::*,
    state::UserLocks,
    vpn::{ConfigItem, CreateConfigs, Provider, protocol},
  };

  pub const WEEK: &str = "WEEK";
  pub const MONTH: &str = "MONTH";
  pub const QUARTER: &str = "3MONTH";

  pub async fn setup_at(url: &str) -> (DatabaseConnection, UserLocks) {
    let db = Database::connect(url).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    super::Tariff::new(&db).seed_defaults().await.unwrap();
    (db, UserLocks::new())
  }

  pub async fn setup() -> (DatabaseConnection, UserLocks) {
    setup_at("sqlite::memory:").await
  }

  pub async fn user(db: &DatabaseConnection, tg_user_id: i64) -> user::Model {
    super::User::new(db).get_or_create(tg_user_id, None).await.unwrap()
  }

  pub async fn tariff_id(db: &DatabaseConnection, code: &str) -> i32 {
    super::Tariff::new(db).by_code(code).await.unwrap().unwrap().id
  }

  pub async fn tariff(
    db: &DatabaseConnection,
    code: &str,
    duration_days: i32,
    price: i64,
  ) -> tariff::Model {
    tariff::ActiveModel {
      id: NotSet,
      code: Set(code.into()),
      name: Set(code.into()),
      description: Set(None),
      duration_days: Set(duration_days),
      price: Set(price),
      allowed_devices: Set(1),
      is_active: Set(true),
      created_at: Set(utils::now()),
    }
    .insert(db)
    .await
    .unwrap()
  }

  pub async fn deactivate(db: &DatabaseConnection, code: &str) {
    let tariff = super::Tariff::new(db).by_code(code).await.unwrap().unwrap();
    tariff::ActiveModel { is_active: Set(false), ..tariff.into() }
      .update(db)
      .await
      .unwrap();
  }

  pub fn item(protocol: &str, config_id: &str) -> ConfigItem {
    ConfigItem {
      protocol: protocol.into(),
      config_id: config_id.into(),
      config_text: format!("{protocol}://{config_id}"),
      qr_data: Some("data:image/png;base64,aGVsbG8=".into()),
      server_ip: None,
      server_port: None,
      expires_at: None,
    }
  }

  pub fn pair(suffix: &str) -> Vec<ConfigItem> {
    vec![
      item(protocol::VLESS_REALITY, &format!("vless-{suffix}")),
      item(protocol::AMNEZIAWG, &format!("awg-{suffix}")),
    ]
  }

  /// Scripted provider. Without queued responses every call yields a fresh
  /// vless + amneziawg pair.
  #[derive(Default)]
  pub struct MockProvider {
    responses: Mutex<VecDeque<Result<Vec<ConfigItem>>>>,
    pub created: Mutex<Vec<CreateConfigs>>,
    pub revoked: Mutex<Vec<(Vec<String>, String)>>,
  }

  impl MockProvider {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn push(&self, response: Result<Vec<ConfigItem>>) {
      self.responses.lock().unwrap().push_back(response);
    }

    pub fn created(&self) -> Vec<CreateConfigs> {
      self.created.lock().unwrap().clone()
    }

    pub fn revoked_ids(&self) -> Vec<String> {
      let revoked = self.revoked.lock().unwrap();
      revoked.iter().flat_map(|(ids, _)| ids.clone()).collect()
    }
  }

  #[async_trait]
  impl Provider for MockProvider {
    async fn create_configs(
      &self,
      params: CreateConfigs,
    ) -> Result<Vec<ConfigItem>> {
      let mut created = self.created.lock().unwrap();
      created.push(params);
      let call = created.len();
      drop(created);

      match self.responses.lock().unwrap().pop_front() {
        Some(response) => response,
        None => Ok(pair(&call.to_string())),
      }
    }

    async fn revoke_configs(&self, config_ids: &[String], reason: &str) {
      if config_ids.is_empty() {
        return;
      }
      self.revoked.lock().unwrap().push((config_ids.to_vec(), reason.into()));
    }
  }
}
