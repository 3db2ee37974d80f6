//! Database migrations using SeaORM

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_users;
mod m20260301_000002_create_tariffs;
mod m20260301_000003_create_subscriptions;
mod m20260301_000004_create_payments;
mod m20260301_000005_create_vpn_configs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260301_000001_create_users::Migration),
      Box::new(m20260301_000002_create_tariffs::Migration),
      Box::new(m20260301_000003_create_subscriptions::Migration),
      Box::new(m20260301_000004_create_payments::Migration),
      Box::new(m20260301_000005_create_vpn_configs::Migration),
    ]
  }
}
