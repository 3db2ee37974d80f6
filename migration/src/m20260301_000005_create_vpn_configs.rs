use sea_orm_migration::prelude::*;

use super::{
  m20260301_000001_create_users::Users,
  m20260301_000003_create_subscriptions::Subscriptions,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(VpnConfigs::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(VpnConfigs::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(VpnConfigs::TgUserId).big_integer().not_null())
          .col(ColumnDef::new(VpnConfigs::SubscriptionId).integer().not_null())
          .col(
            ColumnDef::new(VpnConfigs::ExternalId)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(VpnConfigs::Protocol).string().not_null())
          .col(ColumnDef::new(VpnConfigs::ConfigText).binary().not_null())
          .col(ColumnDef::new(VpnConfigs::QrData).text().null())
          .col(ColumnDef::new(VpnConfigs::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(VpnConfigs::RevokedAt).date_time().null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_vpn_configs_user")
              .from(VpnConfigs::Table, VpnConfigs::TgUserId)
              .to(Users::Table, Users::TgUserId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_vpn_configs_subscription")
              .from(VpnConfigs::Table, VpnConfigs::SubscriptionId)
              .to(Subscriptions::Table, Subscriptions::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_vpn_configs_subscription")
          .table(VpnConfigs::Table)
          .col(VpnConfigs::SubscriptionId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(VpnConfigs::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum VpnConfigs {
  Table,
  Id,
  TgUserId,
  SubscriptionId,
  ExternalId,
  Protocol,
  ConfigText,
  QrData,
  CreatedAt,
  RevokedAt,
}
