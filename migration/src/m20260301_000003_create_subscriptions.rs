use sea_orm_migration::prelude::*;

use super::{
  m20260301_000001_create_users::Users,
  m20260301_000002_create_tariffs::Tariffs,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Subscriptions::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Subscriptions::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Subscriptions::TgUserId).big_integer().not_null())
          .col(ColumnDef::new(Subscriptions::TariffId).integer().null())
          .col(ColumnDef::new(Subscriptions::Kind).string().not_null())
          .col(
            ColumnDef::new(Subscriptions::Status)
              .string()
              .not_null()
              .default("active"),
          )
          .col(ColumnDef::new(Subscriptions::StartAt).date_time().not_null())
          .col(ColumnDef::new(Subscriptions::EndAt).date_time().not_null())
          .col(
            ColumnDef::new(Subscriptions::AllowedDevices)
              .integer()
              .not_null()
              .default(1),
          )
          .col(ColumnDef::new(Subscriptions::StatusReason).string().null())
          .col(ColumnDef::new(Subscriptions::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_subscriptions_user")
              .from(Subscriptions::Table, Subscriptions::TgUserId)
              .to(Users::Table, Users::TgUserId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_subscriptions_tariff")
              .from(Subscriptions::Table, Subscriptions::TariffId)
              .to(Tariffs::Table, Tariffs::Id)
              .on_delete(ForeignKeyAction::SetNull),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_subscriptions_user_status")
          .table(Subscriptions::Table)
          .col(Subscriptions::TgUserId)
          .col(Subscriptions::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
pub enum Subscriptions {
  Table,
  Id,
  TgUserId,
  TariffId,
  Kind,
  Status,
  StartAt,
  EndAt,
  AllowedDevices,
  StatusReason,
  CreatedAt,
}
