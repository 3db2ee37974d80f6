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
          .table(Payments::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Payments::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Payments::TgUserId).big_integer().not_null())
          .col(ColumnDef::new(Payments::TariffId).integer().not_null())
          .col(ColumnDef::new(Payments::Amount).big_integer().not_null())
          .col(
            ColumnDef::new(Payments::ChargeId).string().not_null().unique_key(),
          )
          .col(
            ColumnDef::new(Payments::Status)
              .string()
              .not_null()
              .default("success"),
          )
          .col(ColumnDef::new(Payments::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_payments_user")
              .from(Payments::Table, Payments::TgUserId)
              .to(Users::Table, Users::TgUserId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_payments_tariff")
              .from(Payments::Table, Payments::TariffId)
              .to(Tariffs::Table, Tariffs::Id),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Payments::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Payments {
  Table,
  Id,
  TgUserId,
  TariffId,
  Amount,
  ChargeId,
  Status,
  CreatedAt,
}
