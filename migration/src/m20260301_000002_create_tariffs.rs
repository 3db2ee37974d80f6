use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Tariffs::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Tariffs::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Tariffs::Code).string().not_null().unique_key())
          .col(ColumnDef::new(Tariffs::Name).string().not_null())
          .col(ColumnDef::new(Tariffs::Description).text().null())
          .col(ColumnDef::new(Tariffs::DurationDays).integer().not_null())
          .col(ColumnDef::new(Tariffs::Price).big_integer().not_null())
          .col(
            ColumnDef::new(Tariffs::AllowedDevices)
              .integer()
              .not_null()
              .default(1),
          )
          .col(
            ColumnDef::new(Tariffs::IsActive).boolean().not_null().default(true),
          )
          .col(ColumnDef::new(Tariffs::CreatedAt).date_time().not_null())
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Tariffs::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Tariffs {
  Table,
  Id,
  Code,
  Name,
  Description,
  DurationDays,
  Price,
  AllowedDevices,
  IsActive,
  CreatedAt,
}
