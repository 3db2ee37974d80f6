use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Users::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Users::TgUserId)
              .big_integer()
              .not_null()
              .primary_key(),
          )
          .col(ColumnDef::new(Users::Username).string().null())
          .col(
            ColumnDef::new(Users::IsBlocked).boolean().not_null().default(false),
          )
          .col(
            ColumnDef::new(Users::TrialUsed).boolean().not_null().default(false),
          )
          // weak reference, no foreign key
          .col(ColumnDef::new(Users::InvitedBy).big_integer().null())
          .col(ColumnDef::new(Users::RegDate).date_time().not_null())
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Users::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Users {
  Table,
  TgUserId,
  Username,
  IsBlocked,
  TrialUsed,
  InvitedBy,
  RegDate,
}
