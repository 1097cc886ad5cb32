use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TaskLock::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskLock::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskLock::Token).uuid().not_null())
                    .col(ColumnDef::new(TaskLock::ExpiresAt).big_integer().not_null())
                    .col(ColumnDef::new(TaskLock::TaskName).string().not_null())
                    .col(
                        ColumnDef::new(TaskLock::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskLock::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TaskLock {
    Table,
    Key,
    Token,
    ExpiresAt,
    TaskName,
    Created,
}
