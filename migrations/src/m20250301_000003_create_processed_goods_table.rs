use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProcessedGoods::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedGoods::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProcessedGoods::Name).string().not_null())
                    .col(
                        ColumnDef::new(ProcessedGoods::Sku)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGoods::UnitPrice)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGoods::QuantityAvailable)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGoods::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProcessedGoods::UpdatedAt).timestamp().null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessedGoods::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProcessedGoods {
    Table,
    Id,
    Name,
    Sku,
    UnitPrice,
    QuantityAvailable,
    CreatedAt,
    UpdatedAt,
}
