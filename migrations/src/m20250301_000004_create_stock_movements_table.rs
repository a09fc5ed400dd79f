use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StockMovements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockMovements::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::ItemType).string().not_null())
                    .col(
                        ColumnDef::new(StockMovements::ItemReference)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::MovementType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::EffectiveDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::ReferenceId).uuid().null())
                    .col(
                        ColumnDef::new(StockMovements::ReferenceType)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(StockMovements::Notes).text().null())
                    .to_owned(),
            )
            .await?;

        // Covering index for the chronological reconstruction scan.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_movements_item_chrono")
                    .table(StockMovements::Table)
                    .col(StockMovements::ItemType)
                    .col(StockMovements::ItemReference)
                    .col(StockMovements::EffectiveDate)
                    .col(StockMovements::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockMovements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockMovements {
    Table,
    Id,
    ItemType,
    ItemReference,
    MovementType,
    Quantity,
    EffectiveDate,
    CreatedAt,
    ReferenceId,
    ReferenceType,
    Notes,
}
