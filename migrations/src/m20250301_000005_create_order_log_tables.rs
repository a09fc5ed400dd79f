use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrderLockLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderLockLog::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderLockLog::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderLockLog::Action).string().not_null())
                    .col(ColumnDef::new(OrderLockLog::PerformedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(OrderLockLog::PerformedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderLockLog::UnlockReason).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_order_lock_log_order_id")
                    .table(OrderLockLog::Table)
                    .col(OrderLockLog::OrderId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderAuditLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderAuditLog::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderAuditLog::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderAuditLog::EventType).string().not_null())
                    .col(
                        ColumnDef::new(OrderAuditLog::PerformedBy)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrderAuditLog::PerformedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderAuditLog::EventData).json().null())
                    .col(ColumnDef::new(OrderAuditLog::Description).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_order_audit_log_order_id")
                    .table(OrderAuditLog::Table)
                    .col(OrderAuditLog::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderAuditLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderLockLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OrderLockLog {
    Table,
    Id,
    OrderId,
    Action,
    PerformedBy,
    PerformedAt,
    UnlockReason,
}

#[derive(DeriveIden)]
enum OrderAuditLog {
    Table,
    Id,
    OrderId,
    EventType,
    PerformedBy,
    PerformedAt,
    EventData,
    Description,
}
