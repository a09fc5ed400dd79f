pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_orders_table;
mod m20250301_000002_create_order_items_table;
mod m20250301_000003_create_processed_goods_table;
mod m20250301_000004_create_stock_movements_table;
mod m20250301_000005_create_order_log_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_orders_table::Migration),
            Box::new(m20250301_000002_create_order_items_table::Migration),
            Box::new(m20250301_000003_create_processed_goods_table::Migration),
            Box::new(m20250301_000004_create_stock_movements_table::Migration),
            Box::new(m20250301_000005_create_order_log_tables::Migration),
        ]
    }
}
