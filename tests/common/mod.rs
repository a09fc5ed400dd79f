#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use stockbook_api::{
    db::{self, DbConfig, DbPool},
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        processed_good,
        stock_movement::{self, Entity as StockMovementEntity, MovementType, StockItemType},
    },
    events::{Event, EventSender},
    handlers::AppServices,
    services::{movements::NewMovement, orders::CreateOrderRequest, Actor},
};

/// Test harness backed by an in-memory SQLite database with the full
/// migration set applied. A single pooled connection keeps every query on
/// the same database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    _event_rx: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let pool = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let services = AppServices::new(pool.clone(), EventSender::new(tx), 7);

        Self {
            db: pool,
            services,
            _event_rx: rx,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(Uuid::new_v4(), true)
    }

    pub fn read_only_actor(&self) -> Actor {
        Actor::new(Uuid::new_v4(), false)
    }

    /// Creates a processed good and seeds its opening stock through the
    /// ledger, so the cache and the movement stream agree from the start.
    pub async fn seed_good(&self, sku: &str, opening_stock: Decimal) -> processed_good::Model {
        let good = processed_good::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Good {}", sku)),
            sku: Set(sku.to_string()),
            unit_price: Set(Decimal::new(1000, 2)),
            quantity_available: Set(Decimal::ZERO),
            ..Default::default()
        };
        let good = good
            .insert(self.db.as_ref())
            .await
            .expect("failed to seed processed good");

        if opening_stock > Decimal::ZERO {
            let mut movement = NewMovement::new(
                StockItemType::ProcessedGood,
                good.id,
                MovementType::In,
                opening_stock,
                Utc::now().date_naive(),
            );
            movement.reference_type = Some("production_batch".to_string());
            self.services
                .movements
                .record_movement(movement)
                .await
                .expect("failed to seed opening stock");
        }

        self.good(good.id).await
    }

    pub async fn good(&self, good_id: Uuid) -> processed_good::Model {
        processed_good::Entity::find_by_id(good_id)
            .one(self.db.as_ref())
            .await
            .expect("failed to fetch processed good")
            .expect("processed good should exist")
    }

    /// Cached balance column, as opposed to the reconstructed ledger value.
    pub async fn cached_available(&self, good_id: Uuid) -> Decimal {
        self.good(good_id).await.quantity_available
    }

    /// Balance reconstructed strictly from the ledger.
    pub async fn ledger_balance(&self, good_id: Uuid) -> Decimal {
        self.services
            .balance
            .current_balance(StockItemType::ProcessedGood, good_id)
            .await
            .expect("failed to reconstruct balance")
    }

    pub async fn movement_count(&self, good_id: Uuid) -> usize {
        StockMovementEntity::find()
            .filter(stock_movement::Column::ItemReference.eq(good_id))
            .all(self.db.as_ref())
            .await
            .expect("failed to count movements")
            .len()
    }

    pub async fn create_draft_order(&self, order_number: &str) -> Uuid {
        let response = self
            .services
            .orders
            .create_order(
                CreateOrderRequest {
                    customer_id: Uuid::new_v4(),
                    order_number: order_number.to_string(),
                    discount_amount: None,
                    notes: None,
                },
                self.actor(),
            )
            .await
            .expect("failed to create order");
        response.id
    }

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .expect("failed to fetch order")
            .expect("order should exist")
    }

    /// Inserts an order row that predates the ledger migration, bypassing
    /// the service layer the way migrated data would.
    pub async fn seed_historical_order(&self, order_number: &str) -> order::Model {
        let active = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            customer_id: Set(Uuid::new_v4()),
            status: Set(OrderStatus::DeliveryCompleted.to_string()),
            payment_status: Set(PaymentStatus::Paid.to_string()),
            total_amount: Set(Decimal::new(50000, 2)),
            discount_amount: Set(Decimal::ZERO),
            amount_paid: Set(Decimal::new(50000, 2)),
            is_on_hold: Set(false),
            is_locked: Set(false),
            locked_at: Set(None),
            can_unlock_until: Set(None),
            created_before_migration: Set(true),
            inventory_applied: Set(false),
            notes: Set(None),
            version: Set(1),
            ..Default::default()
        };
        active
            .insert(self.db.as_ref())
            .await
            .expect("failed to seed historical order")
    }
}
