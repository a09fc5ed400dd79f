use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Order lifecycle status. The two delivery statuses only exist on rows that
/// predate the ledger migration; they load and display but are rejected as
/// targets for any transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Completed,
    Cancelled,
    PartiallyDelivered,
    DeliveryCompleted,
}

impl OrderStatus {
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            OrderStatus::PartiallyDelivered | OrderStatus::DeliveryCompleted
        )
    }

    /// Statuses a caller may request through `set_status`. `Completed` is
    /// derived from payments and never assignable directly.
    pub fn assignable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Draft | OrderStatus::Confirmed | OrderStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub amount_paid: Decimal,
    pub is_on_hold: bool,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub can_unlock_until: Option<DateTime<Utc>>,
    pub created_before_migration: bool,
    pub inventory_applied: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Classification of an order at the mutation boundary. Pre-migration rows
/// are permanently read-only with respect to inventory and lifecycle
/// effects; classifying once at the entry point replaces per-mutator flag
/// checks.
#[derive(Debug, Clone, Copy)]
pub enum OrderAccess<'a> {
    Historical(&'a Model),
    Active(&'a Model),
}

impl Model {
    pub fn status(&self) -> Option<OrderStatus> {
        self.status.parse().ok()
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment_status.parse().ok()
    }

    pub fn access(&self) -> OrderAccess<'_> {
        if self.created_before_migration {
            OrderAccess::Historical(self)
        } else {
            OrderAccess::Active(self)
        }
    }

    /// Amount that must be covered by payments before the order completes.
    pub fn net_total(&self) -> Decimal {
        self.total_amount - self.discount_amount
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }
        Ok(active_model)
    }
}
