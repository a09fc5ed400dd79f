use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Every order-affecting action lands here, in the same transaction as the
/// action itself. Rows are never updated after insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    OrderCreated,
    OrderItemAdded,
    OrderItemAdjusted,
    OrderItemDeleted,
    StatusChanged,
    PaymentRecorded,
    OrderHoldChanged,
    OrderLocked,
    OrderUnlocked,
    InventoryRestored,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_audit_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
    pub event_data: Option<Json>,
    pub description: Option<String>,
}

impl Model {
    pub fn event_type(&self) -> Option<AuditEventType> {
        self.event_type.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.performed_at {
            active_model.performed_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
