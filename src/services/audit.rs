use crate::{
    db::DbPool,
    entities::order_audit_log::{self, AuditEventType, Entity as OrderAuditLogEntity},
    entities::order_lock_log::{self, Entity as OrderLockLogEntity, LockAction},
    errors::ServiceError,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// Appends an audit row inside the caller's transaction, so the trace
/// commits or rolls back with the action it describes.
pub(crate) async fn record_in_txn<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    event_type: AuditEventType,
    performed_by: Uuid,
    event_data: Option<serde_json::Value>,
    description: Option<String>,
) -> Result<order_audit_log::Model, ServiceError> {
    let entry = order_audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        event_type: Set(event_type.to_string()),
        performed_by: Set(performed_by),
        event_data: Set(event_data),
        description: Set(description),
        ..Default::default()
    };
    entry.insert(conn).await.map_err(ServiceError::db_error)
}

/// Appends a lock-log row inside the caller's transaction.
pub(crate) async fn record_lock_action_in_txn<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    action: LockAction,
    performed_by: Uuid,
    unlock_reason: Option<String>,
) -> Result<order_lock_log::Model, ServiceError> {
    let entry = order_lock_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        action: Set(action.to_string()),
        performed_by: Set(performed_by),
        unlock_reason: Set(unlock_reason),
        ..Default::default()
    };
    entry.insert(conn).await.map_err(ServiceError::db_error)
}

/// Read-only access to the order audit trail, consumed by reporting.
#[derive(Clone)]
pub struct AuditLogService {
    db: Arc<DbPool>,
}

impl AuditLogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Every recorded action for an order, oldest first.
    pub async fn get_audit_log(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_audit_log::Model>, ServiceError> {
        OrderAuditLogEntity::find()
            .filter(order_audit_log::Column::OrderId.eq(order_id))
            .order_by_asc(order_audit_log::Column::PerformedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Lock and unlock actions for an order, oldest first.
    pub async fn get_lock_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_lock_log::Model>, ServiceError> {
        OrderLockLogEntity::find()
            .filter(order_lock_log::Column::OrderId.eq(order_id))
            .order_by_asc(order_lock_log::Column::PerformedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
