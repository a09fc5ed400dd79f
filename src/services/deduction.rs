use crate::{
    db::DbPool,
    entities::order_audit_log::AuditEventType,
    entities::processed_good::{self, Entity as ProcessedGoodEntity},
    entities::stock_movement::{MovementType, StockItemType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
    services::movements::{unwrap_txn_err, MovementStore, NewMovement},
    services::Actor,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbBackend, EntityTrait, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Result of one deduction or restoration.
#[derive(Debug, Clone)]
pub struct DeductionOutcome {
    pub processed_good_id: Uuid,
    pub movement_id: Uuid,
    pub quantity: Decimal,
    pub new_available: Decimal,
}

/// The only component permitted to write order-driven ledger movements.
/// Every operation checks the resulting balance under the same row lock and
/// transaction as the write, so two concurrent deductions can never both
/// pass the check against a stale balance.
#[derive(Clone)]
pub struct DeductionEngine {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl DeductionEngine {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Deducts inventory inside the caller's transaction. Refuses with
    /// `InsufficientInventory` before anything is written if the balance
    /// cannot cover the quantity.
    pub(crate) async fn deduct_in_txn<C: ConnectionTrait>(
        conn: &C,
        processed_good_id: Uuid,
        quantity: Decimal,
        reference_id: Option<Uuid>,
    ) -> Result<DeductionOutcome, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Deduction quantity must be positive, got {}",
                quantity
            )));
        }

        let good = fetch_good_for_update(conn, processed_good_id).await?;
        if good.quantity_available < quantity {
            return Err(ServiceError::InsufficientInventory {
                available: good.quantity_available,
                required: quantity,
            });
        }

        let new_available = good.quantity_available - quantity;
        // Unreachable while the check above runs under the row lock; a trip
        // here is a bug, not a retryable condition.
        if new_available < Decimal::ZERO {
            return Err(ServiceError::NegativeInventoryInvariant {
                item: processed_good_id,
                balance: new_available,
            });
        }

        let mut new_movement = NewMovement::new(
            StockItemType::ProcessedGood,
            processed_good_id,
            MovementType::OrderItemAdded,
            quantity,
            Utc::now().date_naive(),
        );
        new_movement.reference_id = reference_id;
        new_movement.reference_type = Some("order_item".to_string());
        let movement = MovementStore::append_in_txn(conn, new_movement).await?;

        let mut active: processed_good::ActiveModel = good.into();
        active.quantity_available = Set(new_available);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await.map_err(ServiceError::db_error)?;

        Ok(DeductionOutcome {
            processed_good_id,
            movement_id: movement.id,
            quantity,
            new_available,
        })
    }

    /// Restores previously deducted inventory inside the caller's
    /// transaction. Restoration can never push the balance negative and so
    /// cannot fail for inventory reasons.
    pub(crate) async fn restore_in_txn<C: ConnectionTrait>(
        conn: &C,
        processed_good_id: Uuid,
        quantity: Decimal,
        reference_id: Option<Uuid>,
    ) -> Result<DeductionOutcome, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Restoration quantity must be positive, got {}",
                quantity
            )));
        }

        let good = fetch_good_for_update(conn, processed_good_id).await?;
        let new_available = good.quantity_available + quantity;

        let mut new_movement = NewMovement::new(
            StockItemType::ProcessedGood,
            processed_good_id,
            MovementType::OrderItemDeleted,
            quantity,
            Utc::now().date_naive(),
        );
        new_movement.reference_id = reference_id;
        new_movement.reference_type = Some("order_item".to_string());
        let movement = MovementStore::append_in_txn(conn, new_movement).await?;

        let mut active: processed_good::ActiveModel = good.into();
        active.quantity_available = Set(new_available);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await.map_err(ServiceError::db_error)?;

        Ok(DeductionOutcome {
            processed_good_id,
            movement_id: movement.id,
            quantity,
            new_available,
        })
    }

    /// Applies a quantity change as its delta: an increase deducts, a
    /// decrease restores, no change writes nothing.
    pub(crate) async fn adjust_in_txn<C: ConnectionTrait>(
        conn: &C,
        processed_good_id: Uuid,
        old_quantity: Decimal,
        new_quantity: Decimal,
        reference_id: Option<Uuid>,
    ) -> Result<Option<DeductionOutcome>, ServiceError> {
        let delta = new_quantity - old_quantity;
        if delta.is_zero() {
            return Ok(None);
        }
        let outcome = if delta > Decimal::ZERO {
            Self::deduct_in_txn(conn, processed_good_id, delta, reference_id).await?
        } else {
            Self::restore_in_txn(conn, processed_good_id, -delta, reference_id).await?
        };
        Ok(Some(outcome))
    }

    /// Standalone deduction in its own transaction.
    #[instrument(skip(self), fields(good = %processed_good_id, quantity = %quantity))]
    pub async fn deduct(
        &self,
        processed_good_id: Uuid,
        quantity: Decimal,
        actor: Actor,
        order_id: Option<Uuid>,
    ) -> Result<DeductionOutcome, ServiceError> {
        let db = self.db.as_ref();
        let outcome = db
            .transaction::<_, DeductionOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let outcome =
                        Self::deduct_in_txn(txn, processed_good_id, quantity, order_id).await?;
                    if let Some(order_id) = order_id {
                        audit::record_in_txn(
                            txn,
                            order_id,
                            AuditEventType::OrderItemAdded,
                            actor.id,
                            Some(json!({
                                "processed_good_id": processed_good_id,
                                "quantity": quantity,
                            })),
                            None,
                        )
                        .await?;
                    }
                    Ok(outcome)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            movement_id = %outcome.movement_id,
            new_available = %outcome.new_available,
            "Inventory deducted"
        );

        self.event_sender
            .emit(Event::InventoryDeducted {
                processed_good_id,
                quantity,
                new_available: outcome.new_available,
            })
            .await;

        Ok(outcome)
    }

    /// Standalone restoration in its own transaction.
    #[instrument(skip(self), fields(good = %processed_good_id, quantity = %quantity))]
    pub async fn restore(
        &self,
        processed_good_id: Uuid,
        quantity: Decimal,
        actor: Actor,
        order_id: Option<Uuid>,
    ) -> Result<DeductionOutcome, ServiceError> {
        let db = self.db.as_ref();
        let outcome = db
            .transaction::<_, DeductionOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let outcome =
                        Self::restore_in_txn(txn, processed_good_id, quantity, order_id).await?;
                    if let Some(order_id) = order_id {
                        audit::record_in_txn(
                            txn,
                            order_id,
                            AuditEventType::OrderItemDeleted,
                            actor.id,
                            Some(json!({
                                "processed_good_id": processed_good_id,
                                "quantity": quantity,
                            })),
                            None,
                        )
                        .await?;
                    }
                    Ok(outcome)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            movement_id = %outcome.movement_id,
            new_available = %outcome.new_available,
            "Inventory restored"
        );

        self.event_sender
            .emit(Event::InventoryRestored {
                processed_good_id,
                quantity,
                new_available: outcome.new_available,
            })
            .await;

        Ok(outcome)
    }

    /// Standalone adjustment in its own transaction; no-op when the
    /// quantities match.
    #[instrument(skip(self), fields(good = %processed_good_id))]
    pub async fn adjust(
        &self,
        processed_good_id: Uuid,
        old_quantity: Decimal,
        new_quantity: Decimal,
        actor: Actor,
        order_id: Option<Uuid>,
    ) -> Result<Option<DeductionOutcome>, ServiceError> {
        let delta = new_quantity - old_quantity;
        if delta.is_zero() {
            return Ok(None);
        }
        let outcome = if delta > Decimal::ZERO {
            self.deduct(processed_good_id, delta, actor, order_id).await?
        } else {
            self.restore(processed_good_id, -delta, actor, order_id)
                .await?
        };
        Ok(Some(outcome))
    }
}

/// Fetches the balance row, taking `FOR UPDATE` on backends with row-level
/// locks. SQLite serializes writing transactions on its own.
async fn fetch_good_for_update<C: ConnectionTrait>(
    conn: &C,
    processed_good_id: Uuid,
) -> Result<processed_good::Model, ServiceError> {
    let mut query = ProcessedGoodEntity::find_by_id(processed_good_id);
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Processed good {} not found", processed_good_id))
        })
}
