use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderAccess, OrderStatus},
    entities::order_audit_log::AuditEventType,
    entities::order_lock_log::LockAction,
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
    services::movements::unwrap_txn_err,
    services::Actor,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Effective lock state, derived lazily from the stored fields and the
/// current time. No sweep is needed: `LOCKED` decays to permanently locked
/// the moment the deadline passes, wherever it is next observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { until: DateTime<Utc> },
    PermanentlyLocked,
}

impl LockState {
    pub fn derive(order: &order::Model, now: DateTime<Utc>) -> Self {
        if !order.is_locked {
            return LockState::Unlocked;
        }
        match order.can_unlock_until {
            Some(until) if now < until => LockState::Locked { until },
            _ => LockState::PermanentlyLocked,
        }
    }

    pub fn rejects_mutation(&self) -> bool {
        !matches!(self, LockState::Unlocked)
    }
}

/// Governs whether a completed order may still be mutated. Emits lock-log
/// and audit rows only; never inventory movements.
#[derive(Clone)]
pub struct OrderLockService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    lock_window: Duration,
}

impl OrderLockService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, lock_window_days: i64) -> Self {
        Self {
            db,
            event_sender,
            lock_window: Duration::days(lock_window_days),
        }
    }

    /// Locks a completed order, opening the unlock window.
    #[instrument(skip(self, actor), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn lock_order(
        &self,
        order_id: Uuid,
        actor: Actor,
    ) -> Result<order::Model, ServiceError> {
        if !actor.can_write {
            return Err(ServiceError::InvalidOperation(
                "Actor does not have write access".to_string(),
            ));
        }

        let lock_window = self.lock_window;
        let db = self.db.as_ref();
        let (updated, locked_at, until) = db
            .transaction::<_, (order::Model, DateTime<Utc>, DateTime<Utc>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let order = find_order(txn, order_id).await?;
                        let order = match order.access() {
                            OrderAccess::Historical(_) => {
                                return Err(ServiceError::HistoricalOrderImmutable(order_id));
                            }
                            OrderAccess::Active(model) => model.clone(),
                        };

                        if order.status() != Some(OrderStatus::Completed) {
                            return Err(ServiceError::InvalidOperation(format!(
                                "Only completed orders can be locked; order is '{}'",
                                order.status
                            )));
                        }
                        if order.is_locked {
                            return Err(ServiceError::InvalidOperation(
                                "Order is already locked".to_string(),
                            ));
                        }

                        let now = Utc::now();
                        let until = now + lock_window;

                        let mut active: order::ActiveModel = order.into();
                        active.is_locked = Set(true);
                        active.locked_at = Set(Some(now));
                        active.can_unlock_until = Set(Some(until));
                        active.updated_at = Set(Some(now));
                        let updated =
                            active.update(txn).await.map_err(ServiceError::db_error)?;

                        audit::record_lock_action_in_txn(
                            txn,
                            order_id,
                            LockAction::Lock,
                            actor.id,
                            None,
                        )
                        .await?;
                        audit::record_in_txn(
                            txn,
                            order_id,
                            AuditEventType::OrderLocked,
                            actor.id,
                            Some(json!({ "can_unlock_until": until })),
                            None,
                        )
                        .await?;

                        Ok((updated, now, until))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(until = %until, "Order locked");
        self.event_sender
            .emit(Event::OrderLocked {
                order_id,
                locked_at,
                can_unlock_until: until,
            })
            .await;

        Ok(updated)
    }

    /// Unlocks a locked order. Succeeds only inside the unlock window and
    /// with a non-empty reason; past the deadline the lock is permanent and
    /// even unlock is rejected with `OrderLocked`.
    #[instrument(skip(self, actor, reason), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn unlock_order(
        &self,
        order_id: Uuid,
        actor: Actor,
        reason: &str,
    ) -> Result<order::Model, ServiceError> {
        if !actor.can_write {
            return Err(ServiceError::InvalidOperation(
                "Actor does not have write access".to_string(),
            ));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "An unlock reason is required".to_string(),
            ));
        }

        let reason_owned = reason.to_string();
        let db = self.db.as_ref();
        let updated = db
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = find_order(txn, order_id).await?;
                    let order = match order.access() {
                        OrderAccess::Historical(_) => {
                            return Err(ServiceError::HistoricalOrderImmutable(order_id));
                        }
                        OrderAccess::Active(model) => model.clone(),
                    };

                    match LockState::derive(&order, Utc::now()) {
                        LockState::Unlocked => {
                            return Err(ServiceError::InvalidOperation(
                                "Order is not locked".to_string(),
                            ));
                        }
                        LockState::PermanentlyLocked => {
                            return Err(ServiceError::OrderLocked(order_id));
                        }
                        LockState::Locked { .. } => {}
                    }

                    let now = Utc::now();
                    let mut active: order::ActiveModel = order.into();
                    active.is_locked = Set(false);
                    active.locked_at = Set(None);
                    active.can_unlock_until = Set(None);
                    active.updated_at = Set(Some(now));
                    let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

                    audit::record_lock_action_in_txn(
                        txn,
                        order_id,
                        LockAction::Unlock,
                        actor.id,
                        Some(reason_owned.clone()),
                    )
                    .await?;
                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::OrderUnlocked,
                        actor.id,
                        Some(json!({ "reason": reason_owned })),
                        None,
                    )
                    .await?;

                    Ok(updated)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!("Order unlocked");
        self.event_sender
            .emit(Event::OrderUnlocked {
                order_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Effective lock state for an order right now.
    pub async fn lock_state(&self, order_id: Uuid) -> Result<LockState, ServiceError> {
        let order = find_order(self.db.as_ref(), order_id).await?;
        Ok(LockState::derive(&order, Utc::now()))
    }
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn order_row(is_locked: bool, can_unlock_until: Option<DateTime<Utc>>) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "SO-1001".to_string(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::Completed.to_string(),
            payment_status: "paid".to_string(),
            total_amount: Decimal::ONE_HUNDRED,
            discount_amount: Decimal::ZERO,
            amount_paid: Decimal::ONE_HUNDRED,
            is_on_hold: false,
            is_locked,
            locked_at: is_locked.then(Utc::now),
            can_unlock_until,
            created_before_migration: false,
            inventory_applied: true,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
            version: 1,
        }
    }

    #[test]
    fn unlocked_order_derives_unlocked() {
        let order = order_row(false, None);
        assert_eq!(LockState::derive(&order, Utc::now()), LockState::Unlocked);
    }

    #[test]
    fn locked_order_inside_window_is_locked() {
        let until = Utc::now() + Duration::days(3);
        let order = order_row(true, Some(until));
        assert_eq!(
            LockState::derive(&order, Utc::now()),
            LockState::Locked { until }
        );
    }

    #[test]
    fn lock_decays_to_permanent_at_deadline() {
        let until = Utc::now();
        let order = order_row(true, Some(until));
        assert_eq!(
            LockState::derive(&order, until),
            LockState::PermanentlyLocked
        );
        assert_eq!(
            LockState::derive(&order, until + Duration::days(30)),
            LockState::PermanentlyLocked
        );
    }

    #[test]
    fn locked_row_without_deadline_is_permanent() {
        let order = order_row(true, None);
        assert_eq!(
            LockState::derive(&order, Utc::now()),
            LockState::PermanentlyLocked
        );
    }
}
