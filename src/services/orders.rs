use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderAccess, OrderStatus, PaymentStatus},
    entities::order_audit_log::AuditEventType,
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::processed_good::{self, Entity as ProcessedGoodEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
    services::deduction::DeductionEngine,
    services::lock::LockState,
    services::movements::unwrap_txn_err,
    services::Actor,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,
    pub discount_amount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddItemRequest {
    /// Optional caller-supplied id, usable as an idempotency key on retry.
    pub id: Option<Uuid>,
    pub processed_good_id: Uuid,
    pub quantity: Decimal,
    /// Defaults to the good's catalog price.
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: Option<Decimal>,
    pub processed_good_id: Option<Uuid>,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
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
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Maps order-item CRUD and status transitions onto the deduction engine,
/// one atomic transaction per operation: the item row, the ledger write, the
/// audit row and the total recalculation commit or roll back together.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new draft order. New orders always enter the post-migration
    /// regime with inventory effects applied from the first item.
    #[instrument(skip(self, request, actor), fields(order_number = %request.order_number))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: Actor,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let discount = request.discount_amount.unwrap_or(Decimal::ZERO);
        if discount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Discount amount cannot be negative".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let db = self.db.as_ref();
        let created = db
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let active = order::ActiveModel {
                        id: Set(order_id),
                        order_number: Set(request.order_number.clone()),
                        customer_id: Set(request.customer_id),
                        status: Set(OrderStatus::Draft.to_string()),
                        payment_status: Set(PaymentStatus::Unpaid.to_string()),
                        total_amount: Set(Decimal::ZERO),
                        discount_amount: Set(discount),
                        amount_paid: Set(Decimal::ZERO),
                        is_on_hold: Set(false),
                        is_locked: Set(false),
                        locked_at: Set(None),
                        can_unlock_until: Set(None),
                        created_before_migration: Set(false),
                        inventory_applied: Set(true),
                        notes: Set(request.notes.clone()),
                        version: Set(1),
                        ..Default::default()
                    };
                    let created = active.insert(txn).await.map_err(ServiceError::db_error)?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::OrderCreated,
                        actor.id,
                        Some(json!({ "order_number": created.order_number })),
                        None,
                    )
                    .await?;

                    Ok(created)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(order_id = %created.id, "Order created");
        self.event_sender.emit(Event::OrderCreated(created.id)).await;

        Ok(self.to_response(created, Vec::new()))
    }

    /// Adds an item to an order, deducting its inventory in the same
    /// transaction. On any failure nothing partially commits.
    #[instrument(skip(self, request, actor), fields(order_id = %order_id))]
    pub async fn add_item(
        &self,
        order_id: Uuid,
        request: AddItemRequest,
        actor: Actor,
    ) -> Result<order_item::Model, ServiceError> {
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Item quantity must be positive, got {}",
                request.quantity
            )));
        }

        let db = self.db.as_ref();
        let item = db
            .transaction::<_, order_item::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_mutation(txn, order_id).await?;
                    reject_terminal(&order)?;

                    let good = find_good(txn, request.processed_good_id).await?;
                    let unit_price = request.unit_price.unwrap_or(good.unit_price);
                    let item_id = request.id.unwrap_or_else(Uuid::new_v4);

                    // Ledger first: if the item insert fails afterwards the
                    // deduction rolls back with it.
                    if order.inventory_applied {
                        DeductionEngine::deduct_in_txn(
                            txn,
                            request.processed_good_id,
                            request.quantity,
                            Some(item_id),
                        )
                        .await?;
                    }

                    let item = order_item::ActiveModel {
                        id: Set(item_id),
                        order_id: Set(order_id),
                        processed_good_id: Set(request.processed_good_id),
                        quantity: Set(request.quantity),
                        unit_price: Set(unit_price),
                        total_price: Set(request.quantity * unit_price),
                        ..Default::default()
                    };
                    let item = item.insert(txn).await.map_err(ServiceError::db_error)?;

                    let total = recalculate_total(txn, order_id).await?;
                    update_order_row(txn, order, |active| {
                        active.total_amount = Set(total);
                    })
                    .await?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::OrderItemAdded,
                        actor.id,
                        Some(json!({
                            "order_item_id": item.id,
                            "processed_good_id": item.processed_good_id,
                            "quantity": item.quantity,
                        })),
                        None,
                    )
                    .await?;

                    Ok(item)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(item_id = %item.id, quantity = %item.quantity, "Order item added");
        self.event_sender
            .emit(Event::OrderItemAdded {
                order_id,
                order_item_id: item.id,
                quantity: item.quantity,
            })
            .await;

        Ok(item)
    }

    /// Changes an item's quantity, good or price. A quantity change adjusts
    /// the ledger by the delta; a good swap restores the old good and
    /// deducts the new one.
    #[instrument(skip(self, request, actor), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn update_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        request: UpdateItemRequest,
        actor: Actor,
    ) -> Result<order_item::Model, ServiceError> {
        if let Some(quantity) = request.quantity {
            if quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Item quantity must be positive, got {}",
                    quantity
                )));
            }
        }

        let db = self.db.as_ref();
        let (item, old_quantity) = db
            .transaction::<_, (order_item::Model, Decimal), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_mutation(txn, order_id).await?;
                    reject_terminal(&order)?;

                    let item = find_item(txn, order_id, item_id).await?;
                    let old_quantity = item.quantity;
                    let old_good = item.processed_good_id;
                    let new_good = request.processed_good_id.unwrap_or(old_good);
                    let new_quantity = request.quantity.unwrap_or(old_quantity);

                    let unit_price = if new_good != old_good {
                        let good = find_good(txn, new_good).await?;
                        request.unit_price.unwrap_or(good.unit_price)
                    } else {
                        request.unit_price.unwrap_or(item.unit_price)
                    };

                    if order.inventory_applied {
                        if new_good != old_good {
                            DeductionEngine::restore_in_txn(
                                txn,
                                old_good,
                                old_quantity,
                                Some(item_id),
                            )
                            .await?;
                            DeductionEngine::deduct_in_txn(
                                txn,
                                new_good,
                                new_quantity,
                                Some(item_id),
                            )
                            .await?;
                        } else {
                            DeductionEngine::adjust_in_txn(
                                txn,
                                old_good,
                                old_quantity,
                                new_quantity,
                                Some(item_id),
                            )
                            .await?;
                        }
                    }

                    let mut active: order_item::ActiveModel = item.into();
                    active.processed_good_id = Set(new_good);
                    active.quantity = Set(new_quantity);
                    active.unit_price = Set(unit_price);
                    active.total_price = Set(new_quantity * unit_price);
                    active.updated_at = Set(Some(Utc::now()));
                    let item = active.update(txn).await.map_err(ServiceError::db_error)?;

                    let total = recalculate_total(txn, order_id).await?;
                    update_order_row(txn, order, |active| {
                        active.total_amount = Set(total);
                    })
                    .await?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::OrderItemAdjusted,
                        actor.id,
                        Some(json!({
                            "order_item_id": item_id,
                            "old_quantity": old_quantity,
                            "new_quantity": new_quantity,
                            "old_processed_good_id": old_good,
                            "new_processed_good_id": new_good,
                        })),
                        None,
                    )
                    .await?;

                    Ok((item, old_quantity))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            old_quantity = %old_quantity,
            new_quantity = %item.quantity,
            "Order item updated"
        );
        self.event_sender
            .emit(Event::OrderItemAdjusted {
                order_id,
                order_item_id: item.id,
                old_quantity,
                new_quantity: item.quantity,
            })
            .await;

        Ok(item)
    }

    /// Deletes an item and restores its deduction in the same transaction.
    #[instrument(skip(self, actor), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn delete_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        actor: Actor,
    ) -> Result<(), ServiceError> {
        let db = self.db.as_ref();
        db.transaction::<_, (), ServiceError>(move |txn| {
            Box::pin(async move {
                let order = load_order_for_mutation(txn, order_id).await?;
                reject_terminal(&order)?;

                let item = find_item(txn, order_id, item_id).await?;

                if order.inventory_applied {
                    DeductionEngine::restore_in_txn(
                        txn,
                        item.processed_good_id,
                        item.quantity,
                        Some(item_id),
                    )
                    .await?;
                }

                let quantity = item.quantity;
                let good = item.processed_good_id;
                item.delete(txn).await.map_err(ServiceError::db_error)?;

                let total = recalculate_total(txn, order_id).await?;
                update_order_row(txn, order, |active| {
                    active.total_amount = Set(total);
                })
                .await?;

                audit::record_in_txn(
                    txn,
                    order_id,
                    AuditEventType::OrderItemDeleted,
                    actor.id,
                    Some(json!({
                        "order_item_id": item_id,
                        "processed_good_id": good,
                        "quantity": quantity,
                    })),
                    None,
                )
                .await?;

                Ok(())
            })
        })
        .await
        .map_err(unwrap_txn_err)?;

        info!("Order item deleted");
        self.event_sender
            .emit(Event::OrderItemDeleted {
                order_id,
                order_item_id: item_id,
            })
            .await;

        Ok(())
    }

    /// Requests a status transition. Cancellation and reversion to draft
    /// restore every item's deduction; confirming a reverted draft
    /// re-applies them. A failure anywhere rolls the whole transition back.
    #[instrument(skip(self, actor), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn set_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: Actor,
    ) -> Result<OrderResponse, ServiceError> {
        if !new_status.assignable() {
            return Err(ServiceError::InvalidStatus(format!(
                "Status '{}' cannot be assigned directly",
                new_status
            )));
        }

        let db = self.db.as_ref();
        let (updated, old_status, changed) = db
            .transaction::<_, (order::Model, OrderStatus, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_mutation(txn, order_id).await?;
                    let current = order.status().ok_or_else(|| {
                        ServiceError::InvalidStatus(format!(
                            "Order {} has unknown status '{}'",
                            order_id, order.status
                        ))
                    })?;

                    if current == new_status {
                        return Ok((order, current, false));
                    }
                    if !is_valid_transition(current, new_status) {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Cannot transition from status '{}' to '{}'",
                            current, new_status
                        )));
                    }

                    let mut inventory_applied = order.inventory_applied;
                    match new_status {
                        OrderStatus::Cancelled | OrderStatus::Draft => {
                            if order.inventory_applied {
                                let restored = restore_all_items(txn, &order).await?;
                                if restored > 0 {
                                    audit::record_in_txn(
                                        txn,
                                        order_id,
                                        AuditEventType::InventoryRestored,
                                        actor.id,
                                        Some(json!({ "items_restored": restored })),
                                        None,
                                    )
                                    .await?;
                                }
                                inventory_applied = false;
                            }
                        }
                        OrderStatus::Confirmed => {
                            if !order.inventory_applied {
                                apply_all_items(txn, &order).await?;
                                inventory_applied = true;
                            }
                        }
                        _ => {}
                    }

                    let updated = update_order_row(txn, order, |active| {
                        active.status = Set(new_status.to_string());
                        active.inventory_applied = Set(inventory_applied);
                    })
                    .await?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::StatusChanged,
                        actor.id,
                        Some(json!({
                            "old_status": current.to_string(),
                            "new_status": new_status.to_string(),
                        })),
                        None,
                    )
                    .await?;

                    Ok((updated, current, true))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        if changed {
            info!(old_status = %old_status, "Order status changed");
            self.event_sender
                .emit(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: new_status.to_string(),
                })
                .await;
            if new_status == OrderStatus::Cancelled {
                self.event_sender.emit(Event::OrderCancelled(order_id)).await;
            }
        }

        let items = self.items_for_order(order_id).await?;
        Ok(self.to_response(updated, items))
    }

    /// Cancels an order, restoring every item's deduction.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: Actor,
    ) -> Result<OrderResponse, ServiceError> {
        self.set_status(order_id, OrderStatus::Cancelled, actor).await
    }

    /// Records a payment. Completion is derived, monotonic and
    /// payment-driven: once payments cover the net total and the order is
    /// not on hold, the order completes on its own. It is never assignable
    /// directly.
    #[instrument(skip(self, actor), fields(order_id = %order_id, amount = %amount))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
        actor: Actor,
    ) -> Result<OrderResponse, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Payment amount must be positive, got {}",
                amount
            )));
        }

        let db = self.db.as_ref();
        let (updated, completed_now) = db
            .transaction::<_, (order::Model, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_mutation(txn, order_id).await?;
                    reject_terminal(&order)?;

                    let current = order.status().ok_or_else(|| {
                        ServiceError::InvalidStatus(format!(
                            "Order {} has unknown status '{}'",
                            order_id, order.status
                        ))
                    })?;

                    let amount_paid = order.amount_paid + amount;
                    let net_total = order.net_total();
                    let payment_status = derive_payment_status(amount_paid, net_total);
                    let completes =
                        derives_completion(current, order.is_on_hold, amount_paid, net_total);

                    let updated = update_order_row(txn, order, |active| {
                        active.amount_paid = Set(amount_paid);
                        active.payment_status = Set(payment_status.to_string());
                        if completes {
                            active.status = Set(OrderStatus::Completed.to_string());
                        }
                    })
                    .await?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::PaymentRecorded,
                        actor.id,
                        Some(json!({
                            "amount": amount,
                            "amount_paid": amount_paid,
                        })),
                        None,
                    )
                    .await?;
                    if completes {
                        audit::record_in_txn(
                            txn,
                            order_id,
                            AuditEventType::StatusChanged,
                            actor.id,
                            Some(json!({
                                "old_status": current.to_string(),
                                "new_status": OrderStatus::Completed.to_string(),
                                "derived": true,
                            })),
                            None,
                        )
                        .await?;
                    }

                    Ok((updated, completes))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::PaymentRecorded {
                order_id,
                amount,
                amount_paid: updated.amount_paid,
            })
            .await;
        if completed_now {
            info!("Order completed by payment");
            self.event_sender.emit(Event::OrderCompleted(order_id)).await;
        }

        let items = self.items_for_order(order_id).await?;
        Ok(self.to_response(updated, items))
    }

    /// Places an order on hold or releases it. Releasing re-derives the
    /// payment-driven completion so a fully paid order completes right away.
    #[instrument(skip(self, actor), fields(order_id = %order_id, on_hold = on_hold))]
    pub async fn set_hold(
        &self,
        order_id: Uuid,
        on_hold: bool,
        actor: Actor,
    ) -> Result<OrderResponse, ServiceError> {
        let db = self.db.as_ref();
        let (updated, completed_now) = db
            .transaction::<_, (order::Model, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_mutation(txn, order_id).await?;
                    reject_terminal(&order)?;

                    let current = order.status().ok_or_else(|| {
                        ServiceError::InvalidStatus(format!(
                            "Order {} has unknown status '{}'",
                            order_id, order.status
                        ))
                    })?;

                    let completes = !on_hold
                        && derives_completion(current, false, order.amount_paid, order.net_total());

                    let updated = update_order_row(txn, order, |active| {
                        active.is_on_hold = Set(on_hold);
                        if completes {
                            active.status = Set(OrderStatus::Completed.to_string());
                        }
                    })
                    .await?;

                    audit::record_in_txn(
                        txn,
                        order_id,
                        AuditEventType::OrderHoldChanged,
                        actor.id,
                        Some(json!({ "on_hold": on_hold })),
                        None,
                    )
                    .await?;
                    if completes {
                        audit::record_in_txn(
                            txn,
                            order_id,
                            AuditEventType::StatusChanged,
                            actor.id,
                            Some(json!({
                                "old_status": current.to_string(),
                                "new_status": OrderStatus::Completed.to_string(),
                                "derived": true,
                            })),
                            None,
                        )
                        .await?;
                    }

                    Ok((updated, completes))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        if completed_now {
            self.event_sender.emit(Event::OrderCompleted(order_id)).await;
        }

        let items = self.items_for_order(order_id).await?;
        Ok(self.to_response(updated, items))
    }

    /// Retrieves an order with its items.
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        match order {
            Some(order) => {
                let items = self.items_for_order(order_id).await?;
                Ok(Some(self.to_response(order, items)))
            }
            None => Ok(None),
        }
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.items_for_order(order.id).await?;
            responses.push(self.to_response(order, items));
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    async fn items_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    fn to_response(&self, model: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
        OrderResponse {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            status: model.status,
            payment_status: model.payment_status,
            total_amount: model.total_amount,
            discount_amount: model.discount_amount,
            amount_paid: model.amount_paid,
            is_on_hold: model.is_on_hold,
            is_locked: model.is_locked,
            locked_at: model.locked_at,
            can_unlock_until: model.can_unlock_until,
            created_before_migration: model.created_before_migration,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
            items,
        }
    }
}

/// Loads an order and applies the guards shared by every mutating
/// operation, in order: pre-migration orders are immutable, then the
/// effective lock state is checked.
async fn load_order_for_mutation<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    let order = OrderEntity::find_by_id(order_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    let order = match order.access() {
        OrderAccess::Historical(_) => {
            return Err(ServiceError::HistoricalOrderImmutable(order_id));
        }
        OrderAccess::Active(model) => model.clone(),
    };

    if LockState::derive(&order, Utc::now()).rejects_mutation() {
        return Err(ServiceError::OrderLocked(order_id));
    }

    Ok(order)
}

fn reject_terminal(order: &order::Model) -> Result<(), ServiceError> {
    if order.status() == Some(OrderStatus::Cancelled) {
        return Err(ServiceError::InvalidOperation(format!(
            "Order {} is cancelled and cannot be modified",
            order.id
        )));
    }
    Ok(())
}

fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    matches!(
        (from, to),
        (OrderStatus::Draft, OrderStatus::Confirmed)
            | (OrderStatus::Draft, OrderStatus::Cancelled)
            | (OrderStatus::Confirmed, OrderStatus::Draft)
            | (OrderStatus::Confirmed, OrderStatus::Cancelled)
            | (OrderStatus::Completed, OrderStatus::Draft)
            | (OrderStatus::Completed, OrderStatus::Cancelled)
    )
}

fn derive_payment_status(amount_paid: Decimal, net_total: Decimal) -> PaymentStatus {
    if amount_paid >= net_total && net_total > Decimal::ZERO {
        PaymentStatus::Paid
    } else if amount_paid > Decimal::ZERO {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Unpaid
    }
}

fn derives_completion(
    current: OrderStatus,
    is_on_hold: bool,
    amount_paid: Decimal,
    net_total: Decimal,
) -> bool {
    !is_on_hold
        && net_total > Decimal::ZERO
        && amount_paid >= net_total
        && matches!(current, OrderStatus::Draft | OrderStatus::Confirmed)
}

/// Restores the deduction of every item on the order. Returns the number of
/// items touched; a failure mid-loop aborts the surrounding transaction, so
/// partial restoration never commits.
async fn restore_all_items<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
) -> Result<usize, ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    for item in &items {
        DeductionEngine::restore_in_txn(conn, item.processed_good_id, item.quantity, Some(item.id))
            .await?;
    }
    Ok(items.len())
}

/// Re-applies the deduction of every item on the order; any shortfall fails
/// the whole transition.
async fn apply_all_items<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
) -> Result<usize, ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    for item in &items {
        DeductionEngine::deduct_in_txn(conn, item.processed_good_id, item.quantity, Some(item.id))
            .await?;
    }
    Ok(items.len())
}

async fn recalculate_total<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(items.iter().map(|item| item.total_price).sum())
}

/// Applies a mutation to the order row, bumping version and updated_at.
async fn update_order_row<C, F>(
    conn: &C,
    order: order::Model,
    mutate: F,
) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut order::ActiveModel),
{
    let version = order.version;
    let mut active: order::ActiveModel = order.into();
    mutate(&mut active);
    active.version = Set(version + 1);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await.map_err(ServiceError::db_error)
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    item_id: Uuid,
) -> Result<order_item::Model, ServiceError> {
    let item = OrderItemEntity::find_by_id(item_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;
    if item.order_id != order_id {
        warn!(item_order = %item.order_id, "Order item belongs to a different order");
        return Err(ServiceError::NotFound(format!(
            "Order item {} not found on order {}",
            item_id, order_id
        )));
    }
    Ok(item)
}

async fn find_good<C: ConnectionTrait>(
    conn: &C,
    processed_good_id: Uuid,
) -> Result<processed_good::Model, ServiceError> {
    ProcessedGoodEntity::find_by_id(processed_good_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Processed good {} not found", processed_good_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(OrderStatus::Draft, OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Draft, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Draft, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Completed, OrderStatus::Draft, true)]
    #[case(OrderStatus::Completed, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Draft, OrderStatus::Completed, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Draft, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Confirmed, false)]
    #[case(OrderStatus::Completed, OrderStatus::Confirmed, false)]
    fn transition_table(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(is_valid_transition(from, to), allowed);
    }

    #[test]
    fn payment_status_derivation() {
        assert_eq!(
            derive_payment_status(dec!(0), dec!(100)),
            PaymentStatus::Unpaid
        );
        assert_eq!(
            derive_payment_status(dec!(40), dec!(100)),
            PaymentStatus::Partial
        );
        assert_eq!(
            derive_payment_status(dec!(100), dec!(100)),
            PaymentStatus::Paid
        );
        assert_eq!(
            derive_payment_status(dec!(120), dec!(100)),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn completion_requires_coverage_and_no_hold() {
        assert!(derives_completion(
            OrderStatus::Confirmed,
            false,
            dec!(100),
            dec!(100)
        ));
        assert!(!derives_completion(
            OrderStatus::Confirmed,
            true,
            dec!(100),
            dec!(100)
        ));
        assert!(!derives_completion(
            OrderStatus::Confirmed,
            false,
            dec!(99),
            dec!(100)
        ));
        // Already completed or terminal orders never re-derive.
        assert!(!derives_completion(
            OrderStatus::Completed,
            false,
            dec!(100),
            dec!(100)
        ));
        assert!(!derives_completion(
            OrderStatus::Cancelled,
            false,
            dec!(100),
            dec!(100)
        ));
    }
}
