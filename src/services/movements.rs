use crate::{
    db::DbPool,
    entities::processed_good::{self, Entity as ProcessedGoodEntity},
    entities::stock_movement::{self, Entity as StockMovementEntity, MovementType, StockItemType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::balance,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Input for one ledger append.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub item_type: StockItemType,
    pub item_reference: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub effective_date: NaiveDate,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    /// `created_at` of the originating business record when this movement is
    /// derived from one (waste record, production batch). The movement is
    /// stamped one microsecond after it so it sorts immediately after its
    /// cause even under write latency.
    pub originating_created_at: Option<DateTime<Utc>>,
}

impl NewMovement {
    pub fn new(
        item_type: StockItemType,
        item_reference: Uuid,
        movement_type: MovementType,
        quantity: Decimal,
        effective_date: NaiveDate,
    ) -> Self {
        Self {
            item_type,
            item_reference,
            movement_type,
            quantity,
            effective_date,
            reference_id: None,
            reference_type: None,
            notes: None,
            originating_created_at: None,
        }
    }
}

/// The single write path into the stock ledger. Rows are appended, never
/// updated or deleted; the contract exposes no operation that could rewrite
/// history.
#[derive(Clone)]
pub struct MovementStore {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl MovementStore {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Appends a movement inside the caller's transaction. Quantity must be
    /// strictly positive; the stored sign always comes from the type.
    pub async fn append_in_txn<C: ConnectionTrait>(
        conn: &C,
        new: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        if new.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Movement quantity must be positive, got {}",
                new.quantity
            )));
        }

        let created_at = match new.originating_created_at {
            Some(origin) => origin + Duration::microseconds(1),
            None => Utc::now(),
        };

        let movement = stock_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_type: Set(new.item_type.to_string()),
            item_reference: Set(new.item_reference),
            movement_type: Set(new.movement_type.to_string()),
            quantity: Set(new.quantity),
            effective_date: Set(new.effective_date),
            created_at: Set(created_at),
            reference_id: Set(new.reference_id),
            reference_type: Set(new.reference_type),
            notes: Set(new.notes),
        };

        movement.insert(conn).await.map_err(ServiceError::db_error)
    }

    /// Records a raw-good or production movement. Order-driven movement
    /// types are reserved for the deduction engine and rejected here.
    /// Outbound movements are refused if they would push the balance below
    /// zero, checked and written under one transaction.
    #[instrument(skip(self, new), fields(item = %new.item_reference, movement_type = %new.movement_type))]
    pub async fn record_movement(
        &self,
        new: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        if matches!(
            new.movement_type,
            MovementType::OrderItemAdded | MovementType::OrderItemDeleted
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "Movement type {} can only be written by the order deduction engine",
                new.movement_type
            )));
        }

        let db = self.db.as_ref();
        let movement = db
            .transaction::<_, stock_movement::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if new.movement_type.sign() < 0 {
                        let available = balance::current_balance_in_conn(
                            txn,
                            new.item_type,
                            new.item_reference,
                        )
                        .await?;
                        if available < new.quantity {
                            return Err(ServiceError::InsufficientInventory {
                                available,
                                required: new.quantity,
                            });
                        }
                    }

                    let item_type = new.item_type;
                    let item_reference = new.item_reference;
                    let signed = Decimal::from(new.movement_type.sign()) * new.quantity;
                    let movement = Self::append_in_txn(txn, new).await?;

                    // Processed goods carry a materialized balance cache that
                    // must move in the same transaction as the ledger.
                    if item_type == StockItemType::ProcessedGood {
                        apply_cache_delta(txn, item_reference, signed).await?;
                    }

                    Ok(movement)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            movement_id = %movement.id,
            quantity = %movement.quantity,
            "Stock movement recorded"
        );

        self.event_sender
            .emit(Event::MovementRecorded {
                movement_id: movement.id,
                item_type: movement.item_type().unwrap_or(StockItemType::RawMaterial),
                item_reference: movement.item_reference,
                movement_type: movement
                    .movement_type()
                    .unwrap_or(MovementType::In),
                quantity: movement.quantity,
            })
            .await;

        Ok(movement)
    }

    /// Records a stock transfer as a paired `TransferOut`/`TransferIn` in one
    /// transaction. The inbound leg is stamped one microsecond after the
    /// outbound leg so the pair stays adjacent in the chronological order.
    #[instrument(skip(self), fields(from = %from_reference, to = %to_reference))]
    pub async fn record_transfer(
        &self,
        item_type: StockItemType,
        from_reference: Uuid,
        to_reference: Uuid,
        quantity: Decimal,
        effective_date: NaiveDate,
        reference_id: Option<Uuid>,
    ) -> Result<(stock_movement::Model, stock_movement::Model), ServiceError> {
        let db = self.db.as_ref();
        let (out_movement, in_movement) = db
            .transaction::<_, (stock_movement::Model, stock_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let available =
                            balance::current_balance_in_conn(txn, item_type, from_reference)
                                .await?;
                        if available < quantity {
                            return Err(ServiceError::InsufficientInventory {
                                available,
                                required: quantity,
                            });
                        }

                        let mut out = NewMovement::new(
                            item_type,
                            from_reference,
                            MovementType::TransferOut,
                            quantity,
                            effective_date,
                        );
                        out.reference_id = reference_id;
                        out.reference_type = Some("stock_transfer".to_string());
                        let out_movement = Self::append_in_txn(txn, out).await?;

                        let mut incoming = NewMovement::new(
                            item_type,
                            to_reference,
                            MovementType::TransferIn,
                            quantity,
                            effective_date,
                        );
                        incoming.reference_id = reference_id;
                        incoming.reference_type = Some("stock_transfer".to_string());
                        incoming.originating_created_at = Some(out_movement.created_at);
                        let in_movement = Self::append_in_txn(txn, incoming).await?;

                        if item_type == StockItemType::ProcessedGood {
                            apply_cache_delta(txn, from_reference, -quantity).await?;
                            apply_cache_delta(txn, to_reference, quantity).await?;
                        }

                        Ok((out_movement, in_movement))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            out_id = %out_movement.id,
            in_id = %in_movement.id,
            quantity = %quantity,
            "Stock transfer recorded"
        );

        Ok((out_movement, in_movement))
    }

    /// All movements for an item in chronological order.
    pub async fn movements_for_item(
        &self,
        item_type: StockItemType,
        item_reference: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        StockMovementEntity::find()
            .filter(stock_movement::Column::ItemType.eq(item_type.to_string()))
            .filter(stock_movement::Column::ItemReference.eq(item_reference))
            .order_by_asc(stock_movement::Column::EffectiveDate)
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Shifts the processed-good balance cache by a signed delta inside the
/// caller's transaction. The row is locked on backends that support it; the
/// resulting value must never be negative because every outbound path checks
/// before writing.
pub(crate) async fn apply_cache_delta<C: ConnectionTrait>(
    conn: &C,
    processed_good_id: Uuid,
    delta: Decimal,
) -> Result<processed_good::Model, ServiceError> {
    let mut query = ProcessedGoodEntity::find_by_id(processed_good_id);
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    let good = query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Processed good {} not found", processed_good_id))
        })?;

    let new_available = good.quantity_available + delta;
    if new_available < Decimal::ZERO {
        return Err(ServiceError::NegativeInventoryInvariant {
            item: processed_good_id,
            balance: new_available,
        });
    }

    let mut active: processed_good::ActiveModel = good.into();
    active.quantity_available = Set(new_available);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Collapses sea-orm's transaction error wrapper back into our error type.
pub(crate) fn unwrap_txn_err(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}
