use crate::{
    db::DbPool,
    entities::processed_good::{self, Entity as ProcessedGoodEntity},
    entities::stock_movement::{self, Entity as StockMovementEntity, StockItemType},
    errors::ServiceError,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::movements::unwrap_txn_err;

/// One ledger row with its reconstructed surrounding balances.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub movement: stock_movement::Model,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Outcome of reconciling the materialized cache against the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub processed_good_id: Uuid,
    pub cached: Decimal,
    pub ledger: Decimal,
    pub drift: Decimal,
    pub corrected: bool,
}

/// Movements for one item up to `(as_of, created_at_cutoff)` in the ledger's
/// chronological order: `effective_date` ascending, then `created_at`
/// ascending. Same-day events are resolved by insertion order, which the
/// before/after balance displays depend on.
pub(crate) async fn movements_up_to_in_conn<C: ConnectionTrait>(
    conn: &C,
    item_type: StockItemType,
    item_reference: Uuid,
    as_of: Option<NaiveDate>,
    created_at_cutoff: Option<DateTime<Utc>>,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    let mut query = StockMovementEntity::find()
        .filter(stock_movement::Column::ItemType.eq(item_type.to_string()))
        .filter(stock_movement::Column::ItemReference.eq(item_reference));

    if let Some(date) = as_of {
        query = match created_at_cutoff {
            Some(cutoff) => query.filter(
                Condition::any()
                    .add(stock_movement::Column::EffectiveDate.lt(date))
                    .add(
                        Condition::all()
                            .add(stock_movement::Column::EffectiveDate.eq(date))
                            .add(stock_movement::Column::CreatedAt.lte(cutoff)),
                    ),
            ),
            None => query.filter(stock_movement::Column::EffectiveDate.lte(date)),
        };
    }

    query
        .order_by_asc(stock_movement::Column::EffectiveDate)
        .order_by_asc(stock_movement::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Folds a chronologically ordered movement slice into a balance.
pub fn fold_balance(movements: &[stock_movement::Model]) -> Decimal {
    movements
        .iter()
        .map(stock_movement::Model::signed_quantity)
        .sum()
}

/// Folds a chronologically ordered movement list into per-row running
/// balances in a single pass.
pub fn running_balances(movements: Vec<stock_movement::Model>) -> Vec<LedgerEntry> {
    let mut balance = Decimal::ZERO;
    movements
        .into_iter()
        .map(|movement| {
            let balance_before = balance;
            balance += movement.signed_quantity();
            LedgerEntry {
                movement,
                balance_before,
                balance_after: balance,
            }
        })
        .collect()
}

pub(crate) async fn balance_as_of_in_conn<C: ConnectionTrait>(
    conn: &C,
    item_type: StockItemType,
    item_reference: Uuid,
    as_of: NaiveDate,
    created_at_cutoff: Option<DateTime<Utc>>,
) -> Result<Decimal, ServiceError> {
    let movements =
        movements_up_to_in_conn(conn, item_type, item_reference, Some(as_of), created_at_cutoff)
            .await?;
    Ok(fold_balance(&movements))
}

pub(crate) async fn current_balance_in_conn<C: ConnectionTrait>(
    conn: &C,
    item_type: StockItemType,
    item_reference: Uuid,
) -> Result<Decimal, ServiceError> {
    let movements = movements_up_to_in_conn(conn, item_type, item_reference, None, None).await?;
    Ok(fold_balance(&movements))
}

/// Reconstructs point-in-time balances by folding the movement ledger. The
/// ledger is the ground truth; the cached `quantity_available` column is only
/// a read optimization reconciled through [`BalanceService::reconcile`].
#[derive(Clone)]
pub struct BalanceService {
    db: Arc<DbPool>,
}

impl BalanceService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Balance as of `(as_of, created_at_cutoff)`; an absent cutoff means
    /// the end of the day.
    #[instrument(skip(self), fields(item = %item_reference))]
    pub async fn balance_as_of(
        &self,
        item_type: StockItemType,
        item_reference: Uuid,
        as_of: NaiveDate,
        created_at_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Decimal, ServiceError> {
        balance_as_of_in_conn(
            self.db.as_ref(),
            item_type,
            item_reference,
            as_of,
            created_at_cutoff,
        )
        .await
    }

    /// Balance after every movement recorded so far.
    pub async fn current_balance(
        &self,
        item_type: StockItemType,
        item_reference: Uuid,
    ) -> Result<Decimal, ServiceError> {
        current_balance_in_conn(self.db.as_ref(), item_type, item_reference).await
    }

    /// Balance the instant before `movement` took effect.
    pub async fn balance_before(
        &self,
        movement: &stock_movement::Model,
    ) -> Result<Decimal, ServiceError> {
        let item_type = movement.item_type().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown item type {}",
                movement.id, movement.item_type
            ))
        })?;
        self.balance_as_of(
            item_type,
            movement.item_reference,
            movement.effective_date,
            Some(movement.created_at - Duration::microseconds(1)),
        )
        .await
    }

    /// Balance the instant after `movement` took effect.
    pub async fn balance_after(
        &self,
        movement: &stock_movement::Model,
    ) -> Result<Decimal, ServiceError> {
        Ok(self.balance_before(movement).await? + movement.signed_quantity())
    }

    /// The full ledger for an item with running balances per row.
    #[instrument(skip(self), fields(item = %item_reference))]
    pub async fn ledger_history(
        &self,
        item_type: StockItemType,
        item_reference: Uuid,
    ) -> Result<Vec<LedgerEntry>, ServiceError> {
        let movements =
            movements_up_to_in_conn(self.db.as_ref(), item_type, item_reference, None, None)
                .await?;
        Ok(running_balances(movements))
    }

    /// Recomputes the processed-good balance cache strictly from the ledger
    /// and rewrites it when it has drifted. The cache is never trusted as
    /// authoritative.
    #[instrument(skip(self), fields(good = %processed_good_id))]
    pub async fn reconcile(
        &self,
        processed_good_id: Uuid,
    ) -> Result<ReconciliationReport, ServiceError> {
        let db = self.db.as_ref();
        let report = db
            .transaction::<_, ReconciliationReport, ServiceError>(move |txn| {
                Box::pin(async move {
                    let good = ProcessedGoodEntity::find_by_id(processed_good_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Processed good {} not found",
                                processed_good_id
                            ))
                        })?;

                    let ledger = current_balance_in_conn(
                        txn,
                        StockItemType::ProcessedGood,
                        processed_good_id,
                    )
                    .await?;
                    let cached = good.quantity_available;
                    let drift = cached - ledger;
                    let corrected = !drift.is_zero();

                    if corrected {
                        let mut active: processed_good::ActiveModel = good.into();
                        active.quantity_available = Set(ledger);
                        active.updated_at = Set(Some(Utc::now()));
                        active.update(txn).await.map_err(ServiceError::db_error)?;
                    }

                    Ok(ReconciliationReport {
                        processed_good_id,
                        cached,
                        ledger,
                        drift,
                        corrected,
                    })
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        if report.corrected {
            warn!(
                good = %report.processed_good_id,
                cached = %report.cached,
                ledger = %report.ledger,
                "Balance cache had drifted from the ledger; rewritten"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::stock_movement::MovementType;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn movement(movement_type: MovementType, quantity: Decimal) -> stock_movement::Model {
        stock_movement::Model {
            id: Uuid::new_v4(),
            item_type: StockItemType::RawMaterial.to_string(),
            item_reference: Uuid::nil(),
            movement_type: movement_type.to_string(),
            quantity,
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            created_at: Utc::now(),
            reference_id: None,
            reference_type: None,
            notes: None,
        }
    }

    #[test]
    fn fold_applies_signs_per_type() {
        let movements = vec![
            movement(MovementType::In, dec!(240)),
            movement(MovementType::Consumption, dec!(30)),
            movement(MovementType::Waste, dec!(40)),
            movement(MovementType::Consumption, dec!(50)),
            movement(MovementType::TransferOut, dec!(20)),
        ];
        assert_eq!(fold_balance(&movements), dec!(100));
    }

    #[test]
    fn running_balances_chain() {
        let movements = vec![
            movement(MovementType::In, dec!(240)),
            movement(MovementType::Consumption, dec!(30)),
            movement(MovementType::Waste, dec!(40)),
            movement(MovementType::Consumption, dec!(50)),
            movement(MovementType::TransferOut, dec!(20)),
        ];
        let entries = running_balances(movements);
        let afters: Vec<Decimal> = entries.iter().map(|e| e.balance_after).collect();
        assert_eq!(afters, vec![dec!(240), dec!(210), dec!(170), dec!(120), dec!(100)]);
        for window in entries.windows(2) {
            assert_eq!(window[0].balance_after, window[1].balance_before);
        }
    }

    proptest! {
        /// Each row's delta equals its signed quantity and adjacent rows
        /// chain exactly, for any movement sequence.
        #[test]
        fn running_balances_are_consistent(signs in prop::collection::vec(any::<bool>(), 0..40),
                                           quantities in prop::collection::vec(1u32..10_000, 0..40)) {
            let movements: Vec<stock_movement::Model> = signs
                .iter()
                .zip(quantities.iter())
                .map(|(&inbound, &q)| {
                    let movement_type = if inbound { MovementType::In } else { MovementType::Consumption };
                    movement(movement_type, Decimal::from(q))
                })
                .collect();

            let total = fold_balance(&movements);
            let entries = running_balances(movements);

            let mut expected = Decimal::ZERO;
            for entry in &entries {
                prop_assert_eq!(entry.balance_before, expected);
                prop_assert_eq!(
                    entry.balance_after - entry.balance_before,
                    entry.movement.signed_quantity()
                );
                expected = entry.balance_after;
            }
            prop_assert_eq!(expected, total);
        }
    }
}
