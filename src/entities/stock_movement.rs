use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Which ledger an item belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StockItemType {
    RawMaterial,
    RecurringProduct,
    ProcessedGood,
}

/// Closed set of inventory event kinds. The sign of a movement is derived
/// from its type and never stored; adding a variant forces the `sign`
/// mapping to be revisited at compile time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Consumption,
    Waste,
    TransferOut,
    TransferIn,
    OrderItemAdded,
    OrderItemDeleted,
}

impl MovementType {
    /// +1 for movements that increase the balance, -1 for those that reduce it.
    pub fn sign(&self) -> i64 {
        match self {
            MovementType::In | MovementType::TransferIn | MovementType::OrderItemDeleted => 1,
            MovementType::Consumption
            | MovementType::Waste
            | MovementType::TransferOut
            | MovementType::OrderItemAdded => -1,
        }
    }
}

/// One immutable inventory event. Rows are only ever inserted; corrections
/// are made with a compensating movement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item_type: String,
    pub item_reference: Uuid,
    pub movement_type: String,
    pub quantity: Decimal,
    pub effective_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
}

impl Model {
    pub fn movement_type(&self) -> Option<MovementType> {
        self.movement_type.parse().ok()
    }

    pub fn item_type(&self) -> Option<StockItemType> {
        self.item_type.parse().ok()
    }

    /// Quantity with the type-derived sign applied.
    pub fn signed_quantity(&self) -> Decimal {
        match self.movement_type() {
            Some(movement_type) => self.quantity * Decimal::from(movement_type.sign()),
            None => Decimal::ZERO,
        }
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
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use strum::IntoEnumIterator;

    #[test]
    fn sign_mapping_is_total() {
        for movement_type in MovementType::iter() {
            assert!(matches!(movement_type.sign(), 1 | -1));
        }
    }

    #[test]
    fn movement_types_round_trip_through_storage_strings() {
        for movement_type in MovementType::iter() {
            let stored = movement_type.to_string();
            assert_eq!(stored.parse::<MovementType>().unwrap(), movement_type);
        }
        assert_eq!(MovementType::OrderItemAdded.to_string(), "order_item_added");
    }

    #[test]
    fn signed_quantity_applies_direction() {
        let base = Model {
            id: Uuid::new_v4(),
            item_type: StockItemType::RawMaterial.to_string(),
            item_reference: Uuid::new_v4(),
            movement_type: MovementType::Waste.to_string(),
            quantity: dec!(40),
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            created_at: Utc::now(),
            reference_id: None,
            reference_type: None,
            notes: None,
        };
        assert_eq!(base.signed_quantity(), dec!(-40));

        let inbound = Model {
            movement_type: MovementType::In.to_string(),
            ..base
        };
        assert_eq!(inbound.signed_quantity(), dec!(40));
    }
}
