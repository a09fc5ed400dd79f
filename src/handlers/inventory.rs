use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::stock_movement::{self, MovementType, StockItemType},
    errors::ServiceError,
    handlers::ActorInfo,
    services::balance::{LedgerEntry, ReconciliationReport},
    services::movements::NewMovement,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct RecordMovementRequest {
    pub item_type: StockItemType,
    pub item_reference: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub effective_date: NaiveDate,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    /// `created_at` of the originating business record, when this movement
    /// is derived from one.
    pub originating_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RecordTransferRequest {
    pub item_type: StockItemType,
    pub from_reference: Uuid,
    pub to_reference: Uuid,
    pub quantity: Decimal,
    pub effective_date: NaiveDate,
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub as_of: Option<NaiveDate>,
    pub created_at_cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub item_type: StockItemType,
    pub item_reference: Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    pub processed_good_id: Uuid,
    pub quantity: Decimal,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub processed_good_id: Uuid,
    pub old_quantity: Decimal,
    pub new_quantity: Decimal,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeductionResponse {
    pub processed_good_id: Uuid,
    pub movement_id: Option<Uuid>,
    pub quantity: Decimal,
    pub new_available: Option<Decimal>,
}

fn parse_item_type(raw: &str) -> Result<StockItemType, ServiceError> {
    raw.parse().map_err(|_| {
        ServiceError::ValidationError(format!("Unknown stock item type: {}", raw))
    })
}

/// POST /api/v1/inventory/movements
pub async fn record_movement(
    State(state): State<AppState>,
    Json(request): Json<RecordMovementRequest>,
) -> Result<(StatusCode, Json<ApiResponse<stock_movement::Model>>), ServiceError> {
    let mut new = NewMovement::new(
        request.item_type,
        request.item_reference,
        request.movement_type,
        request.quantity,
        request.effective_date,
    );
    new.reference_id = request.reference_id;
    new.reference_type = request.reference_type;
    new.notes = request.notes;
    new.originating_created_at = request.originating_created_at;

    let movement = state.services.movements.record_movement(new).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(movement))))
}

/// POST /api/v1/inventory/transfers
pub async fn record_transfer(
    State(state): State<AppState>,
    Json(request): Json<RecordTransferRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<stock_movement::Model>>>), ServiceError> {
    let (out_movement, in_movement) = state
        .services
        .movements
        .record_transfer(
            request.item_type,
            request.from_reference,
            request.to_reference,
            request.quantity,
            request.effective_date,
            request.reference_id,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(vec![out_movement, in_movement])),
    ))
}

/// GET /api/v1/inventory/:item_type/:item_reference/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path((item_type, item_reference)): Path<(String, Uuid)>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalanceResponse>>, ServiceError> {
    let item_type = parse_item_type(&item_type)?;
    let balance = match query.as_of {
        Some(as_of) => {
            state
                .services
                .balance
                .balance_as_of(item_type, item_reference, as_of, query.created_at_cutoff)
                .await?
        }
        None => {
            state
                .services
                .balance
                .current_balance(item_type, item_reference)
                .await?
        }
    };
    Ok(Json(ApiResponse::success(BalanceResponse {
        item_type,
        item_reference,
        balance,
    })))
}

/// GET /api/v1/inventory/:item_type/:item_reference/ledger
pub async fn get_ledger(
    State(state): State<AppState>,
    Path((item_type, item_reference)): Path<(String, Uuid)>,
) -> Result<Json<ApiResponse<Vec<LedgerEntry>>>, ServiceError> {
    let item_type = parse_item_type(&item_type)?;
    let history = state
        .services
        .balance
        .ledger_history(item_type, item_reference)
        .await?;
    Ok(Json(ApiResponse::success(history)))
}

/// POST /api/v1/inventory/deduct
pub async fn deduct(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Json(request): Json<DeductRequest>,
) -> Result<Json<ApiResponse<DeductionResponse>>, ServiceError> {
    let outcome = state
        .services
        .deduction
        .deduct(
            request.processed_good_id,
            request.quantity,
            actor,
            request.order_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(DeductionResponse {
        processed_good_id: outcome.processed_good_id,
        movement_id: Some(outcome.movement_id),
        quantity: outcome.quantity,
        new_available: Some(outcome.new_available),
    })))
}

/// POST /api/v1/inventory/restore
pub async fn restore(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Json(request): Json<DeductRequest>,
) -> Result<Json<ApiResponse<DeductionResponse>>, ServiceError> {
    let outcome = state
        .services
        .deduction
        .restore(
            request.processed_good_id,
            request.quantity,
            actor,
            request.order_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(DeductionResponse {
        processed_good_id: outcome.processed_good_id,
        movement_id: Some(outcome.movement_id),
        quantity: outcome.quantity,
        new_available: Some(outcome.new_available),
    })))
}

/// POST /api/v1/inventory/adjust
pub async fn adjust(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<ApiResponse<DeductionResponse>>, ServiceError> {
    let outcome = state
        .services
        .deduction
        .adjust(
            request.processed_good_id,
            request.old_quantity,
            request.new_quantity,
            actor,
            request.order_id,
        )
        .await?;
    let response = match outcome {
        Some(outcome) => DeductionResponse {
            processed_good_id: outcome.processed_good_id,
            movement_id: Some(outcome.movement_id),
            quantity: outcome.quantity,
            new_available: Some(outcome.new_available),
        },
        None => DeductionResponse {
            processed_good_id: request.processed_good_id,
            movement_id: None,
            quantity: Decimal::ZERO,
            new_available: None,
        },
    };
    Ok(Json(ApiResponse::success(response)))
}

/// POST /api/v1/inventory/goods/:processed_good_id/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    Path(processed_good_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ReconciliationReport>>, ServiceError> {
    let report = state.services.balance.reconcile(processed_good_id).await?;
    Ok(Json(ApiResponse::success(report)))
}
