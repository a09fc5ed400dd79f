use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::{order, order_audit_log, order_item, order_lock_log},
    errors::ServiceError,
    handlers::ActorInfo,
    services::orders::{
        AddItemRequest, CreateOrderRequest, OrderListResponse, OrderResponse, UpdateItemRequest,
    },
    ApiResponse, AppState, ListQuery,
};

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SetHoldRequest {
    pub on_hold: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub reason: String,
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(request, actor).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let response = state
        .services
        .orders
        .list_orders(query.page(), query.per_page())
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/items
pub async fn add_item(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<order_item::Model>>), ServiceError> {
    let item = state
        .services
        .orders
        .add_item(order_id, request, actor)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

/// PUT /api/v1/orders/:id/items/:item_id
pub async fn update_item(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Json<ApiResponse<order_item::Model>>, ServiceError> {
    let item = state
        .services
        .orders
        .update_item(order_id, item_id, request, actor)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

/// DELETE /api/v1/orders/:id/items/:item_id
pub async fn delete_item(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .orders
        .delete_item(order_id, item_id, actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/orders/:id/status
pub async fn set_status(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
    Json(request): Json<SetStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let status: order::OrderStatus = request.status.parse().map_err(|_| {
        ServiceError::InvalidStatus(format!("Unknown order status: {}", request.status))
    })?;
    let order = state
        .services
        .orders
        .set_status(order_id, status, actor)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/payments
pub async fn record_payment(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .record_payment(order_id, request.amount, actor)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// PUT /api/v1/orders/:id/hold
pub async fn set_hold(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
    Json(request): Json<SetHoldRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .set_hold(order_id, request.on_hold, actor)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/lock
pub async fn lock_order(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.lock.lock_order(order_id, actor).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/unlock
pub async fn unlock_order(
    State(state): State<AppState>,
    ActorInfo(actor): ActorInfo,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UnlockRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .services
        .lock
        .unlock_order(order_id, actor, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders/:id/audit-log
pub async fn get_audit_log(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<order_audit_log::Model>>>, ServiceError> {
    let entries = state.services.audit.get_audit_log(order_id).await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// GET /api/v1/orders/:id/lock-history
pub async fn get_lock_history(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<order_lock_log::Model>>>, ServiceError> {
    let entries = state.services.audit.get_lock_history(order_id).await?;
    Ok(Json(ApiResponse::success(entries)))
}
