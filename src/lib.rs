//! Stockbook API Library
//!
//! Inventory ledger and order-driven deduction engine: every
//! inventory-affecting event is an immutable, chronologically ordered
//! movement; balances are reconstructed from the movement stream; order
//! lifecycle transitions drive deduction and restoration transactionally.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;

use axum::{
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use handlers::AppServices;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = AppServices::new(db.clone(), event_sender.clone(), config.lock_window_days);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Common query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ListQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(25).clamp(1, 100)
    }
}

/// Standard envelope for successful responses
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Assembles the application router over the shared state.
pub fn app_router(state: AppState) -> Router {
    let inventory_routes = Router::new()
        .route("/movements", post(handlers::inventory::record_movement))
        .route("/transfers", post(handlers::inventory::record_transfer))
        .route(
            "/:item_type/:item_reference/balance",
            get(handlers::inventory::get_balance),
        )
        .route(
            "/:item_type/:item_reference/ledger",
            get(handlers::inventory::get_ledger),
        )
        .route("/deduct", post(handlers::inventory::deduct))
        .route("/restore", post(handlers::inventory::restore))
        .route("/adjust", post(handlers::inventory::adjust))
        .route(
            "/goods/:processed_good_id/reconcile",
            post(handlers::inventory::reconcile),
        );

    let order_routes = Router::new()
        .route(
            "/",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/:id", get(handlers::orders::get_order))
        .route("/:id/items", post(handlers::orders::add_item))
        .route(
            "/:id/items/:item_id",
            put(handlers::orders::update_item).delete(handlers::orders::delete_item),
        )
        .route("/:id/status", put(handlers::orders::set_status))
        .route("/:id/payments", post(handlers::orders::record_payment))
        .route("/:id/hold", put(handlers::orders::set_hold))
        .route("/:id/lock", post(handlers::orders::lock_order))
        .route("/:id/unlock", post(handlers::orders::unlock_order))
        .route("/:id/audit-log", get(handlers::orders::get_audit_log))
        .route("/:id/lock-history", get(handlers::orders::get_lock_history));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/inventory", inventory_routes)
        .nest("/api/v1/orders", order_routes)
        .with_state(state)
}
