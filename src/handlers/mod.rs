pub mod inventory;
pub mod orders;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        audit::AuditLogService, balance::BalanceService, deduction::DeductionEngine,
        lock::OrderLockService, movements::MovementStore, orders::OrderService, Actor,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub movements: Arc<MovementStore>,
    pub balance: Arc<BalanceService>,
    pub deduction: Arc<DeductionEngine>,
    pub orders: Arc<OrderService>,
    pub lock: Arc<OrderLockService>,
    pub audit: Arc<AuditLogService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, lock_window_days: i64) -> Self {
        Self {
            movements: Arc::new(MovementStore::new(db_pool.clone(), event_sender.clone())),
            balance: Arc::new(BalanceService::new(db_pool.clone())),
            deduction: Arc::new(DeductionEngine::new(db_pool.clone(), event_sender.clone())),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            lock: Arc::new(OrderLockService::new(
                db_pool.clone(),
                event_sender,
                lock_window_days,
            )),
            audit: Arc::new(AuditLogService::new(db_pool)),
        }
    }
}

/// Extracts the acting identity from the `x-actor-id` / `x-actor-write`
/// headers supplied by the surrounding application. This crate never
/// resolves users itself.
#[derive(Debug, Clone, Copy)]
pub struct ActorInfo(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for ActorInfo
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "Missing or invalid x-actor-id header".to_string(),
                )
            })?;
        let can_write = parts
            .headers
            .get("x-actor-write")
            .and_then(|value| value.to_str().ok())
            .map(|value| value != "false")
            .unwrap_or(true);
        Ok(ActorInfo(Actor::new(id, can_write)))
    }
}
