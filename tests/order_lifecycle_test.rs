mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;
use stockbook_api::{
    entities::order::OrderStatus,
    errors::ServiceError,
    services::orders::{AddItemRequest, UpdateItemRequest},
};

fn add_request(good_id: Uuid, quantity: Decimal) -> AddItemRequest {
    AddItemRequest {
        id: None,
        processed_good_id: good_id,
        quantity,
        unit_price: None,
    }
}

/// Adding an item reduces the balance by exactly the ordered quantity, in
/// both the ledger and the cache.
#[tokio::test]
async fn add_item_deducts_exactly() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P1", dec!(100)).await;
    let order_id = app.create_draft_order("SO-P1").await;

    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(30)), app.actor())
        .await
        .expect("add_item should succeed");

    assert_eq!(item.quantity, dec!(30));
    assert_eq!(app.ledger_balance(good.id).await, dec!(70));
    assert_eq!(app.cached_available(good.id).await, dec!(70));

    // Total recalculated from items: 30 * 10.00.
    let order = app.order(order_id).await;
    assert_eq!(order.total_amount, dec!(300));
}

/// A quantity change moves the balance by exactly the delta, in both
/// directions.
#[tokio::test]
async fn update_item_adjusts_by_delta() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P2", dec!(100)).await;
    let order_id = app.create_draft_order("SO-P2").await;
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(30)), app.actor())
        .await
        .expect("add_item");

    // Increase: 30 -> 45 deducts 15 more.
    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(45)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("increase");
    assert_eq!(app.ledger_balance(good.id).await, dec!(55));

    // Decrease: 45 -> 20 restores 25.
    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(20)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("decrease");
    assert_eq!(app.ledger_balance(good.id).await, dec!(80));
    assert_eq!(app.cached_available(good.id).await, dec!(80));

    let order = app.order(order_id).await;
    assert_eq!(order.total_amount, dec!(200));

    // Unchanged quantity writes no movement.
    let movements_before = app.movement_count(good.id).await;
    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(20)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("no-op update");
    assert_eq!(app.movement_count(good.id).await, movements_before);
}

/// Swapping the good restores the old good in full and deducts the new one.
#[tokio::test]
async fn update_item_good_swap_restores_and_deducts() {
    let app = TestApp::new().await;
    let first = app.seed_good("SKU-SWAP-A", dec!(50)).await;
    let second = app.seed_good("SKU-SWAP-B", dec!(40)).await;
    let order_id = app.create_draft_order("SO-SWAP").await;
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(first.id, dec!(20)), app.actor())
        .await
        .expect("add_item");
    assert_eq!(app.ledger_balance(first.id).await, dec!(30));

    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                processed_good_id: Some(second.id),
                quantity: Some(dec!(15)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("good swap");

    assert_eq!(app.ledger_balance(first.id).await, dec!(50));
    assert_eq!(app.ledger_balance(second.id).await, dec!(25));
}

/// Deleting an item restores the balance to what it was before the add.
#[tokio::test]
async fn delete_item_restores_completely() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P3", dec!(100)).await;
    let order_id = app.create_draft_order("SO-P3").await;

    let balance_before_add = app.ledger_balance(good.id).await;
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(42)), app.actor())
        .await
        .expect("add_item");
    assert_eq!(app.ledger_balance(good.id).await, dec!(58));

    app.services
        .orders
        .delete_item(order_id, item.id, app.actor())
        .await
        .expect("delete_item");

    assert_eq!(app.ledger_balance(good.id).await, balance_before_add);
    assert_eq!(app.cached_available(good.id).await, balance_before_add);
    let order = app.order(order_id).await;
    assert_eq!(order.total_amount, dec!(0));
}

/// Cancelling an order restores every item; a partial failure could never
/// commit because the restoration loop runs in one transaction.
#[tokio::test]
async fn cancellation_restores_all_items() {
    let app = TestApp::new().await;
    let first = app.seed_good("SKU-CXL-A", dec!(60)).await;
    let second = app.seed_good("SKU-CXL-B", dec!(80)).await;
    let order_id = app.create_draft_order("SO-CXL").await;

    app.services
        .orders
        .add_item(order_id, add_request(first.id, dec!(25)), app.actor())
        .await
        .expect("add first");
    app.services
        .orders
        .add_item(order_id, add_request(second.id, dec!(35)), app.actor())
        .await
        .expect("add second");
    assert_eq!(app.ledger_balance(first.id).await, dec!(35));
    assert_eq!(app.ledger_balance(second.id).await, dec!(45));

    let response = app
        .services
        .orders
        .cancel_order(order_id, app.actor())
        .await
        .expect("cancel");
    assert_eq!(response.status, OrderStatus::Cancelled.to_string());

    assert_eq!(app.ledger_balance(first.id).await, dec!(60));
    assert_eq!(app.ledger_balance(second.id).await, dec!(80));

    // Terminal: no further mutation.
    let result = app
        .services
        .orders
        .add_item(order_id, add_request(first.id, dec!(1)), app.actor())
        .await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
}

/// A deduction beyond the available balance is rejected with the exact
/// figures and leaves no trace.
#[tokio::test]
async fn insufficient_inventory_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P4", dec!(100)).await;
    let order_id = app.create_draft_order("SO-P4").await;

    let movements_before = app.movement_count(good.id).await;
    let result = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(150)), app.actor())
        .await;

    assert_matches!(
        result,
        Err(ServiceError::InsufficientInventory { available, required })
            if available == dec!(100) && required == dec!(150)
    );
    assert_eq!(app.ledger_balance(good.id).await, dec!(100));
    assert_eq!(app.movement_count(good.id).await, movements_before);

    let order = app
        .services
        .orders
        .get_order(order_id)
        .await
        .expect("get_order")
        .expect("order exists");
    assert!(order.items.is_empty());

    // An increase past the balance fails the same way.
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(40)), app.actor())
        .await
        .expect("add within balance");
    let result = app
        .services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(200)),
                ..Default::default()
            },
            app.actor(),
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientInventory { .. }));
    assert_eq!(app.ledger_balance(good.id).await, dec!(60));
}

/// Two deductions racing for the same balance serialize through the owning
/// transaction; they can never both pass the check.
#[tokio::test]
async fn concurrent_deductions_never_oversell() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P5", dec!(100)).await;
    let first_order = app.create_draft_order("SO-P5-A").await;
    let second_order = app.create_draft_order("SO-P5-B").await;

    let (first, second) = tokio::join!(
        app.services
            .orders
            .add_item(first_order, add_request(good.id, dec!(60)), app.actor()),
        app.services
            .orders
            .add_item(second_order, add_request(good.id, dec!(60)), app.actor()),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one deduction may pass");
    let balance = app.ledger_balance(good.id).await;
    assert_eq!(balance, dec!(40));
    assert!(balance >= Decimal::ZERO);
}

/// Pre-migration orders are read-only with respect to inventory effects:
/// every mutating call is rejected before touching the ledger.
#[tokio::test]
async fn historical_orders_are_immutable() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P8", dec!(100)).await;
    let historical = app.seed_historical_order("SO-LEGACY-1").await;
    let movements_before = app.movement_count(good.id).await;

    let add = app
        .services
        .orders
        .add_item(historical.id, add_request(good.id, dec!(10)), app.actor())
        .await;
    assert_matches!(add, Err(ServiceError::HistoricalOrderImmutable(id)) if id == historical.id);

    let status = app
        .services
        .orders
        .set_status(historical.id, OrderStatus::Cancelled, app.actor())
        .await;
    assert_matches!(status, Err(ServiceError::HistoricalOrderImmutable(_)));

    let payment = app
        .services
        .orders
        .record_payment(historical.id, dec!(5), app.actor())
        .await;
    assert_matches!(payment, Err(ServiceError::HistoricalOrderImmutable(_)));

    let lock = app
        .services
        .lock
        .lock_order(historical.id, app.actor())
        .await;
    assert_matches!(lock, Err(ServiceError::HistoricalOrderImmutable(_)));

    assert_eq!(app.movement_count(good.id).await, movements_before);
}

/// A storage failure after the ledger write rolls the whole operation back:
/// the balance matches its pre-operation value exactly.
#[tokio::test]
async fn failed_item_insert_rolls_back_the_ledger_write() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-P9", dec!(100)).await;
    let first_order = app.create_draft_order("SO-P9-A").await;
    let second_order = app.create_draft_order("SO-P9-B").await;

    let shared_id = Uuid::new_v4();
    app.services
        .orders
        .add_item(
            first_order,
            AddItemRequest {
                id: Some(shared_id),
                processed_good_id: good.id,
                quantity: dec!(10),
                unit_price: None,
            },
            app.actor(),
        )
        .await
        .expect("first add");
    let balance_before = app.ledger_balance(good.id).await;
    let movements_before = app.movement_count(good.id).await;

    // The deduction succeeds, then the duplicate primary key fails the item
    // insert inside the same transaction.
    let result = app
        .services
        .orders
        .add_item(
            second_order,
            AddItemRequest {
                id: Some(shared_id),
                processed_good_id: good.id,
                quantity: dec!(10),
                unit_price: None,
            },
            app.actor(),
        )
        .await;
    assert_matches!(result, Err(ServiceError::DatabaseError(_)));

    assert_eq!(app.ledger_balance(good.id).await, balance_before);
    assert_eq!(app.cached_available(good.id).await, balance_before);
    assert_eq!(app.movement_count(good.id).await, movements_before);
    let second = app
        .services
        .orders
        .get_order(second_order)
        .await
        .expect("get_order")
        .expect("order exists");
    assert!(second.items.is_empty());
    assert_eq!(second.total_amount, dec!(0));
}

/// Completion is payment-driven and monotonic: it arrives when payments
/// cover the net total, never by direct assignment, and holds defer it.
#[tokio::test]
async fn completion_is_derived_from_payments() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-PAY", dec!(100)).await;
    let order_id = app.create_draft_order("SO-PAY").await;
    app.services
        .orders
        .add_item(order_id, add_request(good.id, dec!(10)), app.actor())
        .await
        .expect("add_item");
    // Net total is 10 * 10.00 = 100.

    let direct = app
        .services
        .orders
        .set_status(order_id, OrderStatus::Completed, app.actor())
        .await;
    assert_matches!(direct, Err(ServiceError::InvalidStatus(_)));

    let partial = app
        .services
        .orders
        .record_payment(order_id, dec!(40), app.actor())
        .await
        .expect("partial payment");
    assert_eq!(partial.payment_status, "partial");
    assert_eq!(partial.status, OrderStatus::Draft.to_string());

    let paid = app
        .services
        .orders
        .record_payment(order_id, dec!(60), app.actor())
        .await
        .expect("final payment");
    assert_eq!(paid.payment_status, "paid");
    assert_eq!(paid.status, OrderStatus::Completed.to_string());
}

#[tokio::test]
async fn holds_defer_completion_until_released() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-HOLD", dec!(100)).await;
    let order_id = app.create_draft_order("SO-HOLD").await;
    app.services
        .orders
        .add_item(order_id, add_request(good.id, dec!(10)), app.actor())
        .await
        .expect("add_item");

    app.services
        .orders
        .set_hold(order_id, true, app.actor())
        .await
        .expect("hold");

    let paid = app
        .services
        .orders
        .record_payment(order_id, dec!(100), app.actor())
        .await
        .expect("payment");
    assert_eq!(paid.payment_status, "paid");
    assert_eq!(paid.status, OrderStatus::Draft.to_string());

    let released = app
        .services
        .orders
        .set_hold(order_id, false, app.actor())
        .await
        .expect("release");
    assert_eq!(released.status, OrderStatus::Completed.to_string());
}

/// Reverting to draft undoes the order's inventory effects; confirming
/// again re-applies them atomically.
#[tokio::test]
async fn revert_to_draft_releases_and_reconfirm_reapplies() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-REV", dec!(100)).await;
    let order_id = app.create_draft_order("SO-REV").await;
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(30)), app.actor())
        .await
        .expect("add_item");
    app.services
        .orders
        .set_status(order_id, OrderStatus::Confirmed, app.actor())
        .await
        .expect("confirm");
    assert_eq!(app.ledger_balance(good.id).await, dec!(70));

    // Revert: the deduction is restored in full.
    app.services
        .orders
        .set_status(order_id, OrderStatus::Draft, app.actor())
        .await
        .expect("revert to draft");
    assert_eq!(app.ledger_balance(good.id).await, dec!(100));
    assert!(!app.order(order_id).await.inventory_applied);

    // Item CRUD on a released draft touches rows only, never the ledger.
    let movements_before = app.movement_count(good.id).await;
    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(50)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("row-only update");
    assert_eq!(app.movement_count(good.id).await, movements_before);

    // Re-confirming re-applies the (updated) deduction.
    app.services
        .orders
        .set_status(order_id, OrderStatus::Confirmed, app.actor())
        .await
        .expect("re-confirm");
    assert_eq!(app.ledger_balance(good.id).await, dec!(50));
    assert!(app.order(order_id).await.inventory_applied);

    // If stock no longer covers the items, the whole confirm fails and the
    // order stays a released draft.
    app.services
        .orders
        .set_status(order_id, OrderStatus::Draft, app.actor())
        .await
        .expect("revert again");
    let spoiler_order = app.create_draft_order("SO-REV-2").await;
    app.services
        .orders
        .add_item(spoiler_order, add_request(good.id, dec!(80)), app.actor())
        .await
        .expect("competing deduction");

    let result = app
        .services
        .orders
        .set_status(order_id, OrderStatus::Confirmed, app.actor())
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientInventory { .. }));
    let order = app.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Draft.to_string());
    assert!(!order.inventory_applied);
    assert_eq!(app.ledger_balance(good.id).await, dec!(20));
}

#[tokio::test]
async fn legacy_statuses_are_rejected_outright() {
    let app = TestApp::new().await;
    let order_id = app.create_draft_order("SO-LEGACY-STATUS").await;

    for status in [OrderStatus::PartiallyDelivered, OrderStatus::DeliveryCompleted] {
        let result = app
            .services
            .orders
            .set_status(order_id, status, app.actor())
            .await;
        assert_matches!(result, Err(ServiceError::InvalidStatus(_)));
    }
}

/// Every order-affecting action leaves an audit row, in order.
#[tokio::test]
async fn audit_log_traces_the_full_lifecycle() {
    let app = TestApp::new().await;
    let good = app.seed_good("SKU-AUDIT", dec!(100)).await;
    let order_id = app.create_draft_order("SO-AUDIT").await;
    let item = app
        .services
        .orders
        .add_item(order_id, add_request(good.id, dec!(10)), app.actor())
        .await
        .expect("add_item");
    app.services
        .orders
        .update_item(
            order_id,
            item.id,
            UpdateItemRequest {
                quantity: Some(dec!(15)),
                ..Default::default()
            },
            app.actor(),
        )
        .await
        .expect("update_item");
    app.services
        .orders
        .delete_item(order_id, item.id, app.actor())
        .await
        .expect("delete_item");
    app.services
        .orders
        .cancel_order(order_id, app.actor())
        .await
        .expect("cancel");

    let log = app
        .services
        .audit
        .get_audit_log(order_id)
        .await
        .expect("audit log");
    let event_types: Vec<&str> = log.iter().map(|entry| entry.event_type.as_str()).collect();
    assert_eq!(
        event_types,
        vec![
            "ORDER_CREATED",
            "ORDER_ITEM_ADDED",
            "ORDER_ITEM_ADJUSTED",
            "ORDER_ITEM_DELETED",
            "STATUS_CHANGED",
        ]
    );
}
