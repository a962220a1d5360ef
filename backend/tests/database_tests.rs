//! Database-backed service tests
//!
//! Runs the services against Postgres to cover what the pure rules cannot:
//! - Balance upserts stay equal to the signed ledger sum
//! - A failed return rolls back every row it wrote
//! - Concurrent returns cannot jointly exceed the ordered quantity
//! - Opening and aggregating days, including late openings and fallbacks
//! - Persisted return and payment statuses
//!
//! Skipped when `DATABASE_URL` is unset.

mod common;

use chrono::{NaiveDate, Utc};
use common::*;
use pos_inventory_backend::error::AppError;
use pos_inventory_backend::jobs::run_rollup;
use pos_inventory_backend::services::daily_summary::SummaryView;
use pos_inventory_backend::services::ledger::{BatchMovementInput, MovementQuery, NewMovement};
use pos_inventory_backend::services::payment::{ApplyPaymentsInput, CompleteOrderInput};
use pos_inventory_backend::services::{
    DailySummaryService, LedgerService, OrderPaymentService, OrderReturnService,
};
use rust_decimal::Decimal;
use serial_test::serial;
use shared::{
    MovementError, MovementOperation, MovementReason, OrderStatus, PaymentMethod, PaymentStatus,
    ProductQuantity, RefundEntry, ReturnItemRequest, ReturnRequest, ReturnStatus,
    ReturnValidationError, TenderedPayment,
};
use uuid::Uuid;

fn movement(
    product_id: Uuid,
    operation: MovementOperation,
    reason: MovementReason,
    quantity: &str,
) -> NewMovement {
    NewMovement {
        product_id,
        operation,
        quantity: dec(quantity),
        reason,
        reference: None,
    }
}

fn return_request(
    lines: &[(Uuid, &str, &str)],
    refunds: &[(PaymentMethod, &str)],
    reverse_stock: bool,
) -> ReturnRequest {
    ReturnRequest {
        user_id: Uuid::new_v4(),
        shift_id: None,
        reason: "Customer changed their mind".to_string(),
        items: lines
            .iter()
            .map(|(order_item_id, quantity, refund)| ReturnItemRequest {
                order_item_id: *order_item_id,
                quantity: dec(quantity),
                refund_amount: dec(refund),
            })
            .collect(),
        refunds: refunds
            .iter()
            .map(|(method, amount)| RefundEntry {
                method: *method,
                amount: dec(amount),
            })
            .collect(),
        reverse_stock,
    }
}

fn tender(method: PaymentMethod, amount: &str) -> TenderedPayment {
    TenderedPayment {
        method,
        amount: dec(amount),
    }
}

fn summary_for(summaries: &[SummaryView], product_id: Uuid) -> Option<&SummaryView> {
    summaries.iter().find(|s| s.summary.product_id == product_id)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
#[serial]
async fn test_balance_tracks_signed_ledger_sum() {
    let Some(pool) = test_pool().await else { return };
    let ledger = LedgerService::new(pool.clone());
    let (flour, sugar) = (
        create_product(&pool, "Flour").await,
        create_product(&pool, "Sugar").await,
    );

    ledger
        .post(movement(flour, MovementOperation::In, MovementReason::Purchase, "50"))
        .await
        .unwrap();
    let posted = ledger
        .post(movement(flour, MovementOperation::Out, MovementReason::Order, "30"))
        .await
        .unwrap();
    assert_eq!(posted.balance_after, dec("20"));

    let batch = ledger
        .post_batch(BatchMovementInput {
            operation: MovementOperation::Out,
            reason: MovementReason::Waste,
            items: vec![
                ProductQuantity::new(flour, dec("25")),
                ProductQuantity::new(sugar, dec("1.5")),
            ],
            reference: None,
        })
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);

    // Overselling goes negative instead of failing
    let flour_balance = ledger.balance(flour).await.unwrap();
    assert_eq!(flour_balance.quantity, dec("-5"));
    assert_eq!(ledger_sum(&pool, flour).await, flour_balance.quantity);
    assert_eq!(stored_balance(&pool, sugar).await, Some(dec("-1.5")));
    assert_eq!(ledger_sum(&pool, sugar).await, dec("-1.5"));

    let history = ledger.movements(flour, MovementQuery::default()).await.unwrap();
    let reasons: Vec<MovementReason> = history.iter().map(|m| m.reason).collect();
    assert_eq!(
        reasons,
        vec![MovementReason::Purchase, MovementReason::Order, MovementReason::Waste]
    );
}

#[tokio::test]
#[serial]
async fn test_rejected_movements_write_nothing() {
    let Some(pool) = test_pool().await else { return };
    let ledger = LedgerService::new(pool.clone());
    let product_id = create_product(&pool, "Milk").await;

    let err = ledger
        .post(movement(product_id, MovementOperation::In, MovementReason::Purchase, "0"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Movement(MovementError::InvalidQuantity { .. })));

    let err = ledger
        .post(movement(product_id, MovementOperation::In, MovementReason::Order, "3"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Movement(MovementError::Unmapped(_))));

    // A bad entry anywhere in a batch rejects the whole batch
    let err = ledger
        .post_batch(BatchMovementInput {
            operation: MovementOperation::In,
            reason: MovementReason::Purchase,
            items: vec![
                ProductQuantity::new(product_id, dec("4")),
                ProductQuantity::new(product_id, dec("-1")),
            ],
            reference: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Movement(_)));

    assert_eq!(movement_count(&pool, product_id).await, 0);
    assert_eq!(stored_balance(&pool, product_id).await, None);
    assert!(matches!(ledger.balance(product_id).await, Err(AppError::NotFound(_))));
}

// ============================================================================
// Returns
// ============================================================================

#[tokio::test]
#[serial]
async fn test_partial_return_then_over_return() {
    let Some(pool) = test_pool().await else { return };
    let returns = OrderReturnService::new(pool.clone(), log_only_notifier());
    let product_id = create_product(&pool, "Croissant").await;
    seed_balance(&pool, product_id, "0").await;
    let (order_id, items) = create_order(&pool, &[(product_id, "10", "5.00")]).await;

    let processed = returns
        .process_return(
            order_id,
            &return_request(&[(items[0], "4", "20.00")], &[(PaymentMethod::Cash, "20.00")], true),
        )
        .await
        .unwrap();

    assert_eq!(processed.return_status, ReturnStatus::PartialReturn);
    assert_eq!(processed.details.order_return.total_refund, dec("20.00"));
    assert_eq!(processed.movements.len(), 1);
    assert_eq!(processed.movements[0].movement.reason, MovementReason::ReturnSales);
    assert_eq!(order_column(&pool, order_id, "return_status").await, "partial_return");
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("4")));
    assert_eq!(
        returns.available_quantity_for_return(order_id, items[0]).await.unwrap(),
        dec("6")
    );

    let err = returns
        .process_return(
            order_id,
            &return_request(&[(items[0], "7", "35.00")], &[(PaymentMethod::Cash, "35.00")], true),
        )
        .await
        .unwrap_err();
    match err {
        AppError::ReturnValidation(ReturnValidationError::OverReturn {
            available,
            requested,
            ..
        }) => {
            assert_eq!(available, dec("6"));
            assert_eq!(requested, dec("7"));
        }
        other => panic!("expected an over-return, got {:?}", other),
    }

    assert_eq!(returns.returns_for_order(order_id).await.unwrap().len(), 1);
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("4")));
}

#[tokio::test]
#[serial]
async fn test_refund_mismatch_rolls_back_everything() {
    let Some(pool) = test_pool().await else { return };
    let returns = OrderReturnService::new(pool.clone(), log_only_notifier());
    let (tea, cake) = (
        create_product(&pool, "Tea").await,
        create_product(&pool, "Cake").await,
    );
    let (order_id, items) = create_order(&pool, &[(tea, "3", "4.00"), (cake, "2", "9.00")]).await;

    let err = returns
        .process_return(
            order_id,
            &return_request(
                &[(items[0], "3", "12.00"), (items[1], "2", "18.00")],
                &[(PaymentMethod::Cash, "20.00"), (PaymentMethod::Card, "9.99")],
                true,
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::ReturnValidation(ReturnValidationError::RefundMismatch { .. })
    ));

    let stored_returns = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM order_returns WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored_returns, 0);
    assert_eq!(movement_count(&pool, tea).await, 0);
    assert_eq!(movement_count(&pool, cake).await, 0);
    assert_eq!(stored_balance(&pool, tea).await, None);
    assert_eq!(order_column(&pool, order_id, "return_status").await, "none");
}

#[tokio::test]
#[serial]
async fn test_full_return_without_restock() {
    let Some(pool) = test_pool().await else { return };
    let returns = OrderReturnService::new(pool.clone(), log_only_notifier());
    let product_id = create_product(&pool, "Bagel").await;
    let (order_id, items) = create_order(&pool, &[(product_id, "2", "3.50")]).await;

    let processed = returns
        .process_return(order_id, &return_request(&[(items[0], "2", "0")], &[], false))
        .await
        .unwrap();

    assert_eq!(processed.return_status, ReturnStatus::FullReturn);
    assert!(processed.movements.is_empty());
    assert_eq!(order_column(&pool, order_id, "return_status").await, "full_return");
    assert_eq!(movement_count(&pool, product_id).await, 0);
    assert_eq!(
        returns.available_quantity_for_return(order_id, items[0]).await.unwrap(),
        Decimal::ZERO
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_returns_never_exceed_ordered() {
    let Some(pool) = test_pool().await else { return };
    let returns = OrderReturnService::new(pool.clone(), log_only_notifier());
    let product_id = create_product(&pool, "Muffin").await;
    let (order_id, items) = create_order(&pool, &[(product_id, "10", "2.00")]).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = returns.clone();
        let request = return_request(&[(items[0], "3", "6.00")], &[(PaymentMethod::Cash, "6.00")], true);
        handles.push(tokio::spawn(async move {
            service.process_return(order_id, &request).await
        }));
    }

    let (mut accepted, mut rejected) = (0, 0);
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AppError::ReturnValidation(ReturnValidationError::OverReturn { .. })) => rejected += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 3);

    let returned = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(quantity), 0) FROM order_return_items WHERE order_item_id = $1",
    )
    .bind(items[0])
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(returned, dec("9"));
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("9")));
    assert_eq!(order_column(&pool, order_id, "return_status").await, "partial_return");
}

// ============================================================================
// Daily summaries
// ============================================================================

#[tokio::test]
#[serial]
async fn test_open_day_captures_balances_once() {
    let Some(pool) = test_pool().await else { return };
    let summaries = DailySummaryService::new(pool.clone());
    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    let mut stocked = Vec::new();
    for quantity in ["100", "250", "50"] {
        let product_id = create_product(&pool, "Stocked").await;
        seed_balance(&pool, product_id, quantity).await;
        stocked.push((product_id, dec(quantity)));
    }
    let never_moved = create_product(&pool, "Never moved").await;

    assert!(summaries.open_day(date).await.unwrap() >= 3);

    let rows = summaries.summaries(date).await.unwrap();
    for (product_id, quantity) in &stocked {
        let view = summary_for(&rows, *product_id).unwrap();
        assert_eq!(view.summary.start_quantity, *quantity);
        assert_eq!(view.summary.incoming_quantity, Decimal::ZERO);
    }
    assert!(summary_for(&rows, never_moved).is_none());

    // Re-opening never rewrites start_quantity
    sqlx::query("UPDATE inventory_balances SET quantity = 1 WHERE product_id = $1")
        .bind(stocked[0].0)
        .execute(&pool)
        .await
        .unwrap();
    summaries.open_day(date).await.unwrap();
    let rows = summaries.summaries(date).await.unwrap();
    assert_eq!(summary_for(&rows, stocked[0].0).unwrap().summary.start_quantity, dec("100"));
}

#[tokio::test]
#[serial]
async fn test_aggregate_keeps_start_quantity() {
    let Some(pool) = test_pool().await else { return };
    let ledger = LedgerService::new(pool.clone());
    let summaries = DailySummaryService::new(pool.clone());
    let product_id = create_product(&pool, "Beans").await;
    seed_balance(&pool, product_id, "100").await;

    summaries.open_day(today()).await.unwrap();
    ledger
        .post(movement(product_id, MovementOperation::In, MovementReason::Purchase, "50"))
        .await
        .unwrap();
    ledger
        .post(movement(product_id, MovementOperation::Out, MovementReason::Order, "30"))
        .await
        .unwrap();

    let outcomes = summaries.aggregate(&[product_id], today()).await.unwrap();
    let outcome = &outcomes[0];
    assert!(!outcome.opened_by_fallback);
    assert_eq!(outcome.summary.summary.start_quantity, dec("100"));
    assert_eq!(outcome.summary.summary.incoming_quantity, dec("50"));
    assert_eq!(outcome.summary.summary.sales_quantity, dec("30"));
    assert_eq!(outcome.summary.end_quantity, dec("120"));

    // Aggregating again recomputes instead of adding
    let again = summaries.aggregate(&[product_id], today()).await.unwrap();
    assert_eq!(again[0].summary.summary, outcome.summary.summary);
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("120")));
}

#[tokio::test]
#[serial]
async fn test_rollup_after_same_day_purchase_closes_at_balance() {
    let Some(pool) = test_pool().await else { return };
    let ledger = LedgerService::new(pool.clone());
    let summaries = DailySummaryService::new(pool.clone());
    let (fresh, carried) = (
        create_product(&pool, "Oat milk").await,
        create_product(&pool, "Syrup").await,
    );
    seed_balance(&pool, carried, "20").await;

    // Both posted before the day's first rollup pass
    ledger
        .post(movement(fresh, MovementOperation::In, MovementReason::Purchase, "50"))
        .await
        .unwrap();
    ledger
        .post(movement(carried, MovementOperation::Out, MovementReason::Order, "5"))
        .await
        .unwrap();

    run_rollup(&summaries, today()).await.unwrap();

    let rows = summaries.summaries(today()).await.unwrap();
    let fresh_row = summary_for(&rows, fresh).unwrap();
    assert_eq!(fresh_row.summary.start_quantity, Decimal::ZERO);
    assert_eq!(fresh_row.summary.incoming_quantity, dec("50"));
    assert_eq!(Some(fresh_row.end_quantity), stored_balance(&pool, fresh).await);

    let carried_row = summary_for(&rows, carried).unwrap();
    assert_eq!(carried_row.summary.start_quantity, dec("20"));
    assert_eq!(carried_row.end_quantity, dec("15"));
    assert_eq!(Some(carried_row.end_quantity), stored_balance(&pool, carried).await);

    // The next pass changes nothing
    run_rollup(&summaries, today()).await.unwrap();
    let rows = summaries.summaries(today()).await.unwrap();
    assert_eq!(summary_for(&rows, fresh).unwrap().end_quantity, dec("50"));
}

#[tokio::test]
#[serial]
async fn test_aggregating_unopened_day_falls_back_to_zero_start() {
    let Some(pool) = test_pool().await else { return };
    let ledger = LedgerService::new(pool.clone());
    let summaries = DailySummaryService::new(pool.clone());
    let product_id = create_product(&pool, "Napkins").await;
    let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();

    ledger
        .post(movement(product_id, MovementOperation::In, MovementReason::Purchase, "5"))
        .await
        .unwrap();

    let first = summaries.aggregate(&[product_id], date).await.unwrap();
    assert!(first[0].opened_by_fallback);
    assert_eq!(first[0].summary.summary.start_quantity, Decimal::ZERO);
    // Today's purchase is outside that day
    assert_eq!(first[0].summary.summary.incoming_quantity, Decimal::ZERO);

    let second = summaries.aggregate(&[product_id], date).await.unwrap();
    assert!(!second[0].opened_by_fallback);
}

// ============================================================================
// Payments
// ============================================================================

#[tokio::test]
#[serial]
async fn test_payment_status_recomputed_from_all_payments() {
    let Some(pool) = test_pool().await else { return };
    let payments = OrderPaymentService::new(pool.clone(), log_only_notifier());
    let product_id = create_product(&pool, "Sandwich").await;
    let (order_id, _) = create_order(&pool, &[(product_id, "5", "5.00")]).await;

    let order = payments
        .apply_payments(
            order_id,
            &ApplyPaymentsInput {
                shift_id: None,
                payments: vec![tender(PaymentMethod::Cash, "10.00"), tender(PaymentMethod::Card, "0")],
            },
        )
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::PartialPaid);
    assert_eq!(order.paid, dec("10.00"));

    let order = payments
        .apply_payments(
            order_id,
            &ApplyPaymentsInput {
                shift_id: None,
                payments: vec![tender(PaymentMethod::Card, "15.00")],
            },
        )
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::FullPaid);
    assert_eq!(order_column(&pool, order_id, "payment_status").await, "full_paid");

    let stored = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 2);
}

#[tokio::test]
#[serial]
async fn test_complete_order_deducts_stock() {
    let Some(pool) = test_pool().await else { return };
    let payments = OrderPaymentService::new(pool.clone(), log_only_notifier());
    let product_id = create_product(&pool, "Espresso").await;
    seed_balance(&pool, product_id, "10").await;
    let (order_id, _) = create_order(&pool, &[(product_id, "2", "3.00")]).await;

    let order = payments
        .complete_order(
            order_id,
            &CompleteOrderInput {
                shift_id: None,
                discount: None,
                payments: vec![tender(PaymentMethod::Cash, "6.00")],
            },
        )
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.payment_status, PaymentStatus::FullPaid);
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("8")));

    let err = payments
        .complete_order(
            order_id,
            &CompleteOrderInput {
                shift_id: None,
                discount: None,
                payments: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    assert_eq!(stored_balance(&pool, product_id).await, Some(dec("8")));
}
