//! Fixtures for tests that run against Postgres
//!
//! Every test connects with its own pool, migrates, and seeds fresh rows keyed
//! by new UUIDs. When `DATABASE_URL` is unset `test_pool` returns `None` and
//! the test returns early.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use pos_inventory_backend::services::{EventPublisher, Notifier};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Connect to `DATABASE_URL` and bring the schema up to date
pub async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

pub fn log_only_notifier() -> Arc<dyn EventPublisher> {
    Arc::new(Notifier::log_only())
}

pub async fn create_product(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>("INSERT INTO products (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("Failed to create product")
}

/// Stock carried over from before the ledger, with no movement behind it
pub async fn seed_balance(pool: &PgPool, product_id: Uuid, quantity: &str) {
    sqlx::query("INSERT INTO inventory_balances (product_id, quantity) VALUES ($1, $2)")
        .bind(product_id)
        .bind(dec(quantity))
        .execute(pool)
        .await
        .expect("Failed to seed balance");
}

/// Create a takeaway order with `(product_id, quantity, price)` lines.
/// Returns the order id and the item ids in line order.
pub async fn create_order(pool: &PgPool, lines: &[(Uuid, &str, &str)]) -> (Uuid, Vec<Uuid>) {
    let total: Decimal = lines
        .iter()
        .map(|(_, quantity, price)| dec(quantity) * dec(price))
        .sum();

    let order_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO orders (order_type, sub_total, total)
        VALUES ('takeaway', $1, $1)
        RETURNING id
        "#,
    )
    .bind(total)
    .fetch_one(pool)
    .await
    .expect("Failed to create order");

    let mut item_ids = Vec::with_capacity(lines.len());
    for (product_id, quantity, price) in lines {
        let item_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .bind(dec(quantity))
        .bind(dec(price))
        .fetch_one(pool)
        .await
        .expect("Failed to create order item");
        item_ids.push(item_id);
    }

    (order_id, item_ids)
}

pub async fn stored_balance(pool: &PgPool, product_id: Uuid) -> Option<Decimal> {
    sqlx::query_scalar::<_, Decimal>("SELECT quantity FROM inventory_balances WHERE product_id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await
        .expect("Failed to read balance")
}

/// Signed sum of every ledger entry for a product
pub async fn ledger_sum(pool: &PgPool, product_id: Uuid) -> Decimal {
    sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(CASE WHEN operation = 'in' THEN quantity ELSE -quantity END), 0)
        FROM inventory_movements
        WHERE product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_one(pool)
    .await
    .expect("Failed to sum ledger")
}

pub async fn movement_count(pool: &PgPool, product_id: Uuid) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM inventory_movements WHERE product_id = $1")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count movements")
}

pub async fn order_column(pool: &PgPool, order_id: Uuid, column: &str) -> String {
    let sql = format!("SELECT {}::text FROM orders WHERE id = $1", column);
    sqlx::query_scalar::<_, String>(&sql)
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read order")
}
