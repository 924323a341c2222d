//! Shared fixtures for database-backed tests.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::auth::mint_token;
use crate::db;
use crate::hashing;
use crate::models::{now_rfc3339, Farmer, Product, Transporter, User};

/// Fresh in-memory database with migrations applied.  A single connection
/// keeps every query on the same store.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

pub async fn seed_farmer(pool: &SqlitePool, email: &str) -> (User, Farmer) {
    let now = now_rfc3339();
    let user = db::insert_user(pool, email, "Jane Wanjiku", "farmer", &mint_token(), &now)
        .await
        .expect("user");
    let uid = uuid::Uuid::new_v4().to_string();
    let payload = hashing::farmer_registration_payload(
        &uid,
        &user.display_name,
        "ID-12345678",
        "+254700000001",
        Some(-1_286_389),
        Some(36_817_223),
        "SACCO-042",
        "Nyeri Growers",
    );
    let farmer = db::insert_farmer(
        pool,
        &uid,
        user.id,
        "ID-12345678",
        "+254700000001",
        "Nyeri, Kenya",
        Some(-1_286_389),
        Some(36_817_223),
        "SACCO-042",
        "Nyeri Growers",
        &hashing::record_hash(&payload),
        &now,
    )
    .await
    .expect("farmer");
    db::ensure_wallet(pool, user.id).await.expect("wallet");

    // Seeded profiles are already anchored so they stay out of the
    // reconciler's work queue.
    db::claim_farmer_anchor(pool, farmer.id).await.expect("claim");
    db::finish_farmer_anchor(pool, farmer.id, "0xseedtx")
        .await
        .expect("finish");
    let farmer = db::get_farmer_by_id(pool, farmer.id)
        .await
        .expect("reload")
        .expect("farmer row");
    (user, farmer)
}

pub async fn seed_transporter(pool: &SqlitePool, email: &str, plate: &str) -> (User, Transporter) {
    let now = now_rfc3339();
    let user = db::insert_user(pool, email, "Otis Mover", "transporter", &mint_token(), &now)
        .await
        .expect("user");
    let transporter = db::insert_transporter(pool, user.id, "+254711000001", "5t truck", plate, &now)
        .await
        .expect("transporter");
    (user, transporter)
}

pub async fn seed_product(pool: &SqlitePool, farmer_id: i64, title: &str) -> Product {
    db::insert_product(
        pool,
        &uuid::Uuid::new_v4().to_string(),
        farmer_id,
        title,
        "Arabica SL28",
        12_500,
        45_000,
        -1_286_389,
        36_817_223,
        "Sun-dried, hand sorted",
        &now_rfc3339(),
    )
    .await
    .expect("product")
}
