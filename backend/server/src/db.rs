//! Database layer — migrations and every SQL statement in the crate.
//!
//! State-machine transitions are expressed as conditional `UPDATE`
//! statements whose `WHERE` clause encodes the expected prior state; the
//! caller inspects `rows_affected` to learn whether it won.  This keeps
//! each transition a single atomic compare-and-set against the store.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{ApiError, Result};
use crate::models::{
    AnchorStatus, Farmer, Product, ProductStatus, Stage, Tip, TransportLocation, Transporter,
    User, Wallet,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

pub async fn insert_user(
    pool: &SqlitePool,
    email: &str,
    display_name: &str,
    role: &str,
    api_token: &str,
    created_at: &str,
) -> Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, display_name, role, api_token, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(email)
    .bind(display_name)
    .bind(role)
    .bind(api_token)
    .bind(created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Validation("email already registered".to_string())
        } else {
            e.into()
        }
    })?;

    get_user_by_id(pool, result.last_insert_rowid())
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "SELECT id, email, display_name, role, api_token, created_at FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_token(pool: &SqlitePool, api_token: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "SELECT id, email, display_name, role, api_token, created_at FROM users WHERE api_token = ?1",
    )
    .bind(api_token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Create the bootstrap admin account if it is not present yet.
pub async fn ensure_admin(
    pool: &SqlitePool,
    email: &str,
    api_token: &str,
    created_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO users (email, display_name, role, api_token, created_at)
        VALUES (?1, 'SACCO Admin', 'admin', ?2, ?3)
        "#,
    )
    .bind(email)
    .bind(api_token)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Farmers
// ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_farmer(
    pool: &SqlitePool,
    uid: &str,
    user_id: i64,
    national_id: &str,
    phone: &str,
    farm_address: &str,
    gps_lat_micro: Option<i64>,
    gps_lng_micro: Option<i64>,
    sacco_membership: &str,
    sacco_name: &str,
    record_hash: &str,
    created_at: &str,
) -> Result<Farmer> {
    let result = sqlx::query(
        r#"
        INSERT INTO farmers
            (uid, user_id, national_id, phone, farm_address, gps_lat_micro, gps_lng_micro,
             sacco_membership, sacco_name, record_hash, onchain_status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11)
        "#,
    )
    .bind(uid)
    .bind(user_id)
    .bind(national_id)
    .bind(phone)
    .bind(farm_address)
    .bind(gps_lat_micro)
    .bind(gps_lng_micro)
    .bind(sacco_membership)
    .bind(sacco_name)
    .bind(record_hash)
    .bind(created_at)
    .execute(pool)
    .await?;

    get_farmer_by_id(pool, result.last_insert_rowid())
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn get_farmer_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Farmer>> {
    let row = sqlx::query_as::<_, Farmer>("SELECT * FROM farmers WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_farmer_by_user(pool: &SqlitePool, user_id: i64) -> Result<Option<Farmer>> {
    let row = sqlx::query_as::<_, Farmer>("SELECT * FROM farmers WHERE user_id = ?1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Transporters
// ─────────────────────────────────────────────────────────

pub async fn insert_transporter(
    pool: &SqlitePool,
    user_id: i64,
    phone: &str,
    vehicle: &str,
    license_plate: &str,
    created_at: &str,
) -> Result<Transporter> {
    let result = sqlx::query(
        r#"
        INSERT INTO transporters (user_id, phone, vehicle, license_plate, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(user_id)
    .bind(phone)
    .bind(vehicle)
    .bind(license_plate)
    .bind(created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Validation("license plate already registered".to_string())
        } else {
            e.into()
        }
    })?;

    get_transporter_by_id(pool, result.last_insert_rowid())
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn get_transporter_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Transporter>> {
    let row = sqlx::query_as::<_, Transporter>("SELECT * FROM transporters WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_transporter_by_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Option<Transporter>> {
    let row = sqlx::query_as::<_, Transporter>("SELECT * FROM transporters WHERE user_id = ?1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_transporters(pool: &SqlitePool) -> Result<Vec<Transporter>> {
    let rows = sqlx::query_as::<_, Transporter>(
        "SELECT * FROM transporters ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Products: reads
// ─────────────────────────────────────────────────────────

const PRODUCT_COLS: &str = r#"
    id, uid, pid, farmer_id, title, variety, quantity_milli, price_cents,
    origin_lat_micro, origin_lng_micro, description, status, admin_reason,
    transporter_id, created_at, approved_at, record_hash, tx_hash,
    anchor_status, qr_payload
"#;

pub async fn get_product_by_uid(pool: &SqlitePool, uid: &str) -> Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLS} FROM products WHERE uid = ?1");
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(uid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_product_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLS} FROM products WHERE id = ?1");
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_product_by_pid(pool: &SqlitePool, pid: &str) -> Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLS} FROM products WHERE pid = ?1");
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(pid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Public lookup: only statuses a consumer may see.
pub async fn get_public_product_by_pid(pool: &SqlitePool, pid: &str) -> Result<Option<Product>> {
    let sql = format!(
        r#"
        SELECT {PRODUCT_COLS} FROM products
        WHERE pid = ?1 AND status IN ('approved', 'in_transit', 'delivered')
        "#
    );
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(pid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_products_for_farmer(pool: &SqlitePool, farmer_id: i64) -> Result<Vec<Product>> {
    let sql = format!(
        "SELECT {PRODUCT_COLS} FROM products WHERE farmer_id = ?1 ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, Product>(&sql)
        .bind(farmer_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_pending_products(pool: &SqlitePool) -> Result<Vec<Product>> {
    let sql = format!(
        "SELECT {PRODUCT_COLS} FROM products WHERE status = 'pending' ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, Product>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

/// Lots a transporter can still claim: approved (or rejected and re-offered)
/// with no holder.
pub async fn list_offer_products(pool: &SqlitePool) -> Result<Vec<Product>> {
    let sql = format!(
        r#"
        SELECT {PRODUCT_COLS} FROM products
        WHERE status IN ('approved', 'rejected') AND transporter_id IS NULL
        ORDER BY approved_at ASC, id ASC
        "#
    );
    let rows = sqlx::query_as::<_, Product>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn list_products_for_transporter(
    pool: &SqlitePool,
    transporter_id: i64,
    status: Option<&str>,
) -> Result<Vec<Product>> {
    let rows = match status {
        Some(status) => {
            let sql = format!(
                r#"
                SELECT {PRODUCT_COLS} FROM products
                WHERE transporter_id = ?1 AND status = ?2
                ORDER BY created_at DESC, id DESC
                "#
            );
            sqlx::query_as::<_, Product>(&sql)
                .bind(transporter_id)
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                r#"
                SELECT {PRODUCT_COLS} FROM products
                WHERE transporter_id = ?1
                ORDER BY created_at DESC, id DESC
                "#
            );
            sqlx::query_as::<_, Product>(&sql)
                .bind(transporter_id)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

/// Number of lots that have ever been assigned a pid for this farmer.
/// Callers hold the per-farmer lock while reading this.
pub async fn count_assigned_pids(pool: &SqlitePool, farmer_id: i64) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products WHERE farmer_id = ?1 AND pid IS NOT NULL")
            .bind(farmer_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Products: writes
// ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_product(
    pool: &SqlitePool,
    uid: &str,
    farmer_id: i64,
    title: &str,
    variety: &str,
    quantity_milli: i64,
    price_cents: i64,
    origin_lat_micro: i64,
    origin_lng_micro: i64,
    description: &str,
    created_at: &str,
) -> Result<Product> {
    let result = sqlx::query(
        r#"
        INSERT INTO products
            (uid, farmer_id, title, variety, quantity_milli, price_cents,
             origin_lat_micro, origin_lng_micro, description, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)
        "#,
    )
    .bind(uid)
    .bind(farmer_id)
    .bind(title)
    .bind(variety)
    .bind(quantity_milli)
    .bind(price_cents)
    .bind(origin_lat_micro)
    .bind(origin_lng_micro)
    .bind(description)
    .bind(created_at)
    .execute(pool)
    .await?;

    get_product_by_id(pool, result.last_insert_rowid())
        .await?
        .ok_or(ApiError::NotFound)
}

/// Farmer amendment, only while the lot is still pending.
#[allow(clippy::too_many_arguments)]
pub async fn amend_product(
    pool: &SqlitePool,
    uid: &str,
    farmer_id: i64,
    title: &str,
    variety: &str,
    quantity_milli: i64,
    price_cents: i64,
    origin_lat_micro: i64,
    origin_lng_micro: i64,
    description: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    title = ?1, variety = ?2, quantity_milli = ?3, price_cents = ?4,
               origin_lat_micro = ?5, origin_lng_micro = ?6, description = ?7
        WHERE  uid = ?8 AND farmer_id = ?9 AND status = 'pending'
        "#,
    )
    .bind(title)
    .bind(variety)
    .bind(quantity_milli)
    .bind(price_cents)
    .bind(origin_lat_micro)
    .bind(origin_lng_micro)
    .bind(description)
    .bind(uid)
    .bind(farmer_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// pending → approved.  Assigns pid, approval timestamp, record hash and QR
/// payload in the same statement so a winner commits everything at once.
pub async fn approve_product(
    pool: &SqlitePool,
    uid: &str,
    pid: &str,
    approved_at: &str,
    record_hash: &str,
    qr_payload: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    status = ?1, pid = ?2, approved_at = ?3,
               record_hash = ?4, qr_payload = ?5, anchor_status = ?6
        WHERE  uid = ?7 AND status = ?8
        "#,
    )
    .bind(ProductStatus::Approved.as_str())
    .bind(pid)
    .bind(approved_at)
    .bind(record_hash)
    .bind(qr_payload)
    .bind(AnchorStatus::Pending.as_str())
    .bind(uid)
    .bind(ProductStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// pending → declined.
pub async fn decline_product(pool: &SqlitePool, uid: &str, reason: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    status = ?1, admin_reason = ?2
        WHERE  uid = ?3 AND status = ?4
        "#,
    )
    .bind(ProductStatus::Declined.as_str())
    .bind(reason)
    .bind(uid)
    .bind(ProductStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// approved/rejected → in_transit, claiming the lot for one transporter.
/// The `transporter_id IS NULL` guard makes the claim first-writer-wins.
pub async fn claim_delivery(
    pool: &SqlitePool,
    uid: &str,
    transporter_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    status = ?1, transporter_id = ?2
        WHERE  uid = ?3 AND status IN (?4, ?5) AND transporter_id IS NULL
        "#,
    )
    .bind(ProductStatus::InTransit.as_str())
    .bind(transporter_id)
    .bind(uid)
    .bind(ProductStatus::Approved.as_str())
    .bind(ProductStatus::Rejected.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// in_transit → delivered, only by the holding transporter.
pub async fn complete_delivery(
    pool: &SqlitePool,
    uid: &str,
    transporter_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    status = ?1
        WHERE  uid = ?2 AND status = ?3 AND transporter_id = ?4
        "#,
    )
    .bind(ProductStatus::Delivered.as_str())
    .bind(uid)
    .bind(ProductStatus::InTransit.as_str())
    .bind(transporter_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// approved → rejected.  Clears any held allocation; the lot stays
/// claimable by other transporters.
pub async fn reject_delivery(pool: &SqlitePool, uid: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET    status = ?1, transporter_id = NULL
        WHERE  uid = ?2 AND status = ?3
        "#,
    )
    .bind(ProductStatus::Rejected.as_str())
    .bind(uid)
    .bind(ProductStatus::Approved.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ─────────────────────────────────────────────────────────
// Anchor bookkeeping
// ─────────────────────────────────────────────────────────

/// Claim a product's anchor work: pending → in_flight.  Returns false when
/// another submission already holds the claim.
pub async fn claim_product_anchor(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result =
        sqlx::query("UPDATE products SET anchor_status = ?1 WHERE id = ?2 AND anchor_status = ?3")
            .bind(AnchorStatus::InFlight.as_str())
            .bind(id)
            .bind(AnchorStatus::Pending.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Submission failed: release the claim so the reconciler retries.
pub async fn release_product_anchor(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE products SET anchor_status = ?1 WHERE id = ?2 AND anchor_status = ?3")
        .bind(AnchorStatus::Pending.as_str())
        .bind(id)
        .bind(AnchorStatus::InFlight.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Submission succeeded.  `tx_hash` is written at most once.
pub async fn finish_product_anchor(pool: &SqlitePool, id: i64, tx_hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE products
        SET    tx_hash = COALESCE(tx_hash, ?1), anchor_status = ?2
        WHERE  id = ?3 AND anchor_status = ?4
        "#,
    )
    .bind(tx_hash)
    .bind(AnchorStatus::Submitted.as_str())
    .bind(id)
    .bind(AnchorStatus::InFlight.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_pending_anchor_products(pool: &SqlitePool) -> Result<Vec<Product>> {
    let sql = format!(
        "SELECT {PRODUCT_COLS} FROM products WHERE anchor_status = ?1 AND pid IS NOT NULL ORDER BY id ASC"
    );
    let rows = sqlx::query_as::<_, Product>(&sql)
        .bind(AnchorStatus::Pending.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn claim_farmer_anchor(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result =
        sqlx::query("UPDATE farmers SET onchain_status = ?1 WHERE id = ?2 AND onchain_status = ?3")
            .bind(AnchorStatus::InFlight.as_str())
            .bind(id)
            .bind(AnchorStatus::Pending.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release_farmer_anchor(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE farmers SET onchain_status = ?1 WHERE id = ?2 AND onchain_status = ?3")
        .bind(AnchorStatus::Pending.as_str())
        .bind(id)
        .bind(AnchorStatus::InFlight.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn finish_farmer_anchor(pool: &SqlitePool, id: i64, tx_hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE farmers
        SET    tx_hash = COALESCE(tx_hash, ?1), onchain_status = ?2
        WHERE  id = ?3 AND onchain_status = ?4
        "#,
    )
    .bind(tx_hash)
    .bind(AnchorStatus::Submitted.as_str())
    .bind(id)
    .bind(AnchorStatus::InFlight.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_pending_anchor_farmers(pool: &SqlitePool) -> Result<Vec<Farmer>> {
    let rows = sqlx::query_as::<_, Farmer>(
        "SELECT * FROM farmers WHERE onchain_status = ?1 ORDER BY id ASC",
    )
    .bind(AnchorStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Journey journal
// ─────────────────────────────────────────────────────────

pub async fn insert_stage(
    pool: &SqlitePool,
    uid: &str,
    product_id: i64,
    name: &str,
    description: &str,
    location: &str,
    recorded_at: &str,
) -> Result<Stage> {
    let result = sqlx::query(
        r#"
        INSERT INTO stages (uid, product_id, name, description, location, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(uid)
    .bind(product_id)
    .bind(name)
    .bind(description)
    .bind(location)
    .bind(recorded_at)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, Stage>("SELECT * FROM stages WHERE id = ?1")
        .bind(result.last_insert_rowid())
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn list_stages(pool: &SqlitePool, product_id: i64) -> Result<Vec<Stage>> {
    let rows = sqlx::query_as::<_, Stage>(
        "SELECT * FROM stages WHERE product_id = ?1 ORDER BY recorded_at ASC, id ASC",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_location(
    pool: &SqlitePool,
    product_id: i64,
    lat_micro: i64,
    lng_micro: i64,
    recorded_at: &str,
) -> Result<TransportLocation> {
    let result = sqlx::query(
        r#"
        INSERT INTO transport_locations (product_id, lat_micro, lng_micro, recorded_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(product_id)
    .bind(lat_micro)
    .bind(lng_micro)
    .bind(recorded_at)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, TransportLocation>(
        "SELECT * FROM transport_locations WHERE id = ?1",
    )
    .bind(result.last_insert_rowid())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list_locations(pool: &SqlitePool, product_id: i64) -> Result<Vec<TransportLocation>> {
    let rows = sqlx::query_as::<_, TransportLocation>(
        "SELECT * FROM transport_locations WHERE product_id = ?1 ORDER BY recorded_at ASC, id ASC",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Wallets & tips
// ─────────────────────────────────────────────────────────

pub async fn ensure_wallet(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO wallets (user_id, balance_cents) VALUES (?1, 0)")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_wallet(pool: &SqlitePool, user_id: i64) -> Result<Option<Wallet>> {
    let row = sqlx::query_as::<_, Wallet>(
        "SELECT user_id, balance_cents FROM wallets WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Unconditional credit, used by deposits.
pub async fn credit_wallet(pool: &SqlitePool, user_id: i64, amount_cents: i64) -> Result<()> {
    ensure_wallet(pool, user_id).await?;
    sqlx::query("UPDATE wallets SET balance_cents = balance_cents + ?1 WHERE user_id = ?2")
        .bind(amount_cents)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move `amount_cents` from one wallet to the other in a single
/// transaction.  The two updates are applied in ascending user-id order so
/// concurrent transfers always touch rows in the same sequence; the debit
/// carries a balance guard and the whole transaction rolls back when it
/// does not hold.
pub async fn transfer_cents(
    pool: &SqlitePool,
    sender_user_id: i64,
    recipient_user_id: i64,
    amount_cents: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let debit = sqlx::query(
        r#"
        UPDATE wallets
        SET    balance_cents = balance_cents - ?1
        WHERE  user_id = ?2 AND balance_cents >= ?1
        "#,
    );
    let credit = sqlx::query(
        "UPDATE wallets SET balance_cents = balance_cents + ?1 WHERE user_id = ?2",
    );

    let debit_rows = if sender_user_id < recipient_user_id {
        let rows = debit
            .bind(amount_cents)
            .bind(sender_user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        credit
            .bind(amount_cents)
            .bind(recipient_user_id)
            .execute(&mut *tx)
            .await?;
        rows
    } else {
        credit
            .bind(amount_cents)
            .bind(recipient_user_id)
            .execute(&mut *tx)
            .await?;
        debit
            .bind(amount_cents)
            .bind(sender_user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
    };

    if debit_rows == 0 {
        tx.rollback().await?;
        return Err(ApiError::InsufficientBalance);
    }

    tx.commit().await?;
    Ok(())
}

pub async fn insert_tip(
    pool: &SqlitePool,
    tx_id: &str,
    amount_cents: i64,
    sender_user_id: Option<i64>,
    recipient_user_id: i64,
    note: &str,
    created_at: &str,
) -> Result<Tip> {
    let result = sqlx::query(
        r#"
        INSERT INTO tips (tx_id, amount_cents, sender_user_id, recipient_user_id, note, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(tx_id)
    .bind(amount_cents)
    .bind(sender_user_id)
    .bind(recipient_user_id)
    .bind(note)
    .bind(created_at)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, Tip>("SELECT * FROM tips WHERE id = ?1")
        .bind(result.last_insert_rowid())
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn list_tips_received(pool: &SqlitePool, user_id: i64) -> Result<Vec<Tip>> {
    let rows = sqlx::query_as::<_, Tip>(
        "SELECT * FROM tips WHERE recipient_user_id = ?1 ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
