//! Product lifecycle manager — creation, amendment, approval and decline.
//!
//! Every transition is committed through a conditional update in [`crate::db`]
//! so exactly one writer wins per product.  Approval additionally assigns the
//! public identifier, computes the record hash and attempts the anchor
//! submission; the anchor call happens strictly after the approval has been
//! persisted, so a gateway outage can never lose the pid assignment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Datelike;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::warn;

use crate::anchor::Anchor;
use crate::db;
use crate::errors::{ApiError, Result};
use crate::hashing;
use crate::models::{now_rfc3339, Farmer, Product, ProductStatus};
use crate::notify::{self, Notifier};

/// Per-farmer serialization points for pid sequence assignment.  Approvals
/// for different farmers proceed in parallel; two approvals for the same
/// farmer take turns, so sequence numbers never collide.
#[derive(Default)]
pub struct FarmerLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl FarmerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, farmer_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("farmer lock registry poisoned");
        map.entry(farmer_id).or_default().clone()
    }
}

/// Fields a farmer controls on a lot.
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub title: String,
    pub variety: String,
    pub quantity_milli: i64,
    pub price_cents: i64,
    pub origin_lat_micro: i64,
    pub origin_lng_micro: i64,
    pub description: String,
}

impl ProductDraft {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ApiError::Validation("title is required".to_string()));
        }
        if self.quantity_milli <= 0 {
            return Err(ApiError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        if self.price_cents < 0 {
            return Err(ApiError::Validation("price cannot be negative".to_string()));
        }
        Ok(())
    }
}

/// Register a new lot for `farmer`.  Starts in `pending`.
pub async fn create_product(
    pool: &SqlitePool,
    farmer: &Farmer,
    draft: &ProductDraft,
) -> Result<Product> {
    draft.validate()?;
    db::insert_product(
        pool,
        &uuid::Uuid::new_v4().to_string(),
        farmer.id,
        draft.title.trim(),
        &draft.variety,
        draft.quantity_milli,
        draft.price_cents,
        draft.origin_lat_micro,
        draft.origin_lng_micro,
        &draft.description,
        &now_rfc3339(),
    )
    .await
}

/// Farmer amendment.  Allowed only while the lot is still pending and only
/// for its owner.
pub async fn amend_product(
    pool: &SqlitePool,
    farmer: &Farmer,
    uid: &str,
    draft: &ProductDraft,
) -> Result<Product> {
    draft.validate()?;
    let product = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    if product.farmer_id != farmer.id {
        return Err(ApiError::Forbidden);
    }

    let amended = db::amend_product(
        pool,
        uid,
        farmer.id,
        draft.title.trim(),
        &draft.variety,
        draft.quantity_milli,
        draft.price_cents,
        draft.origin_lat_micro,
        draft.origin_lng_micro,
        &draft.description,
    )
    .await?;
    if !amended {
        return Err(ApiError::InvalidTransition(format!(
            "cannot amend a {} lot",
            product.status
        )));
    }

    db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)
}

/// `FT-{year}-{farmer}-{seq:04}` — the public identifier assigned exactly
/// once, at approval.
fn format_pid(year: i32, farmer_id: i64, seq: i64) -> String {
    format!("FT-{year}-{farmer_id}-{seq:04}")
}

/// Approve a pending lot.
///
/// Persists the pid, approval timestamp, record hash and QR payload in one
/// conditional update, then attempts the anchor submission.  A failed
/// submission leaves the lot approved with `anchor_status = pending`; the
/// reconciler picks it up from there.
pub async fn approve(
    pool: &SqlitePool,
    anchor: &dyn Anchor,
    notifier: &dyn Notifier,
    locks: &FarmerLocks,
    trace_base_url: &str,
    uid: &str,
) -> Result<Product> {
    let product = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    if product.status() != Some(ProductStatus::Pending) {
        return Err(ApiError::InvalidTransition(format!(
            "cannot approve a {} lot",
            product.status
        )));
    }

    {
        // The farmer lock serializes sequence assignment; the status guard
        // in the UPDATE serializes the transition itself.
        let lock = locks.lock_for(product.farmer_id);
        let _guard = lock.lock().await;

        let seq = db::count_assigned_pids(pool, product.farmer_id).await? + 1;
        let pid = format_pid(chrono::Utc::now().year(), product.farmer_id, seq);
        let approved_at = now_rfc3339();
        let record_hash = hashing::record_hash(&hashing::product_approval_payload(
            &pid,
            &product.title,
            product.quantity_milli,
            product.origin_lat_micro,
            product.origin_lng_micro,
            &approved_at,
        ));
        let qr_payload = format!("{trace_base_url}/{pid}");

        let won = db::approve_product(pool, uid, &pid, &approved_at, &record_hash, &qr_payload)
            .await?;
        if !won {
            let current = db::get_product_by_uid(pool, uid)
                .await?
                .ok_or(ApiError::NotFound)?;
            return Err(ApiError::InvalidTransition(format!(
                "cannot approve a {} lot",
                current.status
            )));
        }
    }

    let approved = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;

    submit_product_anchor(pool, anchor, &approved).await;
    notify_farmer_of_review(pool, notifier, &approved, None).await;

    db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)
}

/// One anchor attempt for an approved lot.  Never fails the caller: a
/// gateway outage releases the claim for the reconciler.  Returns whether
/// a transaction handle was recorded.
pub async fn submit_product_anchor(
    pool: &SqlitePool,
    anchor: &dyn Anchor,
    product: &Product,
) -> bool {
    let (Some(pid), Some(record_hash)) = (&product.pid, &product.record_hash) else {
        return false;
    };

    match db::claim_product_anchor(pool, product.id).await {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            warn!("anchor claim for {pid} failed: {e}");
            return false;
        }
    }

    let metadata = json!({ "kind": "product_approval", "uid": product.uid });
    match anchor.submit(pid, record_hash, metadata).await {
        Ok(handle) => {
            if let Err(e) = db::finish_product_anchor(pool, product.id, &handle.tx_id).await {
                warn!("recording anchor tx for {pid} failed: {e}");
                return false;
            }
            true
        }
        Err(e) => {
            warn!("anchor submission for {pid} failed, will retry: {e}");
            if let Err(e) = db::release_product_anchor(pool, product.id).await {
                warn!("releasing anchor claim for {pid} failed: {e}");
            }
            false
        }
    }
}

/// Decline a pending lot with a reason.  Calling it again with the same
/// reason is a no-op returning the same state.
pub async fn decline(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    uid: &str,
    reason: &str,
) -> Result<Product> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::Validation(
            "a reason is required to decline".to_string(),
        ));
    }

    let product = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;

    if product.status() == Some(ProductStatus::Declined)
        && product.admin_reason.as_deref() == Some(reason)
    {
        return Ok(product);
    }

    let won = db::decline_product(pool, uid, reason).await?;
    if !won {
        let current = db::get_product_by_uid(pool, uid)
            .await?
            .ok_or(ApiError::NotFound)?;
        if current.status() == Some(ProductStatus::Declined)
            && current.admin_reason.as_deref() == Some(reason)
        {
            return Ok(current);
        }
        return Err(ApiError::InvalidTransition(format!(
            "cannot decline a {} lot",
            current.status
        )));
    }

    let declined = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    notify_farmer_of_review(pool, notifier, &declined, Some(reason)).await;
    Ok(declined)
}

async fn notify_farmer_of_review(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    product: &Product,
    decline_reason: Option<&str>,
) {
    let recipient = match farmer_account(pool, product.farmer_id).await {
        Some(account) => account,
        None => return,
    };
    let (subject, body) = match (decline_reason, &product.pid) {
        (Some(reason), _) => notify::decline_message(&recipient.1, &product.title, reason),
        (None, Some(pid)) => notify::approval_message(&recipient.1, &product.title, pid),
        (None, None) => return,
    };
    notify::send_quietly(notifier, &recipient.0, &subject, &body).await;
}

async fn farmer_account(pool: &SqlitePool, farmer_id: i64) -> Option<(String, String)> {
    let farmer = db::get_farmer_by_id(pool, farmer_id).await.ok()??;
    let user = db::get_user_by_id(pool, farmer.user_id).await.ok()??;
    Some((user.email, user.display_name))
}
