//! Onboarding flows for farmers and transporters.
//!
//! Farmer registration is anchored: the profile commits first, the
//! registration hash goes to the gateway second.  A gateway outage marks
//! the profile `pending` for the reconciler instead of failing the signup.

use serde_json::json;
use sqlx::SqlitePool;
use tracing::warn;

use crate::anchor::Anchor;
use crate::auth::mint_token;
use crate::db;
use crate::errors::{ApiError, Result};
use crate::hashing;
use crate::models::{now_rfc3339, Farmer, Role, Transporter, User};
use crate::notify::{self, Notifier};

#[derive(Debug, Clone)]
pub struct FarmerSignup {
    pub email: String,
    pub display_name: String,
    pub national_id: String,
    pub phone: String,
    pub farm_address: String,
    pub gps_lat_micro: Option<i64>,
    pub gps_lng_micro: Option<i64>,
    pub sacco_membership: String,
    pub sacco_name: String,
}

impl FarmerSignup {
    fn validate(&self) -> Result<()> {
        if !self.email.contains('@') {
            return Err(ApiError::Validation("a valid email is required".to_string()));
        }
        for (value, field) in [
            (&self.display_name, "display_name"),
            (&self.national_id, "national_id"),
            (&self.phone, "phone"),
            (&self.sacco_membership, "sacco_membership"),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Create the account, profile and wallet, then anchor the registration.
pub async fn register_farmer(
    pool: &SqlitePool,
    anchor: &dyn Anchor,
    notifier: &dyn Notifier,
    signup: &FarmerSignup,
) -> Result<(User, Farmer)> {
    signup.validate()?;

    let now = now_rfc3339();
    let user = db::insert_user(
        pool,
        signup.email.trim(),
        signup.display_name.trim(),
        Role::Farmer.as_str(),
        &mint_token(),
        &now,
    )
    .await?;

    let uid = uuid::Uuid::new_v4().to_string();
    let record_hash = hashing::record_hash(&hashing::farmer_registration_payload(
        &uid,
        signup.display_name.trim(),
        signup.national_id.trim(),
        signup.phone.trim(),
        signup.gps_lat_micro,
        signup.gps_lng_micro,
        signup.sacco_membership.trim(),
        signup.sacco_name.trim(),
    ));

    let farmer = db::insert_farmer(
        pool,
        &uid,
        user.id,
        signup.national_id.trim(),
        signup.phone.trim(),
        signup.farm_address.trim(),
        signup.gps_lat_micro,
        signup.gps_lng_micro,
        signup.sacco_membership.trim(),
        signup.sacco_name.trim(),
        &record_hash,
        &now,
    )
    .await?;
    db::ensure_wallet(pool, user.id).await?;

    submit_farmer_anchor(pool, anchor, &farmer).await;

    let (subject, body) = notify::registration_message(&user.display_name, &farmer.uid);
    notify::send_quietly(notifier, &user.email, &subject, &body).await;

    let farmer = db::get_farmer_by_id(pool, farmer.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok((user, farmer))
}

/// One anchor attempt for a registration record.  Outages release the
/// claim for the reconciler; the caller never sees them.  Returns whether
/// a transaction handle was recorded.
pub async fn submit_farmer_anchor(pool: &SqlitePool, anchor: &dyn Anchor, farmer: &Farmer) -> bool {
    let Some(record_hash) = &farmer.record_hash else {
        return false;
    };

    match db::claim_farmer_anchor(pool, farmer.id).await {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            warn!("anchor claim for farmer {} failed: {e}", farmer.uid);
            return false;
        }
    }

    let metadata = json!({ "kind": "farmer_registration", "sacco": farmer.sacco_membership });
    match anchor.submit(&farmer.uid, record_hash, metadata).await {
        Ok(handle) => {
            if let Err(e) = db::finish_farmer_anchor(pool, farmer.id, &handle.tx_id).await {
                warn!("recording anchor tx for farmer {} failed: {e}", farmer.uid);
                return false;
            }
            true
        }
        Err(e) => {
            warn!(
                "anchor submission for farmer {} failed, will retry: {e}",
                farmer.uid
            );
            if let Err(e) = db::release_farmer_anchor(pool, farmer.id).await {
                warn!("releasing anchor claim for farmer {} failed: {e}", farmer.uid);
            }
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransporterSignup {
    pub email: String,
    pub display_name: String,
    pub phone: String,
    pub vehicle: String,
    pub license_plate: String,
}

impl TransporterSignup {
    fn validate(&self) -> Result<()> {
        if !self.email.contains('@') {
            return Err(ApiError::Validation("a valid email is required".to_string()));
        }
        for (value, field) in [
            (&self.display_name, "display_name"),
            (&self.phone, "phone"),
            (&self.vehicle, "vehicle"),
            (&self.license_plate, "license_plate"),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

pub async fn register_transporter(
    pool: &SqlitePool,
    signup: &TransporterSignup,
) -> Result<(User, Transporter)> {
    signup.validate()?;

    let now = now_rfc3339();
    let user = db::insert_user(
        pool,
        signup.email.trim(),
        signup.display_name.trim(),
        Role::Transporter.as_str(),
        &mint_token(),
        &now,
    )
    .await?;
    let transporter = db::insert_transporter(
        pool,
        user.id,
        signup.phone.trim(),
        signup.vehicle.trim(),
        signup.license_plate.trim(),
        &now,
    )
    .await?;
    Ok((user, transporter))
}
