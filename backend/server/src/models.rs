//! Persisted entities and the status vocabularies they carry.
//!
//! Monetary amounts, produce quantities and coordinates are scaled integers
//! (cents, thousandths of a kilogram, millionths of a degree).  Display and
//! hash formatting goes through [`crate::hashing::format_fixed`] so every
//! rendering of a value is identical.

use serde::{Deserialize, Serialize};

/// Account roles.  A user holds exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Farmer,
    Admin,
    Transporter,
    Consumer,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "farmer" => Some(Self::Farmer),
            "admin" => Some(Self::Admin),
            "transporter" => Some(Self::Transporter),
            "consumer" => Some(Self::Consumer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Admin => "admin",
            Self::Transporter => "transporter",
            Self::Consumer => "consumer",
        }
    }
}

/// Lifecycle states of a produce lot.
///
/// `Harvested` is part of the stored vocabulary for compatibility with
/// imported records; no transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Pending,
    Approved,
    Declined,
    Harvested,
    InTransit,
    Delivered,
    Rejected,
}

impl ProductStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            "harvested" => Some(Self::Harvested),
            "in_transit" => Some(Self::InTransit),
            "delivered" => Some(Self::Delivered),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Harvested => "harvested",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
        }
    }

    /// States a public trace lookup is allowed to see.  `Rejected` is
    /// deliberately absent even though a rejected lot carries a pid.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Approved | Self::InTransit | Self::Delivered)
    }
}

/// Anchoring progress for a record hash.
///
/// `Pending` rows are owned by the reconciler; `InFlight` marks a claimed
/// submission so the same hash is never anchored twice concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    None,
    Pending,
    InFlight,
    Submitted,
}

impl AnchorStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "submitted" => Some(Self::Submitted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Submitted => "submitted",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub created_at: String,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        Role::from_str(&self.role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Farmer {
    pub id: i64,
    pub uid: String,
    pub user_id: i64,
    pub national_id: String,
    pub phone: String,
    pub farm_address: String,
    pub gps_lat_micro: Option<i64>,
    pub gps_lng_micro: Option<i64>,
    pub sacco_membership: String,
    pub sacco_name: String,
    pub record_hash: Option<String>,
    pub tx_hash: Option<String>,
    pub onchain_status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transporter {
    pub id: i64,
    pub user_id: i64,
    pub phone: String,
    pub vehicle: String,
    pub license_plate: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub uid: String,
    pub pid: Option<String>,
    pub farmer_id: i64,
    pub title: String,
    pub variety: String,
    pub quantity_milli: i64,
    pub price_cents: i64,
    pub origin_lat_micro: i64,
    pub origin_lng_micro: i64,
    pub description: String,
    pub status: String,
    pub admin_reason: Option<String>,
    pub transporter_id: Option<i64>,
    pub created_at: String,
    pub approved_at: Option<String>,
    pub record_hash: Option<String>,
    pub tx_hash: Option<String>,
    pub anchor_status: String,
    pub qr_payload: Option<String>,
}

impl Product {
    pub fn status(&self) -> Option<ProductStatus> {
        ProductStatus::from_str(&self.status)
    }
}

/// One named event in a product's journey.  Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Stage {
    pub id: i64,
    pub uid: String,
    pub product_id: i64,
    pub name: String,
    pub description: String,
    pub location: String,
    pub recorded_at: String,
}

/// A raw GPS ping recorded during transit.  Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransportLocation {
    pub id: i64,
    pub product_id: i64,
    pub lat_micro: i64,
    pub lng_micro: i64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub user_id: i64,
    pub balance_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tip {
    pub id: i64,
    pub tx_id: String,
    pub amount_cents: i64,
    pub sender_user_id: Option<i64>,
    pub recipient_user_id: i64,
    pub note: String,
    pub created_at: String,
}

/// RFC 3339 UTC timestamp with second precision, the one time format the
/// whole crate persists and hashes.
pub fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
