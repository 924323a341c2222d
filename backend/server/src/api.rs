//! Axum REST API handlers.
//!
//! Handlers validate input and resolve caller identity, then delegate to
//! the lifecycle, delivery, wallet and trace modules.  Every mutating
//! response echoes the resulting entity state so a client can tell
//! "approved, anchored" apart from "approved, anchor pending".

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::anchor::Anchor;
use crate::auth::AuthUser;
use crate::config::Config;
use crate::db;
use crate::delivery::{self, DeliveryReport};
use crate::errors::{ApiError, Result};
use crate::lifecycle::{self, FarmerLocks, ProductDraft};
use crate::models::{Farmer, Product, ProductStatus, Role, Transporter};
use crate::notify::Notifier;
use crate::registration::{self, FarmerSignup, TransporterSignup};
use crate::trace;
use crate::wallet::{self, TipRequest, TipTarget};

pub struct AppState {
    pub pool: SqlitePool,
    pub anchor: Arc<dyn Anchor>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
    pub farmer_locks: FarmerLocks,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Deserialize)]
pub struct RegisterFarmerRequest {
    pub email: String,
    pub display_name: String,
    pub national_id: String,
    pub phone: String,
    #[serde(default)]
    pub farm_address: String,
    pub gps_lat_micro: Option<i64>,
    pub gps_lng_micro: Option<i64>,
    pub sacco_membership: String,
    #[serde(default)]
    pub sacco_name: String,
}

#[derive(Serialize)]
pub struct FarmerRegisteredResponse {
    pub farmer_uid: String,
    pub api_token: String,
    pub record_hash: Option<String>,
    pub tx_hash: Option<String>,
    pub onchain_status: String,
}

#[derive(Deserialize)]
pub struct RegisterTransporterRequest {
    pub email: String,
    pub display_name: String,
    pub phone: String,
    pub vehicle: String,
    pub license_plate: String,
}

#[derive(Serialize)]
pub struct TransporterRegisteredResponse {
    pub transporter_id: i64,
    pub api_token: String,
}

#[derive(Serialize)]
pub struct TransportersResponse {
    pub count: usize,
    pub transporters: Vec<Transporter>,
}

#[derive(Deserialize)]
pub struct ProductRequest {
    pub title: String,
    #[serde(default)]
    pub variety: String,
    pub quantity_milli: i64,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub origin_lat_micro: i64,
    #[serde(default)]
    pub origin_lng_micro: i64,
    #[serde(default)]
    pub description: String,
}

impl ProductRequest {
    fn draft(&self) -> ProductDraft {
        ProductDraft {
            title: self.title.clone(),
            variety: self.variety.clone(),
            quantity_milli: self.quantity_milli,
            price_cents: self.price_cents,
            origin_lat_micro: self.origin_lat_micro,
            origin_lng_micro: self.origin_lng_micro,
            description: self.description.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub detail: String,
    pub product: Product,
}

#[derive(Serialize)]
pub struct ProductsResponse {
    pub count: usize,
    pub products: Vec<Product>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct StageRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub lat_micro: i64,
    pub lng_micro: i64,
}

#[derive(Deserialize)]
pub struct DeliveriesQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DeliveryReportRequest {
    #[serde(default)]
    pub note: String,
    pub lat_micro: Option<i64>,
    pub lng_micro: Option<i64>,
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount_cents: i64,
}

#[derive(Deserialize)]
pub struct TipRequestBody {
    pub amount_cents: i64,
    pub pid: Option<String>,
    pub farmer_id: Option<i64>,
    #[serde(default)]
    pub note: String,
}

#[derive(Serialize)]
pub struct TipResponse {
    pub tx_id: String,
    pub amount_cents: i64,
    pub sender_balance_cents: i64,
}

// ─────────────────────────────────────────────────────────
// Identity helpers
// ─────────────────────────────────────────────────────────

async fn resolve_farmer(state: &AppState, auth: &AuthUser) -> Result<Farmer> {
    auth.require_role(Role::Farmer)?;
    db::get_farmer_by_user(&state.pool, auth.id())
        .await?
        .ok_or(ApiError::Forbidden)
}

async fn resolve_transporter(state: &AppState, auth: &AuthUser) -> Result<Transporter> {
    auth.require_role(Role::Transporter)?;
    db::get_transporter_by_user(&state.pool, auth.id())
        .await?
        .ok_or(ApiError::Forbidden)
}

/// Admins, the owning farmer and the assigned transporter may see a lot
/// and append to its journal.
async fn authorize_participant(
    state: &AppState,
    auth: &AuthUser,
    product: &Product,
) -> Result<()> {
    match auth.0.role() {
        Some(Role::Admin) => Ok(()),
        Some(Role::Farmer) => {
            let farmer = db::get_farmer_by_user(&state.pool, auth.id()).await?;
            if farmer.map(|f| f.id) == Some(product.farmer_id) {
                Ok(())
            } else {
                Err(ApiError::Forbidden)
            }
        }
        Some(Role::Transporter) => {
            match db::get_transporter_by_user(&state.pool, auth.id()).await? {
                Some(t) if product.transporter_id == Some(t.id) => Ok(()),
                _ => Err(ApiError::Forbidden),
            }
        }
        _ => Err(ApiError::Forbidden),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /farmers/register`
pub async fn register_farmer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterFarmerRequest>,
) -> Result<impl IntoResponse> {
    let signup = FarmerSignup {
        email: body.email,
        display_name: body.display_name,
        national_id: body.national_id,
        phone: body.phone,
        farm_address: body.farm_address,
        gps_lat_micro: body.gps_lat_micro,
        gps_lng_micro: body.gps_lng_micro,
        sacco_membership: body.sacco_membership,
        sacco_name: body.sacco_name,
    };
    let (user, farmer) = registration::register_farmer(
        &state.pool,
        state.anchor.as_ref(),
        state.notifier.as_ref(),
        &signup,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(FarmerRegisteredResponse {
            farmer_uid: farmer.uid,
            api_token: user.api_token,
            record_hash: farmer.record_hash,
            tx_hash: farmer.tx_hash,
            onchain_status: farmer.onchain_status,
        }),
    ))
}

/// `POST /transporters/register`
pub async fn register_transporter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterTransporterRequest>,
) -> Result<impl IntoResponse> {
    let signup = TransporterSignup {
        email: body.email,
        display_name: body.display_name,
        phone: body.phone,
        vehicle: body.vehicle,
        license_plate: body.license_plate,
    };
    let (user, transporter) = registration::register_transporter(&state.pool, &signup).await?;

    Ok((
        StatusCode::CREATED,
        Json(TransporterRegisteredResponse {
            transporter_id: transporter.id,
            api_token: user.api_token,
        }),
    ))
}

/// `GET /transporters` — admin roster.
pub async fn list_transporters(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    auth.require_role(Role::Admin)?;
    let transporters = db::list_transporters(&state.pool).await?;
    Ok(Json(TransportersResponse {
        count: transporters.len(),
        transporters,
    }))
}

/// `POST /products` — farmer submits a new lot.
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ProductRequest>,
) -> Result<impl IntoResponse> {
    let farmer = resolve_farmer(&state, &auth).await?;
    let product = lifecycle::create_product(&state.pool, &farmer, &body.draft()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProductResponse {
            detail: "created".to_string(),
            product,
        }),
    ))
}

/// `GET /products` — the calling farmer's lots, newest first.
pub async fn list_my_products(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    let farmer = resolve_farmer(&state, &auth).await?;
    let products = db::list_products_for_farmer(&state.pool, farmer.id).await?;
    Ok(Json(ProductsResponse {
        count: products.len(),
        products,
    }))
}

/// `GET /products/pending` — admin review queue.
pub async fn list_pending_products(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    auth.require_role(Role::Admin)?;
    let products = db::list_pending_products(&state.pool).await?;
    Ok(Json(ProductsResponse {
        count: products.len(),
        products,
    }))
}

/// `GET /products/:uid`
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    let product = db::get_product_by_uid(&state.pool, &uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    authorize_participant(&state, &auth, &product).await?;
    Ok(Json(product))
}

/// `PATCH /products/:uid` — farmer amendment while pending.
pub async fn amend_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
    Json(body): Json<ProductRequest>,
) -> Result<impl IntoResponse> {
    let farmer = resolve_farmer(&state, &auth).await?;
    let product = lifecycle::amend_product(&state.pool, &farmer, &uid, &body.draft()).await?;
    Ok(Json(ProductResponse {
        detail: "amended".to_string(),
        product,
    }))
}

/// `POST /products/:uid/review` — admin approves or declines.
pub async fn review_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
    Json(body): Json<ReviewRequest>,
) -> Result<impl IntoResponse> {
    auth.require_role(Role::Admin)?;
    match body.action.as_str() {
        "approve" => {
            let product = lifecycle::approve(
                &state.pool,
                state.anchor.as_ref(),
                state.notifier.as_ref(),
                &state.farmer_locks,
                &state.config.trace_base_url,
                &uid,
            )
            .await?;
            let detail = if product.tx_hash.is_some() {
                "approved"
            } else {
                "approved, anchor pending"
            };
            Ok(Json(ProductResponse {
                detail: detail.to_string(),
                product,
            }))
        }
        "decline" => {
            let reason = body.reason.unwrap_or_default();
            let product =
                lifecycle::decline(&state.pool, state.notifier.as_ref(), &uid, &reason).await?;
            Ok(Json(ProductResponse {
                detail: "declined".to_string(),
                product,
            }))
        }
        _ => Err(ApiError::Validation(
            "action must be approve or decline".to_string(),
        )),
    }
}

/// `POST /products/:uid/stages`
pub async fn append_stage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
    Json(body): Json<StageRequest>,
) -> Result<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    let product = db::get_product_by_uid(&state.pool, &uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    authorize_participant(&state, &auth, &product).await?;

    let stage = db::insert_stage(
        &state.pool,
        &uuid::Uuid::new_v4().to_string(),
        product.id,
        body.name.trim(),
        &body.description,
        &body.location,
        &crate::models::now_rfc3339(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(stage)))
}

/// `POST /products/:uid/locations`
pub async fn append_location(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse> {
    let product = db::get_product_by_uid(&state.pool, &uid)
        .await?
        .ok_or(ApiError::NotFound)?;
    authorize_participant(&state, &auth, &product).await?;

    let location = db::insert_location(
        &state.pool,
        product.id,
        body.lat_micro,
        body.lng_micro,
        &crate::models::now_rfc3339(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(location)))
}

/// `GET /deliveries/offers` — claimable lots.
pub async fn list_delivery_offers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    resolve_transporter(&state, &auth).await?;
    let products = db::list_offer_products(&state.pool).await?;
    Ok(Json(ProductsResponse {
        count: products.len(),
        products,
    }))
}

/// `GET /deliveries/mine` — lots assigned to the caller.
pub async fn list_my_deliveries(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<DeliveriesQuery>,
) -> Result<impl IntoResponse> {
    let transporter = resolve_transporter(&state, &auth).await?;
    if let Some(status) = &query.status {
        if ProductStatus::from_str(status).is_none() {
            return Err(ApiError::Validation(format!("unknown status: {status}")));
        }
    }
    let products =
        db::list_products_for_transporter(&state.pool, transporter.id, query.status.as_deref())
            .await?;
    Ok(Json(ProductsResponse {
        count: products.len(),
        products,
    }))
}

/// `POST /deliveries/:uid/accept`
pub async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    let transporter = resolve_transporter(&state, &auth).await?;
    let product = delivery::accept_delivery(&state.pool, &transporter, &uid).await?;
    Ok(Json(ProductResponse {
        detail: "delivery accepted".to_string(),
        product,
    }))
}

/// `POST /deliveries/:uid/complete`
pub async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
    body: Option<Json<DeliveryReportRequest>>,
) -> Result<impl IntoResponse> {
    let transporter = resolve_transporter(&state, &auth).await?;
    let report = body.map(|Json(b)| b).unwrap_or_default();
    let report = DeliveryReport {
        note: report.note,
        lat_micro: report.lat_micro,
        lng_micro: report.lng_micro,
    };
    let product = delivery::complete_delivery(&state.pool, &transporter, &uid, &report).await?;
    Ok(Json(ProductResponse {
        detail: "delivery completed".to_string(),
        product,
    }))
}

/// `POST /deliveries/:uid/reject`
pub async fn reject_delivery(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    let transporter = resolve_transporter(&state, &auth).await?;
    let product = delivery::reject_delivery(&state.pool, &transporter, &uid).await?;
    Ok(Json(ProductResponse {
        detail: "delivery rejected".to_string(),
        product,
    }))
}

/// `GET /trace/:pid` — public, unauthenticated provenance lookup.
pub async fn trace_product(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
) -> Result<impl IntoResponse> {
    let view = trace::trace(&state.pool, &pid).await?;
    Ok(Json(view))
}

/// `GET /wallet`
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    let wallet = wallet::get_or_create_wallet(&state.pool, auth.id()).await?;
    Ok(Json(wallet))
}

/// `POST /wallet/deposit`
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<DepositRequest>,
) -> Result<impl IntoResponse> {
    let wallet = wallet::deposit(&state.pool, auth.id(), body.amount_cents).await?;
    Ok(Json(wallet))
}

/// `POST /tips`
pub async fn create_tip(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<TipRequestBody>,
) -> Result<impl IntoResponse> {
    let target = match (body.pid, body.farmer_id) {
        (Some(pid), None) => TipTarget::Pid(pid),
        (None, Some(id)) => TipTarget::FarmerId(id),
        _ => {
            return Err(ApiError::Validation(
                "exactly one of pid or farmer_id is required".to_string(),
            ))
        }
    };
    let outcome = wallet::send_tip(
        &state.pool,
        auth.id(),
        &TipRequest {
            target,
            amount_cents: body.amount_cents,
            note: body.note,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(TipResponse {
            tx_id: outcome.tip.tx_id,
            amount_cents: outcome.tip.amount_cents,
            sender_balance_cents: outcome.sender_balance_cents,
        }),
    ))
}

/// `GET /tips/received`
pub async fn tips_received(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    let tips = db::list_tips_received(&state.pool, auth.id()).await?;
    Ok(Json(serde_json::json!({
        "count": tips.len(),
        "tips": tips,
    })))
}
