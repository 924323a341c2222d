//! Public provenance read model.
//!
//! Unauthenticated lookups see only lots that completed approval, and only
//! the fields a consumer needs: the public identifier, the journey
//! timeline, the anchor reference, a display name and a coarse origin.
//! Internal identifiers and precise farmer data stay server-side.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db;
use crate::errors::{ApiError, Result};
use crate::hashing::format_fixed;

/// Origin rounded to two decimal places — enough to show the region on a
/// map without disclosing the farm gate.
#[derive(Debug, Clone, Serialize)]
pub struct CoarseOrigin {
    pub lat: String,
    pub lng: String,
}

pub fn coarse_coordinate(micro: i64) -> String {
    // micro-degrees → centi-degrees, truncating toward zero.
    format_fixed(micro / 10_000, 2)
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub kind: &'static str,
    pub label: String,
    pub description: String,
    pub location: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceView {
    pub pid: String,
    pub status: String,
    pub title: String,
    pub variety: String,
    pub quantity: String,
    pub origin: CoarseOrigin,
    pub farmer_name: String,
    pub farmer_region: String,
    pub approved_at: Option<String>,
    pub tx_hash: Option<String>,
    pub anchor_status: String,
    pub qr_payload: Option<String>,
    pub timeline: Vec<TraceEvent>,
}

/// Look up a lot by its public identifier.  Lots outside the public
/// status set are indistinguishable from absent ones.
pub async fn trace(pool: &SqlitePool, pid: &str) -> Result<TraceView> {
    let product = db::get_product_by_pid(pool, pid)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !product.status().is_some_and(|s| s.is_public()) {
        return Err(ApiError::NotFound);
    }

    let farmer = db::get_farmer_by_id(pool, product.farmer_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let user = db::get_user_by_id(pool, farmer.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut timeline: Vec<TraceEvent> = Vec::new();
    for stage in db::list_stages(pool, product.id).await? {
        timeline.push(TraceEvent {
            kind: "stage",
            label: stage.name,
            description: stage.description,
            location: stage.location,
            recorded_at: stage.recorded_at,
        });
    }
    for ping in db::list_locations(pool, product.id).await? {
        timeline.push(TraceEvent {
            kind: "location",
            label: String::new(),
            description: String::new(),
            location: format!(
                "{},{}",
                coarse_coordinate(ping.lat_micro),
                coarse_coordinate(ping.lng_micro)
            ),
            recorded_at: ping.recorded_at,
        });
    }
    timeline.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));

    Ok(TraceView {
        pid: product.pid.clone().unwrap_or_default(),
        status: product.status.clone(),
        title: product.title.clone(),
        variety: product.variety.clone(),
        quantity: format_fixed(product.quantity_milli, 3),
        origin: CoarseOrigin {
            lat: coarse_coordinate(product.origin_lat_micro),
            lng: coarse_coordinate(product.origin_lng_micro),
        },
        farmer_name: user.display_name,
        farmer_region: farmer.sacco_name,
        approved_at: product.approved_at,
        tx_hash: product.tx_hash,
        anchor_status: product.anchor_status,
        qr_payload: product.qr_payload,
        timeline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::testing::RecordingAnchor;
    use crate::delivery;
    use crate::lifecycle::{self, FarmerLocks};
    use crate::models::now_rfc3339;
    use crate::notify::testing::CapturingNotifier;
    use crate::testutil::{memory_pool, seed_farmer, seed_product, seed_transporter};

    const TRACE_BASE: &str = "http://localhost:3000/record";

    #[test]
    fn coarse_coordinates_truncate_to_two_decimals() {
        assert_eq!(coarse_coordinate(36_817_223), "36.81");
        assert_eq!(coarse_coordinate(-1_286_389), "-1.28");
        assert_eq!(coarse_coordinate(0), "0.00");
    }

    #[tokio::test]
    async fn pending_and_declined_lots_are_invisible() {
        let pool = memory_pool().await;
        let notifier = CapturingNotifier::default();
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let product = seed_product(&pool, farmer.id, "Arabica beans").await;

        // Never approved: no pid, nothing to look up either way.
        assert!(matches!(
            trace(&pool, "FT-2024-1-0001").await,
            Err(ApiError::NotFound)
        ));

        lifecycle::decline(&pool, &notifier, &product.uid, "missing photo")
            .await
            .unwrap();
        assert!(matches!(
            trace(&pool, "FT-2024-1-0001").await,
            Err(ApiError::NotFound)
        ));
    }

    #[tokio::test]
    async fn approved_lot_traces_with_anchor_state_and_no_pii() {
        let pool = memory_pool().await;
        let anchor = RecordingAnchor::default();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let product = seed_product(&pool, farmer.id, "Arabica beans").await;
        let approved =
            lifecycle::approve(&pool, &anchor, &notifier, &locks, TRACE_BASE, &product.uid)
                .await
                .unwrap();

        let pid = approved.pid.clone().unwrap();
        let view = trace(&pool, &pid).await.unwrap();
        assert_eq!(view.pid, pid);
        assert_eq!(view.status, "approved");
        assert_eq!(view.tx_hash, approved.tx_hash);
        assert_eq!(view.farmer_name, "Jane Wanjiku");
        assert_eq!(view.farmer_region, "Nyeri Growers");
        assert_eq!(view.origin.lat, "-1.28");
        assert_eq!(view.quantity, "12.500");

        // Precise coordinates and identity documents never leave the server.
        let serialized = serde_json::to_string(&view).unwrap();
        assert!(!serialized.contains("ID-12345678"));
        assert!(!serialized.contains("+254700000001"));
        assert!(!serialized.contains("-1.286389"));
    }

    #[tokio::test]
    async fn anchor_pending_is_visible_in_the_view() {
        let pool = memory_pool().await;
        let anchor = RecordingAnchor::failing();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let product = seed_product(&pool, farmer.id, "Arabica beans").await;
        let approved =
            lifecycle::approve(&pool, &anchor, &notifier, &locks, TRACE_BASE, &product.uid)
                .await
                .unwrap();

        let view = trace(&pool, approved.pid.as_deref().unwrap()).await.unwrap();
        assert!(view.tx_hash.is_none());
        assert_eq!(view.anchor_status, "pending");
    }

    #[tokio::test]
    async fn rejected_lot_hides_behind_not_found_despite_its_pid() {
        let pool = memory_pool().await;
        let anchor = RecordingAnchor::default();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;
        let product = seed_product(&pool, farmer.id, "Arabica beans").await;
        let approved =
            lifecycle::approve(&pool, &anchor, &notifier, &locks, TRACE_BASE, &product.uid)
                .await
                .unwrap();
        let pid = approved.pid.clone().unwrap();
        assert!(trace(&pool, &pid).await.is_ok());

        delivery::reject_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap();
        assert!(matches!(trace(&pool, &pid).await, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn timeline_merges_stages_and_pings_in_order() {
        let pool = memory_pool().await;
        let anchor = RecordingAnchor::default();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;
        let product = seed_product(&pool, farmer.id, "Arabica beans").await;
        let approved =
            lifecycle::approve(&pool, &anchor, &notifier, &locks, TRACE_BASE, &product.uid)
                .await
                .unwrap();

        db::insert_stage(
            &pool,
            &uuid::Uuid::new_v4().to_string(),
            approved.id,
            "harvested",
            "",
            "Nyeri",
            &now_rfc3339(),
        )
        .await
        .unwrap();
        delivery::accept_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap();
        db::insert_location(&pool, approved.id, -1_290_000, 36_820_000, &now_rfc3339())
            .await
            .unwrap();
        delivery::complete_delivery(
            &pool,
            &transporter,
            &product.uid,
            &delivery::DeliveryReport::default(),
        )
        .await
        .unwrap();

        let view = trace(&pool, approved.pid.as_deref().unwrap()).await.unwrap();
        assert_eq!(view.status, "delivered");
        let kinds: Vec<&str> = view.timeline.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "stage").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "location").count(), 1);
        assert_eq!(view.timeline.first().unwrap().label, "harvested");
        assert!(view.timeline.iter().any(|e| e.label == "delivered"));
    }
}
