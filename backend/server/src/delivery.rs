//! Allocation & delivery coordinator.
//!
//! A lot is claimed through a single conditional update ("claim only if
//! nobody holds it"), so two transporters can never both win; the loser is
//! told it lost the race, not handed a generic error.  Rejection clears the
//! allocation and leaves the lot claimable again.

use sqlx::SqlitePool;

use crate::db;
use crate::errors::{ApiError, Result};
use crate::models::{now_rfc3339, Product, ProductStatus, Transporter};

/// Claim an unassigned approved (or re-offered) lot and start transit.
pub async fn accept_delivery(
    pool: &SqlitePool,
    transporter: &Transporter,
    uid: &str,
) -> Result<Product> {
    if db::get_product_by_uid(pool, uid).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let claimed = db::claim_delivery(pool, uid, transporter.id).await?;
    if !claimed {
        let current = db::get_product_by_uid(pool, uid)
            .await?
            .ok_or(ApiError::NotFound)?;
        if current.transporter_id.is_some() && current.transporter_id != Some(transporter.id) {
            return Err(ApiError::Conflict(
                "another transporter already accepted this delivery".to_string(),
            ));
        }
        return Err(ApiError::InvalidTransition(format!(
            "cannot accept a {} lot",
            current.status
        )));
    }

    db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)
}

/// Final drop-off details recorded with the terminal stage.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub note: String,
    pub lat_micro: Option<i64>,
    pub lng_micro: Option<i64>,
}

/// Finish a transit the caller holds.  Appends the terminal stage entry and
/// the final GPS ping when one was reported.
pub async fn complete_delivery(
    pool: &SqlitePool,
    transporter: &Transporter,
    uid: &str,
    report: &DeliveryReport,
) -> Result<Product> {
    let completed = db::complete_delivery(pool, uid, transporter.id).await?;
    if !completed {
        let current = db::get_product_by_uid(pool, uid)
            .await?
            .ok_or(ApiError::NotFound)?;
        if current.status() == Some(ProductStatus::InTransit)
            && current.transporter_id != Some(transporter.id)
        {
            return Err(ApiError::Forbidden);
        }
        return Err(ApiError::InvalidTransition(format!(
            "cannot complete a {} lot",
            current.status
        )));
    }

    let product = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;

    let now = now_rfc3339();
    db::insert_stage(
        pool,
        &uuid::Uuid::new_v4().to_string(),
        product.id,
        "delivered",
        &report.note,
        "",
        &now,
    )
    .await?;
    if let (Some(lat), Some(lng)) = (report.lat_micro, report.lng_micro) {
        db::insert_location(pool, product.id, lat, lng, &now).await?;
    }

    Ok(product)
}

/// Turn down an unclaimed offer.  The lot keeps the `rejected` label for
/// the audit trail but stays claimable by other transporters.
pub async fn reject_delivery(
    pool: &SqlitePool,
    transporter: &Transporter,
    uid: &str,
) -> Result<Product> {
    let product = db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)?;

    let rejected = db::reject_delivery(pool, uid).await?;
    if !rejected {
        return Err(ApiError::InvalidTransition(format!(
            "cannot reject a {} lot",
            product.status
        )));
    }
    tracing::info!("transporter {} turned down lot {uid}", transporter.id);

    db::get_product_by_uid(pool, uid)
        .await?
        .ok_or(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::testing::RecordingAnchor;
    use crate::lifecycle::{self, FarmerLocks};
    use crate::notify::testing::CapturingNotifier;
    use crate::testutil::{memory_pool, seed_farmer, seed_product, seed_transporter};

    async fn approved_product(pool: &SqlitePool) -> Product {
        let (_, farmer) = seed_farmer(pool, "f@example.com").await;
        let product = seed_product(pool, farmer.id, "Arabica beans").await;
        let anchor = RecordingAnchor::default();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        lifecycle::approve(
            pool,
            &anchor,
            &notifier,
            &locks,
            "http://localhost:3000/record",
            &product.uid,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn accept_assigns_and_moves_to_in_transit() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;

        let claimed = accept_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap();
        assert_eq!(claimed.status, "in_transit");
        assert_eq!(claimed.transporter_id, Some(transporter.id));
    }

    #[tokio::test]
    async fn losing_claim_gets_conflict() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, first) = seed_transporter(&pool, "t1@example.com", "KDA 123A").await;
        let (_, second) = seed_transporter(&pool, "t2@example.com", "KDB 456B").await;

        accept_delivery(&pool, &first, &product.uid).await.unwrap();
        let err = accept_delivery(&pool, &second, &product.uid)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let current = db::get_product_by_uid(&pool, &product.uid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.transporter_id, Some(first.id));
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, first) = seed_transporter(&pool, "t1@example.com", "KDA 123A").await;
        let (_, second) = seed_transporter(&pool, "t2@example.com", "KDB 456B").await;

        let (a, b) = tokio::join!(
            accept_delivery(&pool, &first, &product.uid),
            accept_delivery(&pool, &second, &product.uid),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r.as_ref().unwrap_err(), ApiError::Conflict(_))));

        let current = db::get_product_by_uid(&pool, &product.uid)
            .await
            .unwrap()
            .unwrap();
        assert!(current.transporter_id.is_some());
        assert_eq!(current.status, "in_transit");
    }

    #[tokio::test]
    async fn accept_requires_an_offerable_lot() {
        let pool = memory_pool().await;
        let (_, farmer) = seed_farmer(&pool, "f@example.com").await;
        let pending = seed_product(&pool, farmer.id, "Arabica beans").await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;

        let err = accept_delivery(&pool, &transporter, &pending.uid)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn complete_records_terminal_stage_and_final_ping() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;
        accept_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap();

        let report = DeliveryReport {
            note: "left at depot 4".to_string(),
            lat_micro: Some(-1_300_000),
            lng_micro: Some(36_900_000),
        };
        let delivered = complete_delivery(&pool, &transporter, &product.uid, &report)
            .await
            .unwrap();
        assert_eq!(delivered.status, "delivered");

        let stages = db::list_stages(&pool, delivered.id).await.unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name, "delivered");
        let pings = db::list_locations(&pool, delivered.id).await.unwrap();
        assert_eq!(pings.len(), 1);
    }

    #[tokio::test]
    async fn complete_by_the_wrong_transporter_is_forbidden() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, holder) = seed_transporter(&pool, "t1@example.com", "KDA 123A").await;
        let (_, other) = seed_transporter(&pool, "t2@example.com", "KDB 456B").await;
        accept_delivery(&pool, &holder, &product.uid).await.unwrap();

        let err = complete_delivery(&pool, &other, &product.uid, &DeliveryReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));

        // The holder can still finish.
        complete_delivery(&pool, &holder, &product.uid, &DeliveryReport::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_lot_is_reoffered_and_claimable_again() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, first) = seed_transporter(&pool, "t1@example.com", "KDA 123A").await;
        let (_, second) = seed_transporter(&pool, "t2@example.com", "KDB 456B").await;

        let rejected = reject_delivery(&pool, &first, &product.uid).await.unwrap();
        assert_eq!(rejected.status, "rejected");
        assert!(rejected.transporter_id.is_none());

        // Still in the offer pool.
        let offers = db::list_offer_products(&pool).await.unwrap();
        assert!(offers.iter().any(|p| p.uid == product.uid));

        let claimed = accept_delivery(&pool, &second, &product.uid)
            .await
            .unwrap();
        assert_eq!(claimed.status, "in_transit");
        assert_eq!(claimed.transporter_id, Some(second.id));
    }

    #[tokio::test]
    async fn reject_requires_an_approved_lot() {
        let pool = memory_pool().await;
        let product = approved_product(&pool).await;
        let (_, transporter) = seed_transporter(&pool, "t@example.com", "KDA 123A").await;
        accept_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap();

        // In transit already; rejection is no longer possible.
        let err = reject_delivery(&pool, &transporter, &product.uid)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
    }
}
