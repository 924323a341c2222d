//! Wallet ledger and tipping.
//!
//! Balances only ever move through [`db::transfer_cents`], a single
//! transaction that touches both rows in a fixed order and refuses to
//! overdraw.  Consumers address a tip either at a product (`pid`) or at a
//! farmer directly.

use sqlx::SqlitePool;

use crate::db;
use crate::errors::{ApiError, Result};
use crate::models::{now_rfc3339, Tip, Wallet};

pub async fn get_or_create_wallet(pool: &SqlitePool, user_id: i64) -> Result<Wallet> {
    db::ensure_wallet(pool, user_id).await?;
    db::get_wallet(pool, user_id)
        .await?
        .ok_or(ApiError::NotFound)
}

/// Top up the caller's wallet.  Stands in for the out-of-scope payment
/// gateway the way the original's pre-loaded consumer balances did.
pub async fn deposit(pool: &SqlitePool, user_id: i64, amount_cents: i64) -> Result<Wallet> {
    if amount_cents <= 0 {
        return Err(ApiError::Validation("amount must be positive".to_string()));
    }
    db::credit_wallet(pool, user_id, amount_cents).await?;
    db::get_wallet(pool, user_id)
        .await?
        .ok_or(ApiError::NotFound)
}

/// How the tipper addressed the recipient.
#[derive(Debug, Clone)]
pub enum TipTarget {
    /// Public product identifier from a trace certificate.
    Pid(String),
    /// Farmer id, e.g. from a marketplace listing.
    FarmerId(i64),
}

#[derive(Debug, Clone)]
pub struct TipRequest {
    pub target: TipTarget,
    pub amount_cents: i64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct TipOutcome {
    pub tip: Tip,
    pub sender_balance_cents: i64,
}

/// Resolve the recipient, move the money, record the tip.
pub async fn send_tip(
    pool: &SqlitePool,
    sender_user_id: i64,
    request: &TipRequest,
) -> Result<TipOutcome> {
    if request.amount_cents <= 0 {
        return Err(ApiError::Validation("amount must be positive".to_string()));
    }

    let recipient_farmer_id = match &request.target {
        TipTarget::Pid(pid) => {
            let product = db::get_public_product_by_pid(pool, pid)
                .await?
                .ok_or(ApiError::NotFound)?;
            product.farmer_id
        }
        TipTarget::FarmerId(id) => *id,
    };
    let farmer = db::get_farmer_by_id(pool, recipient_farmer_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if farmer.user_id == sender_user_id {
        return Err(ApiError::Validation(
            "farmers cannot tip themselves".to_string(),
        ));
    }

    db::ensure_wallet(pool, sender_user_id).await?;
    db::ensure_wallet(pool, farmer.user_id).await?;
    db::transfer_cents(pool, sender_user_id, farmer.user_id, request.amount_cents).await?;

    let tip = db::insert_tip(
        pool,
        &uuid::Uuid::new_v4().to_string(),
        request.amount_cents,
        Some(sender_user_id),
        farmer.user_id,
        request.note.trim(),
        &now_rfc3339(),
    )
    .await?;

    let wallet = db::get_wallet(pool, sender_user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(TipOutcome {
        tip,
        sender_balance_cents: wallet.balance_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::testing::RecordingAnchor;
    use crate::auth::mint_token;
    use crate::lifecycle::{self, FarmerLocks};
    use crate::notify::testing::CapturingNotifier;
    use crate::testutil::{memory_pool, seed_farmer, seed_product};

    async fn seed_consumer(pool: &SqlitePool, email: &str, funds: i64) -> i64 {
        let user = db::insert_user(pool, email, "Cara", "consumer", &mint_token(), &now_rfc3339())
            .await
            .unwrap();
        db::credit_wallet(pool, user.id, funds).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn tip_moves_exactly_the_amount() {
        let pool = memory_pool().await;
        let (farmer_user, farmer) = seed_farmer(&pool, "f@example.com").await;
        let consumer = seed_consumer(&pool, "c@example.com", 10_000).await;

        let outcome = send_tip(
            &pool,
            consumer,
            &TipRequest {
                target: TipTarget::FarmerId(farmer.id),
                amount_cents: 2_500,
                note: "great coffee".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.sender_balance_cents, 7_500);
        assert_eq!(outcome.tip.amount_cents, 2_500);
        let farmer_wallet = db::get_wallet(&pool, farmer_user.id).await.unwrap().unwrap();
        assert_eq!(farmer_wallet.balance_cents, 2_500);

        let received = db::list_tips_received(&pool, farmer_user.id).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].note, "great coffee");
    }

    #[tokio::test]
    async fn overdraw_fails_and_leaves_both_balances_unchanged() {
        let pool = memory_pool().await;
        let (farmer_user, farmer) = seed_farmer(&pool, "f@example.com").await;
        let consumer = seed_consumer(&pool, "c@example.com", 1_000).await;

        let err = send_tip(
            &pool,
            consumer,
            &TipRequest {
                target: TipTarget::FarmerId(farmer.id),
                amount_cents: 5_000,
                note: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientBalance));

        let sender = db::get_wallet(&pool, consumer).await.unwrap().unwrap();
        let recipient = db::get_wallet(&pool, farmer_user.id).await.unwrap().unwrap();
        assert_eq!(sender.balance_cents, 1_000);
        assert_eq!(recipient.balance_cents, 0);
        assert!(db::list_tips_received(&pool, farmer_user.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn money_is_conserved_across_transfers() {
        let pool = memory_pool().await;
        let (farmer_user, farmer) = seed_farmer(&pool, "f@example.com").await;
        let consumer = seed_consumer(&pool, "c@example.com", 10_000).await;

        for _ in 0..3 {
            send_tip(
                &pool,
                consumer,
                &TipRequest {
                    target: TipTarget::FarmerId(farmer.id),
                    amount_cents: 1_000,
                    note: String::new(),
                },
            )
            .await
            .unwrap();
        }

        let sender = db::get_wallet(&pool, consumer).await.unwrap().unwrap();
        let recipient = db::get_wallet(&pool, farmer_user.id).await.unwrap().unwrap();
        assert_eq!(sender.balance_cents + recipient.balance_cents, 10_000);
    }

    #[tokio::test]
    async fn tip_by_pid_reaches_the_owning_farmer() {
        let pool = memory_pool().await;
        let (farmer_user, farmer) = seed_farmer(&pool, "f@example.com").await;
        let consumer = seed_consumer(&pool, "c@example.com", 10_000).await;

        let product = seed_product(&pool, farmer.id, "Arabica beans").await;
        let anchor = RecordingAnchor::default();
        let notifier = CapturingNotifier::default();
        let locks = FarmerLocks::new();
        let approved = lifecycle::approve(
            &pool,
            &anchor,
            &notifier,
            &locks,
            "http://localhost:3000/record",
            &product.uid,
        )
        .await
        .unwrap();

        send_tip(
            &pool,
            consumer,
            &TipRequest {
                target: TipTarget::Pid(approved.pid.clone().unwrap()),
                amount_cents: 500,
                note: String::new(),
            },
        )
        .await
        .unwrap();

        let wallet = db::get_wallet(&pool, farmer_user.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance_cents, 500);
    }

    #[tokio::test]
    async fn deposit_tops_up_and_validates_amount() {
        let pool = memory_pool().await;
        let consumer = seed_consumer(&pool, "c@example.com", 0).await;

        let wallet = deposit(&pool, consumer, 5_000).await.unwrap();
        assert_eq!(wallet.balance_cents, 5_000);

        assert!(matches!(
            deposit(&pool, consumer, 0).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            deposit(&pool, consumer, -100).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn self_tips_and_bad_amounts_are_rejected() {
        let pool = memory_pool().await;
        let (farmer_user, farmer) = seed_farmer(&pool, "f@example.com").await;
        db::credit_wallet(&pool, farmer_user.id, 1_000).await.unwrap();

        assert!(matches!(
            send_tip(
                &pool,
                farmer_user.id,
                &TipRequest {
                    target: TipTarget::FarmerId(farmer.id),
                    amount_cents: 100,
                    note: String::new(),
                },
            )
            .await,
            Err(ApiError::Validation(_))
        ));

        let consumer = seed_consumer(&pool, "c@example.com", 1_000).await;
        assert!(matches!(
            send_tip(
                &pool,
                consumer,
                &TipRequest {
                    target: TipTarget::FarmerId(farmer.id),
                    amount_cents: 0,
                    note: String::new(),
                },
            )
            .await,
            Err(ApiError::Validation(_))
        ));
    }
}
