//! Long-running background task that retries outstanding anchor
//! submissions for approved lots and registered farmers.
//!
//! Work is claimed row-by-row through the `pending → in_flight` CAS, so a
//! tick can never double-submit a hash that an inline attempt (or an
//! earlier tick) still has outstanding.  Submission is idempotent at the
//! gateway, keyed by the reference id, which makes the retry loop
//! at-least-once without producing duplicate anchors.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::anchor::Anchor;
use crate::db;
use crate::errors::Result;
use crate::lifecycle;
use crate::registration;

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

pub struct ReconcilerState {
    pub pool: SqlitePool,
    pub anchor: Arc<dyn Anchor>,
    pub interval_secs: u64,
}

/// Spawn the reconciliation loop as a background [`tokio`] task.
pub async fn run(state: Arc<ReconcilerState>) {
    info!("Anchor reconciler starting");

    let mut backoff = INITIAL_BACKOFF_SECS;
    loop {
        match tick(&state.pool, state.anchor.as_ref()).await {
            Ok(stats) => {
                if stats.submitted > 0 {
                    info!(
                        "Reconciled {} outstanding anchor(s), {} still pending",
                        stats.submitted, stats.failed
                    );
                }
                if stats.failed > 0 {
                    warn!(
                        "{} anchor submission(s) failed, backing off {backoff}s",
                        stats.failed
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
                backoff = INITIAL_BACKOFF_SECS;
            }
            Err(e) => {
                error!("Reconciler tick error: {e}");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                continue;
            }
        }

        tokio::time::sleep(Duration::from_secs(state.interval_secs)).await;
    }
}

#[derive(Debug, Default)]
pub struct TickStats {
    pub submitted: usize,
    pub failed: usize,
}

/// One reconciliation pass over everything still waiting for an anchor.
pub async fn tick(pool: &SqlitePool, anchor: &dyn Anchor) -> Result<TickStats> {
    let mut stats = TickStats::default();

    for product in db::list_pending_anchor_products(pool).await? {
        if lifecycle::submit_product_anchor(pool, anchor, &product).await {
            stats.submitted += 1;
        } else {
            stats.failed += 1;
        }
    }

    for farmer in db::list_pending_anchor_farmers(pool).await? {
        if registration::submit_farmer_anchor(pool, anchor, &farmer).await {
            stats.submitted += 1;
        } else {
            stats.failed += 1;
        }
    }

    Ok(stats)
}
