//! Anchor client — submits record hashes to the external chain gateway.
//!
//! One call, one attempt, bounded by the configured timeout.  Retrying is
//! the reconciler's job; the gateway is expected to be idempotent per
//! `reference_id`, so a repeated submission for the same pid never creates
//! a second live anchor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ApiError, Result};

/// Opaque handle for a submitted transaction.  Final inclusion is observed
/// asynchronously by collaborators outside this service.
#[derive(Debug, Clone)]
pub struct TxHandle {
    pub tx_id: String,
}

#[async_trait]
pub trait Anchor: Send + Sync {
    /// Submit `digest` under `reference_id`.  Fails with
    /// [`ApiError::AnchorUnavailable`] when the gateway cannot be reached
    /// in time; the caller decides whether that is fatal.
    async fn submit(&self, reference_id: &str, digest: &str, metadata: Value)
        -> Result<TxHandle>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    tx_id: Option<String>,
    error: Option<String>,
}

/// HTTP gateway client.
pub struct HttpAnchorClient {
    client: Client,
    url: String,
}

impl HttpAnchorClient {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Anchor for HttpAnchorClient {
    async fn submit(
        &self,
        reference_id: &str,
        digest: &str,
        metadata: Value,
    ) -> Result<TxHandle> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "reference_id": reference_id,
                "digest": digest,
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(|e| ApiError::AnchorUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::AnchorUnavailable(format!(
                "gateway returned {status}"
            )));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ApiError::AnchorUnavailable(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(ApiError::AnchorUnavailable(err));
        }

        let tx_id = body
            .tx_id
            .ok_or_else(|| ApiError::AnchorUnavailable("empty tx_id in response".to_string()))?;

        debug!("anchored {reference_id} -> {tx_id}");
        Ok(TxHandle { tx_id })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Mutex;

    /// Test double: records submissions and mints deterministic tx ids.
    /// Flip `fail` to simulate an unreachable gateway.
    #[derive(Default)]
    pub struct RecordingAnchor {
        pub fail: AtomicBool,
        seq: AtomicU64,
        pub submissions: Mutex<Vec<(String, String)>>,
    }

    impl RecordingAnchor {
        pub fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                ..Default::default()
            }
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub async fn submission_count(&self) -> usize {
            self.submissions.lock().await.len()
        }
    }

    #[async_trait]
    impl Anchor for RecordingAnchor {
        async fn submit(
            &self,
            reference_id: &str,
            digest: &str,
            _metadata: Value,
        ) -> Result<TxHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::AnchorUnavailable("gateway down".to_string()));
            }
            self.submissions
                .lock()
                .await
                .push((reference_id.to_string(), digest.to_string()));
            let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TxHandle {
                tx_id: format!("0xtx{n:04}"),
            })
        }
    }
}
