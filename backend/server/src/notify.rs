//! Fire-and-forget notifications.
//!
//! Email delivery is an external collaborator; this seam lets the service
//! hand messages over without ever letting a delivery failure surface into
//! a state transition.  The default implementation writes to the log.

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to `recipient`.  Implementations report failure via
    /// `Err`, but callers go through [`send_quietly`] and never propagate it.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Swallow delivery failures, logging them.
pub async fn send_quietly(notifier: &dyn Notifier, recipient: &str, subject: &str, body: &str) {
    if let Err(e) = notifier.send(recipient, subject, body).await {
        warn!("notification to {recipient} failed (ignored): {e}");
    }
}

/// Log-backed notifier used when no mail system is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), String> {
        info!("notify {recipient}: {subject}");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Message templates
// ─────────────────────────────────────────────────────────

pub fn registration_message(display_name: &str, farmer_uid: &str) -> (String, String) {
    (
        "FairTrace Registration Successful".to_string(),
        format!(
            "Hello {display_name},\n\n\
             Your FairTrace account has been created.\n\n\
             Farmer ID: {farmer_uid}\n\n\
             Keep your Farmer ID safe."
        ),
    )
}

pub fn approval_message(display_name: &str, title: &str, pid: &str) -> (String, String) {
    (
        "Your produce lot was approved".to_string(),
        format!(
            "Hello {display_name},\n\n\
             Your lot \"{title}\" has been approved by the SACCO.\n\
             Public identifier: {pid}\n\n\
             Consumers can now trace this lot."
        ),
    )
}

pub fn decline_message(display_name: &str, title: &str, reason: &str) -> (String, String) {
    (
        "Your produce lot was declined".to_string(),
        format!(
            "Hello {display_name},\n\n\
             Your lot \"{title}\" was declined.\n\
             Reason: {reason}"
        ),
    )
}
