//! Application configuration loaded from environment variables.

use crate::errors::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path / URL of the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Endpoint of the external anchoring service
    pub anchor_url: String,
    /// Per-call timeout for anchor submissions, in seconds
    pub anchor_timeout_secs: u64,
    /// How often (in seconds) the reconciler looks for pending anchors
    pub reconcile_interval_secs: u64,
    /// Base URL encoded into QR payloads (public trace frontend)
    pub trace_base_url: String,
    /// Bootstrap admin account; both must be set to take effect
    pub admin_email: Option<String>,
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./fairtrace.db?mode=rwc".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid API_PORT".to_string()))?,
            anchor_url: env_var("ANCHOR_URL").map_err(|_| {
                ApiError::Config("ANCHOR_URL environment variable is required".to_string())
            })?,
            anchor_timeout_secs: env_var("ANCHOR_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid ANCHOR_TIMEOUT_SECS".to_string()))?,
            reconcile_interval_secs: env_var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid RECONCILE_INTERVAL_SECS".to_string()))?,
            trace_base_url: env_var("TRACE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/record".to_string()),
            admin_email: env_var("ADMIN_EMAIL").ok(),
            admin_token: env_var("ADMIN_TOKEN").ok(),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}
