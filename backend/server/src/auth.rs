//! Bearer-token authentication and role guards.
//!
//! The wider account system (OTP, JWT issuance, password flows) lives
//! outside this service; the narrow interface it leaves behind is an opaque
//! per-user API token handed out at onboarding and checked here.  Caller
//! identity is then passed explicitly into every lifecycle operation.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::AppState;
use crate::db;
use crate::errors::ApiError;
use crate::models::{Role, User};

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.0.role() == Some(role)
    }

    pub fn require_role(&self, role: Role) -> Result<(), ApiError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Mint an opaque API token for a new account.
pub fn mint_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let user = db::get_user_by_token(&state.pool, token)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        Ok(AuthUser(user))
    }
}
