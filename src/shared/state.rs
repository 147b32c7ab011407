use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::certificates::render::CertificateRenderer;
use crate::config::AppConfig;
use crate::enrollment::gateway::GatewayRegistry;
use crate::notify::NotificationDispatcher;
use crate::shared::error::ApiError;
use crate::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub gateways: Arc<GatewayRegistry>,
    pub renderer: Arc<dyn CertificateRenderer>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            gateways: Arc::clone(&self.gateways),
            renderer: Arc::clone(&self.renderer),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

/// Authenticated learner id, injected by the fronting auth layer as the
/// `x-user-id` header. Session issuance itself lives outside this service.
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Validation("missing or invalid x-user-id header".to_string()))
    }
}
