//! API Router
//!
//! Combines the endpoints of all feature modules into a unified router.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

/// Configure all API routes from all modules
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // ===== Course & quiz authoring (catalog module) =====
        .merge(crate::catalog::configure())
        // ===== Quiz grading (grading module) =====
        .merge(crate::grading::configure())
        // ===== Lesson progress & completion (progress module) =====
        .merge(crate::progress::configure())
        // ===== Certificate issuance (certificates module) =====
        .merge(crate::certificates::configure())
        // ===== Enrollment & payments (enrollment module) =====
        .merge(crate::enrollment::configure())
}
