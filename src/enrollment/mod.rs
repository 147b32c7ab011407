//! Enrollment state machine and payment reconciliation.
//!
//! Free courses enroll directly; paid courses move through
//! `pending → completed` payments driven by gateway webhooks. Webhooks are
//! at-least-once: unknown references and duplicate deliveries are absorbed
//! without side effects, and the completion + enrollment step is a single
//! conditional transaction so concurrent deliveries cannot double-enroll.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::types::Course;
use crate::notify::{Notification, NotificationDispatcher};
use crate::shared::error::ApiError;
use crate::shared::models::schema::{courses, enrollments, payments, users};
use crate::shared::models::User;
use crate::shared::state::{AppState, CurrentUser};
use crate::shared::utils::DbPool;

pub mod gateway;

use gateway::{
    verify_flutterwave_hash, verify_paystack_signature, GatewayRegistry, PaymentProvider,
};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = enrollments)]
pub struct Enrollment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = payments)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: String,
    pub transaction_id: String,
    pub reference: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Transitions only move forward: a terminal state never returns to
    /// `pending`, and only a completed payment can be refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Refunded)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub course_id: Uuid,
    pub payment_method: PaymentProvider,
}

/// Coordinates the learner hands to the gateway checkout.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentCoordinates {
    pub reference: String,
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentProvider,
}

/// Raw webhook payload: a tagged event type plus a provider-specific blob.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    Reference(String),
    TransactionId(String),
}

/// Extracts the payment lookup key from a provider event, or `None` when the
/// event type is not a charge success for that provider.
pub fn classify_event(provider: PaymentProvider, payload: &WebhookPayload) -> Option<LookupKey> {
    match provider {
        PaymentProvider::Paystack => {
            if payload.event != "charge.success" {
                return None;
            }
            payload
                .data
                .get("reference")
                .and_then(|v| v.as_str())
                .map(|s| LookupKey::Reference(s.to_string()))
        }
        PaymentProvider::Flutterwave => {
            if payload.event != "charge.completed" {
                return None;
            }
            let id = payload.data.get("id")?;
            id.as_i64()
                .map(|n| n.to_string())
                .or_else(|| id.as_str().map(String::from))
                .map(LookupKey::TransactionId)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Unknown reference or uninteresting event type; acknowledged, no-op.
    Ignored,
    /// Payment already completed; acknowledged, no-op.
    Duplicate,
    /// Verification failed or was unreachable; payment stays pending.
    LeftPending,
    /// Payment completed and the enrollment now exists.
    Enrolled,
}

pub struct EnrollmentEngine {
    db: DbPool,
    gateways: Arc<GatewayRegistry>,
    notifier: Arc<NotificationDispatcher>,
    public_url: String,
}

impl EnrollmentEngine {
    pub fn new(
        db: DbPool,
        gateways: Arc<GatewayRegistry>,
        notifier: Arc<NotificationDispatcher>,
        public_url: String,
    ) -> Self {
        Self {
            db,
            gateways,
            notifier,
            public_url,
        }
    }

    /// Direct enrollment for free courses. Paid courses must go through
    /// checkout.
    pub async fn enroll_free(&self, user_id: Uuid, course_id: Uuid) -> Result<Enrollment, ApiError> {
        let mut conn = self.db.get()?;

        let course: Course = courses::table
            .find(course_id)
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("course"))?;

        if !course_is_free(&course) {
            return Err(ApiError::PaymentRequired);
        }

        let enrollment = Enrollment {
            user_id,
            course_id,
            enrolled_at: Utc::now(),
            progress: 0.0,
        };

        let inserted = diesel::insert_into(enrollments::table)
            .values(&enrollment)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;

        if inserted == 0 {
            return Err(ApiError::AlreadyEnrolled);
        }

        Ok(enrollment)
    }

    /// Starts checkout for a paid course: creates the `pending` payment with
    /// fresh unique coordinates and returns them to the caller.
    pub async fn initiate_payment(
        &self,
        user_id: Uuid,
        req: InitiatePaymentRequest,
    ) -> Result<PaymentCoordinates, ApiError> {
        let mut conn = self.db.get()?;

        let course: Course = courses::table
            .find(req.course_id)
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("course"))?;

        if is_enrolled(&mut conn, user_id, req.course_id)? {
            return Err(ApiError::AlreadyEnrolled);
        }

        if course_is_free(&course) {
            return Err(ApiError::Validation(
                "course is free, enroll directly".to_string(),
            ));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            course_id: req.course_id,
            amount: course.price.clone(),
            currency: course.currency.clone(),
            provider: req.payment_method.as_str().to_string(),
            transaction_id: Uuid::new_v4().to_string(),
            reference: Uuid::new_v4().to_string(),
            status: PaymentStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(payments::table)
            .values(&payment)
            .execute(&mut conn)?;

        Ok(PaymentCoordinates {
            reference: payment.reference,
            transaction_id: payment.transaction_id,
            amount: payment.amount,
            currency: payment.currency,
            payment_method: req.payment_method,
        })
    }

    /// Payment status polling; independent of webhook delivery order.
    pub async fn get_payment(&self, user_id: Uuid, payment_id: Uuid) -> Result<Payment, ApiError> {
        let mut conn = self.db.get()?;
        payments::table
            .find(payment_id)
            .filter(payments::user_id.eq(user_id))
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("payment"))
    }

    /// Drives a gateway event through the state machine exactly once.
    ///
    /// The `pending → completed` flip and the enrollment insert share one
    /// transaction keyed on the payment's current status, so the losing side
    /// of a duplicate delivery observes zero updated rows and stops.
    pub async fn reconcile_webhook(
        &self,
        provider: PaymentProvider,
        payload: WebhookPayload,
    ) -> Result<ReconcileOutcome, ApiError> {
        let Some(key) = classify_event(provider, &payload) else {
            return Ok(ReconcileOutcome::Ignored);
        };

        let mut conn = self.db.get()?;
        let payment: Option<Payment> = match &key {
            LookupKey::Reference(r) => payments::table
                .filter(payments::reference.eq(r))
                .first(&mut conn)
                .optional()?,
            LookupKey::TransactionId(t) => payments::table
                .filter(payments::transaction_id.eq(t))
                .first(&mut conn)
                .optional()?,
        };

        let Some(payment) = payment else {
            tracing::debug!(provider = %provider, "webhook for unknown payment, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        if payment.status == PaymentStatus::Completed.as_str() {
            tracing::debug!(reference = %payment.reference, "duplicate webhook, ignoring");
            return Ok(ReconcileOutcome::Duplicate);
        }

        // The event payload is never trusted on its own; the gateway's
        // verification endpoint decides.
        let verify_key = match provider {
            PaymentProvider::Paystack => payment.reference.as_str(),
            PaymentProvider::Flutterwave => payment.transaction_id.as_str(),
        };
        let verified = match self.gateways.get(provider).verify(verify_key).await {
            Ok(verdict) if verdict.success => true,
            Ok(verdict) => {
                tracing::info!(
                    reference = %payment.reference,
                    status = %verdict.gateway_status,
                    "gateway did not confirm payment, leaving pending"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    reference = %payment.reference,
                    "gateway verification unreachable, leaving pending: {e}"
                );
                false
            }
        };
        if !verified {
            return Ok(ReconcileOutcome::LeftPending);
        }

        let won = conn.transaction::<bool, ApiError, _>(|conn| {
            let updated = diesel::update(
                payments::table
                    .find(payment.id)
                    .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
            )
            .set((
                payments::status.eq(PaymentStatus::Completed.as_str()),
                payments::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

            if updated == 0 {
                return Ok(false);
            }

            diesel::insert_into(enrollments::table)
                .values(&Enrollment {
                    user_id: payment.user_id,
                    course_id: payment.course_id,
                    enrolled_at: Utc::now(),
                    progress: 0.0,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;

            Ok(true)
        })?;

        if !won {
            return Ok(ReconcileOutcome::Duplicate);
        }

        self.send_enrollment_notification(&mut conn, payment.user_id, payment.course_id);

        Ok(ReconcileOutcome::Enrolled)
    }

    fn send_enrollment_notification(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        course_id: Uuid,
    ) {
        let student = users::table.find(user_id).first::<User>(conn).optional();
        let course = courses::table.find(course_id).first::<Course>(conn).optional();

        match (student, course) {
            (Ok(Some(student)), Ok(Some(course))) => {
                self.notifier.dispatch(Notification::EnrollmentConfirmed {
                    email: student.email,
                    course_title: course.title,
                    access_url: format!("{}/courses/{}", self.public_url, course_id),
                });
            }
            _ => {
                tracing::warn!(
                    %user_id, %course_id,
                    "could not load enrollment notification context"
                );
            }
        }
    }
}

fn course_is_free(course: &Course) -> bool {
    use bigdecimal::Zero;
    course.is_free || course.price.is_zero()
}

fn is_enrolled(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<bool, diesel::result::Error> {
    diesel::select(diesel::dsl::exists(
        enrollments::table
            .filter(enrollments::user_id.eq(user_id))
            .filter(enrollments::course_id.eq(course_id)),
    ))
    .get_result(conn)
}

// ----- HTTP handlers -----

pub async fn enroll_free(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = engine_from(&state);
    let enrollment = engine.enroll_free(user_id, course_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": enrollment })),
    ))
}

pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = engine_from(&state);
    let coordinates = engine.initiate_payment(user_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": coordinates })),
    ))
}

pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = engine_from(&state);
    let payment = engine.get_payment(user_id, payment_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": payment })))
}

/// Webhook handlers acknowledge everything they can: the provider retries
/// regardless, and surfacing an error only risks a retry storm.
pub async fn paystack_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_paystack_signature(&state.config.paystack.secret_key, &body, signature) {
        tracing::warn!("paystack webhook with bad signature, ignoring");
        return Json(serde_json::json!({ "status": "ignored" }));
    }

    let Ok(payload) = serde_json::from_slice::<WebhookPayload>(&body) else {
        tracing::warn!("malformed paystack webhook payload, ignoring");
        return Json(serde_json::json!({ "status": "ignored" }));
    };

    handle_webhook(&state, PaymentProvider::Paystack, payload).await
}

pub async fn flutterwave_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let hash = headers
        .get("verif-hash")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_flutterwave_hash(&state.config.flutterwave.secret_hash, hash) {
        tracing::warn!("flutterwave webhook with bad verif-hash, ignoring");
        return Json(serde_json::json!({ "status": "ignored" }));
    }

    let Ok(payload) = serde_json::from_slice::<WebhookPayload>(&body) else {
        tracing::warn!("malformed flutterwave webhook payload, ignoring");
        return Json(serde_json::json!({ "status": "ignored" }));
    };

    handle_webhook(&state, PaymentProvider::Flutterwave, payload).await
}

async fn handle_webhook(
    state: &Arc<AppState>,
    provider: PaymentProvider,
    payload: WebhookPayload,
) -> Json<serde_json::Value> {
    let engine = engine_from(state);
    match engine.reconcile_webhook(provider, payload).await {
        Ok(ReconcileOutcome::Enrolled) => Json(serde_json::json!({ "status": "success" })),
        Ok(_) => Json(serde_json::json!({ "status": "processed" })),
        Err(e) => {
            tracing::error!(provider = %provider, "webhook reconciliation failed: {e}");
            Json(serde_json::json!({ "status": "processed" }))
        }
    }
}

fn engine_from(state: &Arc<AppState>) -> EnrollmentEngine {
    EnrollmentEngine::new(
        state.conn.clone(),
        state.gateways.clone(),
        state.notifier.clone(),
        state.config.public_url.clone(),
    )
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/courses/:course_id/enroll", post(enroll_free))
        .route("/api/payments/initiate", post(initiate_payment))
        .route("/api/payments/:payment_id", get(get_payment))
        .route("/api/payments/webhook/paystack", post(paystack_webhook))
        .route(
            "/api/payments/webhook/flutterwave",
            post(flutterwave_webhook),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_roundtrip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("chargeback"), None);
    }

    #[test]
    fn test_payment_transitions_are_monotone() {
        use PaymentStatus::*;

        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Refunded));

        // No path back to pending from any state.
        for status in [Pending, Completed, Failed, Refunded] {
            assert!(!status.can_transition_to(Pending));
        }
        // Terminal states never complete again.
        assert!(!Completed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Refunded));
    }

    fn payload(event: &str, data: serde_json::Value) -> WebhookPayload {
        WebhookPayload {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn test_classify_paystack_charge_success() {
        let key = classify_event(
            PaymentProvider::Paystack,
            &payload("charge.success", serde_json::json!({ "reference": "ref-1" })),
        );
        assert_eq!(key, Some(LookupKey::Reference("ref-1".to_string())));
    }

    #[test]
    fn test_classify_paystack_other_events_ignored() {
        let key = classify_event(
            PaymentProvider::Paystack,
            &payload("charge.failed", serde_json::json!({ "reference": "ref-1" })),
        );
        assert_eq!(key, None);
    }

    #[test]
    fn test_classify_paystack_missing_reference() {
        let key = classify_event(
            PaymentProvider::Paystack,
            &payload("charge.success", serde_json::json!({})),
        );
        assert_eq!(key, None);
    }

    #[test]
    fn test_classify_flutterwave_numeric_id() {
        let key = classify_event(
            PaymentProvider::Flutterwave,
            &payload("charge.completed", serde_json::json!({ "id": 12345 })),
        );
        assert_eq!(key, Some(LookupKey::TransactionId("12345".to_string())));
    }

    #[test]
    fn test_classify_flutterwave_string_id() {
        let key = classify_event(
            PaymentProvider::Flutterwave,
            &payload("charge.completed", serde_json::json!({ "id": "tx-9" })),
        );
        assert_eq!(key, Some(LookupKey::TransactionId("tx-9".to_string())));
    }

    #[test]
    fn test_classify_flutterwave_wrong_event() {
        let key = classify_event(
            PaymentProvider::Flutterwave,
            &payload("charge.success", serde_json::json!({ "id": 12345 })),
        );
        assert_eq!(key, None);
    }

    #[test]
    fn test_webhook_payload_parses_without_data() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"event":"charge.success"}"#).unwrap();
        assert_eq!(payload.event, "charge.success");
        assert!(payload.data.is_null());
    }

    #[test]
    fn test_course_is_free() {
        use bigdecimal::BigDecimal;
        let mut course = Course {
            id: Uuid::new_v4(),
            title: "T".to_string(),
            slug: "t".to_string(),
            description: None,
            price: BigDecimal::from(50),
            currency: "USD".to_string(),
            is_free: false,
            level: "beginner".to_string(),
            category: None,
            is_published: true,
            instructor_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!course_is_free(&course));

        course.price = BigDecimal::from(0);
        assert!(course_is_free(&course));

        course.price = BigDecimal::from(50);
        course.is_free = true;
        assert!(course_is_free(&course));
    }
}
