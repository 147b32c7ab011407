//! Certificate issuance.
//!
//! The certificate row is created synchronously and atomically with its
//! preconditions; artifact rendering and the issued notification run in a
//! background task and never unwind the committed row.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::types::Course;
use crate::notify::{Notification, NotificationDispatcher};
use crate::progress;
use crate::shared::error::{is_unique_violation, ApiError};
use crate::shared::models::schema::{certificates, courses, enrollments, users};
use crate::shared::models::User;
use crate::shared::state::{AppState, CurrentUser};
use crate::shared::utils::DbPool;

pub mod render;

pub use render::{CertificateRenderer, HttpCertificateRenderer, RenderRequest};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = certificates)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub certificate_number: String,
    pub issue_date: DateTime<Utc>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateVerification {
    pub is_valid: bool,
    pub certificate: Option<Certificate>,
}

/// Builds a human-parseable, URL-safe certificate number: a fixed prefix,
/// the first 8 hex digits of the course and learner ids, and a random
/// 8-hex-digit suffix backed by a uniqueness constraint.
pub fn certificate_number(course_id: Uuid, user_id: Uuid) -> String {
    let course = course_id.simple().to_string();
    let user = user_id.simple().to_string();
    let suffix: [u8; 4] = rand::random();
    format!(
        "CERT-{}-{}-{}",
        &course[..8].to_uppercase(),
        &user[..8].to_uppercase(),
        hex::encode(suffix).to_uppercase()
    )
}

pub struct CertificateIssuer {
    db: DbPool,
    renderer: Arc<dyn CertificateRenderer>,
    notifier: Arc<NotificationDispatcher>,
}

impl CertificateIssuer {
    pub fn new(
        db: DbPool,
        renderer: Arc<dyn CertificateRenderer>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            db,
            renderer,
            notifier,
        }
    }

    /// Issues the certificate for (learner, course) exactly once.
    ///
    /// Preconditions are checked in order inside one transaction:
    /// enrollment, no prior certificate, completion. Two concurrent calls
    /// race on the unique constraint and the loser observes `AlreadyIssued`.
    pub async fn issue_certificate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Certificate, ApiError> {
        let mut conn = self.db.get()?;

        let certificate = conn.transaction::<Certificate, ApiError, _>(|conn| {
            let enrolled: i64 = enrollments::table
                .filter(enrollments::user_id.eq(user_id))
                .filter(enrollments::course_id.eq(course_id))
                .count()
                .get_result(conn)?;
            if enrolled == 0 {
                return Err(ApiError::NotEnrolled);
            }

            let existing: i64 = certificates::table
                .filter(certificates::user_id.eq(user_id))
                .filter(certificates::course_id.eq(course_id))
                .count()
                .get_result(conn)?;
            if existing > 0 {
                return Err(ApiError::AlreadyIssued);
            }

            if !progress::is_complete(conn, user_id, course_id)? {
                return Err(ApiError::IncompleteCourse);
            }

            let now = Utc::now();
            let certificate = Certificate {
                id: Uuid::new_v4(),
                user_id,
                course_id,
                certificate_number: certificate_number(course_id, user_id),
                issue_date: now,
                pdf_url: None,
                created_at: now,
            };

            diesel::insert_into(certificates::table)
                .values(&certificate)
                .execute(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::AlreadyIssued
                    } else {
                        ApiError::from(e)
                    }
                })?;

            Ok(certificate)
        })?;

        self.spawn_render_and_notify(certificate.clone());

        Ok(certificate)
    }

    pub async fn list_certificates(&self, user_id: Uuid) -> Result<Vec<Certificate>, ApiError> {
        let mut conn = self.db.get()?;
        Ok(certificates::table
            .filter(certificates::user_id.eq(user_id))
            .order(certificates::issue_date.desc())
            .load(&mut conn)?)
    }

    pub async fn verify_certificate(
        &self,
        number: &str,
    ) -> Result<CertificateVerification, ApiError> {
        let mut conn = self.db.get()?;
        let certificate: Option<Certificate> = certificates::table
            .filter(certificates::certificate_number.eq(number))
            .first(&mut conn)
            .optional()?;

        Ok(CertificateVerification {
            is_valid: certificate.is_some(),
            certificate,
        })
    }

    /// Rendering and notification happen after the row has committed; their
    /// failure is logged and retried out-of-band, never rolled back into the
    /// issuance.
    fn spawn_render_and_notify(&self, certificate: Certificate) {
        let db = self.db.clone();
        let renderer = self.renderer.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let context = match load_render_context(&db, &certificate) {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!(
                        certificate = %certificate.certificate_number,
                        "skipping certificate delivery: {e}"
                    );
                    return;
                }
            };

            let artifact_url = match renderer
                .render(&RenderRequest {
                    student_name: context.student_name,
                    course_name: context.course_name.clone(),
                    certificate_number: certificate.certificate_number.clone(),
                    instructor_name: context.instructor_name,
                })
                .await
            {
                Ok(url) => {
                    if let Err(e) = store_artifact_url(&db, certificate.id, &url) {
                        tracing::warn!(
                            certificate = %certificate.certificate_number,
                            "failed to store artifact url: {e}"
                        );
                    }
                    Some(url)
                }
                Err(e) => {
                    tracing::warn!(
                        certificate = %certificate.certificate_number,
                        "certificate rendering failed: {e}"
                    );
                    None
                }
            };

            notifier.dispatch(Notification::CertificateIssued {
                email: context.student_email,
                course_title: context.course_name,
                certificate_number: certificate.certificate_number.clone(),
                artifact_url,
            });
        });
    }
}

struct RenderContext {
    student_name: String,
    student_email: String,
    course_name: String,
    instructor_name: String,
}

fn load_render_context(db: &DbPool, certificate: &Certificate) -> Result<RenderContext, ApiError> {
    let mut conn = db.get()?;

    let student: User = users::table
        .find(certificate.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("user"))?;

    let course: Course = courses::table
        .find(certificate.course_id)
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("course"))?;

    let instructor_name = course
        .instructor_id
        .and_then(|id| {
            users::table
                .find(id)
                .first::<User>(&mut conn)
                .optional()
                .ok()
                .flatten()
        })
        .map(|u| u.full_name)
        .unwrap_or_else(|| "Course Instructor".to_string());

    Ok(RenderContext {
        student_name: student.full_name,
        student_email: student.email,
        course_name: course.title,
        instructor_name,
    })
}

fn store_artifact_url(db: &DbPool, certificate_id: Uuid, url: &str) -> Result<(), ApiError> {
    let mut conn = db.get()?;
    diesel::update(certificates::table.find(certificate_id))
        .set(certificates::pdf_url.eq(url))
        .execute(&mut conn)?;
    Ok(())
}

// ----- HTTP handlers -----

pub async fn issue_certificate(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let issuer = CertificateIssuer::new(
        state.conn.clone(),
        state.renderer.clone(),
        state.notifier.clone(),
    );
    let certificate = issuer.issue_certificate(user_id, course_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": certificate })),
    ))
}

pub async fn list_certificates(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let issuer = CertificateIssuer::new(
        state.conn.clone(),
        state.renderer.clone(),
        state.notifier.clone(),
    );
    let list = issuer.list_certificates(user_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": list })))
}

pub async fn verify_certificate(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let issuer = CertificateIssuer::new(
        state.conn.clone(),
        state.renderer.clone(),
        state.notifier.clone(),
    );
    let verification = issuer.verify_certificate(&number).await?;
    Ok(Json(
        serde_json::json!({ "success": true, "data": verification }),
    ))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/courses/:course_id/certificate",
            post(issue_certificate),
        )
        .route("/api/certificates", get(list_certificates))
        .route("/api/certificates/verify/:number", get(verify_certificate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_number_shape() {
        let course_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let number = certificate_number(course_id, user_id);

        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "CERT");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3].len(), 8);
        assert!(number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_certificate_number_embeds_ids() {
        let course_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let number = certificate_number(course_id, user_id);

        let course_prefix = course_id.simple().to_string()[..8].to_uppercase();
        let user_prefix = user_id.simple().to_string()[..8].to_uppercase();
        assert!(number.contains(&course_prefix));
        assert!(number.contains(&user_prefix));
    }

    #[test]
    fn test_certificate_numbers_are_unique() {
        let course_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let numbers: std::collections::HashSet<String> = (0..16)
            .map(|_| certificate_number(course_id, user_id))
            .collect();
        assert_eq!(numbers.len(), 16);
    }
}
