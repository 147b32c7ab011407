use axum::{http::StatusCode, response::IntoResponse, Json};

/// Crate-wide error taxonomy for the completion/certification pipeline.
///
/// Conflict and precondition failures are surfaced to the direct caller;
/// webhook handlers absorb `NotFound` themselves and never return this type
/// to the gateway.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Already enrolled in this course")]
    AlreadyEnrolled,
    #[error("Certificate already issued for this course")]
    AlreadyIssued,
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("Course requirements are not complete")]
    IncompleteCourse,
    #[error("Not enrolled in this course")]
    NotEnrolled,
    #[error("Payment is required before enrolling in this course")]
    PaymentRequired,
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyEnrolled | Self::AlreadyIssued | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::IncompleteCourse | Self::NotEnrolled | Self::PaymentRequired => {
                StatusCode::BAD_REQUEST
            }
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": self.to_string()
            })),
        )
            .into_response()
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("record"),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        Self::Database(e.to_string())
    }
}

pub fn is_unique_violation(e: &diesel::result::Error) -> bool {
    matches!(
        e,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (ApiError::NotFound("course"), "course not found"),
            (ApiError::AlreadyEnrolled, "Already enrolled in this course"),
            (
                ApiError::AlreadyIssued,
                "Certificate already issued for this course",
            ),
            (
                ApiError::IncompleteCourse,
                "Course requirements are not complete",
            ),
            (ApiError::NotEnrolled, "Not enrolled in this course"),
            (
                ApiError::Gateway("timeout".to_string()),
                "Gateway error: timeout",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NotFound("quiz").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AlreadyEnrolled.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::AlreadyIssued.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Conflict("slug").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::IncompleteCourse.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotEnrolled.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::PaymentRequired.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Gateway("down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Database("oops".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: ApiError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
