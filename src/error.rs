use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("quiz attempts are locked for another {hours_remaining} hour(s)")]
    RestrictionActive {
        next_attempt_allowed_at: DateTime<Utc>,
        hours_remaining: i64,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn access_denied<T: Into<String>>(msg: T) -> Self {
        Self::AccessDenied(msg.into())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::AccessDenied(_) => "access_denied",
            Self::RestrictionActive { .. } => "restriction_active",
            Self::Database(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::RestrictionActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "internal error");
                json!({ "error": self.kind(), "message": "internal server error" })
            }
            Self::RestrictionActive {
                next_attempt_allowed_at,
                hours_remaining,
            } => json!({
                "error": self.kind(),
                "message": self.to_string(),
                "nextAttemptAllowedAt": next_attempt_allowed_at,
                "hoursRemaining": hours_remaining,
            }),
            _ => json!({ "error": self.kind(), "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn each_kind_maps_to_its_status() {
        assert_eq!(
            AppError::not_found("chapter not found").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::validation("answers are required").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::access_denied("not enrolled").into_response().status(),
            StatusCode::FORBIDDEN
        );
        let restricted = AppError::RestrictionActive {
            next_attempt_allowed_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            hours_remaining: 3,
        };
        assert_eq!(restricted.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::from(sqlx::Error::RowNotFound).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn restriction_message_reports_hours() {
        let err = AppError::RestrictionActive {
            next_attempt_allowed_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            hours_remaining: 5,
        };
        assert_eq!(
            err.to_string(),
            "quiz attempts are locked for another 5 hour(s)"
        );
    }
}
