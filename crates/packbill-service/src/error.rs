//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use packbill_core::BillingError;
use packbill_packer::PackerError;
use packbill_store::StoreError;

use crate::gateway::GatewayError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - a concurrent writer changed the record first.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller's plan does not allow this request.
    #[error("plan restricted: {message}")]
    PlanRestricted {
        /// What was refused.
        message: String,
        /// Limits and upgrade hint.
        details: serde_json::Value,
    },

    /// A payment or webhook signature did not verify.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// A scheduled plan change cannot be applied now.
    #[error("scheduling conflict: {message}")]
    SchedulingConflict {
        /// Why.
        message: String,
        /// Timing information.
        details: Option<serde_json::Value>,
    },

    /// The payment gateway call failed.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The packing process failed.
    #[error("packing process error: {message}")]
    UpstreamProcess {
        /// What went wrong.
        message: String,
        /// Exit code, stderr or raw output.
        details: serde_json::Value,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "unauthorized".to_string(),
                None,
            ),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "forbidden".to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            Self::PlanRestricted { message, details } => (
                StatusCode::FORBIDDEN,
                "plan_restricted",
                message,
                Some(details),
            ),
            Self::SignatureMismatch(msg) => {
                (StatusCode::BAD_REQUEST, "signature_mismatch", msg, None)
            }
            Self::SchedulingConflict { message, details } => (
                StatusCode::BAD_REQUEST,
                "scheduling_conflict",
                message,
                details,
            ),
            Self::Gateway(msg) => {
                tracing::error!(error = %msg, "Payment gateway error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "gateway_error",
                    msg,
                    None,
                )
            }
            Self::UpstreamProcess { message, details } => {
                tracing::error!(error = %message, "Packing process error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_process_error",
                    message,
                    Some(details),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    msg,
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SubscriptionNotFound { .. } => {
                Self::NotFound("No subscription found".into())
            }
            BillingError::PaymentNotFound { .. } => Self::NotFound("Payment not found".into()),
            BillingError::NoScheduledChange => Self::SchedulingConflict {
                message: "No scheduled plan change found".into(),
                details: None,
            },
            BillingError::ChangeNotDue {
                scheduled_for,
                days_remaining,
            } => Self::SchedulingConflict {
                message: "Scheduled date has not been reached yet".into(),
                details: Some(serde_json::json!({
                    "scheduled_for": scheduled_for,
                    "days_remaining": days_remaining,
                })),
            },
            BillingError::NoActiveSubscription => {
                Self::NotFound("No active subscription found".into())
            }
            BillingError::InvalidPlanTransition { .. } => {
                Self::BadRequest("You are already on this plan".into())
            }
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record not found".into()),
            StoreError::DuplicateSubscription { .. } => {
                Self::BadRequest("Subscription already exists".into())
            }
            StoreError::DuplicateOrder { order_id } => {
                Self::Conflict(format!("order {order_id} already recorded"))
            }
            err @ (StoreError::VersionConflict { .. }
            | StoreError::AlreadyActivated { .. }
            | StoreError::RefundInProgress { .. }) => {
                Self::Conflict(err.to_string())
            }
            StoreError::InvalidTransition(err) => err.into(),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<PackerError> for ApiError {
    fn from(err: PackerError) -> Self {
        let message = err.to_string();
        let details = match err {
            PackerError::InvalidJob(msg) => return Self::BadRequest(msg),
            PackerError::Failed { exit_code, stderr } => serde_json::json!({
                "exit_code": exit_code,
                "stderr": stderr,
            }),
            PackerError::MalformedOutput { raw_output, .. }
            | PackerError::Reported { raw_output, .. } => serde_json::json!({
                "raw_output": raw_output,
            }),
            PackerError::Timeout(limit) => serde_json::json!({
                "timeout_seconds": limit.as_secs(),
            }),
            PackerError::Spawn(_) | PackerError::Io(_) => serde_json::json!({}),
        };
        Self::UpstreamProcess { message, details }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn change_not_due_carries_days_remaining() {
        let err: ApiError = BillingError::ChangeNotDue {
            scheduled_for: Utc::now(),
            days_remaining: 3,
        }
        .into();
        match err {
            ApiError::SchedulingConflict {
                details: Some(details),
                ..
            } => assert_eq!(details["days_remaining"], 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn store_errors_map_to_status_classes() {
        let conflict: ApiError = StoreError::VersionConflict {
            expected: Some(1),
            actual: Some(2),
        }
        .into();
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let internal: ApiError = StoreError::Database("disk gone".into()).into();
        assert_eq!(
            internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let duplicate: ApiError = StoreError::DuplicateSubscription {
            user_id: "u".into(),
        }
        .into();
        assert_eq!(duplicate.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn packer_failure_keeps_stderr() {
        let err: ApiError = PackerError::Failed {
            exit_code: 2,
            stderr: "Traceback".into(),
        }
        .into();
        match err {
            ApiError::UpstreamProcess { details, .. } => {
                assert_eq!(details["exit_code"], 2);
                assert_eq!(details["stderr"], "Traceback");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn invalid_job_is_bad_request() {
        let err: ApiError = PackerError::InvalidJob("Container dimensions are required".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
