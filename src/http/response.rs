//! Standard JSON error envelope.
//!
//! ```json
//! {"status": "error", "error": {"code": "...", "message": "...", "details": "..."}}
//! ```

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::messages::MessageError;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<i64>,
}

/// Errors rendered to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    /// Quota exhausted for the current window
    RateLimited {
        limit: u64,
        window_secs: u64,
        retry_after_secs: u64,
        /// Unix timestamp at which the window resets
        reset_at: i64,
    },
    /// Rejected message board input
    Message(MessageError),
    /// A body or query string that could not be deserialized
    InvalidRequest {
        code: &'static str,
        message: &'static str,
        details: String,
    },
}

impl ApiError {
    /// A rate limit rejection whose window resets `retry_after_secs` from now.
    pub fn rate_limited(limit: u64, window_secs: u64, retry_after_secs: u64) -> Self {
        ApiError::RateLimited {
            limit,
            window_secs,
            retry_after_secs,
            reset_at: chrono::Utc::now().timestamp() + retry_after_secs as i64,
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        ApiError::Message(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest {
            code: "INVALID_FORMAT",
            message: "Invalid request body",
            details: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest {
            code: "INVALID_FILTER",
            message: "Invalid query parameters",
            details: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited {
                limit,
                window_secs,
                retry_after_secs,
                reset_at,
            } => {
                let body = ErrorEnvelope {
                    status: "error",
                    error: ErrorBody {
                        code: "RATE_LIMIT_EXCEEDED",
                        message: "Too many requests",
                        details: Some(format!("Allowed {} per {} seconds", limit, window_secs)),
                        reset_at: Some(reset_at),
                    },
                };
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
                    Json(body),
                )
                    .into_response()
            }
            ApiError::Message(err) => {
                let body = ErrorEnvelope {
                    status: "error",
                    error: ErrorBody {
                        code: err.code(),
                        message: err.summary(),
                        details: Some(err.to_string()),
                        reset_at: None,
                    },
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ApiError::InvalidRequest {
                code,
                message,
                details,
            } => {
                let body = ErrorEnvelope {
                    status: "error",
                    error: ErrorBody {
                        code,
                        message,
                        details: Some(details),
                        reset_at: None,
                    },
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

/// Attach the quota headers of an allowed request.
pub fn insert_quota_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_secs: u64) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_body_shape() {
        let response = ApiError::RateLimited {
            limit: 5,
            window_secs: 60,
            retry_after_secs: 42,
            reset_at: 1_700_000_042,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "status": "error",
                "error": {
                    "code": "RATE_LIMIT_EXCEEDED",
                    "message": "Too many requests",
                    "details": "Allowed 5 per 60 seconds",
                    "reset_at": 1_700_000_042
                }
            })
        );
    }

    #[test]
    fn test_rate_limited_reset_is_in_the_future() {
        let before = chrono::Utc::now().timestamp();
        match ApiError::rate_limited(5, 60, 30) {
            ApiError::RateLimited { reset_at, .. } => {
                assert!(reset_at >= before + 30 && reset_at <= before + 31);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_error_body() {
        let response = ApiError::from(MessageError::EmptyContent).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "EMPTY_CONTENT");
        assert!(body["error"].get("reset_at").is_none());
    }

    #[test]
    fn test_quota_headers() {
        let mut headers = HeaderMap::new();
        insert_quota_headers(&mut headers, 100, 99, 60);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "99");
        assert_eq!(headers[&X_RATELIMIT_RESET], "60");
    }
}
