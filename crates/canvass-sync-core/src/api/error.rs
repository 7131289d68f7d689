//! Failures talking to the CRM's REST API.

use reqwest::StatusCode;
use thiserror::Error;

/// Bytes of a response body kept in an error message.
const BODY_EXCERPT_BYTES: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session expired or missing, sign in again")]
    Unauthorized,

    #[error("Not allowed for this campaign: {0}")]
    Forbidden(String),

    #[error("No such record on the server: {0}")]
    NotFound(String),

    /// The CRM refused the contact itself (validation, conflict). Retrying
    /// the same payload gives the same answer.
    #[error("Contact rejected by the server ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("CRM is throttling requests")]
    RateLimited,

    #[error("CRM unavailable: {0}")]
    ServerError(String),

    #[error("Could not reach the CRM: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected answer from the CRM: {0}")]
    InvalidResponse(String),

    #[error("Invalid CRM base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Classify a non-success status. 429 is normally absorbed by the
    /// client's backoff loop before it gets here.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = excerpt(body);
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden(detail),
            StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::NotFound(detail),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Rejected {
                    status: status.as_u16(),
                    detail,
                }
            }
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            s if s.is_server_error() => ApiError::ServerError(detail),
            s => ApiError::InvalidResponse(format!("status {}: {}", s, detail)),
        }
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= BODY_EXCERPT_BYTES {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(StatusCode::GONE, ""), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down\n"),
            ApiError::ServerError(ref body) if body == "upstream down"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, "?"),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_validation_failure_is_a_rejection() {
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"voterId unknown"}"#);
        let ApiError::Rejected { status, ref detail } = err else {
            panic!("expected Rejected");
        };
        assert_eq!(status, 422);
        assert!(detail.contains("voterId unknown"));
        assert!(err.to_string().starts_with("Contact rejected by the server (422)"));
    }

    #[test]
    fn test_long_bodies_are_cut_on_a_char_boundary() {
        let body = "é".repeat(400);
        let ApiError::Forbidden(msg) = ApiError::from_status(StatusCode::FORBIDDEN, &body) else {
            panic!("expected Forbidden");
        };
        assert!(msg.ends_with("(800 bytes total)"));
    }
}
