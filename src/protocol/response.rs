//! Response envelope
//!
//! Every response carries `{"sessionId", "status", "value"}`. Status 0 is
//! success; error statuses and message prefixes are stable and matched by
//! clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::Value;

use crate::Error;

/// Wire envelope for one command response
#[derive(Debug, Serialize)]
pub struct WireResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub status: i64,
    pub value: Value,
}

impl WireResponse {
    pub fn success(session_id: Option<String>, value: Value) -> Self {
        Self { session_id, status: 0, value }
    }

    pub fn failure(session_id: Option<String>, error: &Error) -> Self {
        Self {
            session_id,
            status: error.status_code(),
            value: serde_json::json!({ "message": error.to_string() }),
        }
    }

    fn http_status(&self) -> StatusCode {
        match self.status {
            0 => StatusCode::OK,
            // unknown session / unknown command resolve at the routing layer
            6 | 9 => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WireResponse {
    fn into_response(self) -> Response {
        (self.http_status(), Json(&self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let response = WireResponse::success(Some("s1".into()), serde_json::json!(1));
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["sessionId"], "s1");
        assert_eq!(body["status"], 0);
        assert_eq!(body["value"], 1);
    }

    #[test]
    fn test_failure_envelope_carries_kind_and_message() {
        let error = Error::script_timeout("asynchronous script timeout: result was not received in 3 seconds");
        let response = WireResponse::failure(Some("s1".into()), &error);
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["status"], 28);
        let message = body["value"]["message"].as_str().unwrap();
        assert!(message.starts_with("script timeout"));
        assert!(message.contains("3 seconds"));
    }

    #[test]
    fn test_unknown_command_maps_to_404() {
        let response = WireResponse::failure(None, &Error::UnknownCommand("/bogus".into()));
        assert_eq!(response.http_status(), StatusCode::NOT_FOUND);
    }
}
