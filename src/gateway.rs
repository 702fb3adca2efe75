//! Thin HTTP client for the assistant backend.
//!
//! Every endpoint answers with a `{success, data, error}` envelope; this is
//! the single place that envelope gets unwrapped, so callers deal in payload
//! values and failure strings only.

use std::time::Duration;

use crate::{env_optional, env_u64};

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

#[derive(Clone)]
pub(crate) struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub(crate) fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let base_url = env_optional("TABMIND_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = env_u64("TABMIND_HTTP_TIMEOUT_SECS", 30)?;
        Ok(Self::new(&base_url, Duration::from_secs(timeout)))
    }

    pub(crate) fn get(&self, path: &str) -> Result<serde_json::Value, String> {
        self.request("GET", path, None)
    }

    pub(crate) fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        self.request("POST", path, Some(body))
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, String> {
        let url = format!("{}{path}", self.base_url);
        let request = self.agent.request(method, &url);
        let result = match body {
            Some(payload) => request.send_json(payload.clone()),
            None => request.call(),
        };

        match result {
            Ok(response) => {
                let value: serde_json::Value = response
                    .into_json()
                    .map_err(|e| format!("{method} {path}: invalid response body: {e}"))?;
                Self::unwrap_envelope(value)
            }
            Err(ureq::Error::Status(code, response)) => {
                // The failing body may still carry an envelope error, which
                // beats a bare status line for diagnosis.
                let status_text = response.status_text().to_string();
                let raw = response.into_string().unwrap_or_default();
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                    if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
                        if !message.trim().is_empty() {
                            return Err(message.to_string());
                        }
                    }
                }
                if status_text.trim().is_empty() {
                    Err(format!("{method} {path}: request failed with status {code}"))
                } else {
                    Err(format!("{method} {path}: {code} {status_text}"))
                }
            }
            Err(ureq::Error::Transport(err)) => Err(format!("{method} {path}: {err}")),
        }
    }

    /// Collapse the `{success, data, error}` envelope into a plain result.
    /// Responses without a `success` field pass through untouched.
    fn unwrap_envelope(value: serde_json::Value) -> Result<serde_json::Value, String> {
        let Some(success) = value.get("success").and_then(|s| s.as_bool()) else {
            return Ok(value);
        };
        if !success {
            let message = value
                .get("error")
                .and_then(|e| e.as_str())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("request was not successful");
            return Err(message.to_string());
        }
        Ok(value.get("data").cloned().unwrap_or(serde_json::Value::Null))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StubServer;
    use serde_json::json;

    fn client_for(stub: &StubServer) -> ApiClient {
        ApiClient::new(&stub.base_url(), Duration::from_secs(5))
    }

    #[test]
    fn test_unwrap_envelope_success_yields_data() {
        let out = ApiClient::unwrap_envelope(json!({"success": true, "data": {"x": 1}})).unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[test]
    fn test_unwrap_envelope_success_without_data_is_null() {
        let out = ApiClient::unwrap_envelope(json!({"success": true})).unwrap();
        assert_eq!(out, serde_json::Value::Null);
    }

    #[test]
    fn test_unwrap_envelope_failure_prefers_embedded_error() {
        let err = ApiClient::unwrap_envelope(json!({"success": false, "error": "boom"}))
            .unwrap_err();
        assert_eq!(err, "boom");

        let err = ApiClient::unwrap_envelope(json!({"success": false})).unwrap_err();
        assert_eq!(err, "request was not successful");
    }

    #[test]
    fn test_unwrap_envelope_passthrough_without_success_field() {
        let out = ApiClient::unwrap_envelope(json!({"items": []})).unwrap();
        assert_eq!(out, json!({"items": []}));
    }

    #[test]
    fn test_post_roundtrip_through_stub() {
        let stub = StubServer::start(|path, body| {
            assert_eq!(path, "/api/echo");
            (200, json!({"success": true, "data": {"echo": body["msg"]}}))
        });
        let client = client_for(&stub);
        let out = client.post("/api/echo", &json!({"msg": "hi"})).unwrap();
        assert_eq!(out, json!({"echo": "hi"}));
    }

    #[test]
    fn test_non_2xx_body_error_beats_status_text() {
        let stub = StubServer::start(|_path, _body| {
            (500, json!({"success": false, "error": "backend exploded"}))
        });
        let client = client_for(&stub);
        let err = client.get("/api/anything").unwrap_err();
        assert_eq!(err, "backend exploded");
    }

    #[test]
    fn test_non_2xx_without_body_falls_back_to_status() {
        let stub = StubServer::start(|_path, _body| (404, serde_json::Value::Null));
        let client = client_for(&stub);
        let err = client.get("/api/missing").unwrap_err();
        assert!(err.contains("404"), "unexpected error: {err}");
    }
}
