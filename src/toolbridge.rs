//! Client for the hosted tool-execution provider (Composio-style).
//!
//! Owns the external user identity, the connect/wait/disconnect lifecycle,
//! and the single point where raw tool responses are decoded into a
//! `ToolOutcome`. Remote-touching operations emit paired started/finished
//! telemetry; the finished event never swallows the error it reports.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use crate::{new_id, ApiClient, ConnectionInfo, LocalStore, Telemetry, ToolOutcome};

pub(crate) const SETTING_EXTERNAL_USER_ID: &str = "tabmind_external_user_id";
pub(crate) const SETTING_AUTH_CONFIG_ID: &str = "tabmind_auth_config_id";
pub(crate) const SETTING_CONNECTION_REQUEST_ID: &str = "tabmind_connection_request_id";
pub(crate) const SETTING_CONNECTED_ACCOUNT_ID: &str = "tabmind_connected_account_id";

#[derive(Clone)]
pub(crate) struct ToolBridge {
    api: ApiClient,
    store: LocalStore,
    telemetry: Telemetry,
    user_id: Arc<Mutex<Option<String>>>,
}

impl ToolBridge {
    pub(crate) fn new(api: ApiClient, store: LocalStore, telemetry: Telemetry) -> Self {
        Self {
            api,
            store,
            telemetry,
            user_id: Arc::new(Mutex::new(None)),
        }
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Stable external user id: in-process memo, read-through to settings,
    /// generated and persisted on first use. Idempotent across calls.
    pub(crate) fn external_user_id(&self) -> Result<String, String> {
        let mut memo = self
            .user_id
            .lock()
            .map_err(|_| "user id lock poisoned".to_string())?;
        if let Some(id) = memo.as_ref() {
            return Ok(id.clone());
        }
        let id = match self.store.setting_get(SETTING_EXTERNAL_USER_ID)? {
            Some(stored) => stored,
            None => {
                let fresh = new_id("user");
                self.store.setting_set(SETTING_EXTERNAL_USER_ID, &fresh)?;
                fresh
            }
        };
        *memo = Some(id.clone());
        Ok(id)
    }

    // ── Execution ────────────────────────────────────────────────────

    pub(crate) fn execute(
        &self,
        slug: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let user_id = self.external_user_id()?;
        self.telemetry
            .emit("integration_execute_started", json!({"slug": slug}));
        let started = Instant::now();

        let result = self
            .api
            .post(
                "/api/composio/execute",
                &json!({"slug": slug, "userId": user_id, "arguments": args}),
            )
            .and_then(|raw| Self::decode_outcome(raw).into_result());

        self.telemetry.emit(
            "integration_execute_finished",
            json!({
                "slug": slug,
                "success": result.is_ok(),
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        );
        result
    }

    /// Try each slug in order, advancing only past "tool not found"-class
    /// failures. Any other failure is returned immediately; exhausting the
    /// list returns the last error seen.
    pub(crate) fn execute_with_fallback(
        &self,
        slugs: &[String],
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        if slugs.is_empty() {
            return Err("no tool slugs provided".to_string());
        }
        let mut last_error = String::new();
        for slug in slugs {
            match self.execute(slug, args) {
                Ok(data) => return Ok(data),
                Err(e) if Self::is_unknown_tool(&e) => {
                    eprintln!("[toolbridge] {slug}: {e}; trying next candidate");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Decode the provider's raw tool result exactly once. After this,
    /// `successful` / `error` never leak to callers.
    fn decode_outcome(raw: serde_json::Value) -> ToolOutcome {
        if raw.get("successful").and_then(|s| s.as_bool()) == Some(false) {
            let message = raw
                .get("error")
                .and_then(|e| e.as_str())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("tool execution failed");
            return ToolOutcome::Failed(message.to_string());
        }
        if raw.get("successful").and_then(|s| s.as_bool()) != Some(true) {
            if let Some(message) = raw.get("error").and_then(|e| e.as_str()) {
                if !message.trim().is_empty() {
                    return ToolOutcome::Failed(message.to_string());
                }
            }
        }
        match raw.get("data") {
            Some(data) => ToolOutcome::Ok(data.clone()),
            None => ToolOutcome::Ok(raw),
        }
    }

    fn is_unknown_tool(error: &str) -> bool {
        let lower = error.to_lowercase();
        lower.contains("not found") || lower.contains("unknown tool")
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start an OAuth connection for an auth config. The auth config id is
    /// an input: it is sent in the request and persisted locally along with
    /// the connection request id the provider answers with. Returns the
    /// provider payload (including the redirect URL the user must visit).
    pub(crate) fn connect(
        &self,
        auth_config_id: &str,
        callback_url: Option<&str>,
    ) -> Result<serde_json::Value, String> {
        let user_id = self.external_user_id()?;
        self.telemetry.emit(
            "integration_connect_started",
            json!({"authConfigId": auth_config_id}),
        );
        let started = Instant::now();

        let mut body = json!({"userId": user_id, "authConfigId": auth_config_id});
        if let Some(callback) = callback_url {
            body["callbackUrl"] = json!(callback);
        }
        let result = self
            .api
            .post("/api/composio/connect", &body)
            .and_then(|data| {
                self.store.setting_set(SETTING_AUTH_CONFIG_ID, auth_config_id)?;
                if let Some(id) = data.get("connectionRequestId").and_then(|v| v.as_str()) {
                    self.store.setting_set(SETTING_CONNECTION_REQUEST_ID, id)?;
                }
                Ok(data)
            });

        self.telemetry.emit(
            "integration_connect_finished",
            json!({
                "authConfigId": auth_config_id,
                "success": result.is_ok(),
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        );
        result
    }

    /// Poll the provider until the pending connection resolves. Requires a
    /// stored connection request id; persists the connected account id when
    /// the provider reports one. Returns the final status string.
    pub(crate) fn wait_for_connection(&self, timeout_secs: u64) -> Result<String, String> {
        let request_id = self
            .store
            .setting_get(SETTING_CONNECTION_REQUEST_ID)?
            .ok_or_else(|| "no pending connection request".to_string())?;

        self.telemetry
            .emit("integration_wait_started", json!({"requestId": request_id}));
        let started = Instant::now();

        let result = self
            .api
            .post(
                "/api/composio/wait",
                &json!({"connectionRequestId": request_id, "timeoutSeconds": timeout_secs}),
            )
            .and_then(|data| {
                if let Some(account) = data.get("connectedAccountId").and_then(|v| v.as_str()) {
                    self.store.setting_set(SETTING_CONNECTED_ACCOUNT_ID, account)?;
                }
                Ok(data
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("unknown")
                    .to_string())
            });

        self.telemetry.emit(
            "integration_wait_finished",
            json!({
                "success": result.is_ok(),
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        );
        result
    }

    /// Forget the connection locally: clears the stored connection ids and
    /// resets the external user id so the next operation mints a fresh one.
    /// Never talks to the provider.
    pub(crate) fn disconnect_local(&self) -> Result<(), String> {
        let mut memo = self
            .user_id
            .lock()
            .map_err(|_| "user id lock poisoned".to_string())?;
        *memo = None;
        self.store.setting_delete(SETTING_AUTH_CONFIG_ID)?;
        self.store.setting_delete(SETTING_CONNECTION_REQUEST_ID)?;
        self.store.setting_delete(SETTING_CONNECTED_ACCOUNT_ID)?;
        self.store.setting_delete(SETTING_EXTERNAL_USER_ID)?;
        self.telemetry.emit("integration_disconnected", json!({}));
        Ok(())
    }

    /// Whether the tool provider is configured at all. Answers
    /// `{configured: bool}`.
    pub(crate) fn status(&self) -> Result<serde_json::Value, String> {
        self.api.get("/api/composio/status")
    }

    pub(crate) fn local_connection_info(&self) -> Result<ConnectionInfo, String> {
        Ok(ConnectionInfo {
            auth_config_id: self.store.setting_get(SETTING_AUTH_CONFIG_ID)?,
            connection_request_id: self.store.setting_get(SETTING_CONNECTION_REQUEST_ID)?,
            connected_account_id: self.store.setting_get(SETTING_CONNECTED_ACCOUNT_ID)?,
        })
    }

    /// Human-readable status summary combining the provider's configured
    /// flag with local connection ids. Transport failures degrade to
    /// "status unavailable".
    pub(crate) fn auth_status(&self) -> serde_json::Value {
        let local = self.local_connection_info().unwrap_or_default();
        let connected = local.connected_account_id.is_some();
        match self.status() {
            Ok(remote) => {
                let configured = remote
                    .get("configured")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false);
                let message = if !configured {
                    "not configured"
                } else if connected {
                    "connected"
                } else {
                    "not connected"
                };
                json!({
                    "configured": configured,
                    "connected": connected,
                    "message": message,
                    "local": local,
                })
            }
            Err(e) => {
                eprintln!("[toolbridge] status check failed: {e}");
                json!({
                    "configured": false,
                    "connected": connected,
                    "message": "status unavailable",
                    "local": local,
                })
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StubServer;
    use std::time::Duration;

    fn temp_store(name: &str) -> LocalStore {
        let dir = std::env::temp_dir().join("tabmind_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("toolbridge_{}_{name}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        LocalStore::new(path)
    }

    fn bridge_for(stub: &StubServer, name: &str) -> ToolBridge {
        let api = ApiClient::new(&stub.base_url(), Duration::from_secs(5));
        ToolBridge::new(api, temp_store(name), Telemetry::disabled())
    }

    fn offline_bridge(name: &str) -> ToolBridge {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_millis(200));
        ToolBridge::new(api, temp_store(name), Telemetry::disabled())
    }

    #[test]
    fn test_decode_outcome_variants() {
        // successful:false with a message
        let out = ToolBridge::decode_outcome(
            serde_json::json!({"successful": false, "error": "quota exceeded"}),
        );
        assert_eq!(out.into_result().unwrap_err(), "quota exceeded");

        // successful:false without a message gets the generic one
        let out = ToolBridge::decode_outcome(serde_json::json!({"successful": false}));
        assert_eq!(out.into_result().unwrap_err(), "tool execution failed");

        // error present without an explicit successful:true is a failure
        let out = ToolBridge::decode_outcome(serde_json::json!({"error": "bad args"}));
        assert_eq!(out.into_result().unwrap_err(), "bad args");

        // successful:true with an error field still succeeds on data
        let out = ToolBridge::decode_outcome(
            serde_json::json!({"successful": true, "error": "warning", "data": {"ok": 1}}),
        );
        assert_eq!(out.into_result().unwrap(), serde_json::json!({"ok": 1}));

        // no markers at all: the raw value passes through
        let out = ToolBridge::decode_outcome(serde_json::json!({"plain": true}));
        assert_eq!(out.into_result().unwrap(), serde_json::json!({"plain": true}));
    }

    #[test]
    fn test_external_user_id_is_idempotent_until_disconnect() {
        let bridge = offline_bridge("user_id");
        let first = bridge.external_user_id().unwrap();
        let second = bridge.external_user_id().unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("user_"));

        // Persisted, so a fresh bridge over the same store agrees.
        let again = ToolBridge::new(
            ApiClient::new("http://127.0.0.1:9", Duration::from_millis(200)),
            bridge.store.clone(),
            Telemetry::disabled(),
        );
        assert_eq!(again.external_user_id().unwrap(), first);

        // Disconnect resets the identity.
        bridge.disconnect_local().unwrap();
        let fresh = bridge.external_user_id().unwrap();
        assert_ne!(fresh, first);
    }

    #[test]
    fn test_execute_with_fallback_advances_on_not_found_only() {
        let stub = StubServer::start(|_path, body| {
            assert!(body["userId"].as_str().is_some());
            let slug = body["slug"].as_str().unwrap_or_default();
            match slug {
                "GMAIL_SEND" => (
                    200,
                    serde_json::json!({"success": true, "data": {
                        "successful": false, "error": "Tool GMAIL_SEND not found"
                    }}),
                ),
                "GMAIL_SEND_V2" => (
                    200,
                    serde_json::json!({"success": true, "data": {
                        "successful": true, "data": {"sent": true}
                    }}),
                ),
                _ => (200, serde_json::json!({"success": false, "error": "bad slug"})),
            }
        });
        let bridge = bridge_for(&stub, "fallback");

        let slugs = vec!["GMAIL_SEND".to_string(), "GMAIL_SEND_V2".to_string()];
        let out = bridge
            .execute_with_fallback(&slugs, &serde_json::json!({"to": "a@b.c"}))
            .unwrap();
        assert_eq!(out, serde_json::json!({"sent": true}));
        assert_eq!(stub.requests().len(), 2);
    }

    #[test]
    fn test_execute_with_fallback_stops_on_real_failure() {
        let stub = StubServer::start(|_path, _body| {
            (
                200,
                serde_json::json!({"success": true, "data": {
                    "successful": false, "error": "rate limited"
                }}),
            )
        });
        let bridge = bridge_for(&stub, "fallback_stop");

        let slugs = vec!["FIRST".to_string(), "NEVER_TRIED".to_string()];
        let err = bridge
            .execute_with_fallback(&slugs, &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err, "rate limited");
        assert_eq!(stub.requests().len(), 1);
    }

    #[test]
    fn test_execute_with_fallback_empty_and_exhausted() {
        let stub = StubServer::start(|_path, _body| {
            (
                200,
                serde_json::json!({"success": true, "data": {
                    "successful": false, "error": "unknown tool"
                }}),
            )
        });
        let bridge = bridge_for(&stub, "fallback_exhaust");

        assert!(bridge
            .execute_with_fallback(&[], &serde_json::json!({}))
            .is_err());

        let slugs = vec!["A".to_string(), "B".to_string()];
        let err = bridge
            .execute_with_fallback(&slugs, &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err, "unknown tool");
        // Both candidates were tried before giving up (plus no user-id calls:
        // identity is local).
        assert_eq!(stub.requests().len(), 2);
    }

    #[test]
    fn test_connect_wait_persist_and_disconnect_clears() {
        let stub = StubServer::start(|path, body| match path {
            "/api/composio/connect" => {
                // Route enforces both fields on the way in.
                if body["userId"].as_str().is_none() || body["authConfigId"].as_str().is_none() {
                    return (
                        400,
                        serde_json::json!({"success": false,
                            "error": "Missing required fields: userId, authConfigId"}),
                    );
                }
                // The response does not echo the auth config id back.
                (
                    200,
                    serde_json::json!({"success": true, "data": {
                        "connectionRequestId": "cr_1",
                        "redirectUrl": "https://provider.example/authorize"
                    }}),
                )
            }
            "/api/composio/wait" => (
                200,
                serde_json::json!({"success": true, "data": {
                    "status": "ACTIVE", "connectedAccountId": "acct_1"
                }}),
            ),
            _ => (404, serde_json::Value::Null),
        });
        let bridge = bridge_for(&stub, "lifecycle");

        // No pending request yet: wait is an immediate error.
        assert_eq!(
            bridge.wait_for_connection(5).unwrap_err(),
            "no pending connection request"
        );

        let data = bridge.connect("ac_1", None).unwrap();
        assert_eq!(data["redirectUrl"], "https://provider.example/authorize");

        // The input auth config id is persisted even though the response
        // never carried it.
        let info = bridge.local_connection_info().unwrap();
        assert_eq!(info.auth_config_id.as_deref(), Some("ac_1"));
        assert_eq!(info.connection_request_id.as_deref(), Some("cr_1"));
        assert!(info.connected_account_id.is_none());

        let status = bridge.wait_for_connection(5).unwrap();
        assert_eq!(status, "ACTIVE");
        let info = bridge.local_connection_info().unwrap();
        assert_eq!(info.connected_account_id.as_deref(), Some("acct_1"));

        bridge.disconnect_local().unwrap();
        assert!(bridge.local_connection_info().unwrap().is_empty());
    }

    #[test]
    fn test_connect_sends_callback_url_when_given() {
        let stub = StubServer::start(|path, body| {
            assert_eq!(path, "/api/composio/connect");
            assert_eq!(body["callbackUrl"], "https://app.example/done");
            (
                200,
                serde_json::json!({"success": true, "data": {"connectionRequestId": "cr_2"}}),
            )
        });
        let bridge = bridge_for(&stub, "callback");
        bridge
            .connect("ac_2", Some("https://app.example/done"))
            .unwrap();
        assert_eq!(
            bridge
                .local_connection_info()
                .unwrap()
                .connection_request_id
                .as_deref(),
            Some("cr_2")
        );
    }

    #[test]
    fn test_status_is_a_get_reading_configured() {
        let stub = StubServer::start(|path, _body| {
            assert_eq!(path, "/api/composio/status");
            (200, serde_json::json!({"success": true, "data": {"configured": true}}))
        });
        let bridge = bridge_for(&stub, "status_get");

        let summary = bridge.auth_status();
        assert_eq!(summary["configured"], true);
        // Configured but no local connected account yet.
        assert_eq!(summary["connected"], false);
        assert_eq!(summary["message"], "not connected");
    }

    #[test]
    fn test_auth_status_degrades_when_provider_unreachable() {
        let bridge = offline_bridge("auth_status");
        let summary = bridge.auth_status();
        assert_eq!(summary["configured"], false);
        assert_eq!(summary["connected"], false);
        assert_eq!(summary["message"], "status unavailable");
    }
}
