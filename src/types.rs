use serde::{Deserialize, Serialize};

// ── Memories ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Memory {
    pub(crate) id: String,
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    pub(crate) source: String,
    /// Milliseconds since the Unix epoch, assigned at save time.
    pub(crate) timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) embedding: Option<Vec<f64>>,
}

/// Save request: id and timestamp are assigned by the keeper, never by callers.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryDraft {
    pub(crate) content: String,
    pub(crate) tags: Vec<String>,
    pub(crate) source: String,
    pub(crate) metadata: Option<serde_json::Value>,
}

// ── Integrations ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IntegrationRecord {
    pub(crate) id: String,
    pub(crate) name: String,
    /// Integration family, e.g. "gmail", "composio".
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) config: serde_json::Value,
    pub(crate) enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) last_used: Option<i64>,
}

/// Locally persisted connection identifiers for the tool provider.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) auth_config_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) connection_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) connected_account_id: Option<String>,
}

impl ConnectionInfo {
    pub(crate) fn is_empty(&self) -> bool {
        self.auth_config_id.is_none()
            && self.connection_request_id.is_none()
            && self.connected_account_id.is_none()
    }
}

// ── Tool execution ───────────────────────────────────────────────────────

/// A tool response decoded exactly once at the transport boundary.
/// Callers only ever see payload data or a failure message.
#[derive(Debug, Clone)]
pub(crate) enum ToolOutcome {
    Ok(serde_json::Value),
    Failed(String),
}

impl ToolOutcome {
    pub(crate) fn into_result(self) -> Result<serde_json::Value, String> {
        match self {
            Self::Ok(data) => Ok(data),
            Self::Failed(message) => Err(message),
        }
    }
}

// ── Suggestions ──────────────────────────────────────────────────────────

pub(crate) const ACTION_SAVE_MEMORY: &str = "SAVE_MEMORY";
pub(crate) const ACTION_COMPOSE_EMAIL: &str = "COMPOSE_EMAIL";
pub(crate) const ACTION_SUMMARIZE_VIDEO: &str = "SUMMARIZE_VIDEO";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Suggestion {
    pub(crate) id: String,
    /// Suggestion sentence shown to the user.
    pub(crate) text: String,
    /// Action kind, e.g. `SAVE_MEMORY`. Kept open-ended: unknown kinds go
    /// through the save-memory fallback rather than being rejected.
    pub(crate) action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) context: Option<String>,
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) timestamp: i64,
}

// ── Browser surface ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TabInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PageContext {
    pub(crate) url: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BrowserAction {
    /// Lowercased verb: `click`, `type`, or `fill`.
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ActionResult {
    pub(crate) action: BrowserAction,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

// ── Use cases ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct UseCaseInput {
    pub(crate) use_case_id: String,
    pub(crate) parameters: serde_json::Map<String, serde_json::Value>,
    pub(crate) include_screenshot: bool,
}

impl UseCaseInput {
    pub(crate) fn new(use_case_id: &str) -> Self {
        Self {
            use_case_id: use_case_id.to_string(),
            parameters: serde_json::Map::new(),
            include_screenshot: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UseCaseOutput {
    pub(crate) use_case_id: String,
    pub(crate) status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl UseCaseOutput {
    pub(crate) fn ok(use_case_id: &str, data: serde_json::Value) -> Self {
        Self {
            use_case_id: use_case_id.to_string(),
            status: RunStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub(crate) fn err(use_case_id: &str, message: impl Into<String>) -> Self {
        Self {
            use_case_id: use_case_id.to_string(),
            status: RunStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UseCaseDef {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) category: String,
}
