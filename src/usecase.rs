//! Use-case dispatch.
//!
//! Routing is decided once per input: scripted browser actions, a direct
//! provider tool call, or the remote LLM-backed default. `execute` is total:
//! every failure is folded into the output record, so callers never see an
//! `Err` from the dispatcher.

use serde_json::json;
use url::Url;

use crate::{
    ApiClient, BrowserAction, MemoryDraft, MemoryKeeper, SharedHost, ToolBridge, UseCaseDef,
    UseCaseInput, UseCaseOutput,
};

const USE_CASE_BROWSER_ACTIONS: &str = "browser-actions";
const USE_CASE_TOOL_SYNC: &str = "cross-platform-sync";
const MAX_ACTIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    BrowserActions,
    ToolExecution,
    Remote(String),
}

impl Strategy {
    pub(crate) fn for_id(use_case_id: &str) -> Self {
        match use_case_id {
            USE_CASE_BROWSER_ACTIONS => Self::BrowserActions,
            USE_CASE_TOOL_SYNC => Self::ToolExecution,
            other => Self::Remote(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub(crate) struct UseCaseRunner {
    api: ApiClient,
    bridge: ToolBridge,
    keeper: MemoryKeeper,
    host: SharedHost,
}

impl UseCaseRunner {
    pub(crate) fn new(
        api: ApiClient,
        bridge: ToolBridge,
        keeper: MemoryKeeper,
        host: SharedHost,
    ) -> Self {
        Self {
            api,
            bridge,
            keeper,
            host,
        }
    }

    /// Run a use case. Never returns an error: failures become an error
    /// output for the same use-case id.
    pub(crate) fn execute(&self, input: UseCaseInput) -> UseCaseOutput {
        let use_case_id = input.use_case_id.clone();
        let result = match Strategy::for_id(&use_case_id) {
            Strategy::BrowserActions => self.run_browser_actions(&input),
            Strategy::ToolExecution => self.run_tool(&input),
            Strategy::Remote(id) => self.run_remote(&id, &input),
        };
        match result {
            Ok(data) => UseCaseOutput::ok(&use_case_id, data),
            Err(message) => UseCaseOutput::err(&use_case_id, message),
        }
    }

    // ── Browser actions ──────────────────────────────────────────────

    fn run_browser_actions(&self, input: &UseCaseInput) -> Result<serde_json::Value, String> {
        let actions = Self::validate_actions(input.parameters.get("actions"));
        if actions.is_empty() {
            return Err("no valid browser actions provided".to_string());
        }

        let tab = self
            .host
            .active_tab()?
            .ok_or_else(|| "no active tab".to_string())?;
        let tab_url = tab.url.as_deref().unwrap_or_default();
        let parsed = Url::parse(tab_url).map_err(|_| "active tab has no usable URL".to_string())?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!("refusing to script a {} page", parsed.scheme()));
        }

        let results = self.host.run_actions(&actions)?;
        Ok(json!({"url": tab_url, "results": results}))
    }

    /// Normalize and filter raw action values: lowercased verb restricted to
    /// click/type/fill, non-empty selector, at most MAX_ACTIONS kept.
    fn validate_actions(raw: Option<&serde_json::Value>) -> Vec<BrowserAction> {
        let Some(items) = raw.and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        for item in items {
            let Some(obj) = item.as_object() else {
                continue;
            };
            let kind = obj
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            if !matches!(kind.as_str(), "click" | "type" | "fill") {
                continue;
            }
            let selector = obj
                .get("selector")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .trim()
                .to_string();
            if selector.is_empty() {
                continue;
            }
            actions.push(BrowserAction {
                kind,
                selector,
                text: obj.get("text").and_then(|t| t.as_str()).map(String::from),
            });
            if actions.len() >= MAX_ACTIONS {
                break;
            }
        }
        actions
    }

    // ── Provider tool pass-through ───────────────────────────────────

    fn run_tool(&self, input: &UseCaseInput) -> Result<serde_json::Value, String> {
        let slug = input
            .parameters
            .get("slug")
            .and_then(|s| s.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing tool slug in parameters.slug".to_string())?;
        let args = input
            .parameters
            .get("args")
            .or_else(|| input.parameters.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let data = match input.parameters.get("fallbackSlugs").and_then(|f| f.as_array()) {
            Some(fallbacks) => {
                let mut slugs = vec![slug.to_string()];
                slugs.extend(
                    fallbacks
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(String::from),
                );
                self.bridge.execute_with_fallback(&slugs, &args)?
            }
            None => self.bridge.execute(slug, &args)?,
        };

        let summary = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        self.remember(
            &input.use_case_id,
            format!("Tool executed: {slug}\n\n{summary}"),
        );
        Ok(data)
    }

    // ── Remote default ───────────────────────────────────────────────

    fn run_remote(
        &self,
        use_case_id: &str,
        input: &UseCaseInput,
    ) -> Result<serde_json::Value, String> {
        // Context degrades: full extraction, then bare tab metadata, then
        // nothing. The remote endpoint handles all three.
        let context = match self.host.extract_page_context() {
            Ok(ctx) => json!(ctx),
            Err(_) => match self.host.active_tab() {
                Ok(Some(tab)) => json!({
                    "url": tab.url.unwrap_or_default(),
                    "title": tab.title.unwrap_or_default(),
                    "content": "",
                }),
                _ => json!({"url": "", "title": "", "content": ""}),
            },
        };

        let mut parameters = input.parameters.clone();
        parameters.remove("includeScreenshot");

        let mut body = json!({
            "useCaseId": use_case_id,
            "parameters": parameters,
            "pageContext": context,
        });
        if input.include_screenshot {
            match self.host.capture_screenshot() {
                Ok(Some(shot)) => {
                    body["screenshotDataUrl"] = json!(shot);
                }
                Ok(None) => {}
                Err(e) => eprintln!("[usecase] screenshot capture failed: {e}"),
            }
        }

        let data = self.api.post("/api/extension/execute-use-case", &body)?;

        let text = data
            .get("content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .unwrap_or_else(|| {
                serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string())
            });
        self.remember(use_case_id, format!("Use case {use_case_id} result:\n\n{text}"));
        Ok(data)
    }

    /// Best-effort result memory. A failed (or privacy-disabled) save is
    /// logged and never fails the use case.
    fn remember(&self, use_case_id: &str, content: String) {
        let draft = MemoryDraft {
            content,
            tags: vec![use_case_id.to_string()],
            source: "use-case".to_string(),
            metadata: None,
        };
        if let Err(e) = self.keeper.save(draft) {
            eprintln!("[usecase] result memory skipped: {e}");
        }
    }

    // ── Catalog ──────────────────────────────────────────────────────

    /// Backend catalog of use cases, with a built-in default when the
    /// backend is unreachable or empty.
    pub(crate) fn list_use_cases(&self) -> Vec<UseCaseDef> {
        match self.api.get("/api/extension/use-cases") {
            Ok(data) => {
                let items = data
                    .as_array()
                    .cloned()
                    .or_else(|| data.get("useCases").and_then(|u| u.as_array()).cloned())
                    .unwrap_or_default();
                let defs: Vec<UseCaseDef> = items
                    .into_iter()
                    .filter_map(|v| serde_json::from_value(v).ok())
                    .collect();
                if defs.is_empty() {
                    Self::builtin_catalog()
                } else {
                    defs
                }
            }
            Err(e) => {
                eprintln!("[usecase] catalog fetch failed: {e}");
                Self::builtin_catalog()
            }
        }
    }

    fn builtin_catalog() -> Vec<UseCaseDef> {
        let defs = [
            (
                USE_CASE_BROWSER_ACTIONS,
                "Browser Actions",
                "Run scripted click/type/fill steps on the active tab",
                "automation",
            ),
            (
                USE_CASE_TOOL_SYNC,
                "Cross-Platform Sync",
                "Execute a connected provider tool directly",
                "integration",
            ),
            (
                "youtube-summarization",
                "Video Summary",
                "Summarize the video playing on the active tab",
                "content",
            ),
            (
                "page-summary",
                "Page Summary",
                "Summarize the active page",
                "content",
            ),
        ];
        defs.iter()
            .map(|(id, name, description, category)| UseCaseDef {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                category: category.to_string(),
            })
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
