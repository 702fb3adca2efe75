//! Debounced suggestion generation and single-use execution.
//!
//! One mutex guards both the cooldown stamp and the active map, so the
//! cooldown check-and-stamp is atomic and a suggestion can be claimed by at
//! most one executor. Calls inside the cooldown window return the current
//! active set unchanged. Generation prefers the backend and degrades to
//! local heuristics; total failure yields an empty list, never an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::{
    now_ms, ApiClient, Memory, MemoryDraft, MemoryKeeper, PageContext, SharedHost, Suggestion,
    UseCaseInput, UseCaseRunner, ACTION_COMPOSE_EMAIL, ACTION_SAVE_MEMORY, ACTION_SUMMARIZE_VIDEO,
};

const DEFAULT_COOLDOWN_MS: u64 = 2000;
const MAX_SUGGESTIONS: usize = 2;
const RELATED_MEMORY_LIMIT: usize = 3;
const COMPOSE_URL: &str = "https://mail.google.com/mail/?view=cm&fs=1";

struct SuggestionState {
    last_at: Option<Instant>,
    active: HashMap<String, Suggestion>,
}

#[derive(Clone)]
pub(crate) struct SuggestionEngine {
    api: ApiClient,
    keeper: MemoryKeeper,
    runner: UseCaseRunner,
    host: SharedHost,
    cooldown: Duration,
    state: Arc<Mutex<SuggestionState>>,
}

impl SuggestionEngine {
    pub(crate) fn new(
        api: ApiClient,
        keeper: MemoryKeeper,
        runner: UseCaseRunner,
        host: SharedHost,
    ) -> Self {
        Self::with_cooldown(api, keeper, runner, host, Duration::from_millis(DEFAULT_COOLDOWN_MS))
    }

    pub(crate) fn with_cooldown(
        api: ApiClient,
        keeper: MemoryKeeper,
        runner: UseCaseRunner,
        host: SharedHost,
        cooldown: Duration,
    ) -> Self {
        Self {
            api,
            keeper,
            runner,
            host,
            cooldown,
            state: Arc::new(Mutex::new(SuggestionState {
                last_at: None,
                active: HashMap::new(),
            })),
        }
    }

    /// Generate suggestions for a page. When no context is supplied, the
    /// active tab's context is used. Calls inside the cooldown window return
    /// the current active set unchanged; a passing call stamps the window
    /// before releasing the lock, so concurrent callers cannot both pass.
    pub(crate) fn get_suggestions(
        &self,
        context: Option<&PageContext>,
    ) -> Result<Vec<Suggestion>, String> {
        {
            let mut state = self.lock_state()?;
            if let Some(last) = state.last_at {
                if last.elapsed() < self.cooldown {
                    let mut current: Vec<Suggestion> = state.active.values().cloned().collect();
                    current.sort_by(|a, b| a.id.cmp(&b.id));
                    return Ok(current);
                }
            }
            state.last_at = Some(Instant::now());
        }

        let derived;
        let context = match context {
            Some(ctx) => ctx,
            None => {
                derived = self.context_from_host();
                &derived
            }
        };

        // Relevant memories are gathered up front and travel with the
        // generation request; the local path reuses them.
        let related = self
            .keeper
            .relevant(
                &format!("{} {}", context.title, context.content),
                RELATED_MEMORY_LIMIT,
            )
            .unwrap_or_default();

        let suggestions = match self.fetch_remote(context, &related) {
            Ok(remote) if !remote.is_empty() => remote,
            Ok(_) => self.local_suggestions(context, &related),
            Err(e) => {
                eprintln!("[suggest] backend generation failed: {e}");
                self.local_suggestions(context, &related)
            }
        };

        let mut state = self.lock_state()?;
        state.active = suggestions.iter().map(|s| (s.id.clone(), s.clone())).collect();
        Ok(suggestions)
    }

    /// Page context for generation when the caller supplied none: full
    /// extraction, then bare tab metadata, then empty.
    fn context_from_host(&self) -> PageContext {
        if let Ok(ctx) = self.host.extract_page_context() {
            return ctx;
        }
        match self.host.active_tab() {
            Ok(Some(tab)) => PageContext {
                url: tab.url.unwrap_or_default(),
                title: tab.title.unwrap_or_default(),
                content: String::new(),
            },
            _ => PageContext::default(),
        }
    }

    fn fetch_remote(
        &self,
        context: &PageContext,
        related: &[Memory],
    ) -> Result<Vec<Suggestion>, String> {
        let data = self.api.post(
            "/api/extension/get-suggestions",
            &json!({
                "context": context,
                "memories": related,
            }),
        )?;
        let items = data
            .as_array()
            .cloned()
            .or_else(|| data.get("suggestions").and_then(|s| s.as_array()).cloned())
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .take(MAX_SUGGESTIONS)
            .collect())
    }

    /// Heuristic fallback when the backend has nothing: page-kind rules
    /// first, then related-notes; the generic save-page entry fires only
    /// when nothing else matched.
    fn local_suggestions(&self, context: &PageContext, related: &[Memory]) -> Vec<Suggestion> {
        let url = context.url.to_lowercase();
        let stamp = now_ms();
        let mut out: Vec<Suggestion> = Vec::new();
        let push = |action: &str, text: &str, confidence: f64, out: &mut Vec<Suggestion>| {
            let idx = out.len();
            out.push(Suggestion {
                id: format!("suggestion_{stamp}_{idx}"),
                text: text.to_string(),
                action: action.to_string(),
                context: Some(context.url.clone()),
                confidence,
                timestamp: stamp,
            });
        };

        if url.contains("mail") || url.contains("gmail") {
            push(
                ACTION_COMPOSE_EMAIL,
                "Start a new email from here",
                0.8,
                &mut out,
            );
        }
        if url.contains("youtube") || url.contains("video") {
            push(
                ACTION_SUMMARIZE_VIDEO,
                "Summarize this video without watching",
                0.85,
                &mut out,
            );
        }
        if !related.is_empty() {
            push(
                ACTION_SAVE_MEMORY,
                &format!("You have {} related notes; add this page to them", related.len()),
                0.7,
                &mut out,
            );
        }
        if out.is_empty() {
            push(
                ACTION_SAVE_MEMORY,
                "Save this page to your memories",
                0.6,
                &mut out,
            );
        }

        out.truncate(MAX_SUGGESTIONS);
        out
    }

    /// Execute a suggestion by id. The suggestion is claimed (removed from
    /// the active set) up front, so it runs at most once no matter the
    /// outcome. An unknown id is an error.
    pub(crate) fn execute(&self, id: &str) -> Result<serde_json::Value, String> {
        let suggestion = {
            let mut state = self.lock_state()?;
            state
                .active
                .remove(id)
                .ok_or_else(|| format!("suggestion not found: {id}"))?
        };

        match suggestion.action.as_str() {
            ACTION_COMPOSE_EMAIL => {
                self.host.open_url(COMPOSE_URL)?;
                Ok(json!({"opened": COMPOSE_URL}))
            }
            ACTION_SUMMARIZE_VIDEO => {
                let output = self.runner.execute(UseCaseInput::new("youtube-summarization"));
                match output.error {
                    Some(message) => Err(message),
                    None => Ok(output.data.unwrap_or(serde_json::Value::Null)),
                }
            }
            // SAVE_MEMORY, and the fallback for action kinds this build
            // does not recognize.
            action => {
                if action != ACTION_SAVE_MEMORY {
                    eprintln!("[suggest] unknown action {action}; saving as memory instead");
                }
                let memory = self.keeper.save(MemoryDraft {
                    content: suggestion.text.clone(),
                    tags: Vec::new(),
                    source: "suggestion".to_string(),
                    metadata: suggestion.context.as_ref().map(|c| json!({"context": c})),
                })?;
                Ok(json!(memory))
            }
        }
    }

    /// Drop a suggestion without executing it. Succeeds whether or not the
    /// id was present.
    pub(crate) fn dismiss(&self, id: &str) -> Result<bool, String> {
        let mut state = self.lock_state()?;
        Ok(state.active.remove(id).is_some())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SuggestionState>, String> {
        self.state
            .lock()
            .map_err(|_| "suggestion state lock poisoned".to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
