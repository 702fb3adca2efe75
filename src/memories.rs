//! Memory capture and recall.
//!
//! Saves are privacy-gated and tagged; the backend mirror is synchronous
//! best-effort and never fails a local save. Recall is local-first with a
//! backend fallback when the local store comes up short.

use serde_json::json;

use crate::{
    is_stopword, new_id, now_ms, tokenize, ApiClient, LocalStore, Memory, MemoryDraft, Telemetry,
};

#[derive(Clone)]
pub(crate) struct MemoryKeeper {
    store: LocalStore,
    api: ApiClient,
    telemetry: Telemetry,
}

impl MemoryKeeper {
    pub(crate) fn new(store: LocalStore, api: ApiClient, telemetry: Telemetry) -> Self {
        Self {
            store,
            api,
            telemetry,
        }
    }

    /// Persist a memory locally, then mirror it to the backend. The mirror
    /// never fails the save. The id and timestamp are assigned here and
    /// never change.
    pub(crate) fn save(&self, draft: MemoryDraft) -> Result<Memory, String> {
        if !self.store.memory_enabled()? {
            return Err("memory capture is disabled".to_string());
        }

        let tags = if draft.tags.is_empty() {
            Self::derive_tags(&draft.content)
        } else {
            draft.tags
        };
        let memory = Memory {
            id: new_id("mem"),
            content: draft.content,
            tags,
            source: draft.source,
            timestamp: now_ms(),
            metadata: draft.metadata,
            embedding: None,
        };
        self.store.save_memory(&memory)?;
        self.telemetry.emit(
            "memory_saved",
            json!({"id": memory.id, "source": memory.source, "tags": memory.tags.len()}),
        );

        // Backend mirror: best-effort, completed before returning so a
        // short-lived process cannot drop it.
        if let Err(e) = self.api.post("/api/memories/save", &json!(memory)) {
            eprintln!("[memories] backend sync failed for {}: {e}", memory.id);
        }

        Ok(memory)
    }

    /// Top-5 frequent content words, skipping short words and stopwords.
    pub(crate) fn derive_tags(content: &str) -> Vec<String> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for token in tokenize(content) {
            if token.len() < 4 || is_stopword(&token) {
                continue;
            }
            match counts.iter_mut().find(|(word, _)| *word == token) {
                Some((_, n)) => *n += 1,
                None => counts.push((token, 1)),
            }
        }
        // Stable sort keeps first-seen order among equal counts.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.into_iter().take(5).map(|(word, _)| word).collect()
    }

    /// Local results first; when they come up short of the limit, fill from
    /// the backend. A backend failure degrades to the local results.
    pub(crate) fn search(&self, query: &str, limit: usize) -> Result<Vec<Memory>, String> {
        if !self.store.memory_enabled()? {
            return Ok(Vec::new());
        }
        let mut results = self.store.search_memories(query, limit)?;
        if results.len() >= limit {
            return Ok(results);
        }

        match self
            .api
            .post("/api/memories/search", &json!({"query": query, "limit": limit}))
        {
            Ok(data) => {
                for value in Self::memory_array(&data) {
                    if results.len() >= limit {
                        break;
                    }
                    let Ok(memory) = serde_json::from_value::<Memory>(value.clone()) else {
                        continue;
                    };
                    if !results.iter().any(|m| m.id == memory.id) {
                        results.push(memory);
                    }
                }
            }
            Err(e) => eprintln!("[memories] backend search failed: {e}"),
        }
        Ok(results)
    }

    fn memory_array(data: &serde_json::Value) -> Vec<serde_json::Value> {
        if let Some(items) = data.as_array() {
            return items.clone();
        }
        data.get("memories")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default()
    }

    /// Score stored memories against free-text context by keyword overlap.
    /// Ties break toward the newer memory; zero-score memories are dropped.
    pub(crate) fn relevant(&self, context: &str, limit: usize) -> Result<Vec<Memory>, String> {
        let keywords: Vec<String> = tokenize(context)
            .into_iter()
            .filter(|t| t.len() > 3)
            .take(5)
            .collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, Memory)> = Vec::new();
        for memory in self.store.list_memories()? {
            let haystack =
                format!("{} {}", memory.content, memory.tags.join(" ")).to_lowercase();
            let score = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
            if score > 0 {
                scored.push((score, memory));
            }
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    pub(crate) fn delete(&self, id: &str) -> Result<bool, String> {
        let removed = self.store.delete_memory(id)?;
        if let Err(e) = self.api.post("/api/memories/delete", &json!({"id": id})) {
            eprintln!("[memories] backend delete failed: {e}");
        }
        Ok(removed)
    }

    /// Clears local memories; reports the backend count when it answers.
    pub(crate) fn clear(&self) -> Result<usize, String> {
        let removed = self.store.clear_memories()?;
        match self.api.post("/api/memories/clear", &json!({})) {
            Ok(data) => {
                if let Some(n) = data.get("deleted").and_then(|d| d.as_i64()) {
                    eprintln!("[memories] backend cleared {n} memories");
                }
            }
            Err(e) => eprintln!("[memories] backend clear failed: {e}"),
        }
        Ok(removed)
    }

    /// Purge memories older than the given number of days.
    pub(crate) fn cleanup(&self, days: i64) -> Result<usize, String> {
        let cutoff = now_ms() - days * 86_400_000;
        self.store.delete_memories_older_than(cutoff)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
