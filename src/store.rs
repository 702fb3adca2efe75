//! SQLite-backed local store for memories, integration records, the TTL
//! response cache, and flat settings.
//!
//! The connection is opened lazily: construction never touches the
//! filesystem, and the first operation creates the database (with schema)
//! under a lock so concurrent first calls serialize into a single open.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::{now_ms, Memory, IntegrationRecord};

pub(crate) const SETTING_MEMORY_ENABLED: &str = "tabmind_memory_enabled";

#[derive(Clone)]
pub(crate) struct LocalStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    metadata TEXT,
    embedding TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp);

CREATE TABLE IF NOT EXISTS integrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    enabled INTEGER NOT NULL DEFAULT 1,
    last_used INTEGER
);

CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at INTEGER NOT NULL,
    ttl_seconds INTEGER
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

impl LocalStore {
    /// Cheap constructor: no I/O until the first operation.
    pub(crate) fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Force the database open (used by `init` to create the file eagerly).
    pub(crate) fn ensure_open(&self) -> Result<(), String> {
        self.with_conn(|_| Ok(()))
    }

    fn open(path: &Path) -> Result<Connection, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("create dir {}: {e}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| format!("open {}: {e}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| format!("pragmas: {e}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| format!("schema: {e}"))?;
        Ok(conn)
    }

    /// Run an operation against the connection, opening it first if needed.
    /// The lock is held for the whole operation, so the open happens at most
    /// once even under concurrent first calls.
    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T, String>) -> Result<T, String> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| "store lock poisoned".to_string())?;
        if guard.is_none() {
            *guard = Some(Self::open(&self.path)?);
        }
        match guard.as_ref() {
            Some(conn) => op(conn),
            None => Err("store connection unavailable".to_string()),
        }
    }

    // ── Memories ─────────────────────────────────────────────────────

    pub(crate) fn save_memory(&self, memory: &Memory) -> Result<(), String> {
        let tags_json = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".into());
        let meta_json = memory
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());
        let embedding_json = memory
            .embedding
            .as_ref()
            .and_then(|e| serde_json::to_string(e).ok());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (id, content, tags, source, timestamp, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     tags = excluded.tags,
                     source = excluded.source,
                     timestamp = excluded.timestamp,
                     metadata = excluded.metadata,
                     embedding = excluded.embedding",
                params![
                    memory.id,
                    memory.content,
                    tags_json,
                    memory.source,
                    memory.timestamp,
                    meta_json,
                    embedding_json,
                ],
            )
            .map_err(|e| format!("save_memory({}): {e}", memory.id))?;
            Ok(())
        })
    }

    pub(crate) fn get_memory(&self, id: &str) -> Result<Option<Memory>, String> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, content, tags, source, timestamp, metadata, embedding
                 FROM memories WHERE id = ?",
                params![id],
                Self::row_to_memory,
            );
            match result {
                Ok(memory) => Ok(Some(memory)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("get_memory({id}): {e}")),
            }
        })
    }

    /// All memories, newest first.
    pub(crate) fn list_memories(&self) -> Result<Vec<Memory>, String> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, content, tags, source, timestamp, metadata, embedding
                     FROM memories ORDER BY timestamp DESC",
                )
                .map_err(|e| format!("list_memories prepare: {e}"))?;
            let rows = stmt
                .query_map([], Self::row_to_memory)
                .map_err(|e| format!("list_memories query: {e}"))?;
            let mut out = Vec::new();
            for row in rows {
                match row {
                    Ok(memory) => out.push(memory),
                    Err(e) => eprintln!("[store] list_memories row error: {e}"),
                }
            }
            Ok(out)
        })
    }

    /// Case-insensitive substring match over content plus joined tags.
    pub(crate) fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<Memory>, String> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.list_memories()?;
        Ok(all
            .into_iter()
            .filter(|m| {
                let haystack = format!("{} {}", m.content, m.tags.join(" ")).to_lowercase();
                haystack.contains(&needle)
            })
            .take(limit)
            .collect())
    }

    pub(crate) fn delete_memory(&self, id: &str) -> Result<bool, String> {
        self.with_conn(|conn| {
            let rows = conn
                .execute("DELETE FROM memories WHERE id = ?", params![id])
                .map_err(|e| format!("delete_memory({id}): {e}"))?;
            Ok(rows > 0)
        })
    }

    pub(crate) fn clear_memories(&self) -> Result<usize, String> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM memories", [])
                .map_err(|e| format!("clear_memories: {e}"))
        })
    }

    /// Delete memories strictly older than the cutoff. Returns the count.
    pub(crate) fn delete_memories_older_than(&self, cutoff_ms: i64) -> Result<usize, String> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM memories WHERE timestamp < ?",
                params![cutoff_ms],
            )
            .map_err(|e| format!("delete_memories_older_than({cutoff_ms}): {e}"))
        })
    }

    pub(crate) fn memory_count(&self) -> Result<usize, String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memories", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| format!("memory_count: {e}"))
        })
    }

    fn row_to_memory(row: &rusqlite::Row) -> Result<Memory, rusqlite::Error> {
        let tags_json: String = row.get(2)?;
        let meta_json: Option<String> = row.get(5)?;
        let embedding_json: Option<String> = row.get(6)?;
        Ok(Memory {
            id: row.get(0)?,
            content: row.get(1)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            source: row.get(3)?,
            timestamp: row.get(4)?,
            metadata: meta_json.and_then(|j| serde_json::from_str(&j).ok()),
            embedding: embedding_json.and_then(|j| serde_json::from_str(&j).ok()),
        })
    }

    // ── Integrations ─────────────────────────────────────────────────

    pub(crate) fn save_integration(&self, record: &IntegrationRecord) -> Result<(), String> {
        let config_json = serde_json::to_string(&record.config).unwrap_or_else(|_| "{}".into());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO integrations (id, name, kind, config, enabled, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     kind = excluded.kind,
                     config = excluded.config,
                     enabled = excluded.enabled,
                     last_used = excluded.last_used",
                params![
                    record.id,
                    record.name,
                    record.kind,
                    config_json,
                    record.enabled as i64,
                    record.last_used,
                ],
            )
            .map_err(|e| format!("save_integration({}): {e}", record.id))?;
            Ok(())
        })
    }

    pub(crate) fn get_integration(&self, id: &str) -> Result<Option<IntegrationRecord>, String> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, name, kind, config, enabled, last_used
                 FROM integrations WHERE id = ?",
                params![id],
                Self::row_to_integration,
            );
            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("get_integration({id}): {e}")),
            }
        })
    }

    pub(crate) fn list_integrations(&self) -> Result<Vec<IntegrationRecord>, String> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, kind, config, enabled, last_used
                     FROM integrations ORDER BY name",
                )
                .map_err(|e| format!("list_integrations prepare: {e}"))?;
            let rows = stmt
                .query_map([], Self::row_to_integration)
                .map_err(|e| format!("list_integrations query: {e}"))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    fn row_to_integration(row: &rusqlite::Row) -> Result<IntegrationRecord, rusqlite::Error> {
        let config_json: String = row.get(3)?;
        let enabled: i64 = row.get(4)?;
        Ok(IntegrationRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            config: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
            enabled: enabled != 0,
            last_used: row.get(5)?,
        })
    }

    // ── TTL cache ────────────────────────────────────────────────────

    pub(crate) fn cache_set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl_seconds: Option<i64>,
    ) -> Result<(), String> {
        let value_json = serde_json::to_string(value).map_err(|e| format!("cache_set({key}): {e}"))?;
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cache (key, value, stored_at, ttl_seconds)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     stored_at = excluded.stored_at,
                     ttl_seconds = excluded.ttl_seconds",
                params![key, value_json, now, ttl_seconds],
            )
            .map_err(|e| format!("cache_set({key}): {e}"))?;
            Ok(())
        })
    }

    /// Returns the cached value, or nothing if the key is absent or expired.
    /// An expired entry is deleted on the way out.
    pub(crate) fn cache_get(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value, stored_at, ttl_seconds FROM cache WHERE key = ?",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            );
            let (value_json, stored_at, ttl_seconds) = match result {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(format!("cache_get({key}): {e}")),
            };
            if let Some(ttl) = ttl_seconds {
                if now_ms() - stored_at > ttl * 1000 {
                    conn.execute("DELETE FROM cache WHERE key = ?", params![key])
                        .map_err(|e| format!("cache_get({key}) evict: {e}"))?;
                    return Ok(None);
                }
            }
            serde_json::from_str(&value_json)
                .map(Some)
                .map_err(|e| format!("cache_get({key}) decode: {e}"))
        })
    }

    pub(crate) fn cache_delete(&self, key: &str) -> Result<bool, String> {
        self.with_conn(|conn| {
            let rows = conn
                .execute("DELETE FROM cache WHERE key = ?", params![key])
                .map_err(|e| format!("cache_delete({key}): {e}"))?;
            Ok(rows > 0)
        })
    }

    pub(crate) fn cache_clear(&self) -> Result<usize, String> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache", [])
                .map_err(|e| format!("cache_clear: {e}"))
        })
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub(crate) fn setting_get(&self, key: &str) -> Result<Option<String>, String> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("setting_get({key}): {e}")),
            }
        })
    }

    pub(crate) fn setting_set(&self, key: &str, value: &str) -> Result<(), String> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| format!("setting_set({key}): {e}"))?;
            Ok(())
        })
    }

    pub(crate) fn setting_delete(&self, key: &str) -> Result<(), String> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM settings WHERE key = ?", params![key])
                .map_err(|e| format!("setting_delete({key}): {e}"))?;
            Ok(())
        })
    }

    /// Memory capture opt-out switch. Absent (default) means enabled.
    pub(crate) fn memory_enabled(&self) -> Result<bool, String> {
        Ok(self
            .setting_get(SETTING_MEMORY_ENABLED)?
            .map(|v| v != "false")
            .unwrap_or(true))
    }

    pub(crate) fn set_memory_enabled(&self, enabled: bool) -> Result<(), String> {
        self.setting_set(SETTING_MEMORY_ENABLED, if enabled { "true" } else { "false" })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store(name: &str) -> LocalStore {
        let dir = std::env::temp_dir().join("tabmind_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("store_{}_{name}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        LocalStore::new(path)
    }

    fn mk_memory(id: &str, content: &str, tags: &[&str], timestamp: i64) -> Memory {
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            source: "test".to_string(),
            timestamp,
            metadata: None,
            embedding: None,
        }
    }

    #[test]
    fn test_lazy_open_creates_on_first_use() {
        let store = temp_store("lazy_open");
        // Nothing on disk yet; first call opens and creates schema.
        assert_eq!(store.memory_count().unwrap(), 0);
    }

    #[test]
    fn test_memory_roundtrip_and_search() {
        let store = temp_store("mem_search");
        store
            .save_memory(&mk_memory("m1", "Rust borrow checker notes", &["rust"], 100))
            .unwrap();
        store
            .save_memory(&mk_memory("m2", "Grocery list", &["errands"], 200))
            .unwrap();

        let found = store.search_memories("BORROW", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m1");

        // Tag text is part of the searchable haystack.
        let by_tag = store.search_memories("errands", 10).unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, "m2");

        // Newest first.
        let all = store.list_memories().unwrap();
        assert_eq!(all[0].id, "m2");

        assert!(store.delete_memory("m1").unwrap());
        assert!(!store.delete_memory("m1").unwrap());
    }

    #[test]
    fn test_delete_memories_older_than_is_strict() {
        let store = temp_store("mem_purge");
        store.save_memory(&mk_memory("old", "old", &[], 1_000)).unwrap();
        store.save_memory(&mk_memory("edge", "edge", &[], 2_000)).unwrap();
        store.save_memory(&mk_memory("new", "new", &[], 3_000)).unwrap();

        let removed = store.delete_memories_older_than(2_000).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_memory("old").unwrap().is_none());
        assert!(store.get_memory("edge").unwrap().is_some());
        assert!(store.get_memory("new").unwrap().is_some());
    }

    #[test]
    fn test_cache_ttl_expiry_deletes_entry() {
        let store = temp_store("cache_ttl");
        store.cache_set("fresh", &json!({"n": 1}), Some(3600)).unwrap();
        store.cache_set("forever", &json!({"n": 2}), None).unwrap();
        store.cache_set("stale", &json!({"n": 3}), Some(10)).unwrap();

        // Backdate the stale entry past its TTL.
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE cache SET stored_at = stored_at - 11000 WHERE key = 'stale'",
                    [],
                )
                .map_err(|e| e.to_string())?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.cache_get("fresh").unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.cache_get("forever").unwrap(), Some(json!({"n": 2})));
        assert_eq!(store.cache_get("stale").unwrap(), None);

        // The expired row was deleted, not just hidden.
        let remaining = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get::<_, i64>(0))
                    .map_err(|e| e.to_string())
            })
            .unwrap();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn test_integration_roundtrip() {
        let store = temp_store("integrations");
        let record = IntegrationRecord {
            id: "gmail".to_string(),
            name: "Gmail".to_string(),
            kind: "composio".to_string(),
            config: json!({"scopes": ["send"]}),
            enabled: true,
            last_used: None,
        };
        store.save_integration(&record).unwrap();

        let loaded = store.get_integration("gmail").unwrap().unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.config["scopes"][0], "send");

        let mut disabled = loaded.clone();
        disabled.enabled = false;
        store.save_integration(&disabled).unwrap();
        assert!(!store.get_integration("gmail").unwrap().unwrap().enabled);

        assert!(store.get_integration("missing").unwrap().is_none());
    }

    #[test]
    fn test_settings_and_privacy_default() {
        let store = temp_store("settings");
        assert!(store.memory_enabled().unwrap());
        store.set_memory_enabled(false).unwrap();
        assert!(!store.memory_enabled().unwrap());
        store.set_memory_enabled(true).unwrap();
        assert!(store.memory_enabled().unwrap());

        store.setting_set("k", "v").unwrap();
        assert_eq!(store.setting_get("k").unwrap().as_deref(), Some("v"));
        store.setting_delete("k").unwrap();
        assert!(store.setting_get("k").unwrap().is_none());
    }
}
