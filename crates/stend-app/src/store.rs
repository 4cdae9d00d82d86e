//! Persistent key/value store backed by SQLite
//!
//! Values are JSON. Rows written by older tools may hold bare strings; those
//! come back as [`Value::String`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use stend_core::prelude::*;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS store (key TEXT PRIMARY KEY, value TEXT)";

/// Cheap-to-clone handle on the store database
#[derive(Debug, Clone)]
pub struct PersistentStore {
    conn: Arc<Mutex<Connection>>,
}

impl PersistentStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        debug!("Opened store at {}", path.display());
        Self::init(conn)
    }

    /// Non-persistent store for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, []).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<Option<String>> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })?;

        Ok(raw.map(|value| match value {
            Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            None => Value::Null,
        }))
    }

    /// Insert or replace a value
    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO store (key, value) VALUES (?1, ?2)",
                params![key, text],
            )
        })?;
        trace!("store put {}", key);
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed =
            self.with_conn(|conn| conn.execute("DELETE FROM store WHERE key = ?1", params![key]))?;
        Ok(removed > 0)
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM store ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
    }

    /// Keys containing `fragment`, matched literally
    pub fn search_keys(&self, fragment: &str) -> Result<Vec<String>> {
        let pattern = format!("%{}%", escape_like(fragment));
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM store WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
            let keys = stmt
                .query_map(params![pattern], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn).map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::store(e.to_string())
}

fn escape_like(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_structured_round_trip() {
        let store = PersistentStore::in_memory().unwrap();
        store.put("admins", &json!([1, 2])).unwrap();
        assert_eq!(store.get("admins").unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn test_string_round_trip_stays_string() {
        let store = PersistentStore::in_memory().unwrap();
        store.put("n", &json!("123")).unwrap();
        assert_eq!(store.get("n").unwrap(), Some(json!("123")));
    }

    #[test]
    fn test_legacy_bare_string_row() {
        let store = PersistentStore::in_memory().unwrap();
        store
            .with_conn(|c| {
                c.execute(
                    "INSERT INTO store (key, value) VALUES ('greeting', 'hello world')",
                    [],
                )
            })
            .unwrap();
        assert_eq!(store.get("greeting").unwrap(), Some(json!("hello world")));
    }

    #[test]
    fn test_missing_key() {
        let store = PersistentStore::in_memory().unwrap();
        assert_eq!(store.get("nope").unwrap(), None);
        assert!(!store.delete("nope").unwrap());
    }

    #[test]
    fn test_put_replaces() {
        let store = PersistentStore::in_memory().unwrap();
        store.put("k", &json!(1)).unwrap();
        store.put("k", &json!({"a": true})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": true})));
        assert_eq!(store.list_keys().unwrap(), vec!["k"]);
    }

    #[test]
    fn test_delete_and_list() {
        let store = PersistentStore::in_memory().unwrap();
        store.put("b", &json!(2)).unwrap();
        store.put("a", &json!(1)).unwrap();
        assert_eq!(store.list_keys().unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").unwrap());
        assert_eq!(store.list_keys().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_search_keys_is_literal() {
        let store = PersistentStore::in_memory().unwrap();
        for key in ["room_1", "room_2", "roomX1", "admins"] {
            store.put(key, &json!(null)).unwrap();
        }
        assert_eq!(store.search_keys("room").unwrap().len(), 3);
        assert_eq!(store.search_keys("m_").unwrap(), vec!["room_1", "room_2"]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("stend_store.db");
        {
            let store = PersistentStore::open(&path).unwrap();
            store.put("admins", &json!([1, 2])).unwrap();
        }
        let store = PersistentStore::open(&path).unwrap();
        assert_eq!(store.get("admins").unwrap(), Some(json!([1, 2])));
    }
}
