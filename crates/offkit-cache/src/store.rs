//! Durable asset storage backed by sqlite.
//!
//! One row per `(generation, url, method)`. Installs are transactional:
//! either every asset of the new generation lands or none does, so a failed
//! install can never leave a partially populated generation behind.

use std::path::Path;

use hashbrown::HashMap;
use offkit_common::{OffKitError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::CachedAsset;

/// Database schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Sqlite-backed store for cached asset snapshots, partitioned by
/// generation id.
pub struct AssetStore {
    conn: Connection,
}

impl AssetStore {
    /// Open (or create) an asset store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Opening asset store at {:?}", path.as_ref());
        let conn = Connection::open(path)
            .map_err(|e| OffKitError::store(format!("Failed to open asset store: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store. Used by tests and the smoke harness.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OffKitError::store(format!("Failed to open asset store: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Atomically replace the asset set of `generation` with `assets`.
    ///
    /// Runs in a single transaction. On error nothing is committed and any
    /// previously stored generation remains untouched.
    pub fn install(&mut self, generation: &str, assets: &[CachedAsset]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| OffKitError::store(e.to_string()))?;

        tx.execute("DELETE FROM assets WHERE generation = ?", [generation])
            .map_err(|e| OffKitError::store(e.to_string()))?;

        for asset in assets {
            insert_asset(&tx, generation, asset)?;
        }

        tx.commit()
            .map_err(|e| OffKitError::store(format!("Failed to commit install: {}", e)))?;

        info!(generation, assets = assets.len(), "Installed generation");
        Ok(())
    }

    /// Store a single asset under `generation`, replacing any previous
    /// snapshot for the same key. Used by the opportunistic-fill path and
    /// on-demand cache additions.
    pub fn put(&self, generation: &str, asset: &CachedAsset) -> Result<()> {
        insert_asset(&self.conn, generation, asset)
    }

    /// Look up an asset snapshot.
    pub fn get(&self, generation: &str, url: &str, method: &str) -> Result<Option<CachedAsset>> {
        let row = self
            .conn
            .query_row(
                "SELECT url, method, status, headers, body, cached_at
                 FROM assets WHERE generation = ? AND url = ? AND method = ?",
                params![generation, url, method],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u16>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| OffKitError::store(e.to_string()))?;

        match row {
            Some((url, method, status, headers, body, cached_at)) => {
                let headers: HashMap<String, String> = serde_json::from_str(&headers)?;
                Ok(Some(CachedAsset {
                    url,
                    method,
                    status,
                    headers,
                    body,
                    cached_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Check whether an asset is stored under `generation`.
    pub fn contains(&self, generation: &str, url: &str, method: &str) -> Result<bool> {
        Ok(self.get(generation, url, method)?.is_some())
    }

    /// All asset URLs stored under `generation`, in insertion order.
    pub fn keys(&self, generation: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM assets WHERE generation = ? ORDER BY rowid")
            .map_err(|e| OffKitError::store(e.to_string()))?;

        let urls = stmt
            .query_map([generation], |row| row.get::<_, String>(0))
            .map_err(|e| OffKitError::store(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OffKitError::store(e.to_string()))?;

        Ok(urls)
    }

    /// Number of assets stored under `generation`.
    pub fn asset_count(&self, generation: &str) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM assets WHERE generation = ?",
                [generation],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
            .map_err(|e| OffKitError::store(e.to_string()))
    }

    /// Distinct generation ids currently holding assets.
    pub fn generations(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT generation FROM assets ORDER BY generation")
            .map_err(|e| OffKitError::store(e.to_string()))?;

        let generations = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| OffKitError::store(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OffKitError::store(e.to_string()))?;

        Ok(generations)
    }

    /// Delete every generation whose id differs from `keep`. Returns the
    /// number of asset rows removed.
    pub fn purge_except(&self, keep: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM assets WHERE generation != ?", [keep])
            .map_err(|e| OffKitError::store(e.to_string()))?;

        if removed > 0 {
            info!(keep, removed, "Purged stale generations");
        }
        Ok(removed)
    }
}

/// Initialize or migrate the store schema.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS assets (
            generation TEXT NOT NULL,
            url TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'GET',
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (generation, url, method)
        );

        CREATE INDEX IF NOT EXISTS idx_assets_generation ON assets(generation);
        "#,
    )
    .map_err(|e| OffKitError::store(format!("Failed to create schema: {}", e)))?;

    let version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| OffKitError::store(e.to_string()))?
        .unwrap_or(0);

    if version < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![SCHEMA_VERSION, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| OffKitError::store(e.to_string()))?;
    }

    Ok(())
}

fn insert_asset(conn: &Connection, generation: &str, asset: &CachedAsset) -> Result<()> {
    let headers = serde_json::to_string(&asset.headers)?;
    conn.execute(
        "INSERT OR REPLACE INTO assets (generation, url, method, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            generation,
            asset.url,
            asset.method,
            asset.status,
            headers,
            asset.body,
            asset.cached_at
        ],
    )
    .map_err(|e| OffKitError::store(format!("Failed to store asset: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(url: &str, body: &[u8]) -> CachedAsset {
        CachedAsset::new(url, 200, HashMap::new(), body.to_vec())
    }

    #[test]
    fn test_install_and_get() {
        let mut store = AssetStore::open_in_memory().unwrap();
        store
            .install("v1", &[asset("/", b"shell"), asset("/style.css", b"css")])
            .unwrap();

        let hit = store.get("v1", "/style.css", "GET").unwrap().unwrap();
        assert_eq!(hit.body, b"css");
        assert_eq!(hit.status, 200);

        assert!(store.get("v1", "/missing.css", "GET").unwrap().is_none());
        assert!(store.get("v2", "/style.css", "GET").unwrap().is_none());
    }

    #[test]
    fn test_install_replaces_generation() {
        let mut store = AssetStore::open_in_memory().unwrap();
        store.install("v1", &[asset("/old.js", b"old")]).unwrap();
        store.install("v1", &[asset("/new.js", b"new")]).unwrap();

        assert!(!store.contains("v1", "/old.js", "GET").unwrap());
        assert!(store.contains("v1", "/new.js", "GET").unwrap());
        assert_eq!(store.asset_count("v1").unwrap(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let mut store = AssetStore::open_in_memory().unwrap();
        store.install("v1", &[]).unwrap();
        store.put("v1", &asset("/data.json", b"one")).unwrap();
        store.put("v1", &asset("/data.json", b"two")).unwrap();

        let hit = store.get("v1", "/data.json", "GET").unwrap().unwrap();
        assert_eq!(hit.body, b"two");
        assert_eq!(store.asset_count("v1").unwrap(), 1);
    }

    #[test]
    fn test_purge_except() {
        let mut store = AssetStore::open_in_memory().unwrap();
        store.install("v1", &[asset("/a.js", b"a")]).unwrap();
        store.put("v2", &asset("/a.js", b"a2")).unwrap();
        store.put("v2", &asset("/b.js", b"b")).unwrap();

        let removed = store.purge_except("v2").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.generations().unwrap(), vec!["v2".to_string()]);

        // Purging again is a no-op.
        assert_eq!(store.purge_except("v2").unwrap(), 0);
    }

    #[test]
    fn test_keys_preserve_manifest_order() {
        let mut store = AssetStore::open_in_memory().unwrap();
        store
            .install(
                "v1",
                &[asset("/", b""), asset("/index.html", b""), asset("/style.css", b"")],
            )
            .unwrap();

        assert_eq!(
            store.keys("v1").unwrap(),
            vec!["/".to_string(), "/index.html".to_string(), "/style.css".to_string()]
        );
    }

    #[test]
    fn test_headers_round_trip() {
        let mut store = AssetStore::open_in_memory().unwrap();
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/css".to_string());
        store
            .install("v1", &[CachedAsset::new("/style.css", 200, headers, b"css".to_vec())])
            .unwrap();

        let hit = store.get("v1", "/style.css", "GET").unwrap().unwrap();
        assert_eq!(hit.headers.get("content-type").map(String::as_str), Some("text/css"));
    }

    #[test]
    fn test_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.db");

        {
            let mut store = AssetStore::open(&path).unwrap();
            store.install("v1", &[asset("/app.js", b"js")]).unwrap();
        }

        let store = AssetStore::open(&path).unwrap();
        let hit = store.get("v1", "/app.js", "GET").unwrap().unwrap();
        assert_eq!(hit.body, b"js");
    }
}
