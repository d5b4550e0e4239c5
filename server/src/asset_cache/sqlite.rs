//! SQLite implementation of the CacheStorage trait

use crate::asset_cache::{AssetResponse, CacheError, CacheStorage, RequestKey, ResponseKind};
use bytes::Bytes;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed implementation of CacheStorage
///
/// Generations persist across restarts, so a proxy restarted while the
/// origin is down still serves the last activated generation.
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_RESPONSE: &str =
    "SELECT e.status, e.kind, e.headers, e.body, e.response_url FROM entries e";

type ResponseRow = (i64, String, String, Vec<u8>, String);

impl SqliteCacheStorage {
    /// Create a new SQLite cache storage
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CacheError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Create a storage backed by a private in-memory database
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Database(format!("Lock poisoned: {}", e)))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn()?;

        // Generations table: id gives creation order for lookups
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        // Entries table: one stored response per (generation, request identity)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                generation TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                kind TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                response_url TEXT NOT NULL,
                cached_at DATETIME NOT NULL,
                PRIMARY KEY (generation, method, url)
            )
            "#,
            [],
        )?;

        // Index for cross-generation lookups
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_request ON entries(method, url)",
            [],
        )?;

        info!("Cache storage database schema initialized");
        Ok(())
    }

    fn generation_exists(conn: &Connection, name: &str) -> Result<bool, CacheError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM generations WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn row_to_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResponseRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn decode_response(
        (status, kind, headers, body, url): ResponseRow,
    ) -> Result<AssetResponse, CacheError> {
        let status = u16::try_from(status)
            .map_err(|_| CacheError::Database(format!("Invalid response status: {}", status)))?;
        let kind = ResponseKind::parse(&kind)
            .ok_or_else(|| CacheError::Database(format!("Unknown response kind: {}", kind)))?;
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)?;
        Ok(AssetResponse {
            status,
            headers,
            body: Bytes::from(body),
            kind,
            url,
        })
    }
}

#[async_trait::async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        if inserted > 0 {
            debug!("Created cache generation {}", name);
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.conn()?;
        Self::generation_exists(&conn, name)
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<AssetResponse>, CacheError> {
        if !key.is_cacheable_method() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "{} WHERE e.generation = ?1 AND e.method = ?2 AND e.url = ?3",
                    SELECT_RESPONSE
                ),
                params![name, key.method, key.url],
                Self::row_to_response,
            )
            .optional()?;

        row.map(Self::decode_response).transpose()
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<AssetResponse>, CacheError> {
        if !key.is_cacheable_method() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    r#"{}
                    JOIN generations g ON g.name = e.generation
                    WHERE e.method = ?1 AND e.url = ?2
                    ORDER BY g.id ASC
                    LIMIT 1"#,
                    SELECT_RESPONSE
                ),
                params![key.method, key.url],
                Self::row_to_response,
            )
            .optional()?;

        row.map(Self::decode_response).transpose()
    }

    async fn put(
        &self,
        name: &str,
        key: &RequestKey,
        response: &AssetResponse,
    ) -> Result<(), CacheError> {
        self.put_all(name, &[(key.clone(), response.clone())]).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: &[(RequestKey, AssetResponse)],
    ) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if !Self::generation_exists(&tx, name)? {
            return Err(CacheError::GenerationNotFound(name.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO entries
                    (generation, method, url, status, kind, headers, body, response_url, cached_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (key, response) in entries {
                if !key.is_cacheable_method() {
                    // Dropping the transaction rolls back earlier rows
                    return Err(CacheError::InvalidUrl(format!(
                        "cannot cache {} request for {}",
                        key.method, key.url
                    )));
                }
                let headers = serde_json::to_string(&response.headers)?;
                stmt.execute(params![
                    name,
                    key.method,
                    key.url,
                    i64::from(response.status),
                    response.kind.as_str(),
                    headers,
                    response.body.as_ref(),
                    response.url,
                    now
                ])?;
            }
        }
        tx.commit()?;

        debug!("Stored {} entries in cache generation {}", entries.len(), name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE generation = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY id ASC")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let conn = self.conn()?;
        if !Self::generation_exists(&conn, name)? {
            return Err(CacheError::GenerationNotFound(name.to_string()));
        }
        let mut stmt = conn.prepare(
            "SELECT method, url FROM entries WHERE generation = ?1 ORDER BY method, url",
        )?;
        let keys = stmt
            .query_map(params![name], |row| {
                Ok(RequestKey {
                    method: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn storage_type(&self) -> &str {
        "sqlite"
    }
}
