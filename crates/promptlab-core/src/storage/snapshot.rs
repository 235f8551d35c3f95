use crate::model::Prompt;
use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Persistence capability behind the sync bridge. Best effort: callers log
/// failures and carry on.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn persist(&self, prompts: &[Prompt]) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Option<Vec<Prompt>>>;
}

/// Stable hash of a serialized snapshot, used to skip unchanged writes.
pub fn fingerprint(payload_json: &str) -> String {
    let mut h = Sha256::new();
    h.update(payload_json.as_bytes());
    hex::encode(h.finalize())
}

/// Keeps the most recent snapshots as JSON blobs in SQLite.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
    retain: usize,
}

impl SqliteSnapshotStore {
    const DEFAULT_RETAIN: usize = 10;

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("failed to open snapshot db")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            retain: Self::DEFAULT_RETAIN,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory snapshot db")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            retain: Self::DEFAULT_RETAIN,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn with_retain(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    #[cfg(test)]
    fn count(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn.query_row("SELECT count(*) FROM snapshots", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

fn latest_fingerprint(conn: &Connection) -> anyhow::Result<Option<String>> {
    let fp = conn
        .query_row(
            "SELECT fingerprint FROM snapshots ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(fp)
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn persist(&self, prompts: &[Prompt]) -> anyhow::Result<()> {
        let payload = serde_json::to_string(prompts)?;
        let fp = fingerprint(&payload);
        let created_at = chrono::Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        // unchanged since the last snapshot
        if latest_fingerprint(&conn)?.as_deref() == Some(fp.as_str()) {
            tracing::debug!(event = "snapshot_unchanged", fingerprint = %fp);
            return Ok(());
        }
        conn.execute(
            "INSERT INTO snapshots(created_at, fingerprint, prompt_count, payload_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![created_at, fp, prompts.len() as i64, payload],
        )?;
        conn.execute(
            "DELETE FROM snapshots WHERE id NOT IN (
                SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1
             )",
            params![self.retain as i64],
        )?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<Vec<Prompt>>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(s) => {
                let prompts: Vec<Prompt> =
                    serde_json::from_str(&s).context("corrupt snapshot payload")?;
                Ok(Some(prompts))
            }
            None => Ok(None),
        }
    }
}
