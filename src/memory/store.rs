use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::memory::types::{unix_ts, MemoryRecord, Turn};

pub const DB_FILENAME: &str = "memories.db";

/// Participant-keyed persistence of [`MemoryRecord`]s.
///
/// Records are independent of each other; callers serialize access within a
/// participant (see `MemoryManager`).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Stored record, or `None` when the participant has never been saved.
    async fn fetch(&self, participant_id: &str) -> anyhow::Result<Option<MemoryRecord>>;

    /// Upsert every field and stamp `last_updated`.
    async fn save(
        &self,
        participant_id: &str,
        short_term: &[Turn],
        long_term_summary: &str,
        turn_count: u32,
    ) -> anyhow::Result<()>;

    /// All records, ordered by participant id.
    async fn list(&self) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Stored record or a fresh default. Never fails for a missing key.
    async fn get(&self, participant_id: &str) -> anyhow::Result<MemoryRecord> {
        Ok(self
            .fetch(participant_id)
            .await?
            .unwrap_or_else(|| MemoryRecord::new(participant_id)))
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    pub async fn init(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn fetch(&self, participant_id: &str) -> anyhow::Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                "SELECT * FROM memories WHERE participant_id = ?1",
                params![participant_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn save(
        &self,
        participant_id: &str,
        short_term: &[Turn],
        long_term_summary: &str,
        turn_count: u32,
    ) -> anyhow::Result<()> {
        let short_term_json = serde_json::to_string(short_term)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO memories (participant_id, short_term, long_term_summary, turn_count, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(participant_id) DO UPDATE SET
                short_term = excluded.short_term,
                long_term_summary = excluded.long_term_summary,
                turn_count = excluded.turn_count,
                last_updated = excluded.last_updated
            "#,
            params![
                participant_id,
                short_term_json,
                long_term_summary,
                turn_count as i64,
                unix_ts(),
            ],
        )?;
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM memories ORDER BY participant_id")?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            participant_id TEXT PRIMARY KEY,
            short_term TEXT NOT NULL,
            long_term_summary TEXT NOT NULL,
            turn_count INTEGER NOT NULL,
            last_updated INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_last_updated ON memories(last_updated);
        "#,
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let participant_id: String = row.get("participant_id")?;
    let short_term_json: String = row.get("short_term")?;
    let long_term_summary: String = row.get("long_term_summary")?;
    let turn_count: i64 = row.get("turn_count")?;
    let last_updated: i64 = row.get("last_updated")?;

    Ok(MemoryRecord {
        short_term: decode_short_term(&participant_id, &short_term_json),
        participant_id,
        long_term_summary,
        turn_count: turn_count.clamp(0, u32::MAX as i64) as u32,
        last_updated: Some(last_updated),
    })
}

/// A corrupt log must not block the participant's next conversation.
fn decode_short_term(participant_id: &str, raw: &str) -> Vec<Turn> {
    match serde_json::from_str::<Vec<Turn>>(raw) {
        Ok(turns) => turns,
        Err(e) => {
            tracing::warn!(
                participant_id,
                error = %e,
                "short-term log is unreadable, starting from an empty window"
            );
            Vec::new()
        }
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn fetch(&self, participant_id: &str) -> anyhow::Result<Option<MemoryRecord>> {
        Ok(self.records.read().get(participant_id).cloned())
    }

    async fn save(
        &self,
        participant_id: &str,
        short_term: &[Turn],
        long_term_summary: &str,
        turn_count: u32,
    ) -> anyhow::Result<()> {
        let record = MemoryRecord {
            participant_id: participant_id.to_string(),
            short_term: short_term.to_vec(),
            long_term_summary: long_term_summary.to_string(),
            turn_count,
            last_updated: Some(unix_ts()),
        };
        self.records
            .write()
            .insert(participant_id.to_string(), record);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<MemoryRecord>> {
        let mut out: Vec<MemoryRecord> = self.records.read().values().cloned().collect();
        out.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    async fn sqlite(dir: &TempDir) -> SqliteStore {
        SqliteStore::init(&dir.path().join("memory").join(DB_FILENAME))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_participant_reads_default_twice() {
        let dir = TempDir::new().unwrap();
        let store = sqlite(&dir).await;

        let a = store.get("ghost").await.unwrap();
        let b = store.get("ghost").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, MemoryRecord::new("ghost"));
        assert!(store.fetch("ghost").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_existing_record() {
        let dir = TempDir::new().unwrap();
        let store = sqlite(&dir).await;

        store
            .save("u1", &[Turn::user("hi"), Turn::assistant("hey")], "", 1)
            .await
            .unwrap();
        store
            .save("u1", &[Turn::user("again")], "they said hi", 0)
            .await
            .unwrap();

        let r = store.get("u1").await.unwrap();
        assert_eq!(r.short_term, vec![Turn::user("again")]);
        assert_eq!(r.long_term_summary, "they said hi");
        assert_eq!(r.turn_count, 0);
        assert!(r.last_updated.is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = sqlite(&dir).await;
            store
                .save("g1", &[Turn::user("a"), Turn::assistant("b")], "s", 1)
                .await
                .unwrap();
        }
        let store = sqlite(&dir).await;
        let r = store.get("g1").await.unwrap();
        assert_eq!(r.turn_count, 1);
        assert_eq!(r.short_term.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_short_term_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = sqlite(&dir).await;
        store.save("u1", &[], "kept summary", 3).await.unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "UPDATE memories SET short_term = '{not json' WHERE participant_id = 'u1'",
                [],
            )
            .unwrap();
        }

        let r = store.get("u1").await.unwrap();
        assert!(r.short_term.is_empty());
        assert_eq!(r.long_term_summary, "kept summary");
        assert_eq!(r.turn_count, 3);
    }

    #[tokio::test]
    async fn in_memory_store_upserts_and_lists_sorted() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("b").await.unwrap(), MemoryRecord::new("b"));

        store.save("b", &[Turn::user("x")], "", 0).await.unwrap();
        store.save("a", &[], "sum", 0).await.unwrap();
        store.save("b", &[], "", 0).await.unwrap();

        let all = store.list().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(all[1].short_term.is_empty());
    }
}
