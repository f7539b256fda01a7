use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use triage_core::{KnowledgeEntry, NewTurn, TriageStore};

pub const DB_FILE: &str = "triage.sqlite";

#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
    busy_timeout: Duration,
}

/// Input for [`Kernel::upsert_knowledge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeUpsert {
    pub service: String,
    pub key_phrase: String,
    pub answer_primary: String,
    pub answer_secondary: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub created_by_automation: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub service: String,
    pub status: String,
    pub page_url: Option<String>,
    pub meta: serde_json::Value,
    pub created: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: String,
    pub body: String,
    pub data: serde_json::Value,
    pub created: String,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

const BUSY_MS_ENV: &str = "TRIAGE_SQLITE_BUSY_MS";
const DEFAULT_BUSY_MS: u64 = 5000;

/// Busy timeout from the raw `TRIAGE_SQLITE_BUSY_MS` value; unset or blank means 5000ms.
fn busy_timeout_from(raw: Option<&str>) -> Result<Duration> {
    let ms = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_BUSY_MS,
        Some(s) => s
            .parse::<u64>()
            .with_context(|| format!("invalid {BUSY_MS_ENV}: {s}"))?,
    };
    Ok(Duration::from_millis(ms))
}

fn parse_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::json!({}))
}

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        let db_path = dir.join(DB_FILE);
        let busy_timeout = busy_timeout_from(std::env::var(BUSY_MS_ENV).ok().as_deref())?;
        let kernel = Self {
            db_path,
            busy_timeout,
        };
        let conn = kernel.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        Ok(kernel)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_entries (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              service TEXT NOT NULL,
              key_phrase TEXT NOT NULL,
              answer_primary TEXT NOT NULL,
              answer_secondary TEXT,
              metadata TEXT NOT NULL DEFAULT '{}',
              created_by_automation INTEGER NOT NULL DEFAULT 0,
              created TEXT NOT NULL,
              updated TEXT NOT NULL,
              UNIQUE(service, key_phrase)
            );
            CREATE INDEX IF NOT EXISTS idx_knowledge_service ON knowledge_entries(service);

            CREATE TABLE IF NOT EXISTS conversations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER,
              service TEXT NOT NULL,
              status TEXT NOT NULL,
              page_url TEXT,
              meta TEXT NOT NULL,
              created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

            CREATE TABLE IF NOT EXISTS messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
              sender_type TEXT NOT NULL CHECK (sender_type IN ('user','ai','system')),
              body TEXT NOT NULL,
              data TEXT NOT NULL,
              created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        // Needed per connection for ON DELETE CASCADE
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert an entry or update the one stored under `(service, key_phrase)`.
    pub fn upsert_knowledge(&self, entry: &KnowledgeUpsert) -> Result<i64> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let meta_s = serde_json::to_string(&entry.metadata).unwrap_or("{}".to_string());
        let id: i64 = conn.query_row(
            "INSERT INTO knowledge_entries(service,key_phrase,answer_primary,answer_secondary,metadata,created_by_automation,created,updated)
             VALUES (?,?,?,?,?,?,?,?)
             ON CONFLICT(service,key_phrase) DO UPDATE SET
               answer_primary=excluded.answer_primary,
               answer_secondary=excluded.answer_secondary,
               metadata=excluded.metadata,
               created_by_automation=excluded.created_by_automation,
               updated=excluded.updated
             RETURNING id",
            params![
                entry.service,
                entry.key_phrase,
                entry.answer_primary,
                entry.answer_secondary,
                meta_s,
                entry.created_by_automation,
                now,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn knowledge_for_service(&self, service: &str) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,service,key_phrase,answer_primary,answer_secondary,metadata,created_by_automation
             FROM knowledge_entries WHERE service=? ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([service])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let meta_s: String = r.get(5)?;
            let metadata = match parse_json(&meta_s) {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            out.push(KnowledgeEntry {
                id: r.get(0)?,
                service: r.get(1)?,
                key_phrase: r.get(2)?,
                answer_primary: r.get(3)?,
                answer_secondary: r.get(4)?,
                metadata,
                created_by_automation: r.get(6)?,
            });
        }
        Ok(out)
    }

    pub fn count_knowledge(&self, service: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        let n: i64 = match service {
            Some(s) => conn.query_row(
                "SELECT COUNT(1) FROM knowledge_entries WHERE service=?",
                [s],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(1) FROM knowledge_entries", [], |row| {
                row.get(0)
            })?,
        };
        Ok(n)
    }

    /// Write a conversation and its messages in one transaction.
    pub fn record_turn(&self, turn: &NewTurn) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_rfc3339();
        let meta_s = serde_json::to_string(&turn.meta).unwrap_or("{}".to_string());
        tx.execute(
            "INSERT INTO conversations(user_id,service,status,page_url,meta,created) VALUES (?,?,?,?,?,?)",
            params![turn.user_id, turn.service, turn.status, turn.page_url, meta_s, now],
        )?;
        let conversation_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages(conversation_id,sender_type,body,data,created) VALUES (?,?,?,?,?)",
            )?;
            for msg in &turn.messages {
                let data_s = serde_json::to_string(&msg.data).unwrap_or("{}".to_string());
                stmt.execute(params![
                    conversation_id,
                    msg.sender.as_str(),
                    msg.body,
                    data_s,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(conversation_id)
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id,user_id,service,status,page_url,meta,created FROM conversations WHERE id=?",
                [id],
                conversation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent conversations first.
    pub fn list_conversations(&self, limit: i64) -> Result<Vec<ConversationRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,user_id,service,status,page_url,meta,created FROM conversations ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit], conversation_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,conversation_id,sender_type,body,data,created FROM messages WHERE conversation_id=? ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let data_s: String = r.get(4)?;
            out.push(MessageRow {
                id: r.get(0)?,
                conversation_id: r.get(1)?,
                sender_type: r.get(2)?,
                body: r.get(3)?,
                data: parse_json(&data_s),
                created: r.get(5)?,
            });
        }
        Ok(out)
    }

    /// Delete a conversation and, through the foreign key, its messages.
    pub fn delete_conversation(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM conversations WHERE id=?", [id])?;
        Ok(n > 0)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn record_turn_async(&self, turn: &NewTurn) -> Result<i64> {
        let k = self.clone();
        let turn = turn.clone();
        tokio::task::spawn_blocking(move || k.record_turn(&turn))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_conversation_async(&self, id: i64) -> Result<Option<ConversationRow>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.get_conversation(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_conversations_async(&self, limit: i64) -> Result<Vec<ConversationRow>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_conversations(limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_messages_async(&self, conversation_id: i64) -> Result<Vec<MessageRow>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_messages(conversation_id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn count_knowledge_async(&self, service: Option<&str>) -> Result<i64> {
        let k = self.clone();
        let s = service.map(str::to_string);
        tokio::task::spawn_blocking(move || k.count_knowledge(s.as_deref()))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    let meta_s: String = row.get(5)?;
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        service: row.get(2)?,
        status: row.get(3)?,
        page_url: row.get(4)?,
        meta: parse_json(&meta_s),
        created: row.get(6)?,
    })
}

impl TriageStore for Kernel {
    fn knowledge_for_service(&self, service: &str) -> Result<Vec<KnowledgeEntry>> {
        Kernel::knowledge_for_service(self, service)
    }

    fn record_turn(&self, turn: &NewTurn) -> Result<i64> {
        let id = Kernel::record_turn(self, turn)?;
        tracing::debug!(target: "triage::kernel", conversation_id = id, "turn committed");
        Ok(id)
    }
}
