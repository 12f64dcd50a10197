use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use renfield_core::types::{ConversationSummary, Message, MessageRole, SearchHit, Session};

use crate::error::{Result, StoreError};

/// Persists the append-only per-session message log (§4.1).
///
/// Wraps a single SQLite connection behind a `Mutex`, matching the teacher's
/// single-node convention (`skynet-sessions::SessionManager`,
/// `skynet-memory::MemoryManager`) rather than a connection pool.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Append a message to a session, creating the session row on first use.
    ///
    /// Invariant I2: `sequence` is assigned by the store itself, strictly
    /// increasing and gap-free per session — callers never supply one.
    #[instrument(skip(self, content, metadata), fields(session_id))]
    pub fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<Message> {
        let mut db = self.db.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let tx = db.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO sessions (session_id, created_at, updated_at)
             VALUES (?1, ?2, ?2)",
            params![session_id, now_str],
        )?;

        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

        let role_str = role_to_str(role);
        let metadata_str = serde_json::to_string(&metadata)?;

        tx.execute(
            "INSERT INTO messages (session_id, sequence, role, content, metadata, timestamp, partial)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![session_id, next_seq, role_str, content, metadata_str, now_str],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE session_id = ?2",
            params![now_str, session_id],
        )?;

        tx.commit()?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            sequence: next_seq,
            role,
            content: content.to_string(),
            metadata,
            timestamp: now,
            partial: false,
        })
    }

    /// Finalize the most recent assistant message as `partial` after a
    /// mid-stream cancellation (§4.5 cancellation handling).
    #[instrument(skip(self), fields(session_id))]
    pub fn mark_partial(&self, session_id: &str, sequence: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE messages SET partial = 1 WHERE session_id = ?1 AND sequence = ?2",
            params![session_id, sequence],
        )?;
        if changed == 0 {
            return Err(StoreError::MessageNotFound {
                session_id: session_id.to_string(),
                sequence,
            });
        }
        Ok(())
    }

    /// Return the most recent `limit` messages for a session, oldest first —
    /// the sliding context window the Turn Engine feeds to the LLM collaborator
    /// (§4.5, window size depends on `SessionOrigin::context_window_size`).
    #[instrument(skip(self), fields(session_id, limit))]
    pub fn window(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, sequence, role, content, metadata, timestamp, partial
             FROM messages WHERE session_id = ?1
             ORDER BY sequence DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], row_to_message)?;
        let mut out: Vec<Message> = rows.collect::<std::result::Result<_, _>>()?;
        out.reverse();
        Ok(out)
    }

    /// Cheap read-only metadata about a session's transcript (§4.1
    /// `summarize(session_id)`): message count, endpoints, timestamps. `None`
    /// for an unknown session. Distinct from `compact`, which rewrites the
    /// log using an LLM-authored summary.
    #[instrument(skip(self), fields(session_id))]
    pub fn summarize(&self, session_id: &str) -> Result<Option<ConversationSummary>> {
        let db = self.db.lock().unwrap();
        let session: Option<(String, String)> = db
            .query_row(
                "SELECT created_at, updated_at FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((created_at, updated_at)) = session else {
            return Ok(None);
        };

        let message_count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let first_message = db
            .query_row(
                "SELECT id, session_id, sequence, role, content, metadata, timestamp, partial
                 FROM messages WHERE session_id = ?1 ORDER BY sequence ASC LIMIT 1",
                params![session_id],
                row_to_message,
            )
            .optional()?;
        let last_message = db
            .query_row(
                "SELECT id, session_id, sequence, role, content, metadata, timestamp, partial
                 FROM messages WHERE session_id = ?1 ORDER BY sequence DESC LIMIT 1",
                params![session_id],
                row_to_message,
            )
            .optional()?;

        Ok(Some(ConversationSummary {
            session_id: session_id.to_string(),
            message_count: message_count as usize,
            first_message,
            last_message,
            created_at: parse_rfc3339(created_at),
            updated_at: parse_rfc3339(updated_at),
        }))
    }

    /// Collapse all messages up to and including `up_to_sequence` into a
    /// single synthetic summary message, renumbering the remainder so the
    /// sequence stays gap-free (invariant I2 still holds post-compaction).
    ///
    /// The summary text itself is produced by the external LLM collaborator —
    /// the store only persists the result.
    #[instrument(skip(self, summary_text), fields(session_id, up_to_sequence))]
    pub fn compact(
        &self,
        session_id: &str,
        up_to_sequence: i64,
        summary_text: &str,
    ) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let now_str = Utc::now().to_rfc3339();

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }

        let mut stmt = tx.prepare(
            "SELECT id, session_id, sequence, role, content, metadata, timestamp, partial
             FROM messages WHERE session_id = ?1 AND sequence > ?2
             ORDER BY sequence ASC",
        )?;
        let remainder: Vec<Message> = stmt
            .query_map(params![session_id, up_to_sequence], row_to_message)?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;

        let summary_metadata = serde_json::json!({ "kind": "summary" });
        tx.execute(
            "INSERT INTO messages (session_id, sequence, role, content, metadata, timestamp, partial)
             VALUES (?1, 1, 'tool', ?2, ?3, ?4, 0)",
            params![
                session_id,
                summary_text,
                serde_json::to_string(&summary_metadata)?,
                now_str
            ],
        )?;
        for (idx, msg) in remainder.into_iter().enumerate() {
            let new_seq = idx as i64 + 2;
            let role_str = role_to_str(msg.role);
            let metadata_str = serde_json::to_string(&msg.metadata)?;
            tx.execute(
                "INSERT INTO messages (session_id, sequence, role, content, metadata, timestamp, partial)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    new_seq,
                    role_str,
                    msg.content,
                    metadata_str,
                    msg.timestamp.to_rfc3339(),
                    msg.partial as i64
                ],
            )?;
        }

        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE session_id = ?2",
            params![now_str, session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// List sessions most-recently-updated first, paginated, for the REST
    /// surface (§6 `GET /api/chat/conversations?limit&offset`). Returns the
    /// page alongside the total session count.
    #[instrument(skip(self))]
    pub fn list(&self, limit: usize, offset: usize) -> Result<(Vec<Session>, usize)> {
        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;

        let mut stmt = db.prepare(
            "SELECT session_id, created_at, updated_at FROM sessions
             ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(Session {
                session_id: row.get(0)?,
                created_at: parse_rfc3339(row.get::<_, String>(1)?),
                updated_at: parse_rfc3339(row.get::<_, String>(2)?),
            })
        })?;
        let sessions = rows.collect::<std::result::Result<_, _>>()?;
        Ok((sessions, total as usize))
    }

    /// Case-insensitive substring search over message content, across every
    /// session, one snippet per matching session, ranked by recency of the
    /// match (§4.1 `search`, §6 `GET /api/chat/search`).
    ///
    /// Uses a `LIKE`-based candidate scan, then re-checks literal substring
    /// containment in Rust, since SQL `LIKE` collation alone wouldn't reliably
    /// satisfy arbitrary substring queries like a partial word (§8 round-trip
    /// law).
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT session_id, content, timestamp FROM messages
             WHERE LOWER(content) LIKE '%' || LOWER(?1) || '%' ESCAPE '\\'
             ORDER BY timestamp DESC",
        )?;
        let escaped = escape_like(query);
        let mut best_per_session: std::collections::HashMap<String, SearchHit> = std::collections::HashMap::new();
        let rows = stmt.query_map(params![escaped], |row| {
            let session_id: String = row.get(0)?;
            let content: String = row.get(1)?;
            let timestamp: String = row.get(2)?;
            Ok((session_id, content, timestamp))
        })?;
        for row in rows {
            let (session_id, content, timestamp) = row?;
            if !content.to_lowercase().contains(&needle) {
                continue;
            }
            best_per_session.entry(session_id.clone()).or_insert_with(|| SearchHit {
                session_id,
                snippet: snippet_around(&content, query),
                matched_at: parse_rfc3339(timestamp),
            });
        }
        let mut hits: Vec<SearchHit> = best_per_session.into_values().collect();
        hits.sort_by(|a, b| b.matched_at.cmp(&a.matched_at));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Permanently delete a session and its full message log.
    #[instrument(skip(self), fields(session_id))]
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        let changed = tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Aggregate `(session_count, message_count)` across the whole store
    /// (§6 `GET /api/chat/stats`).
    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<(usize, usize)> {
        let db = self.db.lock().unwrap();
        let session_count: i64 = db.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let message_count: i64 = db.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok((session_count as usize, message_count as usize))
    }

    /// Delete sessions whose `updated_at` is older than `idle_threshold`,
    /// returning the number removed. Used by the retention sweep and by
    /// SessionRegistry's durable-side cleanup.
    #[instrument(skip(self))]
    pub fn cleanup(&self, idle_threshold: chrono::Duration) -> Result<usize> {
        let cutoff = (Utc::now() - idle_threshold).to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT session_id FROM sessions WHERE updated_at < ?1")?;
            stmt.query_map(params![cutoff], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?
        };
        for sid in &stale {
            tx.execute("DELETE FROM messages WHERE session_id = ?1", params![sid])?;
            tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![sid])?;
        }
        tx.commit()?;
        Ok(stale.len())
    }
}

/// Escape `%`, `_`, and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Build a short snippet centered on the first case-insensitive occurrence
/// of `query` within `content`.
fn snippet_around(content: &str, query: &str) -> String {
    const RADIUS: usize = 40;
    let lower = content.to_lowercase();
    let Some(byte_idx) = lower.find(&query.to_lowercase()) else {
        return content.chars().take(2 * RADIUS).collect();
    };
    let start = content
        .char_indices()
        .rev()
        .find(|(i, _)| *i <= byte_idx.saturating_sub(RADIUS))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = content
        .char_indices()
        .find(|(i, _)| *i >= byte_idx + query.len() + RADIUS)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("…");
    }
    snippet.push_str(&content[start..end]);
    if end < content.len() {
        snippet.push_str("…");
    }
    snippet
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn str_to_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

fn parse_rfc3339(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let metadata_str: String = row.get(5)?;
    let timestamp_str: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sequence: row.get(2)?,
        role: str_to_role(&role_str),
        content: row.get(4)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        timestamp: parse_rfc3339(timestamp_str),
        partial: row.get::<_, i64>(7)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn append_assigns_gap_free_sequence() {
        let s = store();
        let m1 = s.append("sess-1", MessageRole::User, "hi", serde_json::json!({})).unwrap();
        let m2 = s
            .append("sess-1", MessageRole::Assistant, "hello", serde_json::json!({}))
            .unwrap();
        assert_eq!(m1.sequence, 1);
        assert_eq!(m2.sequence, 2);
    }

    #[test]
    fn window_returns_oldest_first() {
        let s = store();
        for i in 0..5 {
            s.append("sess-1", MessageRole::User, &format!("msg{i}"), serde_json::json!({}))
                .unwrap();
        }
        let w = s.window("sess-1", 3).unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].content, "msg2");
        assert_eq!(w[2].content, "msg4");
    }

    #[test]
    fn search_finds_appended_content() {
        let s = store();
        s.append("sess-1", MessageRole::User, "the quick brown fox", serde_json::json!({}))
            .unwrap();
        let hits = s.search("quick", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "sess-1");
        assert!(hits[0].snippet.contains("quick"));
    }

    #[test]
    fn search_is_case_insensitive_and_scoped_per_session() {
        let s = store();
        s.append("sess-1", MessageRole::User, "The Quick Brown Fox", serde_json::json!({}))
            .unwrap();
        s.append("sess-2", MessageRole::User, "nothing relevant here", serde_json::json!({}))
            .unwrap();
        let hits = s.search("quick", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "sess-1");
    }

    #[test]
    fn summarize_reports_counts_and_endpoints() {
        let s = store();
        assert!(s.summarize("missing").unwrap().is_none());

        s.append("sess-1", MessageRole::User, "first", serde_json::json!({})).unwrap();
        s.append("sess-1", MessageRole::Assistant, "last", serde_json::json!({})).unwrap();
        let summary = s.summarize("sess-1").unwrap().unwrap();
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.first_message.unwrap().content, "first");
        assert_eq!(summary.last_message.unwrap().content, "last");
    }

    #[test]
    fn compact_collapses_and_renumbers() {
        let s = store();
        for i in 0..4 {
            s.append("sess-1", MessageRole::User, &format!("msg{i}"), serde_json::json!({}))
                .unwrap();
        }
        s.compact("sess-1", 2, "summary of first two").unwrap();
        let w = s.window("sess-1", 10).unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].sequence, 1);
        assert_eq!(w[0].content, "summary of first two");
        assert_eq!(w[1].sequence, 2);
        assert_eq!(w[1].content, "msg2");
        assert_eq!(w[2].sequence, 3);
    }

    #[test]
    fn delete_removes_session_and_messages() {
        let s = store();
        s.append("sess-1", MessageRole::User, "hi", serde_json::json!({})).unwrap();
        s.delete("sess-1").unwrap();
        assert!(s.window("sess-1", 10).unwrap().is_empty());
        assert!(matches!(s.delete("sess-1"), Err(StoreError::SessionNotFound(_))));
    }

    #[test]
    fn cleanup_removes_only_stale_sessions() {
        let s = store();
        s.append("fresh", MessageRole::User, "hi", serde_json::json!({})).unwrap();
        let removed = s.cleanup(chrono::Duration::seconds(-60)).unwrap();
        assert_eq!(removed, 1);
        let (sessions, total) = s.list(10, 0).unwrap();
        assert!(sessions.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn stats_counts_sessions_and_messages() {
        let s = store();
        s.append("sess-1", MessageRole::User, "hi", serde_json::json!({})).unwrap();
        s.append("sess-1", MessageRole::Assistant, "hello", serde_json::json!({})).unwrap();
        s.append("sess-2", MessageRole::User, "yo", serde_json::json!({})).unwrap();
        let (sessions, messages) = s.stats().unwrap();
        assert_eq!(sessions, 2);
        assert_eq!(messages, 3);
    }

    #[test]
    fn list_paginates_and_reports_total() {
        let s = store();
        for i in 0..5 {
            s.append(&format!("sess-{i}"), MessageRole::User, "hi", serde_json::json!({}))
                .unwrap();
        }
        let (page, total) = s.list(2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
        let (next_page, total2) = s.list(2, 2).unwrap();
        assert_eq!(next_page.len(), 2);
        assert_eq!(total2, 5);
    }
}
