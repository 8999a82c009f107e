//! Typed store adapter over SQLite.
//!
//! One method per access pattern, no branching beyond parameter shaping.
//! Underlying failures are wrapped into [`AppError::Upstream`] with the
//! original message preserved.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, Result};
use crate::models::{
    ChatMessage, ChatSession, Document, DocumentStatus, Evidence, MessageMetadata, MessageRole,
    MonitoringSubject, RiskFactor, ViolationCase, ViolationEvent,
};

/// Page request resolved from query parameters.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit as i64
    }
}

/// One page of query results with an opaque continuation token.
#[derive(Debug, Clone)]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    pub total: i64,
    /// Present when more results follow this page.
    pub continuation: Option<String>,
}

/// Encode the next offset as an opaque token, URL-safe so it can ride in a
/// query string unescaped.
pub fn encode_continuation(next_offset: i64) -> String {
    BASE64.encode(format!("offset:{}", next_offset))
}

/// Decode a continuation token back into an offset.
pub fn decode_continuation(token: &str) -> Result<i64> {
    let raw = BASE64
        .decode(token)
        .map_err(|_| AppError::Validation("invalid continuation token".into()))?;
    let text = String::from_utf8(raw)
        .map_err(|_| AppError::Validation("invalid continuation token".into()))?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| AppError::Validation("invalid continuation token".into()))
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Store façade holding the connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ============ Sessions ============

    pub async fn put_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at, is_active, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.updated_at))
        .bind(session.is_active)
        .bind(session.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at, is_active, metadata_json
             FROM chat_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    pub async fn touch_session(&self, session_id: &str, updated_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(to_millis(updated_at))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn deactivate_session(
        &self,
        session_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE chat_sessions SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(to_millis(updated_at))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sessions for one user, most recently updated first.
    pub async fn list_sessions(&self, user_id: &str, page: Page) -> Result<QueryPage<ChatSession>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at, is_active, metadata_json
             FROM chat_sessions WHERE user_id = ?
             ORDER BY updated_at DESC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items: Vec<ChatSession> = rows
            .into_iter()
            .map(session_from_row)
            .collect::<Result<_>>()?;

        let next = page.offset() + items.len() as i64;
        let continuation = (next < total).then(|| encode_continuation(next));

        Ok(QueryPage {
            items,
            total,
            continuation,
        })
    }

    // ============ Messages ============

    pub async fn put_message(&self, message: &ChatMessage) -> Result<()> {
        let metadata_json = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::upstream("store", e))?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, timestamp, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(to_millis(message.timestamp))
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Messages for a session, ascending by timestamp.
    pub async fn list_messages(
        &self,
        session_id: &str,
        page: Page,
    ) -> Result<QueryPage<ChatMessage>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            "SELECT id, session_id, role, content, timestamp, metadata_json
             FROM chat_messages WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(session_id)
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items: Vec<ChatMessage> = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<_>>()?;

        let next = page.offset() + items.len() as i64;
        let continuation = (next < total).then(|| encode_continuation(next));

        Ok(QueryPage {
            items,
            total,
            continuation,
        })
    }

    /// The most recent `limit` messages for a session, in chronological
    /// order. Fetched descending then reversed.
    pub async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, timestamp, metadata_json
             FROM chat_messages WHERE session_id = ?
             ORDER BY timestamp DESC, id DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<ChatMessage> = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<_>>()?;
        items.reverse();
        Ok(items)
    }

    /// Timestamp of the session's latest message, if any.
    pub async fn last_message_timestamp(
        &self,
        session_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(timestamp) FROM chat_messages WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ms.map(from_millis))
    }

    pub async fn count_messages(&self, session_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ============ Documents ============

    pub async fn put_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents
                (id, title, content, content_type, size, status, tags_json,
                 created_at, updated_at, last_analysis_json, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.content_type)
        .bind(doc.size)
        .bind(doc.status.as_str())
        .bind(serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".into()))
        .bind(to_millis(doc.created_at))
        .bind(to_millis(doc.updated_at))
        .bind(doc.last_analysis.as_ref().map(|v| v.to_string()))
        .bind(doc.analyzed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, content, content_type, size, status, tags_json,
                    created_at, updated_at, last_analysis_json, analyzed_at
             FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(document_from_row).transpose()
    }

    /// Back-write an analysis result onto a document record.
    pub async fn record_document_analysis(
        &self,
        document_id: &str,
        analysis: &serde_json::Value,
        analyzed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET last_analysis_json = ?, analyzed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(analysis.to_string())
        .bind(to_millis(analyzed_at))
        .bind(to_millis(analyzed_at))
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Reference records ============
    //
    // Written by the seeder; the core only reads them.

    pub async fn put_subject(&self, subject: &MonitoringSubject) -> Result<()> {
        let conditions_json = serde_json::to_string(&subject.conditions)
            .map_err(|e| AppError::upstream("store", e))?;
        sqlx::query(
            "INSERT OR REPLACE INTO monitoring_subjects
                 (id, name, supervision_level, conditions_json, officer, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&subject.id)
        .bind(&subject.name)
        .bind(&subject.supervision_level)
        .bind(conditions_json)
        .bind(&subject.officer)
        .bind(to_millis(subject.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_subject(&self, subject_id: &str) -> Result<Option<MonitoringSubject>> {
        let row = sqlx::query(
            "SELECT id, name, supervision_level, conditions_json, officer, created_at
             FROM monitoring_subjects WHERE id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let conditions_json: String = row.get("conditions_json");
            MonitoringSubject {
                id: row.get("id"),
                name: row.get("name"),
                supervision_level: row.get("supervision_level"),
                conditions: serde_json::from_str(&conditions_json).unwrap_or_default(),
                officer: row.get("officer"),
                created_at: from_millis(row.get("created_at")),
            }
        }))
    }

    pub async fn put_case(&self, case: &ViolationCase) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO violation_cases
                 (id, subject_id, title, description, severity, status, risk_score,
                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&case.id)
        .bind(&case.subject_id)
        .bind(&case.title)
        .bind(&case.description)
        .bind(case.severity.as_str())
        .bind(case.status.as_str())
        .bind(case.risk_score)
        .bind(to_millis(case.created_at))
        .bind(to_millis(case.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn put_evidence(&self, evidence: &Evidence) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO evidence (id, case_id, kind, description, collected_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&evidence.id)
        .bind(&evidence.case_id)
        .bind(&evidence.kind)
        .bind(&evidence.description)
        .bind(to_millis(evidence.collected_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn put_risk_factor(&self, factor: &RiskFactor) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO risk_factors (id, case_id, name, weight)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&factor.id)
        .bind(&factor.case_id)
        .bind(&factor.name)
        .bind(factor.weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn put_event(&self, event: &ViolationEvent) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO violation_events
                 (id, subject_id, event_type, description, occurred_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.subject_id)
        .bind(&event.event_type)
        .bind(&event.description)
        .bind(to_millis(event.occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============ Row mapping ============

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChatSession> {
    let metadata_json: String = row.get("metadata_json");
    let metadata =
        serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Object(Default::default()));

    Ok(ChatSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
        is_active: row.get("is_active"),
        metadata,
    })
}

fn message_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChatMessage> {
    let role_str: String = row.get("role");
    let role = MessageRole::parse(&role_str)
        .ok_or_else(|| AppError::upstream("store", format!("unknown message role: {}", role_str)))?;

    let metadata: Option<MessageMetadata> = row
        .get::<Option<String>, _>("metadata_json")
        .and_then(|json| serde_json::from_str(&json).ok());

    Ok(ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role,
        content: row.get("content"),
        timestamp: from_millis(row.get("timestamp")),
        metadata,
    })
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str).ok_or_else(|| {
        AppError::upstream("store", format!("unknown document status: {}", status_str))
    })?;

    let tags_json: String = row.get("tags_json");
    let tags = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        content_type: row.get("content_type"),
        size: row.get("size"),
        status,
        tags,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
        last_analysis: row
            .get::<Option<String>, _>("last_analysis_json")
            .and_then(|json| serde_json::from_str(&json).ok()),
        analyzed_at: row.get::<Option<i64>, _>("analyzed_at").map(from_millis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_roundtrip() {
        let token = encode_continuation(40);
        assert_eq!(decode_continuation(&token).unwrap(), 40);
    }

    #[test]
    fn test_continuation_rejects_garbage() {
        assert!(decode_continuation("not-base64!").is_err());
        let bogus = BASE64.encode("cursor:12");
        assert!(decode_continuation(&bogus).is_err());
    }

    #[test]
    fn test_page_offset() {
        let p = Page { page: 3, limit: 20 };
        assert_eq!(p.offset(), 40);
        let first = Page { page: 0, limit: 20 };
        assert_eq!(first.offset(), 0);
    }
}
