use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation. Safe to run on every startup.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Chat sessions (soft-deleted via is_active, never dropped)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chat messages (append-only; timestamp is the per-session sort key)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            metadata_json TEXT,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Documents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            size INTEGER NOT NULL,
            status TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_analysis_json TEXT,
            analyzed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reference entities (seeded, read-only from the core)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monitoring_subjects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            supervision_level TEXT NOT NULL,
            conditions_json TEXT NOT NULL DEFAULT '[]',
            officer TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS violation_cases (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            risk_score INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (subject_id) REFERENCES monitoring_subjects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            collected_at INTEGER NOT NULL,
            FOREIGN KEY (case_id) REFERENCES violation_cases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS risk_factors (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY (case_id) REFERENCES violation_cases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS violation_events (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            description TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            FOREIGN KEY (subject_id) REFERENCES monitoring_subjects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Search index entries (one logical index per idx_name)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_entries (
            idx_name TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            title TEXT NOT NULL,
            text TEXT NOT NULL,
            origin TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (idx_name, entry_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_vectors (
            idx_name TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (idx_name, entry_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over search entries.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='search_entries_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE search_entries_fts USING fts5(
                entry_id UNINDEXED,
                idx_name UNINDEXED,
                title,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON chat_messages(session_id, timestamp)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user_updated ON chat_sessions(user_id, updated_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_subject ON violation_cases(subject_id)")
        .execute(pool)
        .await?;

    Ok(())
}
