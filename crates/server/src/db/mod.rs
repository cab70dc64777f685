// SQLite persistence for accounts, streams, chat history and VOD records.
//
// The relay core never touches this module; it only sees the derived
// viewer count written back by the heartbeat handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use primal_common::types::{
    ChatMessageRecord, IngestType, PublicUser, Role, StreamRecord, VodRecord,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE users (
    id            TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'VIEWER',
    created_at    INTEGER NOT NULL
);

CREATE TABLE streams (
    id            TEXT PRIMARY KEY,
    creator_id    TEXT NOT NULL REFERENCES users (id),
    title         TEXT NOT NULL,
    ingest_type   TEXT NOT NULL DEFAULT 'WEBRTC',
    is_live       INTEGER NOT NULL DEFAULT 0,
    viewer_count  INTEGER NOT NULL DEFAULT 0,
    started_at    INTEGER NULL,
    ended_at      INTEGER NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE chat_messages (
    id                TEXT PRIMARY KEY,
    stream_id         TEXT NOT NULL REFERENCES streams (id),
    user_id           TEXT NOT NULL REFERENCES users (id),
    username_snapshot TEXT NOT NULL,
    message           TEXT NOT NULL,
    created_at        INTEGER NOT NULL
);

CREATE INDEX chat_messages_stream_idx
    ON chat_messages (stream_id, created_at);

CREATE TABLE vods (
    id         TEXT PRIMARY KEY,
    stream_id  TEXT NULL,
    creator_id TEXT NOT NULL REFERENCES users (id),
    title      TEXT NOT NULL,
    file_path  TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Current Unix timestamp in milliseconds, the unit every persisted and
/// wire-visible timestamp uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of inserting a row guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// An account row as stored, including the password hash.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: i64,
}

impl UserRow {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewStream {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub username_snapshot: String,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewVod {
    pub id: Uuid,
    pub stream_id: Option<Uuid>,
    pub creator_id: Uuid,
    pub title: String,
    pub file_path: String,
    pub created_at: i64,
}

/// Handle to the backing SQLite database.
///
/// The connection is shared behind an async mutex; statements are short and
/// run while the lock is held.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (creating if needed) the database at `path` and bring the schema
    /// up to date. `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{path}`"))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        current_schema_version(&conn)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub async fn create_user(&self, user: &NewUser) -> Result<InsertOutcome> {
        let conn = self.conn.lock().await;
        let result = conn.execute(
            "INSERT INTO users (id, email, username, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.email,
                user.username,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Conflict)
            }
            Err(error) => Err(error).context("failed to insert user"),
        }
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, email, username, password_hash, role, created_at
             FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .optional()
        .context("failed to query user by email")
    }

    pub async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, email, username, password_hash, role, created_at
             FROM users WHERE id = ?1",
            params![id.to_string()],
            user_from_row,
        )
        .optional()
        .context("failed to query user by id")
    }

    /// Returns false when no such user exists.
    pub async fn set_user_role(&self, id: Uuid, role: Role) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![role.as_str(), id.to_string()],
            )
            .context("failed to update user role")?;
        Ok(updated > 0)
    }

    pub async fn list_users(&self, limit: usize) -> Result<Vec<PublicUser>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(
                "SELECT id, email, username, password_hash, role, created_at
                 FROM users ORDER BY created_at DESC LIMIT ?1",
            )
            .context("failed to prepare user listing")?;
        let rows = statement
            .query_map(params![limit as i64], user_from_row)
            .context("failed to list users")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read user rows")?;
        Ok(rows.iter().map(UserRow::public).collect())
    }

    // ── Streams ────────────────────────────────────────────────────

    pub async fn create_stream(&self, stream: &NewStream) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO streams (id, creator_id, title, ingest_type, is_live, viewer_count, created_at)
             VALUES (?1, ?2, ?3, 'WEBRTC', 0, 0, ?4)",
            params![
                stream.id.to_string(),
                stream.creator_id.to_string(),
                stream.title,
                stream.created_at,
            ],
        )
        .context("failed to insert stream")?;
        Ok(())
    }

    pub async fn stream_by_id(&self, id: Uuid) -> Result<Option<StreamRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{STREAM_SELECT} WHERE s.id = ?1"),
            params![id.to_string()],
            stream_from_row,
        )
        .optional()
        .context("failed to query stream by id")
    }

    /// Live streams ordered by viewer count, busiest first.
    pub async fn list_live_streams(&self) -> Result<Vec<StreamRecord>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(&format!(
                "{STREAM_SELECT} WHERE s.is_live = 1
                 ORDER BY s.viewer_count DESC, s.started_at DESC"
            ))
            .context("failed to prepare live stream listing")?;
        let rows = statement
            .query_map([], stream_from_row)
            .context("failed to list live streams")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read live stream rows")?;
        Ok(rows)
    }

    pub async fn list_streams(&self, limit: usize) -> Result<Vec<StreamRecord>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(&format!("{STREAM_SELECT} ORDER BY s.created_at DESC LIMIT ?1"))
            .context("failed to prepare stream listing")?;
        let rows = statement
            .query_map(params![limit as i64], stream_from_row)
            .context("failed to list streams")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read stream rows")?;
        Ok(rows)
    }

    /// Returns false when no such stream exists.
    pub async fn start_stream(&self, id: Uuid, now: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE streams
                 SET is_live = 1, started_at = ?1, ended_at = NULL, viewer_count = 0
                 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .context("failed to mark stream live")?;
        Ok(updated > 0)
    }

    /// Returns false when no such stream exists.
    pub async fn end_stream(&self, id: Uuid, now: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE streams
                 SET is_live = 0, ended_at = ?1, viewer_count = 0
                 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .context("failed to mark stream ended")?;
        Ok(updated > 0)
    }

    pub async fn set_viewer_count(&self, id: Uuid, viewer_count: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE streams SET viewer_count = ?1 WHERE id = ?2",
            params![viewer_count, id.to_string()],
        )
        .context("failed to update viewer count")?;
        Ok(())
    }

    // ── Chat ───────────────────────────────────────────────────────

    pub async fn insert_chat_message(&self, message: &NewChatMessage) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chat_messages (id, stream_id, user_id, username_snapshot, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.stream_id.to_string(),
                message.user_id.to_string(),
                message.username_snapshot,
                message.message,
                message.created_at,
            ],
        )
        .context("failed to insert chat message")?;
        Ok(())
    }

    /// Oldest-first chat history for a stream, with each sender's current
    /// staff badge joined in.
    pub async fn chat_messages(&self, stream_id: Uuid, limit: usize) -> Result<Vec<ChatMessageRecord>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(
                "SELECT m.id, m.stream_id, m.user_id, m.username_snapshot, m.message,
                        m.created_at, u.role
                 FROM chat_messages AS m
                 INNER JOIN users AS u ON u.id = m.user_id
                 WHERE m.stream_id = ?1
                 ORDER BY m.created_at ASC
                 LIMIT ?2",
            )
            .context("failed to prepare chat listing")?;
        let rows = statement
            .query_map(params![stream_id.to_string(), limit as i64], |row| {
                let role = role_column(row, 6)?;
                Ok(ChatMessageRecord {
                    id: uuid_column(row, 0)?,
                    stream_id: uuid_column(row, 1)?,
                    user_id: uuid_column(row, 2)?,
                    username_snapshot: row.get(3)?,
                    message: row.get(4)?,
                    badge: role.badge().to_string(),
                    created_at: row.get(5)?,
                })
            })
            .context("failed to list chat messages")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read chat rows")?;
        Ok(rows)
    }

    // ── VODs ───────────────────────────────────────────────────────

    pub async fn insert_vod(&self, vod: &NewVod) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO vods (id, stream_id, creator_id, title, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                vod.id.to_string(),
                vod.stream_id.map(|id| id.to_string()),
                vod.creator_id.to_string(),
                vod.title,
                vod.file_path,
                vod.created_at,
            ],
        )
        .context("failed to insert vod")?;
        Ok(())
    }

    pub async fn list_vods(&self, limit: usize) -> Result<Vec<VodRecord>> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(
                "SELECT v.id, v.stream_id, v.creator_id, v.title, v.file_path, v.created_at,
                        u.username
                 FROM vods AS v
                 INNER JOIN users AS u ON u.id = v.creator_id
                 ORDER BY v.created_at DESC
                 LIMIT ?1",
            )
            .context("failed to prepare vod listing")?;
        let rows = statement
            .query_map(params![limit as i64], |row| {
                let stream_id: Option<String> = row.get(1)?;
                Ok(VodRecord {
                    id: uuid_column(row, 0)?,
                    stream_id: stream_id
                        .map(|raw| parse_uuid_value(&raw, 1))
                        .transpose()?,
                    creator_id: uuid_column(row, 2)?,
                    creator_username: Some(row.get(6)?),
                    title: row.get(3)?,
                    file_path: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("failed to list vods")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read vod rows")?;
        Ok(rows)
    }
}

const STREAM_SELECT: &str = "SELECT s.id, s.creator_id, s.title, s.ingest_type, s.is_live,
        s.viewer_count, s.started_at, s.ended_at, s.created_at, u.username
 FROM streams AS s
 INNER JOIN users AS u ON u.id = s.creator_id";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_column(row, 0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        role: role_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

fn stream_from_row(row: &Row<'_>) -> rusqlite::Result<StreamRecord> {
    let ingest_type: String = row.get(3)?;
    let is_live: i64 = row.get(4)?;
    Ok(StreamRecord {
        id: uuid_column(row, 0)?,
        creator_id: uuid_column(row, 1)?,
        creator_username: Some(row.get(9)?),
        title: row.get(2)?,
        ingest_type: IngestType::from_db_value(&ingest_type)
            .ok_or_else(|| conversion_error(3, format!("unknown ingest type `{ingest_type}`")))?,
        is_live: is_live != 0,
        viewer_count: row.get(5)?,
        started_at: row.get(6)?,
        ended_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn uuid_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(index)?;
    parse_uuid_value(&raw, index)
}

fn parse_uuid_value(raw: &str, index: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(error),
        )
    })
}

fn role_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Role> {
    let raw: String = row.get(index)?;
    Role::from_db_value(&raw)
        .ok_or_else(|| conversion_error(index, format!("unknown role `{raw}`")))
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
