use crate::error::ApiResult;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, Connection, ErrorCode, Transaction};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id BLOB PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT,
    phone TEXT,
    study_hours TEXT,
    specialty TEXT,
    hobbies TEXT,
    location TEXT,
    profile_image TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS documents (
    id BLOB PRIMARY KEY,
    account_id BLOB NOT NULL REFERENCES accounts(id),
    filename TEXT NOT NULL,
    upload_date INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_account ON documents(account_id);
CREATE TABLE IF NOT EXISTS study_groups (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS group_messages (
    id BLOB PRIMARY KEY,
    account_id BLOB NOT NULL REFERENCES accounts(id),
    group_id BLOB NOT NULL REFERENCES study_groups(id),
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_group_messages_group ON group_messages(group_id, created_at);
";

/// Which integrity rule a failed write tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Unique,
    ForeignKey,
}

/// Pooled SQLite access. Connections are only ever borrowed for the span of
/// one closure, so they go back to the pool on every exit path.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
}

impl Storage {
    pub fn new(db_path: &str, pool_size: u32) -> anyhow::Result<Self> {
        let in_memory = db_path == ":memory:";
        let manager = if in_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(db_path)
        }
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        // Every in-memory connection is its own database, so keep exactly one alive.
        let builder = if in_memory {
            Pool::builder()
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder().max_size(pool_size.max(1))
        };
        let pool = builder.build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        Ok(Storage { pool })
    }

    /// Runs `f` with a pooled connection in autocommit mode.
    pub fn with_conn<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Connection) -> ApiResult<T>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. An `Err` from `f` drops the
    /// transaction uncommitted, which rolls it back.
    pub fn with_tx<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> ApiResult<T>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Classifies a constraint failure so callers can map it to a domain error.
pub fn constraint_violation(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    Some(Constraint::Unique)
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Some(Constraint::ForeignKey),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The sqlite message attached to a failure, e.g. `UNIQUE constraint failed: accounts.email`.
pub fn failure_message(err: &rusqlite::Error) -> &str {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.as_str(),
        _ => "",
    }
}
