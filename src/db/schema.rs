use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Persistence(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Persistence(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                has_picture INTEGER NOT NULL DEFAULT 0,
                storage_used INTEGER NOT NULL DEFAULT 0,
                total_trainings INTEGER NOT NULL DEFAULT 0,
                medium_percentage INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            -- Owned collections list (rowid keeps insertion order)
            CREATE TABLE IF NOT EXISTS user_collections (
                user_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Favourite collections list
            CREATE TABLE IF NOT EXISTS user_favourites (
                user_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Collections table
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                author TEXT NOT NULL,
                max_id INTEGER NOT NULL DEFAULT 0,
                likes INTEGER NOT NULL DEFAULT 0,
                trainings INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                created_at INTEGER NOT NULL
            );

            -- Cards table
            CREATE TABLE IF NOT EXISTS cards (
                collection_id TEXT NOT NULL,
                local_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                other_answers TEXT NOT NULL,
                attachment TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (collection_id, local_id),
                FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
            );

            -- Full-text index over collection names
            CREATE VIRTUAL TABLE IF NOT EXISTS collections_fts USING fts5(id UNINDEXED, name);

            -- Training history logs
            CREATE TABLE IF NOT EXISTS user_histories (
                user_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_history_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                time INTEGER NOT NULL,
                item TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES user_histories(user_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS collection_histories (
                collection_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collection_history_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id TEXT NOT NULL,
                item TEXT NOT NULL,
                FOREIGN KEY (collection_id) REFERENCES collection_histories(collection_id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_user_collections_user ON user_collections(user_id);
            CREATE INDEX IF NOT EXISTS idx_user_favourites_user ON user_favourites(user_id);
            CREATE INDEX IF NOT EXISTS idx_collections_author ON collections(author, is_public);
            CREATE INDEX IF NOT EXISTS idx_collections_public ON collections(status, is_public);
            CREATE INDEX IF NOT EXISTS idx_user_history_user ON user_history_items(user_id, seq);
            CREATE INDEX IF NOT EXISTS idx_collection_history_coll ON collection_history_items(collection_id, seq);
            "#,
        )
        .map_err(|e| AppError::Persistence(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run a single-statement operation on the connection.
    pub(crate) fn with_conn<T>(
        &self,
        deadline: &Deadline,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        deadline.check()?;
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds and the deadline still holds; any error, or
    /// an expired deadline, drops the transaction which rolls it back.
    pub(crate) fn transaction<T>(
        &self,
        deadline: &Deadline,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        deadline.check()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let value = f(&tx)?;

        deadline.check()?;
        tx.commit()?;
        Ok(value)
    }
}
