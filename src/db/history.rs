//! Append-only training logs, created lazily on first write.

use crate::db::{HistoryItem, SmallHistoryItem, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

fn encode<T: Serialize>(item: &T) -> Result<String> {
    serde_json::to_string(item)
        .map_err(|e| AppError::Internal(format!("Failed to encode history item: {}", e)))
}

fn decode_all<T: DeserializeOwned>(raw: Vec<String>) -> Result<Vec<T>> {
    raw.iter()
        .map(|s| {
            serde_json::from_str(s)
                .map_err(|e| AppError::Persistence(format!("Corrupt history item: {}", e)))
        })
        .collect()
}

/// Create the user's log if it does not exist yet.
pub(crate) fn create_user_log(conn: &Connection, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO user_histories (user_id, created_at) VALUES (?1, ?2)",
        params![user_id, now_timestamp()],
    )?;
    Ok(())
}

/// Append an item to the user's log.
pub(crate) fn push_user_item(conn: &Connection, user_id: &str, item: &HistoryItem) -> Result<()> {
    create_user_log(conn, user_id)?;
    conn.execute(
        "INSERT INTO user_history_items (user_id, time, item) VALUES (?1, ?2, ?3)",
        params![user_id, item.time, encode(item)?],
    )?;
    Ok(())
}

/// Items of the user's log with `time >= from_time`, in insertion order.
///
/// A missing log reads as empty.
pub(crate) fn user_items(conn: &Connection, user_id: &str, from_time: i64) -> Result<Vec<HistoryItem>> {
    let mut stmt = conn.prepare(
        "SELECT item FROM user_history_items WHERE user_id = ?1 AND time >= ?2 ORDER BY seq",
    )?;
    let raw = stmt
        .query_map(params![user_id, from_time], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    decode_all(raw)
}

/// Create the collection's log if it does not exist yet.
pub(crate) fn create_collection_log(conn: &Connection, collection_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO collection_histories (collection_id, created_at) VALUES (?1, ?2)",
        params![collection_id, now_timestamp()],
    )?;
    Ok(())
}

/// Append an item to the collection's log.
pub(crate) fn push_collection_item(
    conn: &Connection,
    collection_id: &str,
    item: &SmallHistoryItem,
) -> Result<()> {
    create_collection_log(conn, collection_id)?;
    conn.execute(
        "INSERT INTO collection_history_items (collection_id, item) VALUES (?1, ?2)",
        params![collection_id, encode(item)?],
    )?;
    Ok(())
}

/// All items of the collection's log, in insertion order.
pub(crate) fn collection_items(conn: &Connection, collection_id: &str) -> Result<Vec<SmallHistoryItem>> {
    let mut stmt = conn
        .prepare("SELECT item FROM collection_history_items WHERE collection_id = ?1 ORDER BY seq")?;
    let raw = stmt
        .query_map(params![collection_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    decode_all(raw)
}
