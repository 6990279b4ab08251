//! User records and their atomic list/counter updates.

use crate::db::{User, UserList, UserStatistics};
use crate::error::{AppError, Result};
use rusqlite::{Connection, OptionalExtension, params};

const USER_COLUMNS: &str = "id, username, email, password_hash, has_picture, storage_used,
     total_trainings, medium_percentage, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        has_picture: row.get(4)?,
        storage_used: row.get(5)?,
        statistics: UserStatistics {
            total_trainings: row.get(6)?,
            medium_percentage: row.get(7)?,
        },
        created_at: row.get(8)?,
        collections: Vec::new(),
        favourites: Vec::new(),
    })
}

fn load_list(conn: &Connection, user_id: &str, list: UserList) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT collection_id FROM {} WHERE user_id = ?1 ORDER BY rowid",
        list.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn attach_lists(conn: &Connection, user: &mut User) -> Result<()> {
    user.collections = load_list(conn, &user.id, UserList::Owned)?;
    user.favourites = load_list(conn, &user.id, UserList::Favourites)?;
    Ok(())
}

fn with_lists(conn: &Connection, user: Option<User>) -> Result<Option<User>> {
    let Some(mut user) = user else {
        return Ok(None);
    };
    attach_lists(conn, &mut user)?;
    Ok(Some(user))
}

/// Insert a new user.
pub(crate) fn insert(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, has_picture, storage_used,
                            total_trainings, medium_percentage, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.id,
            user.username,
            user.email,
            user.password_hash,
            user.has_picture,
            user.storage_used,
            user.statistics.total_trainings,
            user.statistics.medium_percentage,
            user.created_at,
        ],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict(format!("Email '{}' already registered", user.email))
        } else {
            AppError::Persistence(format!("Failed to create user: {}", e))
        }
    })?;

    for id in &user.collections {
        push_list(conn, &user.id, UserList::Owned, id)?;
    }
    for id in &user.favourites {
        push_list(conn, &user.id, UserList::Favourites, id)?;
    }
    Ok(())
}

/// Get user by ID.
pub(crate) fn get(conn: &Connection, id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()?;
    with_lists(conn, user)
}

/// Get user by email.
pub(crate) fn get_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            row_to_user,
        )
        .optional()?;
    with_lists(conn, user)
}

/// List all users.
pub(crate) fn list(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, username"
    ))?;
    let mut users = stmt
        .query_map([], row_to_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for user in &mut users {
        attach_lists(conn, user)?;
    }
    Ok(users)
}

/// Replace username and email.
pub(crate) fn update_profile(
    conn: &Connection,
    id: &str,
    username: &str,
    email: &str,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE users SET username = ?1, email = ?2 WHERE id = ?3",
            params![username, email, id],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Email '{}' already registered", email))
            } else {
                AppError::Persistence(format!("Failed to update user: {}", e))
            }
        })?;
    Ok(rows > 0)
}

/// Set the profile picture flag.
pub(crate) fn set_has_picture(conn: &Connection, id: &str, has_picture: bool) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE users SET has_picture = ?1 WHERE id = ?2",
        params![has_picture, id],
    )?;
    Ok(rows > 0)
}

/// Append a collection ID to one of the user's lists.
pub(crate) fn push_list(
    conn: &Connection,
    user_id: &str,
    list: UserList,
    collection_id: &str,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (user_id, collection_id)
         SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM users WHERE id = ?1)",
        list.table()
    );
    let rows = conn.execute(&sql, params![user_id, collection_id])?;
    if rows == 0 {
        return Err(AppError::NotFound("user".to_string()));
    }
    Ok(())
}

/// Remove every occurrence of a collection ID from one of the user's lists.
///
/// Returns how many entries were removed.
pub(crate) fn pull_list(
    conn: &Connection,
    user_id: &str,
    list: UserList,
    collection_id: &str,
) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE user_id = ?1 AND collection_id = ?2",
        list.table()
    );
    Ok(conn.execute(&sql, params![user_id, collection_id])?)
}

/// Atomically debit `size` bytes if the result stays within `limit`.
///
/// Returns `false` when the debit would cross the limit.
pub(crate) fn reserve_quota(conn: &Connection, user_id: &str, size: i64, limit: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE users SET storage_used = storage_used + ?1
         WHERE id = ?2 AND storage_used + ?1 <= ?3",
        params![size, user_id, limit],
    )?;
    Ok(rows > 0)
}

/// Credit `size` bytes back, never below zero.
pub(crate) fn release_quota(conn: &Connection, user_id: &str, size: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE users SET storage_used = MAX(storage_used - ?1, 0) WHERE id = ?2",
        params![size, user_id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound("user".to_string()));
    }
    Ok(())
}

/// Overwrite the derived statistics.
pub(crate) fn set_statistics(conn: &Connection, user_id: &str, stats: UserStatistics) -> Result<()> {
    let rows = conn.execute(
        "UPDATE users SET total_trainings = ?1, medium_percentage = ?2 WHERE id = ?3",
        params![stats.total_trainings, stats.medium_percentage, user_id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound("user".to_string()));
    }
    Ok(())
}
