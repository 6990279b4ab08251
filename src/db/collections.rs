//! Collection and card records.
//!
//! Every read goes through the `status = 'active'` filter unless it
//! explicitly asks for soft-deleted rows as well.

use crate::db::{Card, Collection, CollectionStatus, OtherAnswers, SortBy};
use crate::error::{AppError, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

const COLLECTION_COLUMNS: &str =
    "c.id, c.name, c.is_public, c.author, c.max_id, c.likes, c.trainings, c.status, c.created_at";

/// How the search text is matched against collection names.
#[derive(Debug, Clone)]
pub enum TextMatch {
    /// FTS5 query over the name index.
    FullText(String),
    /// Case-insensitive substring of the name.
    Substring(String),
}

/// Filter, ordering and paging for collection queries.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    /// Only `is_public = 1` rows.
    pub public_only: bool,
    /// Restrict to these IDs.
    pub ids: Option<Vec<String>>,
    /// Restrict to one author.
    pub author: Option<String>,
    /// Name matching.
    pub text: Option<TextMatch>,
    /// Rank by this counter (descending, then name and ID ascending).
    pub sort_by: Option<SortBy>,
    /// Page size.
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: i64,
}

/// Build an FTS5 query that matches any word of `text`.
///
/// Returns `None` when `text` has no searchable words.
pub(crate) fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    let status: String = row.get(7)?;
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        is_public: row.get(2)?,
        author: row.get(3)?,
        max_id: row.get(4)?,
        likes: row.get(5)?,
        trainings: row.get(6)?,
        status: CollectionStatus::parse(&status),
        created_at: row.get(8)?,
        cards: Vec::new(),
    })
}

fn load_cards(conn: &Connection, collection_id: &str) -> Result<Vec<Card>> {
    let mut stmt = conn.prepare(
        "SELECT local_id, question, answer, attachment, other_answers
         FROM cards WHERE collection_id = ?1 ORDER BY local_id",
    )?;

    let rows = stmt
        .query_map(params![collection_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(local_id, question, answer, attachment, other)| {
            let other_answers: OtherAnswers = serde_json::from_str(&other).map_err(|e| {
                AppError::Persistence(format!("Corrupt answers on card {}: {}", local_id, e))
            })?;
            Ok(Card {
                local_id,
                question,
                answer,
                attachment,
                other_answers,
            })
        })
        .collect()
}

fn encode_answers(answers: &OtherAnswers) -> Result<String> {
    serde_json::to_string(answers)
        .map_err(|e| AppError::Internal(format!("Failed to encode answers: {}", e)))
}

/// Insert a collection together with its cards and name index entry.
pub(crate) fn insert(conn: &Connection, collection: &Collection) -> Result<()> {
    conn.execute(
        "INSERT INTO collections (id, name, name_lower, is_public, author, max_id, likes,
                                  trainings, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            collection.id,
            collection.name,
            collection.name.to_lowercase(),
            collection.is_public,
            collection.author,
            collection.max_id,
            collection.likes,
            collection.trainings,
            collection.status.as_str(),
            collection.created_at,
        ],
    )?;

    conn.execute(
        "INSERT INTO collections_fts (id, name) VALUES (?1, ?2)",
        params![collection.id, collection.name],
    )?;

    for card in &collection.cards {
        insert_card(conn, &collection.id, card)?;
    }
    Ok(())
}

/// Get an active collection by ID.
pub(crate) fn get(conn: &Connection, id: &str) -> Result<Option<Collection>> {
    get_with_status(conn, id, Some(CollectionStatus::Active))
}

/// Get a collection by ID regardless of its status.
pub(crate) fn get_any(conn: &Connection, id: &str) -> Result<Option<Collection>> {
    get_with_status(conn, id, None)
}

fn get_with_status(
    conn: &Connection,
    id: &str,
    status: Option<CollectionStatus>,
) -> Result<Option<Collection>> {
    let collection = match status {
        Some(status) => conn
            .query_row(
                &format!(
                    "SELECT {COLLECTION_COLUMNS} FROM collections c WHERE c.id = ?1 AND c.status = ?2"
                ),
                params![id, status.as_str()],
                row_to_collection,
            )
            .optional()?,
        None => conn
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections c WHERE c.id = ?1"),
                params![id],
                row_to_collection,
            )
            .optional()?,
    };

    match collection {
        Some(mut collection) => {
            collection.cards = load_cards(conn, &collection.id)?;
            Ok(Some(collection))
        }
        None => Ok(None),
    }
}

/// Query active collections.
pub(crate) fn find(conn: &Connection, filter: &CollectionFilter) -> Result<Vec<Collection>> {
    let mut sql = format!(
        "SELECT {COLLECTION_COLUMNS} FROM collections c WHERE c.status = '{}'",
        CollectionStatus::Active.as_str()
    );
    let mut values: Vec<Value> = Vec::new();

    if filter.public_only {
        sql.push_str(" AND c.is_public = 1");
    }

    if let Some(author) = &filter.author {
        values.push(Value::Text(author.clone()));
        sql.push_str(&format!(" AND c.author = ?{}", values.len()));
    }

    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut placeholders = Vec::with_capacity(ids.len());
        for id in ids {
            values.push(Value::Text(id.clone()));
            placeholders.push(format!("?{}", values.len()));
        }
        sql.push_str(&format!(" AND c.id IN ({})", placeholders.join(", ")));
    }

    match &filter.text {
        Some(TextMatch::FullText(query)) => {
            values.push(Value::Text(query.clone()));
            sql.push_str(&format!(
                " AND c.id IN (SELECT id FROM collections_fts WHERE collections_fts MATCH ?{})",
                values.len()
            ));
        }
        Some(TextMatch::Substring(text)) => {
            values.push(Value::Text(like_pattern(text)));
            sql.push_str(&format!(
                " AND c.name_lower LIKE ?{} ESCAPE '\\'",
                values.len()
            ));
        }
        None => {}
    }

    match filter.sort_by {
        Some(sort) => sql.push_str(&format!(
            " ORDER BY c.{} DESC, c.name ASC, c.id ASC",
            sort.column()
        )),
        None => sql.push_str(" ORDER BY c.created_at ASC, c.rowid ASC"),
    }

    if filter.limit.is_some() || filter.offset > 0 {
        values.push(Value::Integer(filter.limit.unwrap_or(-1)));
        let limit_idx = values.len();
        values.push(Value::Integer(filter.offset));
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", limit_idx, values.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut collections = stmt
        .query_map(params_from_iter(values.iter()), row_to_collection)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for collection in &mut collections {
        collection.cards = load_cards(conn, &collection.id)?;
    }
    Ok(collections)
}

/// Replace name and visibility of an active collection.
pub(crate) fn update_info(conn: &Connection, id: &str, name: &str, is_public: bool) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE collections SET name = ?1, name_lower = ?2, is_public = ?3
         WHERE id = ?4 AND status = 'active'",
        params![name, name.to_lowercase(), is_public, id],
    )?;

    if rows > 0 {
        conn.execute(
            "UPDATE collections_fts SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
    }
    Ok(rows > 0)
}

/// Change the lifecycle marker.
pub(crate) fn set_status(conn: &Connection, id: &str, status: CollectionStatus) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE collections SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(rows > 0)
}

/// Physically remove a collection, its cards and its index entry.
pub(crate) fn delete(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM cards WHERE collection_id = ?1", params![id])?;
    conn.execute("DELETE FROM collections_fts WHERE id = ?1", params![id])?;
    let rows = conn.execute("DELETE FROM collections WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Shift the like counter by `delta`, clamped at zero.
pub(crate) fn add_likes(conn: &Connection, id: &str, delta: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE collections SET likes = MAX(likes + ?1, 0) WHERE id = ?2 AND status = 'active'",
        params![delta, id],
    )?;
    Ok(rows > 0)
}

/// Increment the training counter.
pub(crate) fn add_training(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE collections SET trainings = trainings + 1 WHERE id = ?1 AND status = 'active'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Reserve the next card local ID in one round trip.
///
/// Returns `None` when the collection does not exist.
pub(crate) fn next_card_id(conn: &Connection, id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "UPDATE collections SET max_id = max_id + 1
             WHERE id = ?1 AND status = 'active'
             RETURNING max_id - 1",
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert a card.
pub(crate) fn insert_card(conn: &Connection, collection_id: &str, card: &Card) -> Result<()> {
    conn.execute(
        "INSERT INTO cards (collection_id, local_id, question, answer, other_answers, attachment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            collection_id,
            card.local_id,
            card.question,
            card.answer,
            encode_answers(&card.other_answers)?,
            card.attachment,
        ],
    )?;
    Ok(())
}

/// Replace question, answer and alternate answers of a card.
pub(crate) fn update_card(conn: &Connection, collection_id: &str, card: &Card) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE cards SET question = ?1, answer = ?2, other_answers = ?3
         WHERE collection_id = ?4 AND local_id = ?5
           AND EXISTS (SELECT 1 FROM collections WHERE id = ?4 AND status = 'active')",
        params![
            card.question,
            card.answer,
            encode_answers(&card.other_answers)?,
            collection_id,
            card.local_id,
        ],
    )?;
    Ok(rows > 0)
}

/// Remove a card.
pub(crate) fn delete_card(conn: &Connection, collection_id: &str, local_id: i64) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM cards
         WHERE collection_id = ?1 AND local_id = ?2
           AND EXISTS (SELECT 1 FROM collections WHERE id = ?1 AND status = 'active')",
        params![collection_id, local_id],
    )?;
    Ok(rows > 0)
}

/// Point a card at a blob object.
pub(crate) fn set_card_attachment(
    conn: &Connection,
    collection_id: &str,
    local_id: i64,
    attachment: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE cards SET attachment = ?1 WHERE collection_id = ?2 AND local_id = ?3",
        params![attachment, collection_id, local_id],
    )?;
    Ok(rows > 0)
}

/// Clear a card's attachment only while it still points at `attachment`.
pub(crate) fn clear_card_attachment(
    conn: &Connection,
    collection_id: &str,
    local_id: i64,
    attachment: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE cards SET attachment = ''
         WHERE collection_id = ?1 AND local_id = ?2 AND attachment = ?3",
        params![collection_id, local_id, attachment],
    )?;
    Ok(rows > 0)
}
