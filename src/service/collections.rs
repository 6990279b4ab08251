use crate::blob::{BlobStore, CARD_BUCKET};
use crate::db::collections::fts_query;
use crate::db::{
    self, Card, Collection, CollectionDraft, CollectionFilter, CollectionStatus, Database,
    SortBy, TextMatch, UserList, now_timestamp,
};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use crate::service::attachments::detach;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Which collections a search looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SearchCategory {
    /// Every public collection.
    #[default]
    #[serde(rename = "")]
    All,
    /// Only the caller's favourites.
    #[serde(rename = "favourite")]
    Favourite,
}

/// Ranked, paginated collection search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Name text, empty for no text filter.
    pub text: String,
    /// Page size, 1..=100.
    pub count: i64,
    /// Rows to skip.
    pub offset: i64,
    /// Ranking counter.
    pub sort_by: SortBy,
    /// Collection pool.
    pub category: SearchCategory,
}

/// Collection use cases: ownership, likes, cards and search.
pub struct CollectionService {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl CollectionService {
    /// Create a new collection service.
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self { db, blobs, timeout }
    }

    /// Create a collection owned by `owner_id` and return its ID.
    pub fn create(&self, deadline: &Deadline, draft: &CollectionDraft, owner_id: &str) -> Result<String> {
        let deadline = deadline.narrow(self.timeout);

        let collection = Collection {
            id: uuid::Uuid::new_v4().to_string(),
            name: draft.name.clone(),
            is_public: draft.is_public,
            author: owner_id.to_string(),
            cards: Vec::new(),
            max_id: 0,
            likes: 0,
            trainings: 0,
            status: CollectionStatus::Active,
            created_at: now_timestamp(),
        };

        self.db.transaction(&deadline, |tx| {
            db::collections::insert(tx, &collection)?;
            db::users::push_list(tx, owner_id, UserList::Owned, &collection.id)
        })?;

        tracing::info!(collection = %collection.id, owner = %owner_id, "Created collection");
        Ok(collection.id)
    }

    /// Replace name and visibility.
    pub fn update(&self, deadline: &Deadline, id: &str, draft: &CollectionDraft) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);

        let updated = self.db.with_conn(&deadline, |conn| {
            db::collections::update_info(conn, id, &draft.name, draft.is_public)
        })?;
        if !updated {
            return Err(AppError::NotFound("collection".to_string()));
        }

        tracing::info!(collection = %id, public = draft.is_public, "Updated collection");
        Ok(())
    }

    /// Delete a collection, its cards and their pictures.
    ///
    /// Pictures already missing from the blob store are skipped; any other
    /// failure rolls the whole delete back.
    pub fn delete(&self, deadline: &Deadline, id: &str, requester_id: &str) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);

        let released = self.db.transaction(&deadline, |tx| {
            let removed = db::users::pull_list(tx, requester_id, UserList::Owned, id)?;
            if removed == 0 {
                return Err(AppError::Conflict(format!(
                    "Collection {} is not in the owner's list",
                    id
                )));
            }

            db::collections::set_status(tx, id, CollectionStatus::Deleted)?;
            let collection = db::collections::get_any(tx, id)?
                .ok_or_else(|| AppError::NotFound("collection".to_string()))?;

            let mut released = Vec::new();
            for card in collection.cards.iter().filter(|c| !c.attachment.is_empty()) {
                deadline.check()?;
                match detach(
                    tx,
                    self.blobs.as_ref(),
                    requester_id,
                    id,
                    card.local_id,
                    &card.attachment,
                ) {
                    Ok(()) => released.push(card.attachment.clone()),
                    Err(e) if e.is_missing_picture() => {
                        tracing::debug!(
                            collection = %id,
                            card = card.local_id,
                            object = %card.attachment,
                            "Picture already absent"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            db::collections::delete(tx, id)?;
            Ok(released)
        })?;

        for object_name in &released {
            if let Err(e) = self.blobs.delete(CARD_BUCKET, object_name) {
                tracing::warn!(collection = %id, object = %object_name, error = %e, "Failed to delete picture");
            }
        }

        tracing::info!(
            collection = %id,
            owner = %requester_id,
            pictures = released.len(),
            "Deleted collection"
        );
        Ok(())
    }

    /// Get an active collection.
    pub fn get(&self, deadline: &Deadline, id: &str) -> Result<Collection> {
        let deadline = deadline.narrow(self.timeout);
        self.db
            .with_conn(&deadline, |conn| db::collections::get(conn, id))?
            .ok_or_else(|| AppError::NotFound("collection".to_string()))
    }

    /// Add the collection to the user's favourites and count the like.
    pub fn add_like(&self, deadline: &Deadline, id: &str, user_id: &str) -> Result<Collection> {
        let deadline = deadline.narrow(self.timeout);

        self.db.transaction(&deadline, |tx| {
            db::users::push_list(tx, user_id, UserList::Favourites, id)?;
            if !db::collections::add_likes(tx, id, 1)? {
                return Err(AppError::NotFound("collection".to_string()));
            }
            Ok(())
        })?;

        tracing::info!(collection = %id, user = %user_id, "Liked collection");
        self.get(&deadline, id)
    }

    /// Drop the collection from the user's favourites and uncount the like.
    ///
    /// A collection whose counter is already zero is returned unchanged.
    pub fn remove_like(&self, deadline: &Deadline, id: &str, user_id: &str) -> Result<Collection> {
        let deadline = deadline.narrow(self.timeout);

        let collection = self.get(&deadline, id)?;
        if collection.likes <= 0 {
            return Ok(collection);
        }

        self.db.transaction(&deadline, |tx| {
            if db::users::pull_list(tx, user_id, UserList::Favourites, id)? == 0 {
                return Err(AppError::Conflict(format!(
                    "Collection {} is not in the user's favourites",
                    id
                )));
            }
            if !db::collections::add_likes(tx, id, -1)? {
                return Err(AppError::NotFound("collection".to_string()));
            }
            Ok(())
        })?;

        tracing::info!(collection = %id, user = %user_id, "Unliked collection");
        self.get(&deadline, id)
    }

    /// Search collections by name.
    ///
    /// Full-text matching comes first; when it finds nothing outside the
    /// favourite category, a case-insensitive substring match is tried.
    pub fn search(&self, deadline: &Deadline, query: &SearchQuery, user_id: &str) -> Result<Vec<Collection>> {
        let deadline = deadline.narrow(self.timeout);

        let mut filter = CollectionFilter {
            sort_by: Some(query.sort_by),
            limit: Some(query.count),
            offset: query.offset,
            ..Default::default()
        };

        match query.category {
            SearchCategory::Favourite => {
                let user = self
                    .db
                    .with_conn(&deadline, |conn| db::users::get(conn, user_id))?
                    .ok_or_else(|| AppError::NotFound("user".to_string()))?;
                filter.ids = Some(user.favourites);
            }
            SearchCategory::All => filter.public_only = true,
        }

        let text = query.text.trim();
        if text.is_empty() {
            return self
                .db
                .with_conn(&deadline, |conn| db::collections::find(conn, &filter));
        }

        let primary = match fts_query(text) {
            Some(fts) => {
                filter.text = Some(TextMatch::FullText(fts));
                self.db
                    .with_conn(&deadline, |conn| db::collections::find(conn, &filter))?
            }
            None => Vec::new(),
        };

        if !primary.is_empty() || query.category == SearchCategory::Favourite {
            return Ok(primary);
        }

        tracing::debug!(text = %text, "Full-text search empty, trying substring match");
        filter.text = Some(TextMatch::Substring(text.to_string()));
        self.db
            .with_conn(&deadline, |conn| db::collections::find(conn, &filter))
    }

    /// All public collections of an author, unranked.
    pub fn search_by_author(&self, deadline: &Deadline, author_id: &str) -> Result<Vec<Collection>> {
        let deadline = deadline.narrow(self.timeout);
        let filter = CollectionFilter {
            public_only: true,
            author: Some(author_id.to_string()),
            ..Default::default()
        };
        self.db
            .with_conn(&deadline, |conn| db::collections::find(conn, &filter))
    }

    /// Append a card, assigning the next local ID.
    pub fn add_card(&self, deadline: &Deadline, collection_id: &str, card: &Card) -> Result<Card> {
        let deadline = deadline.narrow(self.timeout);

        let card = self.db.transaction(&deadline, |tx| {
            let local_id = db::collections::next_card_id(tx, collection_id)?
                .ok_or_else(|| AppError::NotFound("collection".to_string()))?;

            let card = Card {
                local_id,
                attachment: String::new(),
                ..card.clone()
            };
            db::collections::insert_card(tx, collection_id, &card)?;
            Ok(card)
        })?;

        tracing::info!(collection = %collection_id, card = card.local_id, "Added card");
        Ok(card)
    }

    /// Replace question, answer and alternate answers of a card.
    pub fn update_card(&self, deadline: &Deadline, collection_id: &str, card: &Card) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);

        let updated = self.db.with_conn(&deadline, |conn| {
            db::collections::update_card(conn, collection_id, card)
        })?;
        if !updated {
            return Err(AppError::NotFound("card".to_string()));
        }

        tracing::info!(collection = %collection_id, card = card.local_id, "Updated card");
        Ok(())
    }

    /// Remove a card. Its picture must already have been released.
    pub fn delete_card(&self, deadline: &Deadline, collection_id: &str, local_id: i64) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);

        let deleted = self.db.with_conn(&deadline, |conn| {
            db::collections::delete_card(conn, collection_id, local_id)
        })?;
        if !deleted {
            return Err(AppError::NotFound("card".to_string()));
        }

        tracing::info!(collection = %collection_id, card = local_id, "Deleted card");
        Ok(())
    }
}
