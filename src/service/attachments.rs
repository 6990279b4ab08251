use crate::blob::{BlobStore, CARD_BUCKET};
use crate::db::{self, Database, MAX_TOTAL_FILE_SIZE, now_timestamp};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

/// Card picture lifecycle with per-user quota accounting.
pub struct AttachmentService {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

/// Clear a card's attachment and credit its size back to the user.
///
/// Runs on the caller's connection or transaction; the blob itself is left
/// in place for the caller to delete once the metadata change is durable.
/// Fails with `Conflict` when the card no longer references `object_name`.
pub(crate) fn detach(
    conn: &Connection,
    blobs: &dyn BlobStore,
    user_id: &str,
    collection_id: &str,
    card_id: i64,
    object_name: &str,
) -> Result<()> {
    let size = blobs.size(CARD_BUCKET, object_name)?;
    if !db::collections::clear_card_attachment(conn, collection_id, card_id, object_name)? {
        return Err(AppError::Conflict(format!(
            "Card {} of collection {} does not hold {}",
            card_id, collection_id, object_name
        )));
    }
    db::users::release_quota(conn, user_id, size as i64)?;
    Ok(())
}

impl AttachmentService {
    /// Create a new attachment service.
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self { db, blobs, timeout }
    }

    /// Store a picture for a card and return its object name.
    pub fn upload(
        &self,
        deadline: &Deadline,
        user_id: &str,
        collection_id: &str,
        card_id: i64,
        bytes: &[u8],
    ) -> Result<String> {
        let deadline = deadline.narrow(self.timeout);
        let size = bytes.len() as i64;

        let user = self
            .db
            .with_conn(&deadline, |conn| db::users::get(conn, user_id))?
            .ok_or_else(|| AppError::NotFound("user".to_string()))?;

        let quota_exceeded = || AppError::QuotaExceeded {
            used: user.storage_used,
            requested: size,
            limit: MAX_TOTAL_FILE_SIZE,
        };

        if user.storage_used + size > MAX_TOTAL_FILE_SIZE {
            return Err(quota_exceeded());
        }

        if !user.collections.iter().any(|id| id == collection_id) {
            return Err(AppError::PermissionDenied(
                "Collection is not owned by the user".to_string(),
            ));
        }

        let reserved = self.db.with_conn(&deadline, |conn| {
            db::users::reserve_quota(conn, user_id, size, MAX_TOTAL_FILE_SIZE)
        })?;
        if !reserved {
            return Err(quota_exceeded());
        }

        let object_name = format!("{}_{}_{}", collection_id, card_id, now_timestamp());

        let stored = deadline
            .check()
            .and_then(|()| self.blobs.put(CARD_BUCKET, &object_name, bytes));
        if let Err(e) = stored {
            self.refund(user_id, size);
            return Err(e);
        }

        let attached = self.db.with_conn(&deadline, |conn| {
            db::collections::set_card_attachment(conn, collection_id, card_id, &object_name)
        });

        match attached {
            Ok(true) => {}
            Ok(false) => {
                self.discard(&object_name);
                self.refund(user_id, size);
                return Err(AppError::NotFound("card".to_string()));
            }
            Err(e) => {
                self.discard(&object_name);
                self.refund(user_id, size);
                return Err(e);
            }
        }

        tracing::info!(
            user = %user_id,
            collection = %collection_id,
            card = card_id,
            object = %object_name,
            bytes = size,
            "Uploaded card picture"
        );
        Ok(object_name)
    }

    /// Remove a card's picture.
    ///
    /// Fails with `NotFound("picture")` when the object is already gone.
    pub fn remove(
        &self,
        deadline: &Deadline,
        user_id: &str,
        collection_id: &str,
        card_id: i64,
        object_name: &str,
    ) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);

        self.db.transaction(&deadline, |tx| {
            detach(tx, self.blobs.as_ref(), user_id, collection_id, card_id, object_name)
        })?;

        self.blobs.delete(CARD_BUCKET, object_name)?;

        tracing::info!(
            user = %user_id,
            collection = %collection_id,
            card = card_id,
            object = %object_name,
            "Removed card picture"
        );
        Ok(())
    }

    /// Read a stored card picture.
    pub fn get(&self, deadline: &Deadline, object_name: &str) -> Result<Vec<u8>> {
        deadline.narrow(self.timeout).check()?;
        self.blobs.get(CARD_BUCKET, object_name)
    }

    /// Give back a quota debit after a failed upload.
    fn refund(&self, user_id: &str, size: i64) {
        let deadline = Deadline::after(self.timeout);
        match self
            .db
            .with_conn(&deadline, |conn| db::users::release_quota(conn, user_id, size))
        {
            Ok(()) => tracing::warn!(user = %user_id, bytes = size, "Refunded quota after failed upload"),
            Err(e) => tracing::error!(user = %user_id, bytes = size, error = %e, "Failed to refund quota"),
        }
    }

    fn discard(&self, object_name: &str) {
        if let Err(e) = self.blobs.delete(CARD_BUCKET, object_name) {
            tracing::warn!(object = %object_name, error = %e, "Failed to discard uploaded picture");
        }
    }
}
