use crate::blob::{BlobStore, USER_BUCKET};
use crate::db::{self, Collection, CollectionFilter, Database, User, UserStatistics};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What other users can see of a profile.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    /// User ID.
    pub id: String,
    /// Display username.
    pub username: String,
    /// Whether a profile picture is stored.
    pub has_picture: bool,
    /// Training statistics.
    pub statistics: UserStatistics,
    /// The user's public collections.
    pub collections: Vec<Collection>,
}

/// Profile and profile picture use cases.
pub struct UserService {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl UserService {
    /// Create a new user service.
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self { db, blobs, timeout }
    }

    /// Get a user by ID.
    pub fn get(&self, deadline: &Deadline, id: &str) -> Result<User> {
        let deadline = deadline.narrow(self.timeout);
        self.db
            .with_conn(&deadline, |conn| db::users::get(conn, id))?
            .ok_or_else(|| AppError::NotFound("user".to_string()))
    }

    /// Replace username and email.
    pub fn update_profile(&self, deadline: &Deadline, id: &str, username: &str, email: &str) -> Result<User> {
        let deadline = deadline.narrow(self.timeout);

        let updated = self.db.with_conn(&deadline, |conn| {
            db::users::update_profile(conn, id, username, email)
        })?;
        if !updated {
            return Err(AppError::NotFound("user".to_string()));
        }

        tracing::info!(user = %id, "Updated profile");
        self.get(&deadline, id)
    }

    /// Username, statistics and public collections of a user.
    pub fn public_profile(&self, deadline: &Deadline, id: &str) -> Result<PublicProfile> {
        let deadline = deadline.narrow(self.timeout);
        let user = self.get(&deadline, id)?;

        let filter = CollectionFilter {
            public_only: true,
            author: Some(user.id.clone()),
            ..Default::default()
        };
        let collections = self
            .db
            .with_conn(&deadline, |conn| db::collections::find(conn, &filter))?;

        Ok(PublicProfile {
            id: user.id,
            username: user.username,
            has_picture: user.has_picture,
            statistics: user.statistics,
            collections,
        })
    }

    /// Store or replace the profile picture.
    pub fn upload_picture(&self, deadline: &Deadline, id: &str, bytes: &[u8]) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);
        self.get(&deadline, id)?;

        self.blobs.put(USER_BUCKET, id, bytes)?;
        self.db
            .with_conn(&deadline, |conn| db::users::set_has_picture(conn, id, true))?;

        tracing::info!(user = %id, bytes = bytes.len(), "Uploaded profile picture");
        Ok(())
    }

    /// Read the profile picture.
    pub fn get_picture(&self, deadline: &Deadline, id: &str) -> Result<Vec<u8>> {
        let deadline = deadline.narrow(self.timeout);
        let user = self.get(&deadline, id)?;
        if !user.has_picture {
            return Err(AppError::NotFound("picture".to_string()));
        }
        self.blobs.get(USER_BUCKET, id)
    }

    /// Remove the profile picture, clearing the flag first.
    pub fn remove_picture(&self, deadline: &Deadline, id: &str) -> Result<()> {
        let deadline = deadline.narrow(self.timeout);
        let user = self.get(&deadline, id)?;
        if !user.has_picture {
            return Err(AppError::NotFound("picture".to_string()));
        }

        self.db
            .with_conn(&deadline, |conn| db::users::set_has_picture(conn, id, false))?;

        match self.blobs.delete(USER_BUCKET, id) {
            Ok(()) => {}
            Err(e) if e.is_missing_picture() => {
                tracing::warn!(user = %id, "Profile picture flag was set without a stored object");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(user = %id, "Removed profile picture");
        Ok(())
    }
}
