//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::blob::BlobStore;
use crate::config::Config;
use crate::db::Database;
use crate::deadline::Deadline;
use crate::service::{AttachmentService, CollectionService, HistoryService, UserService};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Collection use cases.
    pub collections: Arc<CollectionService>,
    /// Card picture use cases.
    pub attachments: Arc<AttachmentService>,
    /// Training history use cases.
    pub history: Arc<HistoryService>,
    /// Profile use cases.
    pub users: Arc<UserService>,
}

impl AppState {
    /// Wire the services over a database and blob store.
    pub fn new(config: Config, db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        let timeout = config.limits.request_timeout();

        let auth = AuthService::new(db.clone(), &config.auth, timeout);
        let collections = CollectionService::new(db.clone(), blobs.clone(), timeout);
        let attachments = AttachmentService::new(db.clone(), blobs.clone(), timeout);
        let history = HistoryService::new(db.clone(), timeout);
        let users = UserService::new(db, blobs, timeout);

        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            collections: Arc::new(collections),
            attachments: Arc::new(attachments),
            history: Arc::new(history),
            users: Arc::new(users),
        }
    }

    /// Deadline for a request starting now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.config.limits.request_timeout())
    }
}
