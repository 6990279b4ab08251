//! Use cases coordinating the repositories and the blob store.
//!
//! Every public method takes the caller's [`Deadline`](crate::deadline::Deadline)
//! and narrows it with the service's own timeout before touching storage.

mod attachments;
mod collections;
mod history;
mod plan;
mod users;

pub use attachments::AttachmentService;
pub use collections::{CollectionService, SearchCategory, SearchQuery};
pub use history::{HistoryService, calc_statistics, validate_training};
pub use plan::training_plan;
pub use users::{PublicProfile, UserService};
