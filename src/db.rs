pub(crate) mod collections;
pub(crate) mod history;
mod schema;
pub(crate) mod users;

pub use collections::{CollectionFilter, TextMatch};
pub use schema::Database;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-user ceiling for card picture bytes (3 GiB), shared by all users.
pub const MAX_TOTAL_FILE_SIZE: i64 = 3 * 1024 * 1024 * 1024;

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID, generated server-side.
    pub id: String,
    /// Display username.
    pub username: String,
    /// Login email (unique).
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Whether a profile picture is stored.
    pub has_picture: bool,
    /// IDs of owned collections.
    pub collections: Vec<String>,
    /// IDs of liked collections.
    pub favourites: Vec<String>,
    /// Derived training statistics.
    pub statistics: UserStatistics,
    /// Bytes consumed by card pictures.
    pub storage_used: i64,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// Derived training statistics of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatistics {
    /// Number of recorded trainings.
    pub total_trainings: i64,
    /// Truncated average of per-training correct percentages.
    pub medium_percentage: i64,
}

/// The two collection-ID lists kept on a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserList {
    /// Collections authored by the user.
    Owned,
    /// Collections the user liked.
    Favourites,
}

impl UserList {
    pub(crate) fn table(self) -> &'static str {
        match self {
            UserList::Owned => "user_collections",
            UserList::Favourites => "user_favourites",
        }
    }
}

/// Lifecycle marker of a stored collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    /// Visible to every read.
    Active,
    /// Hidden from reads, awaiting physical removal.
    Deleted,
}

impl CollectionStatus {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionStatus::Active => "active",
            CollectionStatus::Deleted => "deleted",
        }
    }

    /// Parse stored representation, unknown values are treated as deleted.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => CollectionStatus::Active,
            _ => CollectionStatus::Deleted,
        }
    }
}

/// A named set of study cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Unique collection ID, generated server-side.
    pub id: String,
    /// Collection name.
    pub name: String,
    /// Whether the collection is visible to other users.
    pub is_public: bool,
    /// Author user ID, immutable after creation.
    pub author: String,
    /// Cards in insertion order.
    pub cards: Vec<Card>,
    /// Next card local ID to assign.
    pub max_id: i64,
    /// Like counter.
    pub likes: i64,
    /// Training counter.
    pub trainings: i64,
    /// Lifecycle marker.
    #[serde(skip_serializing, default = "default_status")]
    pub status: CollectionStatus,
    /// Creation timestamp.
    pub created_at: i64,
}

fn default_status() -> CollectionStatus {
    CollectionStatus::Active
}

impl Collection {
    /// Find a card by its local ID.
    pub fn card(&self, local_id: i64) -> Option<&Card> {
        self.cards.iter().find(|c| c.local_id == local_id)
    }
}

/// Fields accepted when creating or updating a collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionDraft {
    /// Collection name.
    pub name: String,
    /// Visibility flag.
    #[serde(default)]
    pub is_public: bool,
}

/// A question/answer unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Per-collection ID, assigned by the collection service.
    #[serde(default)]
    pub local_id: i64,
    /// Question text.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// Blob object name, empty when there is no picture.
    #[serde(default)]
    pub attachment: String,
    /// Alternate acceptable answers.
    #[serde(default)]
    pub other_answers: OtherAnswers,
}

/// Alternate acceptable answers of a card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtherAnswers {
    /// Must equal `items.len()`.
    pub count: usize,
    /// Answers.
    #[serde(default)]
    pub items: Vec<String>,
}

/// Record of one completed study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Trained collection.
    pub collection_id: String,
    /// Collection name at training time.
    pub collection_name: String,
    /// Training time in seconds.
    pub time: i64,
    /// Local IDs answered correctly.
    pub correct_cards: Vec<i64>,
    /// Local IDs answered incorrectly.
    #[serde(default)]
    pub incorrect_cards: Vec<i64>,
    /// Number of cards attempted.
    pub all_cards_count: i64,
    /// Per-card error details.
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
    /// Per-card right answer details.
    #[serde(default)]
    pub right_answers: Vec<RightAnswerItem>,
}

/// Reduced history item kept on the collection side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallHistoryItem {
    /// Collection name at training time.
    pub collection_name: String,
    /// Training time in seconds.
    pub time: i64,
    /// Local IDs answered correctly.
    pub correct_cards: Vec<i64>,
    /// Local IDs answered incorrectly.
    pub incorrect_cards: Vec<i64>,
    /// Number of cards attempted.
    pub all_cards_count: i64,
}

impl From<&HistoryItem> for SmallHistoryItem {
    fn from(item: &HistoryItem) -> Self {
        Self {
            collection_name: item.collection_name.clone(),
            time: item.time,
            correct_cards: item.correct_cards.clone(),
            incorrect_cards: item.incorrect_cards.clone(),
            all_cards_count: item.all_cards_count,
        }
    }
}

/// A wrong answer given during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorItem {
    /// Card local ID.
    pub card_id: i64,
    /// Card question.
    pub question: String,
    /// Expected answer.
    pub answer: String,
    /// Exercise type.
    #[serde(rename = "type")]
    pub kind: String,
    /// What the user typed.
    pub user_answer: String,
    /// Fill-in-the-blank variant of the answer.
    #[serde(default)]
    pub blank_answer: String,
    /// Card picture object name.
    #[serde(default)]
    pub attachment: String,
}

/// A right answer given during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightAnswerItem {
    /// Card local ID.
    pub card_id: i64,
    /// Exercise type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Field used to rank search results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Most liked first.
    #[default]
    Likes,
    /// Most trained first.
    Trainings,
}

impl SortBy {
    pub(crate) fn column(self) -> &'static str {
        match self {
            SortBy::Likes => "likes",
            SortBy::Trainings => "trainings",
        }
    }
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
