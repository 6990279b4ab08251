use crate::db::{self, Database, HistoryItem, SmallHistoryItem, UserStatistics};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Training ingestion and history reads.
pub struct HistoryService {
    db: Database,
    timeout: Duration,
}

/// Recompute statistics from a full history.
///
/// Items with no attempted cards add nothing to the percentage sum but still
/// count as trainings.
pub fn calc_statistics(items: &[HistoryItem]) -> UserStatistics {
    let count = items.len() as i64;
    if count == 0 {
        return UserStatistics::default();
    }

    let sum: f64 = items
        .iter()
        .filter(|item| item.all_cards_count > 0)
        .map(|item| item.correct_cards.len() as f64 / item.all_cards_count as f64 * 100.0)
        .sum();

    UserStatistics {
        total_trainings: count,
        medium_percentage: sum as i64 / count,
    }
}

/// Check a history item's shape before anything is stored.
pub fn validate_training(item: &HistoryItem) -> Result<()> {
    if item.collection_id.is_empty() {
        return Err(AppError::Validation("collection_id is required".to_string()));
    }
    if item.collection_name.is_empty() {
        return Err(AppError::Validation("collection_name is required".to_string()));
    }
    if item.all_cards_count <= 0 {
        return Err(AppError::Validation(
            "all_cards_count must be positive".to_string(),
        ));
    }
    if item.correct_cards.len() as i64 > item.all_cards_count {
        return Err(AppError::Validation(
            "More correct cards than cards attempted".to_string(),
        ));
    }
    if item.time < 0 {
        return Err(AppError::Validation("time cannot be negative".to_string()));
    }
    Ok(())
}

impl HistoryService {
    /// Create a new history service.
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Record a finished training.
    ///
    /// The four steps run one after another without a surrounding
    /// transaction; a failure part way leaves the earlier steps applied.
    pub fn add_training(&self, deadline: &Deadline, user_id: &str, item: &HistoryItem) -> Result<UserStatistics> {
        validate_training(item)?;
        let deadline = deadline.narrow(self.timeout);

        self.db
            .with_conn(&deadline, |conn| db::history::push_user_item(conn, user_id, item))?;

        let history = self
            .db
            .with_conn(&deadline, |conn| db::history::user_items(conn, user_id, 0))?;
        let stats = calc_statistics(&history);
        self.db
            .with_conn(&deadline, |conn| db::users::set_statistics(conn, user_id, stats))?;

        let counted = self.db.with_conn(&deadline, |conn| {
            db::collections::add_training(conn, &item.collection_id)
        })?;
        if !counted {
            return Err(AppError::NotFound("collection".to_string()));
        }

        let small = SmallHistoryItem::from(item);
        self.db.with_conn(&deadline, |conn| {
            db::history::push_collection_item(conn, &item.collection_id, &small)
        })?;

        tracing::info!(
            user = %user_id,
            collection = %item.collection_id,
            correct = item.correct_cards.len(),
            total = item.all_cards_count,
            trainings = stats.total_trainings,
            medium_percentage = stats.medium_percentage,
            "Recorded training"
        );
        Ok(stats)
    }

    /// User history items with `time >= from_time`, in recorded order.
    pub fn user_history_from_time(
        &self,
        deadline: &Deadline,
        user_id: &str,
        from_time: i64,
    ) -> Result<Vec<HistoryItem>> {
        let deadline = deadline.narrow(self.timeout);
        self.db
            .with_conn(&deadline, |conn| db::history::user_items(conn, user_id, from_time))
    }

    /// Reduced training log of a collection.
    pub fn collection_history(&self, deadline: &Deadline, collection_id: &str) -> Result<Vec<SmallHistoryItem>> {
        let deadline = deadline.narrow(self.timeout);
        self.db
            .with_conn(&deadline, |conn| db::history::collection_items(conn, collection_id))
    }
}
