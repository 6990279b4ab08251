use crate::blob::{BlobStore, CARD_BUCKET, FsBlobStore};
use crate::config::Config;
use crate::db::{
    self, Card, CollectionDraft, Database, HistoryItem, MAX_TOTAL_FILE_SIZE, OtherAnswers, SortBy,
    User, UserList, UserStatistics, now_timestamp,
};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use crate::service::{
    AttachmentService, CollectionService, HistoryService, SearchCategory, SearchQuery, UserService,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    db: Database,
    blobs: Arc<FsBlobStore>,
    collections: CollectionService,
    attachments: AttachmentService,
    history: HistoryService,
    users: UserService,
    dir: TempDir,
}

fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_memory().unwrap();
    let blobs = Arc::new(FsBlobStore::open(dir.path()).unwrap());

    Fixture {
        collections: CollectionService::new(db.clone(), blobs.clone(), TIMEOUT),
        attachments: AttachmentService::new(db.clone(), blobs.clone(), TIMEOUT),
        history: HistoryService::new(db.clone(), TIMEOUT),
        users: UserService::new(db.clone(), blobs.clone(), TIMEOUT),
        db,
        blobs,
        dir,
    }
}

fn deadline() -> Deadline {
    Deadline::after(TIMEOUT)
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password_hash: "hash".to_string(),
        has_picture: false,
        collections: Vec::new(),
        favourites: Vec::new(),
        statistics: UserStatistics::default(),
        storage_used: 0,
        created_at: now_timestamp(),
    };
    db.with_conn(&deadline(), |conn| db::users::insert(conn, &user))
        .unwrap();
}

fn get_user(db: &Database, id: &str) -> User {
    db.with_conn(&deadline(), |conn| db::users::get(conn, id))
        .unwrap()
        .unwrap()
}

fn draft(name: &str, is_public: bool) -> CollectionDraft {
    CollectionDraft {
        name: name.to_string(),
        is_public,
    }
}

fn card(question: &str, answer: &str) -> Card {
    Card {
        local_id: 0,
        question: question.to_string(),
        answer: answer.to_string(),
        attachment: String::new(),
        other_answers: OtherAnswers::default(),
    }
}

fn training(collection_id: &str, correct: usize, total: i64, time: i64) -> HistoryItem {
    HistoryItem {
        collection_id: collection_id.to_string(),
        collection_name: "Spanish".to_string(),
        time,
        correct_cards: (0..correct as i64).collect(),
        incorrect_cards: Vec::new(),
        all_cards_count: total,
        errors: Vec::new(),
        right_answers: Vec::new(),
    }
}

fn search(text: &str, count: i64, offset: i64, category: SearchCategory) -> SearchQuery {
    SearchQuery {
        text: text.to_string(),
        count,
        offset,
        sort_by: SortBy::Likes,
        category,
    }
}

fn set_likes(db: &Database, id: &str, likes: i64) {
    db.with_conn(&deadline(), |conn| db::collections::add_likes(conn, id, likes))
        .unwrap();
}

fn stored_objects(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join(CARD_BUCKET)).unwrap().count()
}

/// Blob store whose size lookups fail with an I/O error.
struct BrokenSizeStore {
    inner: Arc<FsBlobStore>,
}

impl BlobStore for BrokenSizeStore {
    fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.inner.ensure_bucket(bucket)
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        self.inner.put(bucket, key, data)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.inner.get(bucket, key)
    }

    fn size(&self, _bucket: &str, _key: &str) -> Result<u64> {
        Err(AppError::Io(std::io::Error::other("disk unavailable")))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete(bucket, key)
    }
}

// ============================================================================
// OWNERSHIP
// ============================================================================

#[test]
fn collection_create_links_owner() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");

    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let user = get_user(&f.db, "user-a");
    assert_eq!(user.collections, vec![id.clone()]);

    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.author, "user-a");
    assert_eq!(collection.max_id, 0);
    assert!(collection.cards.is_empty());
}

#[test]
fn collection_create_for_missing_owner_rolls_back() {
    let f = setup();

    let err = f
        .collections
        .create(&deadline(), &draft("Orphan", true), "ghost")
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let all = f
        .collections
        .search(&deadline(), &search("", 100, 0, SearchCategory::All), "ghost")
        .unwrap();
    assert!(all.is_empty());
}

#[test]
fn collection_create_with_expired_deadline_times_out() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");

    let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
    let err = f
        .collections
        .create(&expired, &draft("Late", true), "user-a")
        .unwrap_err();
    assert!(matches!(err, AppError::Timeout));
    assert!(get_user(&f.db, "user-a").collections.is_empty());
}

#[test]
fn collection_delete_unlinks_and_hides() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    f.collections.delete(&deadline(), &id, "user-a").unwrap();

    assert!(get_user(&f.db, "user-a").collections.is_empty());
    assert!(matches!(
        f.collections.get(&deadline(), &id),
        Err(AppError::NotFound(_))
    ));
    let raw = f
        .db
        .with_conn(&deadline(), |conn| db::collections::get_any(conn, &id))
        .unwrap();
    assert!(raw.is_none());
}

#[test]
fn collection_delete_by_non_owner_conflicts() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let err = f.collections.delete(&deadline(), &id, "user-b").unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    assert!(f.collections.get(&deadline(), &id).is_ok());
    assert_eq!(get_user(&f.db, "user-a").collections, vec![id]);
}

#[test]
fn collection_update_replaces_name_and_visibility() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", false), "user-a")
        .unwrap();

    f.collections
        .update(&deadline(), &id, &draft("Spanish verbs", true))
        .unwrap();

    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.name, "Spanish verbs");
    assert!(collection.is_public);

    let err = f
        .collections
        .update(&deadline(), "missing", &draft("x", true))
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ============================================================================
// LIKES
// ============================================================================

#[test]
fn like_and_unlike_keep_favourites_in_step() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let liked = f.collections.add_like(&deadline(), &id, "user-b").unwrap();
    assert_eq!(liked.likes, 1);
    assert_eq!(get_user(&f.db, "user-b").favourites, vec![id.clone()]);

    let unliked = f.collections.remove_like(&deadline(), &id, "user-b").unwrap();
    assert_eq!(unliked.likes, 0);
    assert!(get_user(&f.db, "user-b").favourites.is_empty());
}

#[test]
fn unlike_at_zero_is_noop() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.db.with_conn(&deadline(), |conn| {
        db::users::push_list(conn, "user-a", UserList::Favourites, &id)
    })
    .unwrap();

    let before = f.collections.get(&deadline(), &id).unwrap();
    let after = f.collections.remove_like(&deadline(), &id, "user-a").unwrap();

    assert_eq!(after.likes, 0);
    assert_eq!(after.likes, before.likes);
    assert_eq!(get_user(&f.db, "user-a").favourites, vec![id]);
}

#[test]
fn unlike_by_user_who_never_liked_conflicts() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    create_user(&f.db, "user-c", "carol");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections.add_like(&deadline(), &id, "user-b").unwrap();

    let err = f
        .collections
        .remove_like(&deadline(), &id, "user-c")
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    assert_eq!(f.collections.get(&deadline(), &id).unwrap().likes, 1);
    assert_eq!(get_user(&f.db, "user-b").favourites, vec![id]);
}

#[test]
fn like_missing_collection_rolls_back_favourite() {
    let f = setup();
    create_user(&f.db, "user-b", "bob");

    let err = f
        .collections
        .add_like(&deadline(), "missing", "user-b")
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(get_user(&f.db, "user-b").favourites.is_empty());
}

#[test]
fn like_on_private_collection_is_left_to_caller() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", false), "user-a")
        .unwrap();

    let liked = f.collections.add_like(&deadline(), &id, "user-b").unwrap();
    assert_eq!(liked.likes, 1);
}

// ============================================================================
// CARDS
// ============================================================================

#[test]
fn card_ids_are_never_reused() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let ids: Vec<i64> = (0..3)
        .map(|i| {
            f.collections
                .add_card(&deadline(), &id, &card(&format!("q{}", i), "a"))
                .unwrap()
                .local_id
        })
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);

    f.collections.delete_card(&deadline(), &id, 2).unwrap();
    let next = f
        .collections
        .add_card(&deadline(), &id, &card("q3", "a"))
        .unwrap();
    assert_eq!(next.local_id, 3);
    assert_eq!(f.collections.get(&deadline(), &id).unwrap().max_id, 4);
}

#[test]
fn card_round_trip() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let added = f
        .collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();
    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.card(added.local_id), Some(&added));

    let edited = Card {
        answer: "hi".to_string(),
        other_answers: OtherAnswers {
            count: 1,
            items: vec!["hello".to_string()],
        },
        ..added.clone()
    };
    f.collections.update_card(&deadline(), &id, &edited).unwrap();
    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.card(added.local_id), Some(&edited));

    f.collections
        .delete_card(&deadline(), &id, added.local_id)
        .unwrap();
    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert!(collection.card(added.local_id).is_none());

    assert!(matches!(
        f.collections.update_card(&deadline(), &id, &edited),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        f.collections.delete_card(&deadline(), &id, added.local_id),
        Err(AppError::NotFound(_))
    ));
}

// ============================================================================
// SEARCH
// ============================================================================

#[test]
fn search_ranks_by_likes_then_name() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");

    for (name, likes, public) in [
        ("Beta", 2, true),
        ("Alpha", 2, true),
        ("Gamma", 5, true),
        ("Delta", 9, false),
    ] {
        let id = f
            .collections
            .create(&deadline(), &draft(name, public), "user-a")
            .unwrap();
        set_likes(&f.db, &id, likes);
    }

    let page = f
        .collections
        .search(&deadline(), &search("", 10, 0, SearchCategory::All), "user-a")
        .unwrap();
    let names: Vec<&str> = page.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Gamma", "Alpha", "Beta"]);

    let page = f
        .collections
        .search(&deadline(), &search("", 1, 1, SearchCategory::All), "user-a")
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "Alpha");
}

#[test]
fn search_full_text_matches_words() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    f.collections
        .create(&deadline(), &draft("Spanish verbs", true), "user-a")
        .unwrap();
    f.collections
        .create(&deadline(), &draft("German nouns", true), "user-a")
        .unwrap();

    let found = f
        .collections
        .search(&deadline(), &search("verbs", 10, 0, SearchCategory::All), "user-a")
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Spanish verbs");
}

#[test]
fn search_falls_back_to_substring() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish verbs", true), "user-a")
        .unwrap();

    let found = f
        .collections
        .search(&deadline(), &search("PANIS", 10, 0, SearchCategory::All), "user-a")
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);

    f.collections.add_like(&deadline(), &id, "user-a").unwrap();
    let favourites = f
        .collections
        .search(&deadline(), &search("panis", 10, 0, SearchCategory::Favourite), "user-a")
        .unwrap();
    assert!(favourites.is_empty());
}

#[test]
fn search_favourites_only_returns_liked() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    let liked = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .create(&deadline(), &draft("German", true), "user-a")
        .unwrap();

    let none = f
        .collections
        .search(&deadline(), &search("", 10, 0, SearchCategory::Favourite), "user-b")
        .unwrap();
    assert!(none.is_empty());

    f.collections.add_like(&deadline(), &liked, "user-b").unwrap();
    let found = f
        .collections
        .search(&deadline(), &search("", 10, 0, SearchCategory::Favourite), "user-b")
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, liked);
}

#[test]
fn search_by_author_skips_private() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    f.collections
        .create(&deadline(), &draft("Public", true), "user-a")
        .unwrap();
    f.collections
        .create(&deadline(), &draft("Private", false), "user-a")
        .unwrap();
    f.collections
        .create(&deadline(), &draft("Other", true), "user-b")
        .unwrap();

    let found = f.collections.search_by_author(&deadline(), "user-a").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Public");

    let profile = f.users.public_profile(&deadline(), "user-a").unwrap();
    assert_eq!(profile.username, "alice");
    assert_eq!(profile.collections.len(), 1);
}

// ============================================================================
// ATTACHMENTS
// ============================================================================

#[test]
fn upload_and_remove_account_quota() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();

    let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];
    let object = f
        .attachments
        .upload(&deadline(), "user-a", &id, 0, &bytes)
        .unwrap();

    assert!(object.starts_with(&format!("{}_0_", id)));
    assert_eq!(get_user(&f.db, "user-a").storage_used, bytes.len() as i64);
    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.card(0).unwrap().attachment, object);
    assert_eq!(f.attachments.get(&deadline(), &object).unwrap(), bytes);

    f.attachments
        .remove(&deadline(), "user-a", &id, 0, &object)
        .unwrap();

    assert_eq!(get_user(&f.db, "user-a").storage_used, 0);
    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert!(collection.card(0).unwrap().attachment.is_empty());
    assert!(f.blobs.get(CARD_BUCKET, &object).unwrap_err().is_missing_picture());

    let again = f
        .attachments
        .remove(&deadline(), "user-a", &id, 0, &object)
        .unwrap_err();
    assert!(again.is_missing_picture());
}

#[test]
fn remove_for_wrong_card_keeps_picture() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("adios", "bye"))
        .unwrap();

    let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
    let object = f
        .attachments
        .upload(&deadline(), "user-a", &id, 0, &bytes)
        .unwrap();

    for card_id in [1, 99] {
        let err = f
            .attachments
            .remove(&deadline(), "user-a", &id, card_id, &object)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.card(0).unwrap().attachment, object);
    assert_eq!(f.blobs.get(CARD_BUCKET, &object).unwrap(), bytes);
    assert_eq!(get_user(&f.db, "user-a").storage_used, bytes.len() as i64);
}

#[test]
fn upload_over_quota_leaves_counter_unchanged() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();

    let used = MAX_TOTAL_FILE_SIZE - 10;
    f.db.with_conn(&deadline(), |conn| {
        db::users::reserve_quota(conn, "user-a", used, MAX_TOTAL_FILE_SIZE)
    })
    .unwrap();

    let err = f
        .attachments
        .upload(&deadline(), "user-a", &id, 0, &[0u8; 20])
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded { .. }));
    assert_eq!(get_user(&f.db, "user-a").storage_used, used);
    assert_eq!(stored_objects(&f.dir), 0);
}

#[test]
fn upload_requires_ownership() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();

    let err = f
        .attachments
        .upload(&deadline(), "user-b", &id, 0, &[1, 2, 3])
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    assert_eq!(get_user(&f.db, "user-b").storage_used, 0);
}

#[test]
fn upload_to_missing_card_is_compensated() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let err = f
        .attachments
        .upload(&deadline(), "user-a", &id, 42, &[1, 2, 3])
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(get_user(&f.db, "user-a").storage_used, 0);
    assert_eq!(stored_objects(&f.dir), 0);
}

#[test]
fn delete_cascade_releases_pictures_and_tolerates_missing() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("adios", "bye"))
        .unwrap();

    let kept = f
        .attachments
        .upload(&deadline(), "user-a", &id, 0, &[1, 2, 3, 4])
        .unwrap();
    let lost = f
        .attachments
        .upload(&deadline(), "user-a", &id, 1, &[5, 6])
        .unwrap();
    f.blobs.delete(CARD_BUCKET, &lost).unwrap();

    f.collections.delete(&deadline(), &id, "user-a").unwrap();

    assert!(f.blobs.get(CARD_BUCKET, &kept).unwrap_err().is_missing_picture());
    assert_eq!(stored_objects(&f.dir), 0);
    // The vanished object's size is unknown, so its debit stays.
    assert_eq!(get_user(&f.db, "user-a").storage_used, 2);
    assert!(get_user(&f.db, "user-a").collections.is_empty());
}

#[test]
fn delete_cascade_aborts_on_storage_failure() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();
    f.collections
        .add_card(&deadline(), &id, &card("hola", "hello"))
        .unwrap();
    let object = f
        .attachments
        .upload(&deadline(), "user-a", &id, 0, &[1, 2, 3, 4])
        .unwrap();

    let broken = Arc::new(BrokenSizeStore {
        inner: f.blobs.clone(),
    });
    let collections = CollectionService::new(f.db.clone(), broken, TIMEOUT);

    let err = collections.delete(&deadline(), &id, "user-a").unwrap_err();
    assert!(matches!(err, AppError::Io(_)));

    let collection = f.collections.get(&deadline(), &id).unwrap();
    assert_eq!(collection.card(0).unwrap().attachment, object);
    let user = get_user(&f.db, "user-a");
    assert_eq!(user.collections, vec![id]);
    assert_eq!(user.storage_used, 4);
    assert!(f.blobs.get(CARD_BUCKET, &object).is_ok());
}

#[test]
fn profile_picture_round_trip() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");

    assert!(
        f.users
            .get_picture(&deadline(), "user-a")
            .unwrap_err()
            .is_missing_picture()
    );

    f.users
        .upload_picture(&deadline(), "user-a", &[0xFF, 0xD8, 0xFF])
        .unwrap();
    assert!(get_user(&f.db, "user-a").has_picture);
    assert_eq!(
        f.users.get_picture(&deadline(), "user-a").unwrap(),
        vec![0xFF, 0xD8, 0xFF]
    );

    f.users.remove_picture(&deadline(), "user-a").unwrap();
    assert!(!get_user(&f.db, "user-a").has_picture);
}

#[test]
fn profile_update_rejects_taken_email() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    create_user(&f.db, "user-b", "bob");

    let user = f
        .users
        .update_profile(&deadline(), "user-a", "alicia", "alicia@example.com")
        .unwrap();
    assert_eq!(user.username, "alicia");

    let err = f
        .users
        .update_profile(&deadline(), "user-a", "alicia", "bob@example.com")
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

// ============================================================================
// HISTORY
// ============================================================================

#[test]
fn training_updates_history_statistics_and_counter() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    f.history
        .add_training(&deadline(), "user-a", &training(&id, 3, 10, 100))
        .unwrap();
    let stats = f
        .history
        .add_training(&deadline(), "user-a", &training(&id, 5, 5, 200))
        .unwrap();

    assert_eq!(stats.total_trainings, 2);
    assert_eq!(stats.medium_percentage, 65);
    assert_eq!(get_user(&f.db, "user-a").statistics, stats);
    assert_eq!(f.collections.get(&deadline(), &id).unwrap().trainings, 2);

    let log = f.history.collection_history(&deadline(), &id).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].correct_cards.len(), 3);
}

#[test]
fn history_from_time_keeps_insertion_order() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    for time in [300, 100, 200] {
        f.history
            .add_training(&deadline(), "user-a", &training(&id, 1, 1, time))
            .unwrap();
    }

    let all = f
        .history
        .user_history_from_time(&deadline(), "user-a", 0)
        .unwrap();
    let times: Vec<i64> = all.iter().map(|i| i.time).collect();
    assert_eq!(times, vec![300, 100, 200]);

    let recent = f
        .history
        .user_history_from_time(&deadline(), "user-a", 200)
        .unwrap();
    let times: Vec<i64> = recent.iter().map(|i| i.time).collect();
    assert_eq!(times, vec![300, 200]);

    assert!(
        f.history
            .user_history_from_time(&deadline(), "nobody", 0)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn training_validation_happens_before_storage() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");
    let id = f
        .collections
        .create(&deadline(), &draft("Spanish", true), "user-a")
        .unwrap();

    let err = f
        .history
        .add_training(&deadline(), "user-a", &training(&id, 3, 10, -5))
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(
        f.history
            .user_history_from_time(&deadline(), "user-a", 0)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn training_on_missing_collection_keeps_earlier_steps() {
    let f = setup();
    create_user(&f.db, "user-a", "alice");

    let err = f
        .history
        .add_training(&deadline(), "user-a", &training("gone", 1, 2, 10))
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let history = f
        .history
        .user_history_from_time(&deadline(), "user-a", 0)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(get_user(&f.db, "user-a").statistics.total_trainings, 1);
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9000"

[storage]
root = "/tmp/blobs"

[auth]
registration = "disabled"
access_expiry_hours = 1

[limits]
request_timeout_seconds = 3
"#;

    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9000);
    assert_eq!(config.storage.root, std::path::PathBuf::from("/tmp/blobs"));
    assert!(!config.auth.registration_enabled());
    assert_eq!(config.auth.access_expiry_hours, 1);
    assert_eq!(config.auth.refresh_expiry_hours, 168);
    assert_eq!(config.limits.request_timeout(), Duration::from_secs(3));
    assert_eq!(config.limits.max_picture_bytes, 5 * 1024 * 1024);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.auth.registration_enabled());
    assert_eq!(config.limits.request_timeout_seconds, 10);
}

#[test]
fn config_generated_template_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.limits.max_picture_bytes, 5 * 1024 * 1024);
    assert!(config.auth.access_secret.is_empty());
}
