//! HTTP request handlers.

use crate::auth::AccessClaims;
use crate::db::{Card, Collection, CollectionDraft, HistoryItem, OtherAnswers, SmallHistoryItem, SortBy, User};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::service::{self, PublicProfile, SearchCategory, SearchQuery};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Build an image response.
fn image_response(data: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(data))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Generic message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

// ============================================================================
// PUBLIC
// ============================================================================

/// Health check.
pub async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Signup request.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    username: String,
    email: String,
    password: String,
}

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Refresh request.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

/// Token response.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    user_id: String,
    access_token: String,
    refresh_token: String,
}

/// Register a new account and log it in.
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<TokenResponse>> {
    state.auth.register(&req.username, &req.email, &req.password)?;
    let (user, tokens) = state.auth.login(&req.email, &req.password)?;

    Ok(Json(TokenResponse {
        user_id: user.id,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

/// Log in by email and password.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let (user, tokens) = state.auth.login(&req.email, &req.password)?;

    Ok(Json(TokenResponse {
        user_id: user.id,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

/// Exchange a refresh token for a new pair.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>> {
    let tokens = state.auth.refresh(&req.refresh_token)?;
    let claims = state.auth.validate_token(&tokens.access_token)?;

    Ok(Json(TokenResponse {
        user_id: claims.id,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

// ============================================================================
// USER
// ============================================================================

/// Profile update request.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    username: String,
    email: String,
}

/// History query.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    from: i64,
}

/// History response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse<T> {
    count: usize,
    items: Vec<T>,
}

impl<T> From<Vec<T>> for HistoryResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Get the caller's profile.
pub async fn get_user(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>> {
    let caller = authenticate(&state, &headers)?;
    let user = state.users.get(&state.deadline(), &caller.id)?;
    Ok(Json(user))
}

/// Update the caller's username and email.
pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>> {
    let caller = authenticate(&state, &headers)?;

    if req.username.trim().is_empty() {
        return Err(AppError::Validation("Username cannot be empty".to_string()));
    }
    if !req.email.contains('@') {
        return Err(AppError::Validation("Invalid email".to_string()));
    }

    let user = state
        .users
        .update_profile(&state.deadline(), &caller.id, &req.username, &req.email)?;
    Ok(Json(user))
}

/// Get the caller's profile picture.
pub async fn get_user_picture(State(state): State<AppState>, headers: HeaderMap) -> Result<Response<Body>> {
    let caller = authenticate(&state, &headers)?;
    let data = state.users.get_picture(&state.deadline(), &caller.id)?;
    Ok(image_response(data))
}

/// Store the caller's profile picture.
pub async fn upload_user_picture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;
    check_jpeg(&state, &body)?;

    state.users.upload_picture(&state.deadline(), &caller.id, &body)?;
    Ok(MessageResponse::new("Profile picture uploaded"))
}

/// Remove the caller's profile picture.
pub async fn delete_user_picture(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;
    state.users.remove_picture(&state.deadline(), &caller.id)?;
    Ok(MessageResponse::new("Profile picture deleted"))
}

/// Training history of the caller since `from`.
pub async fn user_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse<HistoryItem>>> {
    let caller = authenticate(&state, &headers)?;

    if query.from < 0 {
        return Err(AppError::Validation("from cannot be negative".to_string()));
    }

    let items = state
        .history
        .user_history_from_time(&state.deadline(), &caller.id, query.from)?;
    Ok(Json(items.into()))
}

/// Public view of another user.
pub async fn public_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>> {
    authenticate(&state, &headers)?;
    let profile = state.users.public_profile(&state.deadline(), &id)?;
    Ok(Json(profile))
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Search query.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    name: String,
    #[serde(default = "default_search_count")]
    count: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    sort_by: SortBy,
    #[serde(default)]
    category: SearchCategory,
}

fn default_search_count() -> i64 {
    20
}

/// Search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    count: usize,
    collections: Vec<Collection>,
}

/// Created resource response.
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    id: String,
}

/// Like counter response.
#[derive(Debug, Serialize)]
pub struct LikesResponse {
    likes: i64,
}

/// Create a collection owned by the caller.
pub async fn create_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<CollectionDraft>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let caller = authenticate(&state, &headers)?;
    validate_draft(&draft)?;

    let id = state.collections.create(&state.deadline(), &draft, &caller.id)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// Search collections.
pub async fn search_collections(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>> {
    let caller = authenticate(&state, &headers)?;

    if !(1..=100).contains(&params.count) {
        return Err(AppError::Validation("count must be between 1 and 100".to_string()));
    }
    if params.offset < 0 {
        return Err(AppError::Validation("offset cannot be negative".to_string()));
    }

    let query = SearchQuery {
        text: params.name,
        count: params.count,
        offset: params.offset,
        sort_by: params.sort_by,
        category: params.category,
    };
    let collections = state.collections.search(&state.deadline(), &query, &caller.id)?;

    Ok(Json(SearchResponse {
        count: collections.len(),
        collections,
    }))
}

/// Get a collection.
pub async fn get_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Collection>> {
    let caller = authenticate(&state, &headers)?;
    let collection = state.collections.get(&state.deadline(), &id)?;
    require_readable(&collection, &caller.id)?;
    Ok(Json(collection))
}

/// Rename a collection or change its visibility.
pub async fn update_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<CollectionDraft>,
) -> Result<Json<Collection>> {
    let caller = authenticate(&state, &headers)?;
    validate_draft(&draft)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    state.collections.update(&deadline, &id, &draft)?;
    Ok(Json(state.collections.get(&deadline, &id)?))
}

/// Delete a collection with its cards and pictures.
pub async fn delete_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    state.collections.delete(&deadline, &id, &caller.id)?;
    Ok(MessageResponse::new("Collection deleted"))
}

/// Training log of a collection.
pub async fn collection_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse<SmallHistoryItem>>> {
    let caller = authenticate(&state, &headers)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_readable(&collection, &caller.id)?;

    let items = state.history.collection_history(&deadline, &id)?;
    Ok(Json(items.into()))
}

/// Like a collection.
pub async fn add_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LikesResponse>> {
    let caller = authenticate(&state, &headers)?;

    let deadline = state.deadline();
    let user = state.users.get(&deadline, &caller.id)?;
    if user.favourites.contains(&id) {
        return Err(AppError::Validation("Collection already in favourites".to_string()));
    }

    let collection = state.collections.get(&deadline, &id)?;
    if !collection.is_public && collection.author != caller.id {
        return Err(AppError::PermissionDenied("Collection is not public".to_string()));
    }

    let collection = state.collections.add_like(&deadline, &id, &caller.id)?;
    Ok(Json(LikesResponse {
        likes: collection.likes,
    }))
}

/// Remove a like.
pub async fn remove_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LikesResponse>> {
    let caller = authenticate(&state, &headers)?;

    let deadline = state.deadline();
    let user = state.users.get(&deadline, &caller.id)?;
    if !user.favourites.contains(&id) {
        return Err(AppError::Validation("Collection not in favourites".to_string()));
    }

    let collection = state.collections.remove_like(&deadline, &id, &caller.id)?;
    Ok(Json(LikesResponse {
        likes: collection.likes,
    }))
}

// ============================================================================
// CARDS
// ============================================================================

/// Card create/update request.
#[derive(Debug, Deserialize)]
pub struct CardRequest {
    question: String,
    answer: String,
    #[serde(default)]
    other_answers: OtherAnswers,
}

impl CardRequest {
    fn into_card(self, local_id: i64) -> Result<Card> {
        if self.question.trim().is_empty() || self.answer.trim().is_empty() {
            return Err(AppError::Validation(
                "Question and answer cannot be empty".to_string(),
            ));
        }
        if self.other_answers.count != self.other_answers.items.len() {
            return Err(AppError::Validation(
                "other_answers.count does not match its items".to_string(),
            ));
        }

        Ok(Card {
            local_id,
            question: self.question,
            answer: self.answer,
            attachment: String::new(),
            other_answers: self.other_answers,
        })
    }
}

/// Add a card to a collection.
pub async fn create_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CardRequest>,
) -> Result<(StatusCode, Json<Card>)> {
    let caller = authenticate(&state, &headers)?;
    let card = req.into_card(0)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    let card = state.collections.add_card(&deadline, &id, &card)?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// Edit a card.
pub async fn update_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, card_id)): Path<(String, i64)>,
    Json(req): Json<CardRequest>,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;
    let card = req.into_card(card_id)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    state.collections.update_card(&deadline, &id, &card)?;
    Ok(MessageResponse::new("Card updated"))
}

/// Delete a card, releasing its picture first.
pub async fn delete_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, card_id)): Path<(String, i64)>,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    let card = collection
        .card(card_id)
        .ok_or_else(|| AppError::NotFound("card".to_string()))?;

    if !card.attachment.is_empty() {
        match state
            .attachments
            .remove(&deadline, &caller.id, &id, card_id, &card.attachment)
        {
            Ok(()) => {}
            Err(e) if e.is_missing_picture() => {
                tracing::debug!(collection = %id, card = card_id, "Card picture already absent");
            }
            Err(e) => return Err(e),
        }
    }

    state.collections.delete_card(&deadline, &id, card_id)?;
    Ok(MessageResponse::new("Card deleted"))
}

// ============================================================================
// CARD PICTURES
// ============================================================================

/// Picture object query.
#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    object_name: String,
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    object_name: String,
}

/// Read a card picture.
pub async fn get_card_picture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, card_id)): Path<(String, i64)>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response<Body>> {
    let caller = authenticate(&state, &headers)?;
    check_object_name(&query.object_name, &id, card_id)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_readable(&collection, &caller.id)?;

    let data = state.attachments.get(&deadline, &query.object_name)?;
    Ok(image_response(data))
}

/// Attach a JPEG picture to a card, replacing any previous one.
pub async fn upload_card_picture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, card_id)): Path<(String, i64)>,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    let caller = authenticate(&state, &headers)?;
    check_jpeg(&state, &body)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &id)?;
    require_author(&collection, &caller.id)?;

    let card = collection
        .card(card_id)
        .ok_or_else(|| AppError::NotFound("card".to_string()))?;
    if !card.attachment.is_empty() {
        state
            .attachments
            .remove(&deadline, &caller.id, &id, card_id, &card.attachment)?;
    }

    let object_name = state
        .attachments
        .upload(&deadline, &caller.id, &id, card_id, &body)?;
    Ok(Json(UploadResponse { object_name }))
}

/// Remove a card picture.
pub async fn delete_card_picture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, card_id)): Path<(String, i64)>,
    Query(query): Query<ObjectQuery>,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;
    check_object_name(&query.object_name, &id, card_id)?;

    let deadline = state.deadline();
    let user = state.users.get(&deadline, &caller.id)?;
    if !user.collections.contains(&id) {
        return Err(AppError::PermissionDenied("Access denied".to_string()));
    }

    state
        .attachments
        .remove(&deadline, &caller.id, &id, card_id, &query.object_name)?;
    Ok(MessageResponse::new("Card picture deleted"))
}

// ============================================================================
// TRAINING
// ============================================================================

/// Training plan query.
#[derive(Debug, Deserialize)]
pub struct PlanQuery {
    #[serde(rename = "start_date")]
    start: i64,
    #[serde(rename = "end_date")]
    finish: i64,
    preferred_time: i64,
}

/// Training plan response.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    count: usize,
    items: Vec<i64>,
}

/// Record a finished training of the caller.
pub async fn add_training(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(item): Json<HistoryItem>,
) -> Result<Json<MessageResponse>> {
    let caller = authenticate(&state, &headers)?;
    service::validate_training(&item)?;

    let deadline = state.deadline();
    let collection = state.collections.get(&deadline, &item.collection_id)?;
    require_readable(&collection, &caller.id)?;

    state.history.add_training(&deadline, &caller.id, &item)?;
    Ok(MessageResponse::new("Training recorded"))
}

/// Spaced-repetition schedule.
pub async fn training_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PlanQuery>,
) -> Result<Json<PlanResponse>> {
    authenticate(&state, &headers)?;

    if !(0..86400).contains(&query.preferred_time) {
        return Err(AppError::Validation("Invalid preferred time".to_string()));
    }
    if query.finish - query.start < 86400 {
        return Err(AppError::Validation(
            "Plan must span at least a day".to_string(),
        ));
    }

    let items = service::training_plan(query.start, query.finish, query.preferred_time);
    Ok(Json(PlanResponse {
        count: items.len(),
        items,
    }))
}

// ============================================================================
// HELPERS
// ============================================================================

fn validate_draft(draft: &CollectionDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(AppError::Validation("Name cannot be empty".to_string()));
    }
    Ok(())
}

fn require_author(collection: &Collection, user_id: &str) -> Result<()> {
    if collection.author != user_id {
        return Err(AppError::PermissionDenied(
            "Only the author can modify this collection".to_string(),
        ));
    }
    Ok(())
}

fn require_readable(collection: &Collection, user_id: &str) -> Result<()> {
    if !collection.is_public && collection.author != user_id {
        return Err(AppError::PermissionDenied("Collection is private".to_string()));
    }
    Ok(())
}

/// Object names look like `{collection}_{card}_{timestamp}`.
fn check_object_name(object_name: &str, collection_id: &str, card_id: i64) -> Result<()> {
    let parts: Vec<&str> = object_name.split('_').collect();
    if parts.len() != 3 {
        return Err(AppError::Validation("Invalid object_name".to_string()));
    }
    if parts[0] != collection_id || parts[1] != card_id.to_string() {
        return Err(AppError::Validation(
            "object_name does not belong to this card".to_string(),
        ));
    }
    Ok(())
}

fn check_jpeg(state: &AppState, body: &[u8]) -> Result<()> {
    if body.len() > state.config.limits.max_picture_bytes {
        return Err(AppError::Validation(format!(
            "Picture must be at most {} bytes",
            state.config.limits.max_picture_bytes
        )));
    }
    if !body.starts_with(&JPEG_MAGIC) {
        return Err(AppError::Validation("Picture must be a JPEG".to_string()));
    }
    Ok(())
}

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Identify the caller from the bearer token.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AccessClaims> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state.auth.validate_token(&token)
}
