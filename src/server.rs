//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.limits.max_picture_bytes + 1);

    let public_routes = Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/refreshToken", post(handlers::refresh_token));

    let user_routes = Router::new()
        .route("/", get(handlers::get_user).put(handlers::update_user))
        .route(
            "/picture",
            get(handlers::get_user_picture)
                .put(handlers::upload_user_picture)
                .delete(handlers::delete_user_picture),
        )
        .route("/history", get(handlers::user_history))
        .route("/{id}/public", get(handlers::public_profile));

    let collection_routes = Router::new()
        .route("/", post(handlers::create_collection))
        .route("/search", get(handlers::search_collections))
        .route("/training", post(handlers::add_training))
        .route(
            "/{id}",
            get(handlers::get_collection)
                .put(handlers::update_collection)
                .delete(handlers::delete_collection),
        )
        .route("/{id}/history", get(handlers::collection_history))
        .route(
            "/{id}/like",
            post(handlers::add_like).delete(handlers::remove_like),
        )
        .route("/{id}/card", post(handlers::create_card))
        .route(
            "/{id}/card/{card_id}",
            put(handlers::update_card).delete(handlers::delete_card),
        )
        .route(
            "/{id}/card/{card_id}/picture",
            get(handlers::get_card_picture)
                .put(handlers::upload_card_picture)
                .delete(handlers::delete_card_picture),
        );

    let global_routes = Router::new().route("/trainingPlan", get(handlers::training_plan));

    Router::new()
        .route("/", get(handlers::ping))
        .nest("/public", public_routes)
        .nest("/user", user_routes)
        .nest("/collection", collection_routes)
        .nest("/global", global_routes)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
