//! flashcards: a flashcard study server.
//!
//! Users register, build card collections, like and train on them. The
//! server keeps likes, favourites, training counters, history logs and
//! derived statistics consistent across independently stored records, and
//! accounts card pictures against a per-user storage quota.
//!
//! # Features
//!
//! - Collections with cards, alternate answers and card pictures
//! - Likes mirrored by per-user favourites
//! - Training history with recomputed statistics
//! - Full-text collection search with substring fallback
//! - Spaced-repetition training plans
//! - JWT authentication with refresh tokens

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Picture blob storage.
pub mod blob;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Per-operation deadlines.
pub mod deadline;
/// Error types.
pub mod error;
/// HTTP server.
pub mod server;
/// Collection, attachment and history use cases.
pub mod service;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
