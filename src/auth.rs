//! Authentication module.

use crate::config::AuthConfig;
use crate::db::{self, Database, User, UserStatistics, now_timestamp};
use crate::deadline::Deadline;
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a random signing secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Claims of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID.
    pub id: String,
    /// Username at issue time.
    pub username: String,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Claims of a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// User ID.
    pub id: String,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Access and refresh token pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token exchanged for a new pair.
    pub refresh_token: String,
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    access_secret: String,
    refresh_secret: String,
    access_expiry_hours: u32,
    refresh_expiry_hours: u32,
    registration_enabled: bool,
    timeout: Duration,
}

fn secret_or_random(secret: &str, name: &str) -> String {
    if secret.is_empty() {
        tracing::warn!(secret = name, "No signing secret configured, tokens will not survive a restart");
        generate_secret()
    } else {
        secret.to_string()
    }
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, config: &AuthConfig, timeout: Duration) -> Self {
        Self {
            db,
            access_secret: secret_or_random(&config.access_secret, "access"),
            refresh_secret: secret_or_random(&config.refresh_secret, "refresh"),
            access_expiry_hours: config.access_expiry_hours,
            refresh_expiry_hours: config.refresh_expiry_hours,
            registration_enabled: config.registration_enabled(),
            timeout,
        }
    }

    /// Register a new user.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::PermissionDenied(
                "Registration is disabled".to_string(),
            ));
        }

        self.create_user(username, email, password)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if username.is_empty() || username.len() > 64 {
            return Err(AppError::Validation(
                "Username must be 1-64 characters".to_string(),
            ));
        }

        if !email.contains('@') {
            return Err(AppError::Validation("Invalid email".to_string()));
        }

        if password.len() < 4 {
            return Err(AppError::Validation(
                "Password must be at least 4 characters".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            has_picture: false,
            collections: Vec::new(),
            favourites: Vec::new(),
            statistics: UserStatistics::default(),
            storage_used: 0,
            created_at: now_timestamp(),
        };

        let deadline = Deadline::after(self.timeout);
        self.db.with_conn(&deadline, |conn| db::users::insert(conn, &user))?;

        tracing::info!(user = %user.id, username = %user.username, "Created user");
        Ok(user)
    }

    /// Check credentials and issue a token pair.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, TokenPair)> {
        let deadline = Deadline::after(self.timeout);
        let user = self
            .db
            .with_conn(&deadline, |conn| db::users::get_by_email(conn, email))?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }

        let tokens = self.issue(&user)?;
        Ok((user, tokens))
    }

    /// Exchange a refresh token for a new pair.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = decode::<RefreshClaims>(
            refresh_token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| AppError::Unauthorized(format!("Invalid refresh token: {}", e)))?
        .claims;

        let deadline = Deadline::after(self.timeout);
        let user = self
            .db
            .with_conn(&deadline, |conn| db::users::get(conn, &claims.id))?
            .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

        self.issue(&user)
    }

    /// Validate an access token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<AccessClaims> {
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let deadline = Deadline::after(self.timeout);
        self.db.with_conn(&deadline, db::users::list)
    }

    fn issue(&self, user: &User) -> Result<TokenPair> {
        let now = now_timestamp();

        let access = AccessClaims {
            id: user.id.clone(),
            username: user.username.clone(),
            exp: now + i64::from(self.access_expiry_hours) * 3600,
        };
        let refresh = RefreshClaims {
            id: user.id.clone(),
            exp: now + i64::from(self.refresh_expiry_hours) * 3600,
        };

        let access_token = encode(
            &Header::default(),
            &access,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        let refresh_token = encode(
            &Header::default(),
            &refresh,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        let db = Database::open_memory().unwrap();
        AuthService::new(db, &AuthConfig::default(), Duration::from_secs(5))
    }

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_generate_secret() {
        let secret1 = generate_secret();
        let secret2 = generate_secret();

        assert_eq!(secret1.len(), 43); // Base64 of 32 bytes
        assert_ne!(secret1, secret2);
    }

    #[test]
    fn test_login_and_validate() {
        let auth = service();
        let user = auth.create_user("alice", "alice@example.com", "secret").unwrap();

        let (logged_in, tokens) = auth.login("alice@example.com", "secret").unwrap();
        assert_eq!(logged_in.id, user.id);

        let claims = auth.validate_token(&tokens.access_token).unwrap();
        assert_eq!(claims.id, user.id);
        assert_eq!(claims.username, "alice");

        assert!(auth.login("alice@example.com", "wrong").is_err());
        assert!(auth.validate_token(&tokens.refresh_token).is_err());
    }

    #[test]
    fn test_refresh_issues_new_pair() {
        let auth = service();
        let user = auth.create_user("bob", "bob@example.com", "secret").unwrap();
        let (_, tokens) = auth.login("bob@example.com", "secret").unwrap();

        let refreshed = auth.refresh(&tokens.refresh_token).unwrap();
        assert_eq!(auth.validate_token(&refreshed.access_token).unwrap().id, user.id);
        assert!(auth.refresh(&tokens.access_token).is_err());
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let auth = service();
        auth.create_user("carol", "carol@example.com", "secret").unwrap();
        let err = auth
            .create_user("carol2", "carol@example.com", "secret")
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_registration_can_be_disabled() {
        let config = AuthConfig {
            registration: "disabled".to_string(),
            ..AuthConfig::default()
        };
        let auth = AuthService::new(Database::open_memory().unwrap(), &config, Duration::from_secs(5));
        assert!(auth.register("dave", "dave@example.com", "secret").is_err());
    }
}
