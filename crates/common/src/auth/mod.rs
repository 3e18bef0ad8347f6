//! Authentication utilities
//!
//! Provides:
//! - Password hashing and verification (argon2)
//! - JWT session token generation and validation
//! - The `token` session cookie
//! - Session extraction for handlers

use crate::config::CookiePolicy;
use crate::db::models::User;
use crate::db::Repository;
use crate::errors::{AppError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "token";

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Username of the session owner
    pub username: String,

    /// User ID
    pub id: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Lifetime of issued tokens, in seconds
    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    /// Generate a session token for a user
    pub fn generate_token(&self, username: &str, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = SessionClaims {
            username: username.to_string(),
            id: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e)
            })
    }

    /// Validate and decode a session token
    pub fn validate_token(&self, token: &str) -> Result<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AppError::ExpiredToken
                    }
                    _ => AppError::InvalidToken,
                }
            })
    }
}

/// Hash a password into an argon2 PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::Internal {
        message: format!("Failed to encode salt: {}", e),
    })?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal {
            message: format!("Failed to hash password: {}", e),
        })
}

/// Check a password against a stored argon2 hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is not a valid PHC string");
            false
        }
    }
}

/// Look up a user and check the password; both failures look the same
pub async fn authenticate(repo: &Repository, username: &str, password: &str) -> Result<User> {
    let user = repo
        .find_user_by_username(username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if verify_password(password, &user.password_hash) {
        Ok(user)
    } else {
        Err(AppError::InvalidCredentials)
    }
}

/// Create the configured account if it does not exist yet
pub async fn ensure_user(repo: &Repository, username: &str, password: &str) -> Result<bool> {
    if repo.find_user_by_username(username).await?.is_some() {
        return Ok(false);
    }

    tracing::info!(username = %username, "User missing, creating it");
    repo.create_user(username, hash_password(password)?).await?;
    Ok(true)
}

/// Build the `Set-Cookie` value carrying a session token
pub fn session_cookie(token: &str, policy: CookiePolicy, max_age_secs: i64) -> String {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .secure(policy.secure)
        .same_site(SameSite::from(policy.same_site))
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build()
        .to_string()
}

/// Build the `Set-Cookie` value that clears the session cookie
pub fn clear_session_cookie(policy: CookiePolicy) -> String {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(policy.secure)
        .same_site(SameSite::from(policy.same_site))
        .build();
    cookie.make_removal();
    cookie.to_string()
}

/// Extract the session token from the `Cookie` headers
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|parsed| parsed.ok())
        .find(|c| c.name() == SESSION_COOKIE && !c.value().is_empty())
        .map(|c| c.value().to_string())
}

/// Authenticated session available to handlers
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub username: String,
    pub user_id: String,
}

/// Axum extractor for AuthSession
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    Arc<JwtManager>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let token = token_from_headers(&parts.headers).ok_or_else(|| AppError::Unauthorized {
            message: "No token provided".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.validate_token(&token)?;

        Ok(AuthSession {
            username: claims.username,
            user_id: claims.id,
        })
    }
}
