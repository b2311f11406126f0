use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::SharedState;
use crate::world::Role;

// ── JWT ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,        // user id
    pub role: Role,
    pub exp: usize,       // expiry timestamp
    pub iat: usize,       // issued at
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Signs and checks session tokens. Built once from settings.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], lifetime_minutes: u32) -> Self {
        SessionKeys {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifetime: Duration::minutes(i64::from(lifetime_minutes)),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, SessionError> {
        let now = Utc::now();
        let expiry = now + self.lifetime;

        let claims = Claims {
            sub: user_id,
            role,
            exp: expiry.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

// ── Passwords ──────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, SessionError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SessionError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// ── Middleware ─────────────────────────────────────────────────

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

pub fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| AppError::Unauthorized("missing or invalid token".into()))?;

    let claims = state.sessions.verify(token)
        .map_err(|_| AppError::Unauthorized("invalid token".into()))?;

    let user = state.current_user(claims.sub)
        .ok_or_else(|| AppError::Unauthorized("user not found".into()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_carries_id_and_role() {
        let keys = SessionKeys::new(b"test-secret", 60);
        let id = Uuid::new_v4();

        let token = keys.issue(id, Role::Manager).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Manager);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let ours = SessionKeys::new(b"ours", 60);
        let theirs = SessionKeys::new(b"theirs", 60);

        let token = theirs.issue(Uuid::new_v4(), Role::Admin).unwrap();
        assert!(ours.verify(&token).is_err());
        assert!(ours.verify("not-a-jwt").is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn bearer_prefix_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
