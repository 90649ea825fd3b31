//! Password hashing, JWT issuing/verification and the request extractors
//! that guard user and admin routes.
//!
//! Users (NGO accounts) and admins are separate identity classes. Both get
//! HS256 tokens signed with the same secret, but the `role` claim decides
//! which class a token belongs to and the verifiers refuse the other one.

use std::time::{SystemTime, UNIX_EPOCH};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ApiError, Result};

/// Tokens stay valid for seven days.
const TOKEN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

pub const MIN_PASSWORD_LEN: usize = 8;

pub const USER_TOKEN_HEADER: &str = "token";
pub const ADMIN_TOKEN_HEADER: &str = "atoken";

// ─────────────────────────────────────────────────────────
// Passwords
// ─────────────────────────────────────────────────────────

/// Hash a password with Argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(format!("Invalid password hash format: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ─────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Ngo,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User or admin row id, depending on `role`.
    pub sub: i64,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

/// Who is calling. Each route demands one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User { user_id: i64 },
    Admin { admin_id: i64, role: Role },
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    expiry_seconds: u64,
}

impl TokenIssuer {
    pub fn new(secret: String) -> Result<Self> {
        if secret.is_empty() {
            return Err(ApiError::Config("JWT_SECRET must not be empty".into()));
        }
        if secret.len() < 32 {
            warn!("JWT_SECRET is shorter than 32 characters");
        }
        Ok(Self {
            secret,
            expiry_seconds: TOKEN_EXPIRY_SECS,
        })
    }

    pub fn issue(&self, subject: i64, role: Role) -> Result<String> {
        let now = unix_now()?;
        self.sign(&Claims {
            sub: subject,
            role,
            iat: now,
            exp: now + self.expiry_seconds,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(format!("Failed to generate token: {e}")))
    }

    fn decode(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let message = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired. Login Again",
                _ => "Invalid or expired token",
            };
            ApiError::Unauthorized(message.into())
        })
    }

    pub fn verify_user_token(&self, token: &str) -> Result<Identity> {
        let claims = self.decode(token)?;
        match claims.role {
            Role::Ngo => Ok(Identity::User {
                user_id: claims.sub,
            }),
            Role::Admin => Err(ApiError::Forbidden(
                "Forbidden: NGO account required".into(),
            )),
        }
    }

    pub fn verify_admin_token(&self, token: &str) -> Result<Identity> {
        let claims = self.decode(token)?;
        match claims.role {
            Role::Admin => Ok(Identity::Admin {
                admin_id: claims.sub,
                role: claims.role,
            }),
            Role::Ngo => Err(ApiError::Forbidden(
                "Forbidden: Admin access required".into(),
            )),
        }
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| ApiError::Internal(format!("System time error: {e}")))
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

/// Token from the scheme's own header, or `Authorization: Bearer`.
fn token_from(parts: &Parts, header: &str) -> Result<String> {
    let direct = parts.headers.get(header).and_then(|v| v.to_str().ok());
    let bearer = || {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    };
    direct
        .or_else(bearer)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Not Authorized. Login Again".into()))
}

/// An authenticated NGO account.
#[derive(Debug, Clone, Copy)]
pub struct UserAuth {
    pub user_id: i64,
}

/// An authenticated admin.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth {
    pub admin_id: i64,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserAuth
where
    TokenIssuer: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let token = token_from(parts, USER_TOKEN_HEADER)?;
        match TokenIssuer::from_ref(state).verify_user_token(&token)? {
            Identity::User { user_id } => Ok(UserAuth { user_id }),
            Identity::Admin { .. } => Err(ApiError::Forbidden(
                "Forbidden: NGO account required".into(),
            )),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    TokenIssuer: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let token = token_from(parts, ADMIN_TOKEN_HEADER)?;
        match TokenIssuer::from_ref(state).verify_admin_token(&token)? {
            Identity::Admin { admin_id, role } => Ok(AdminAuth { admin_id, role }),
            Identity::User { .. } => Err(ApiError::Forbidden(
                "Forbidden: Admin access required".into(),
            )),
        }
    }
}
