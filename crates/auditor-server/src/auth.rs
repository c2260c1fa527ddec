//! Dashboard authentication.
//!
//! - Passwords are stored as Argon2id PHC strings
//! - Sessions are HS256 JWTs whose `sub` is the user's email
//! - [`AuthUser`] resolves the bearer token on every `/api` request into the
//!   [`Principal`] passed to the accounting services

use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use auditor_core::{AuditorError, AuditorResult, Principal, User, UserProfile};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Hash a password into a PHC string
pub fn hash_password(password: &str) -> AuditorResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuditorError::internal(format!("password hashing failed: {e}")))
}

/// Check a password against a stored PHC string.
///
/// Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Throwaway hash verified against when a login names no known user
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("dummy-password-for-unknown-users").unwrap_or_default());

/// Verify a login password. With no stored hash the same Argon2 work runs
/// against [`DUMMY_HASH`] and the result is always `false`, so unknown and
/// known emails take equally long to reject.
pub fn verify_login(password: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(stored) => verify_password(password, stored),
        None => {
            let _ = verify_password(password, &DUMMY_HASH);
            false
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User email
    pub sub: String,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

/// Response of `POST /api/auth/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed JWT
    pub access_token: String,
    /// Always `bearer`
    pub token_type: String,
}

/// Issues and verifies session tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiration: Duration,
}

impl TokenService {
    /// Create a service signing with `secret`
    pub fn new(secret: &SecretString, expiration: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation: Validation::new(Algorithm::HS256),
            expiration,
        }
    }

    /// Sign a token for `email`
    pub fn issue(&self, email: &str) -> AuditorResult<TokenResponse> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.expiration.as_secs()).unwrap_or(i64::MAX);
        self.sign(&Claims {
            sub: email.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
        })
    }

    /// Sign arbitrary claims
    pub fn sign(&self, claims: &Claims) -> AuditorResult<TokenResponse> {
        let access_token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuditorError::internal(format!("token signing failed: {e}")))?;
        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
        })
    }

    /// Verify signature and expiry
    pub fn verify(&self, token: &str) -> AuditorResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "JWT validation failed");
                AuditorError::auth("Could not validate credentials")
            })
    }
}

/// The authenticated dashboard user of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Scope passed to the accounting services
    pub principal: Principal,
    /// Public profile
    pub profile: UserProfile,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            principal: Principal::from(user),
            profile: UserProfile::from(user),
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError::unauthorized("Invalid Authorization format. Expected: Bearer <token>")
        })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = state.tokens.verify(bearer_token(parts)?)?;

        let user = state
            .store
            .find_user_by_email(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;

        if !user.is_active {
            return Err(ApiError::unauthorized("Inactive user"));
        }
        Ok(Self::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            &SecretString::new("unit-test-secret".to_string()),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("admin123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("admin124", &hash));
        assert!(!verify_password("admin123", "not-a-phc-string"));
    }

    #[test]
    fn test_login_without_user_runs_argon2_and_fails() {
        assert!(DUMMY_HASH.starts_with("$argon2"));
        assert!(!verify_login("admin123", None));
        assert!(!verify_login("dummy-password-for-unknown-users", None));

        let hash = hash_password("admin123").unwrap();
        assert!(verify_login("admin123", Some(&hash)));
        assert!(!verify_login("admin124", Some(&hash)));
    }

    #[test]
    fn test_token_round_trip() {
        let tokens = service();
        let issued = tokens.issue("admin@local").unwrap();
        assert_eq!(issued.token_type, "bearer");

        let claims = tokens.verify(&issued.access_token).unwrap();
        assert_eq!(claims.sub, "admin@local");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_and_foreign_tokens_are_rejected() {
        let tokens = service();
        let now = Utc::now().timestamp();
        let expired = tokens
            .sign(&Claims {
                sub: "admin@local".to_string(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert!(matches!(
            tokens.verify(&expired.access_token),
            Err(AuditorError::Auth(_))
        ));

        let other = TokenService::new(
            &SecretString::new("another-secret".to_string()),
            Duration::from_secs(3600),
        );
        let foreign = other.issue("admin@local").unwrap();
        assert!(tokens.verify(&foreign.access_token).is_err());
        assert!(tokens.verify("garbage").is_err());
    }
}
