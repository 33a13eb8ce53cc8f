//! Access tokens
//!
//! HS256 JWTs carrying the user id (`sub`), email and role. Tokens are
//! stateless: refreshing issues a new token, nothing is revoked server-side.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::models::User;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token generation failed: {0}")]
    GenerationFailed(String),
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::GenerationFailed(msg) => AppError::Internal(msg),
            _ => AppError::Unauthorized("Could not validate credentials".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_minutes: i64,
}

impl JwtService {
    pub fn new(secret: &str, expiration_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_minutes,
        }
    }

    /// Token lifetime in seconds
    pub fn expires_in(&self) -> i64 {
        self.expiration_minutes * 60
    }

    pub fn generate_token(&self, user: &User, now: DateTime<Utc>) -> Result<String, JwtError> {
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role.clone(),
            exp: (now + Duration::minutes(self.expiration_minutes)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::GenerationFailed(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    /// "Bearer <token>" -> "<token>"
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SECRET: &str = "a-test-secret-that-is-long-enough-for-hs256";

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "grace@example.com".to_string(),
            username: "grace".to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            hashed_password: String::new(),
            role: "admin".to_string(),
            is_active: true,
            is_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn token_round_trips_claims() {
        let jwt = JwtService::new(SECRET, 30);
        let user = user();
        let now = Utc::now();
        let token = jwt.generate_token(&user, now).unwrap();

        let claims = jwt.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, "grace@example.com");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.exp - claims.iat, 30 * 60);
        assert_eq!(jwt.expires_in(), 1800);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let jwt = JwtService::new(SECRET, 30);
        let issued = Utc::now() - Duration::hours(2);
        let token = jwt.generate_token(&user(), issued).unwrap();
        assert!(matches!(
            jwt.validate_token(&token),
            Err(JwtError::ExpiredToken)
        ));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let other = JwtService::new("some-other-secret-also-long-enough-1234", 30);
        let token = other.generate_token(&user(), Utc::now()).unwrap();
        let err = JwtService::new(SECRET, 30).validate_token(&token).unwrap_err();
        assert!(matches!(err, JwtError::InvalidSignature));
        assert!(matches!(AppError::from(err), AppError::Unauthorized(_)));
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(JwtService::extract_from_header("Bearer abc.def"), Some("abc.def"));
        assert_eq!(JwtService::extract_from_header("Basic abc"), None);
        assert_eq!(JwtService::extract_from_header("Bearer "), None);
    }
}
