//! JWT token generation and validation
//!
//! Tokens are HS256-signed and carry the user id, username and role, so
//! request handling can authorize without a second lookup until the user
//! row itself is needed.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Claims embedded in every issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub username: String,
    pub role: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// What a caller provides to mint a token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: i64,
    pub username: String,
    pub role: String,
}

/// Outcome of verifying a presented token
#[derive(Debug, Clone)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
}

/// Issues and verifies HS256 tokens with a shared secret
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: &str, expiry_seconds: u64) -> Result<Self, ApiError> {
        if secret.is_empty() {
            return Err(ApiError::Config("JWT secret must not be empty".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            expiry_seconds,
        })
    }

    /// Mint a token for an authenticated user
    pub fn generate_token(&self, input: TokenInput) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: input.user_id,
            username: input.username,
            role: input.role,
            iat: now,
            exp: now + self.expiry_seconds as i64,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Auth(format!("Failed to generate token: {e}")))
    }

    /// Verify a presented token. Expired or tampered tokens come back
    /// invalid with no claims rather than as an error.
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => TokenValidationResult {
                valid: true,
                claims: Some(data.claims),
            },
            Err(_) => TokenValidationResult {
                valid: false,
                claims: None,
            },
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }
}

/// Pull the bearer token out of an Authorization header value
pub fn extract_token_from_header(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-not-for-production";

    fn validator() -> JwtValidator {
        JwtValidator::new(SECRET, 3600).unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_claims() {
        let v = validator();
        let token = v
            .generate_token(TokenInput {
                user_id: 42,
                username: "alice".to_string(),
                role: "patient".to_string(),
            })
            .unwrap();

        let result = v.verify_token(&token);
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, "patient");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let v = validator();
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: 1,
            username: "old".to_string(),
            role: "patient".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let result = v.verify_token(&token);
        assert!(!result.valid);
        assert!(result.claims.is_none());
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = validator()
            .generate_token(TokenInput {
                user_id: 1,
                username: "alice".to_string(),
                role: "patient".to_string(),
            })
            .unwrap();

        let other = JwtValidator::new("a-completely-different-secret", 3600).unwrap();
        assert!(!other.verify_token(&token).valid);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(JwtValidator::new("", 3600).is_err());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_token_from_header("Bearer "), None);
        assert_eq!(extract_token_from_header("Token abc123"), None);
        assert_eq!(extract_token_from_header("abc123"), None);
    }
}
