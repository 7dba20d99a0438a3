//! Token validation.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::claims::Claims;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("access token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,
}

/// Verification seam; the HTTP layer holds this as a trait object so tests
/// can swap key material.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 verification with a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // `exp` and our own typed fields are all we require.
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header};
    use mercato_core::UserId;

    use crate::roles::Role;

    use super::*;

    fn mint(secret: &str, claims: &Claims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp_offset: i64) -> Claims {
        Claims {
            user_id: UserId::new(7),
            username: "alice".into(),
            jti: "t-1".into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            roles: [Role::Courier].into_iter().collect(),
        }
    }

    #[test]
    fn valid_token_roundtrips() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("secret", &claims(600));

        let got = validator.validate(&token).unwrap();
        assert_eq!(got.user_id, UserId::new(7));
        assert!(got.roles.contains(&Role::Courier));
    }

    #[test]
    fn expired_token_is_distinguished() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("secret", &claims(-600));

        assert_eq!(validator.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn wrong_key_is_invalid() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("other", &claims(600));

        assert_eq!(validator.validate(&token), Err(TokenError::Invalid));
    }
}
